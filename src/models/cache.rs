use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::entity::{Collection, Entity, UserSnapshot};

/// Cached snapshot plus the number of local mutations that have not yet
/// round-tripped through the store.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub entity: Entity,
    pub optimistic: u32,
}

/// How an incoming listener event was reconciled against the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EchoOutcome {
    /// Previously unknown entity; render as new.
    Inserted,
    /// Known entity replaced wholesale by the authoritative snapshot.
    Updated,
    /// Echo of our own pending write; authoritative timestamp adopted,
    /// nothing new to render.
    Merged,
    /// Echo consumed while newer local state is still in flight.
    Suppressed,
}

/// In-memory source of truth for every entity the feed has seen.
///
/// One map per collection, keyed by id. Every mutation happens under the
/// collection's write lock as a single entry replacement, so a callback
/// re-entering the cache can never observe a half-applied update.
///
/// Echo rule: local mutations bump `optimistic`; while the counter is
/// positive, change echoes for that entity are consumed without overwriting
/// the newer local state. At zero, an echo replaces the snapshot wholesale
/// (the likes map is a set, so replacement is idempotent).
pub struct EntityCache {
    posts: RwLock<HashMap<String, CacheEntry>>,
    comments: RwLock<HashMap<String, CacheEntry>>,
    replies: RwLock<HashMap<String, CacheEntry>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self {
            posts: RwLock::new(HashMap::new()),
            comments: RwLock::new(HashMap::new()),
            replies: RwLock::new(HashMap::new()),
        }
    }

    fn map(&self, collection: Collection) -> &RwLock<HashMap<String, CacheEntry>> {
        match collection {
            Collection::Posts => &self.posts,
            Collection::Comments => &self.comments,
            Collection::Replies => &self.replies,
        }
    }

    pub fn get(&self, collection: Collection, id: &str) -> Option<Entity> {
        self.map(collection)
            .read()
            .unwrap()
            .get(id)
            .map(|e| e.entity.clone())
    }

    pub fn contains(&self, collection: Collection, id: &str) -> bool {
        self.map(collection).read().unwrap().contains_key(id)
    }

    pub fn optimistic(&self, collection: Collection, id: &str) -> u32 {
        self.map(collection)
            .read()
            .unwrap()
            .get(id)
            .map(|e| e.optimistic)
            .unwrap_or(0)
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.map(collection).read().unwrap().len()
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }

    /// Insert or replace a settled snapshot. A pending entry keeps its
    /// in-flight counter.
    pub fn upsert(&self, entity: Entity) {
        let collection = entity.collection();
        let id = entity.id().to_string();
        let mut map = self.map(collection).write().unwrap();
        let optimistic = map.get(&id).map(|e| e.optimistic).unwrap_or(0);
        map.insert(id, CacheEntry { entity, optimistic });
    }

    /// Insert a locally-created entity whose write is still in flight.
    pub fn insert_pending(&self, entity: Entity) {
        let collection = entity.collection();
        let id = entity.id().to_string();
        self.map(collection).write().unwrap().insert(
            id,
            CacheEntry {
                entity,
                optimistic: 1,
            },
        );
    }

    pub fn remove(&self, collection: Collection, id: &str) -> Option<Entity> {
        self.map(collection)
            .write()
            .unwrap()
            .remove(id)
            .map(|e| e.entity)
    }

    /// All entities of a collection, optionally filtered to one parent.
    /// Unsorted; consumers apply their own order.
    pub fn list(&self, collection: Collection, parent_id: Option<&str>) -> Vec<Entity> {
        self.map(collection)
            .read()
            .unwrap()
            .values()
            .filter(|e| match parent_id {
                Some(parent) => e.entity.parent_id() == Some(parent),
                None => true,
            })
            .map(|e| e.entity.clone())
            .collect()
    }

    /// Reconcile a child-added event. An add for an entity we created
    /// locally is the echo of our own write: keep the local snapshot, adopt
    /// the authoritative server timestamp, and report nothing new.
    pub fn confirm_added(&self, echo: Entity) -> EchoOutcome {
        let collection = echo.collection();
        let id = echo.id().to_string();
        let mut map = self.map(collection).write().unwrap();
        match map.get_mut(&id) {
            Some(entry) if entry.optimistic > 0 => {
                entry.optimistic -= 1;
                entry.entity.set_timestamp(echo.timestamp());
                EchoOutcome::Merged
            }
            Some(entry) => {
                entry.entity = echo;
                EchoOutcome::Updated
            }
            None => {
                map.insert(
                    id,
                    CacheEntry {
                        entity: echo,
                        optimistic: 0,
                    },
                );
                EchoOutcome::Inserted
            }
        }
    }

    /// Reconcile a child-changed event against any in-flight local state.
    pub fn apply_changed(&self, echo: Entity) -> EchoOutcome {
        let collection = echo.collection();
        let id = echo.id().to_string();
        let mut map = self.map(collection).write().unwrap();
        match map.get_mut(&id) {
            Some(entry) if entry.optimistic > 0 => {
                entry.optimistic -= 1;
                EchoOutcome::Suppressed
            }
            Some(entry) => {
                entry.entity = echo;
                EchoOutcome::Updated
            }
            None => {
                map.insert(
                    id,
                    CacheEntry {
                        entity: echo,
                        optimistic: 0,
                    },
                );
                EchoOutcome::Inserted
            }
        }
    }

    /// Flip a like locally ahead of the remote write. Returns the updated
    /// snapshot and whether the entity is now liked.
    pub fn apply_like_local(
        &self,
        collection: Collection,
        id: &str,
        user: &UserSnapshot,
        timestamp: i64,
    ) -> Option<(Entity, bool)> {
        let mut map = self.map(collection).write().unwrap();
        let entry = map.get_mut(id)?;
        let now_liked = entry.entity.toggle_like_entry(user, timestamp);
        entry.optimistic += 1;
        Some((entry.entity.clone(), now_liked))
    }

    /// Undo a local like flip whose remote write failed. The flip's echo
    /// will never arrive, so the in-flight counter comes back down too.
    pub fn revert_like_local(
        &self,
        collection: Collection,
        id: &str,
        user: &UserSnapshot,
        timestamp: i64,
    ) -> Option<Entity> {
        let mut map = self.map(collection).write().unwrap();
        let entry = map.get_mut(id)?;
        entry.entity.toggle_like_entry(user, timestamp);
        entry.optimistic = entry.optimistic.saturating_sub(1);
        Some(entry.entity.clone())
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entity::Post;

    fn user(id: &str) -> UserSnapshot {
        UserSnapshot {
            id: id.to_string(),
            name: format!("user {}", id),
            photo_url: None,
        }
    }

    fn post(id: &str, timestamp: i64) -> Entity {
        Entity::Post(Post {
            id: id.to_string(),
            author: user("author"),
            content: Some("hello".to_string()),
            image_url: None,
            timestamp,
            likes: Default::default(),
            likes_count: 0,
            comments_count: 0,
        })
    }

    #[test]
    fn add_echo_for_pending_entity_merges_without_duplicating() {
        let cache = EntityCache::new();
        cache.insert_pending(post("p1", 100));

        let mut echo = post("p1", 0);
        echo.set_timestamp(250);
        assert_eq!(cache.confirm_added(echo), EchoOutcome::Merged);

        assert_eq!(cache.len(Collection::Posts), 1);
        let entity = cache.get(Collection::Posts, "p1").unwrap();
        assert_eq!(entity.timestamp(), 250);
        assert_eq!(cache.optimistic(Collection::Posts, "p1"), 0);
    }

    #[test]
    fn add_for_unknown_entity_inserts() {
        let cache = EntityCache::new();
        assert_eq!(cache.confirm_added(post("p1", 5)), EchoOutcome::Inserted);
        assert_eq!(cache.confirm_added(post("p1", 5)), EchoOutcome::Updated);
        assert_eq!(cache.len(Collection::Posts), 1);
    }

    #[test]
    fn change_echoes_are_suppressed_while_local_state_is_ahead() {
        let cache = EntityCache::new();
        cache.upsert(post("p1", 5));
        let me = user("me");

        // Toggle on, then off. Both echoes are still in flight.
        cache.apply_like_local(Collection::Posts, "p1", &me, 10);
        cache.apply_like_local(Collection::Posts, "p1", &me, 11);
        assert_eq!(cache.optimistic(Collection::Posts, "p1"), 2);

        // Echoes arrive in swapped order; neither may overwrite.
        let mut liked = post("p1", 5);
        liked.toggle_like_entry(&me, 10);
        assert_eq!(cache.apply_changed(post("p1", 5)), EchoOutcome::Suppressed);
        assert_eq!(cache.apply_changed(liked), EchoOutcome::Suppressed);

        let entity = cache.get(Collection::Posts, "p1").unwrap();
        assert_eq!(entity.likes_count(), 0);
        assert!(!entity.liked_by("me"));

        // Settled: later echoes replace wholesale again.
        let mut relike = post("p1", 5);
        relike.toggle_like_entry(&user("other"), 12);
        assert_eq!(cache.apply_changed(relike), EchoOutcome::Updated);
        assert_eq!(
            cache.get(Collection::Posts, "p1").unwrap().likes_count(),
            1
        );
    }

    #[test]
    fn revert_restores_state_and_counter() {
        let cache = EntityCache::new();
        cache.upsert(post("p1", 5));
        let me = user("me");

        let (entity, now_liked) = cache
            .apply_like_local(Collection::Posts, "p1", &me, 10)
            .unwrap();
        assert!(now_liked);
        assert_eq!(entity.likes_count(), 1);

        let reverted = cache
            .revert_like_local(Collection::Posts, "p1", &me, 11)
            .unwrap();
        assert_eq!(reverted.likes_count(), 0);
        assert_eq!(cache.optimistic(Collection::Posts, "p1"), 0);
    }

    #[test]
    fn list_filters_by_parent() {
        let cache = EntityCache::new();
        let comment = |id: &str, post_id: &str| {
            Entity::Comment(crate::models::entity::Comment {
                id: id.to_string(),
                post_id: post_id.to_string(),
                author: user("a"),
                text: "hi".to_string(),
                timestamp: 1,
                likes: Default::default(),
                likes_count: 0,
            })
        };
        cache.upsert(comment("c1", "p1"));
        cache.upsert(comment("c2", "p1"));
        cache.upsert(comment("c3", "p2"));

        assert_eq!(cache.list(Collection::Comments, Some("p1")).len(), 2);
        assert_eq!(cache.list(Collection::Comments, Some("p2")).len(), 1);
        assert_eq!(cache.list(Collection::Comments, None).len(), 3);
    }
}
