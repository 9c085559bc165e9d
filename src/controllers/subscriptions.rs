use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

use crate::models::cache::{EchoOutcome, EntityCache};
use crate::models::entity::{
    comments_path, replies_path, Collection, Comment, Entity, Post, Reply, POSTS_PATH,
};
use crate::models::store::{ChildHandlers, ListenerHandle, RealtimeStore, ReplayPolicy};
use crate::views::projector::Projector;

/// Owns every live listener of the feed.
///
/// One entry per concrete path; attaching a path that is already live is a
/// no-op, which is what prevents the same child event from running the
/// render path twice. Watching a post cascades into watching its comments,
/// and each observed comment cascades into watching its replies, so nested
/// data stays live without polling.
///
/// Listener callbacks never propagate errors: malformed payloads are logged
/// and skipped, everything else is routed through the cache's reconcile
/// rules and the projector.
pub struct SubscriptionManager {
    store: Arc<dyn RealtimeStore>,
    cache: Arc<EntityCache>,
    projector: Arc<dyn Projector>,
    // Handed to listener closures so cascades can reach back here without
    // keeping the manager alive through the store.
    me: Weak<SubscriptionManager>,
    // None marks a path whose subscribe call is still in progress.
    listeners: Mutex<HashMap<String, Option<ListenerHandle>>>,
}

impl SubscriptionManager {
    pub fn new(
        store: Arc<dyn RealtimeStore>,
        cache: Arc<EntityCache>,
        projector: Arc<dyn Projector>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            store,
            cache,
            projector,
            me: me.clone(),
            listeners: Mutex::new(HashMap::new()),
        })
    }

    /// Attach a listener unless the path is already live. Returns whether a
    /// new listener was installed.
    fn attach(&self, path: &str, replay: ReplayPolicy, handlers: ChildHandlers) -> bool {
        {
            let mut listeners = self.listeners.lock().unwrap();
            if listeners.contains_key(path) {
                return false;
            }
            // Reserve the path first: subscribing may replay existing
            // children synchronously, and those callbacks can re-enter.
            listeners.insert(path.to_string(), None);
        }
        let handle = self.store.subscribe_children(path, replay, handlers);
        let mut listeners = self.listeners.lock().unwrap();
        match listeners.get_mut(path) {
            Some(slot) => {
                *slot = Some(handle);
                true
            }
            None => {
                // Detached while the subscribe was in progress.
                drop(listeners);
                self.store.unsubscribe(handle);
                false
            }
        }
    }

    pub fn detach(&self, path: &str) {
        let slot = self.listeners.lock().unwrap().remove(path);
        if let Some(Some(handle)) = slot {
            self.store.unsubscribe(handle);
        }
    }

    pub fn detach_all(&self) {
        let handles: Vec<Option<ListenerHandle>> = {
            let mut listeners = self.listeners.lock().unwrap();
            listeners.drain().map(|(_, slot)| slot).collect()
        };
        for handle in handles.into_iter().flatten() {
            self.store.unsubscribe(handle);
        }
    }

    pub fn is_listening(&self, path: &str) -> bool {
        self.listeners.lock().unwrap().contains_key(path)
    }

    pub fn listening_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Start the root listener. History arrives through pagination, so only
    /// genuinely new posts are delivered here.
    pub fn watch_feed(&self) {
        let added = self.me.clone();
        let changed = self.me.clone();
        let removed = self.me.clone();
        let handlers = ChildHandlers::new(
            Arc::new(move |id: &str, value: &Value| {
                if let Some(mgr) = added.upgrade() {
                    mgr.post_added(id, value);
                }
            }),
            Arc::new(move |id: &str, value: &Value| {
                if let Some(mgr) = changed.upgrade() {
                    mgr.post_changed(id, value);
                }
            }),
            Arc::new(move |id: &str, _value: &Value| {
                if let Some(mgr) = removed.upgrade() {
                    mgr.post_removed(id);
                }
            }),
        );
        self.attach(POSTS_PATH, ReplayPolicy::NewOnly, handlers);
    }

    /// Watch a post's comments. Existing comments replay as add events,
    /// which is how nested data populates when a post enters the feed.
    pub fn watch_comments(&self, post_id: &str) {
        let path = comments_path(post_id);
        let added = (self.me.clone(), post_id.to_string());
        let changed = (self.me.clone(), post_id.to_string());
        let removed = (self.me.clone(), post_id.to_string());
        let handlers = ChildHandlers::new(
            Arc::new(move |id: &str, value: &Value| {
                if let Some(mgr) = added.0.upgrade() {
                    mgr.comment_added(&added.1, id, value);
                }
            }),
            Arc::new(move |id: &str, value: &Value| {
                if let Some(mgr) = changed.0.upgrade() {
                    mgr.comment_changed(&changed.1, id, value);
                }
            }),
            Arc::new(move |id: &str, _value: &Value| {
                if let Some(mgr) = removed.0.upgrade() {
                    mgr.comment_removed(&removed.1, id);
                }
            }),
        );
        self.attach(&path, ReplayPolicy::All, handlers);
    }

    /// Watch one comment's replies (single nesting level).
    pub fn watch_replies(&self, post_id: &str, comment_id: &str) {
        let path = replies_path(post_id, comment_id);
        let ids = (post_id.to_string(), comment_id.to_string());
        let added = (self.me.clone(), ids.clone());
        let changed = (self.me.clone(), ids);
        let removed = self.me.clone();
        let handlers = ChildHandlers::new(
            Arc::new(move |id: &str, value: &Value| {
                if let Some(mgr) = added.0.upgrade() {
                    mgr.reply_added(&added.1 .0, &added.1 .1, id, value);
                }
            }),
            Arc::new(move |id: &str, value: &Value| {
                if let Some(mgr) = changed.0.upgrade() {
                    mgr.reply_changed(&changed.1 .0, &changed.1 .1, id, value);
                }
            }),
            Arc::new(move |id: &str, _value: &Value| {
                if let Some(mgr) = removed.upgrade() {
                    mgr.reply_removed(id);
                }
            }),
        );
        self.attach(&path, ReplayPolicy::All, handlers);
    }

    /// Map a reconcile outcome to a projector notification. An echo of our
    /// own write is a normal merge, not worth announcing as new.
    fn announce(&self, collection: Collection, id: &str, outcome: EchoOutcome) {
        let is_new = match outcome {
            EchoOutcome::Inserted => true,
            EchoOutcome::Updated | EchoOutcome::Merged => false,
            EchoOutcome::Suppressed => return,
        };
        if let Some(entity) = self.cache.get(collection, id) {
            self.projector
                .on_entity_upserted(collection, id, &entity, is_new);
        }
    }

    fn post_added(&self, id: &str, value: &Value) {
        let post = match Post::from_child(id, value) {
            Ok(post) => post,
            Err(err) => {
                log::warn!("dropping malformed post {}: {}", id, err);
                return;
            }
        };
        let outcome = self.cache.confirm_added(Entity::Post(post));
        self.announce(Collection::Posts, id, outcome);
        self.watch_comments(id);
    }

    fn post_changed(&self, id: &str, value: &Value) {
        let post = match Post::from_child(id, value) {
            Ok(post) => post,
            Err(err) => {
                log::warn!("dropping malformed post update {}: {}", id, err);
                return;
            }
        };
        let outcome = self.cache.apply_changed(Entity::Post(post));
        self.announce(Collection::Posts, id, outcome);
    }

    fn post_removed(&self, id: &str) {
        // Drop nested watchers and entities before the post itself.
        for comment in self.cache.list(Collection::Comments, Some(id)) {
            self.detach(&replies_path(id, comment.id()));
            for reply in self.cache.list(Collection::Replies, Some(comment.id())) {
                self.cache.remove(Collection::Replies, reply.id());
            }
            self.cache.remove(Collection::Comments, comment.id());
        }
        self.detach(&comments_path(id));
        if self.cache.remove(Collection::Posts, id).is_some() {
            self.projector.on_entity_removed(Collection::Posts, id);
        }
    }

    fn comment_added(&self, post_id: &str, id: &str, value: &Value) {
        let comment = match Comment::from_child(post_id, id, value) {
            Ok(comment) => comment,
            Err(err) => {
                log::warn!("dropping malformed comment {} on {}: {}", id, post_id, err);
                return;
            }
        };
        let outcome = self.cache.confirm_added(Entity::Comment(comment));
        self.announce(Collection::Comments, id, outcome);
        self.watch_replies(post_id, id);
    }

    fn comment_changed(&self, post_id: &str, id: &str, value: &Value) {
        let comment = match Comment::from_child(post_id, id, value) {
            Ok(comment) => comment,
            Err(err) => {
                log::warn!("dropping malformed comment update {}: {}", id, err);
                return;
            }
        };
        let outcome = self.cache.apply_changed(Entity::Comment(comment));
        self.announce(Collection::Comments, id, outcome);
    }

    fn comment_removed(&self, post_id: &str, id: &str) {
        self.detach(&replies_path(post_id, id));
        for reply in self.cache.list(Collection::Replies, Some(id)) {
            self.cache.remove(Collection::Replies, reply.id());
        }
        if self.cache.remove(Collection::Comments, id).is_some() {
            self.projector.on_entity_removed(Collection::Comments, id);
        }
    }

    fn reply_added(&self, post_id: &str, comment_id: &str, id: &str, value: &Value) {
        let reply = match Reply::from_child(post_id, comment_id, id, value) {
            Ok(reply) => reply,
            Err(err) => {
                log::warn!("dropping malformed reply {} on {}: {}", id, comment_id, err);
                return;
            }
        };
        let outcome = self.cache.confirm_added(Entity::Reply(reply));
        self.announce(Collection::Replies, id, outcome);
    }

    fn reply_changed(&self, post_id: &str, comment_id: &str, id: &str, value: &Value) {
        let reply = match Reply::from_child(post_id, comment_id, id, value) {
            Ok(reply) => reply,
            Err(err) => {
                log::warn!("dropping malformed reply update {}: {}", id, err);
                return;
            }
        };
        let outcome = self.cache.apply_changed(Entity::Reply(reply));
        self.announce(Collection::Replies, id, outcome);
    }

    fn reply_removed(&self, id: &str) {
        if self.cache.remove(Collection::Replies, id).is_some() {
            self.projector.on_entity_removed(Collection::Replies, id);
        }
    }
}
