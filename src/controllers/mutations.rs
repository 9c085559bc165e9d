use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::controllers::subscriptions::SubscriptionManager;
use crate::error::FeedError;
use crate::models::cache::EntityCache;
use crate::models::entity::{
    comments_path, post_path, replies_path, Collection, Comment, Entity, EntityRef, Post, Reply,
    UserSnapshot, POSTS_PATH,
};
use crate::models::store::RealtimeStore;
use crate::views::projector::Projector;

/// Applies user actions locally first, issues the remote write, and leaves
/// echo reconciliation to the cache rules.
///
/// Failures are caught here and never reach the listener pipeline: the
/// optimistic change is rolled back, an inline error is surfaced, and the
/// error is returned so the caller can keep the user's input intact.
pub struct MutationEngine {
    store: Arc<dyn RealtimeStore>,
    cache: Arc<EntityCache>,
    projector: Arc<dyn Projector>,
    subscriptions: Arc<SubscriptionManager>,
    user: UserSnapshot,
}

impl MutationEngine {
    pub fn new(
        store: Arc<dyn RealtimeStore>,
        cache: Arc<EntityCache>,
        projector: Arc<dyn Projector>,
        subscriptions: Arc<SubscriptionManager>,
        user: UserSnapshot,
    ) -> Self {
        Self {
            store,
            cache,
            projector,
            subscriptions,
            user,
        }
    }

    pub fn user(&self) -> &UserSnapshot {
        &self.user
    }

    /// Toggle the current user's like on a post, comment or reply.
    ///
    /// The button state and count flip before the network round trip; the
    /// remote side is a transaction over the likes set, so the eventual
    /// echo replaces rather than re-applies and cannot double count.
    /// Returns the new liked state, or `None` when the entity is gone and
    /// the toggle degraded to a no-op.
    pub async fn toggle_like(&self, target: &EntityRef) -> Result<Option<bool>, FeedError> {
        let collection = target.collection();
        let id = target.id().to_string();
        let now = Utc::now().timestamp_millis();

        let Some((snapshot, now_liked)) =
            self.cache.apply_like_local(collection, &id, &self.user, now)
        else {
            // Nothing rendered to toggle; treat as a quiet no-op.
            return Ok(None);
        };
        self.projector
            .on_entity_upserted(collection, &id, &snapshot, false);

        let user_id = self.user.id.clone();
        let user_name = self.user.name.clone();
        let result = self
            .store
            .run_transaction(&target.node_path(), &move |current| {
                // Decide from the server's state, not the snapshot: the
                // likes map is a set, so this stays idempotent under
                // concurrent writers.
                let mut node = current?.as_object().cloned()?;
                let mut likes = node
                    .get("likes")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                if likes.remove(&user_id).is_none() {
                    let mut record = Map::new();
                    record.insert("timestamp".to_string(), Value::from(now));
                    record.insert("user_name".to_string(), Value::from(user_name.clone()));
                    likes.insert(user_id.clone(), Value::Object(record));
                }
                node.insert(
                    "likes_count".to_string(),
                    Value::from(likes.len() as i64),
                );
                node.insert("likes".to_string(), Value::Object(likes));
                Some(Value::Object(node))
            })
            .await;

        match result {
            Ok(Some(_)) => Ok(Some(now_liked)),
            Ok(None) => {
                // The entity vanished remotely: evict quietly.
                self.cache.remove(collection, &id);
                self.projector.on_entity_removed(collection, &id);
                Ok(None)
            }
            Err(err) => {
                if let Some(reverted) =
                    self.cache.revert_like_local(collection, &id, &self.user, now)
                {
                    self.projector
                        .on_entity_upserted(collection, &id, &reverted, false);
                }
                self.projector
                    .on_inline_error("like", &format!("could not update like: {}", err));
                Err(err)
            }
        }
    }

    /// Publish a new post. Rendered immediately under its push id; the add
    /// echo merges into the same element instead of inserting a second one.
    pub async fn submit_post(&self, content: &str) -> Result<String, FeedError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(FeedError::Validation("post content is empty".to_string()));
        }

        let id = self.store.push_id(POSTS_PATH);
        let post = Post {
            id: id.clone(),
            author: self.user.clone(),
            content: Some(content.to_string()),
            image_url: None,
            // Placeholder until the echo brings the server-assigned value.
            timestamp: Utc::now().timestamp_millis(),
            likes: Default::default(),
            likes_count: 0,
            comments_count: 0,
        };
        let value = Entity::Post(post.clone()).to_value()?;

        self.cache.insert_pending(Entity::Post(post.clone()));
        self.projector
            .on_entity_upserted(Collection::Posts, &id, &Entity::Post(post), true);
        self.subscriptions.watch_comments(&id);

        match self.store.write_child(POSTS_PATH, &id, value).await {
            Ok(()) => Ok(id),
            Err(err) => {
                self.cache.remove(Collection::Posts, &id);
                self.subscriptions.detach(&comments_path(&id));
                self.projector.on_entity_removed(Collection::Posts, &id);
                self.projector
                    .on_inline_error("post", &format!("could not publish post: {}", err));
                Err(err)
            }
        }
    }

    /// Submit a comment on a post. The caller clears its input only on
    /// success; on failure the typed text stays put.
    pub async fn submit_comment(&self, post_id: &str, text: &str) -> Result<String, FeedError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FeedError::Validation("comment text is empty".to_string()));
        }

        let path = comments_path(post_id);
        let id = self.store.push_id(&path);
        let comment = Comment {
            id: id.clone(),
            post_id: post_id.to_string(),
            author: self.user.clone(),
            text: text.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            likes: Default::default(),
            likes_count: 0,
        };
        let value = Entity::Comment(comment.clone()).to_value()?;

        self.cache.insert_pending(Entity::Comment(comment.clone()));
        self.projector.on_entity_upserted(
            Collection::Comments,
            &id,
            &Entity::Comment(comment),
            true,
        );
        self.subscriptions.watch_replies(post_id, &id);

        match self.store.write_child(&path, &id, value).await {
            Ok(()) => {
                self.bump_comment_count(post_id).await;
                Ok(id)
            }
            Err(err) => {
                self.cache.remove(Collection::Comments, &id);
                self.subscriptions.detach(&replies_path(post_id, &id));
                self.projector.on_entity_removed(Collection::Comments, &id);
                self.projector
                    .on_inline_error("comment", &format!("could not send comment: {}", err));
                Err(err)
            }
        }
    }

    /// Submit a reply to a comment. Replies nest exactly one level.
    pub async fn submit_reply(
        &self,
        post_id: &str,
        comment_id: &str,
        text: &str,
    ) -> Result<String, FeedError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FeedError::Validation("reply text is empty".to_string()));
        }

        let path = replies_path(post_id, comment_id);
        let id = self.store.push_id(&path);
        let reply = Reply {
            id: id.clone(),
            post_id: post_id.to_string(),
            comment_id: comment_id.to_string(),
            author: self.user.clone(),
            text: text.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            likes: Default::default(),
            likes_count: 0,
        };
        let value = Entity::Reply(reply.clone()).to_value()?;

        self.cache.insert_pending(Entity::Reply(reply.clone()));
        self.projector
            .on_entity_upserted(Collection::Replies, &id, &Entity::Reply(reply), true);

        match self.store.write_child(&path, &id, value).await {
            Ok(()) => Ok(id),
            Err(err) => {
                self.cache.remove(Collection::Replies, &id);
                self.projector.on_entity_removed(Collection::Replies, &id);
                self.projector
                    .on_inline_error("reply", &format!("could not send reply: {}", err));
                Err(err)
            }
        }
    }

    /// Counter update rides a transaction so concurrent commenters cannot
    /// lose increments. A failure here does not fail the submit: the
    /// comment itself is already durable.
    async fn bump_comment_count(&self, post_id: &str) {
        let result = self
            .store
            .run_transaction(&post_path(post_id), &|current| {
                let mut node = current?.as_object().cloned()?;
                let count = node
                    .get("comments_count")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                node.insert("comments_count".to_string(), Value::from(count + 1));
                Some(Value::Object(node))
            })
            .await;
        if let Err(err) = result {
            log::warn!("comment count update failed for {}: {}", post_id, err);
        }
    }
}
