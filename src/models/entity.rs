use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FeedError;

pub const POSTS_PATH: &str = "posts";

pub fn post_path(post_id: &str) -> String {
    format!("{}/{}", POSTS_PATH, post_id)
}

pub fn comments_path(post_id: &str) -> String {
    format!("{}/{}/comments", POSTS_PATH, post_id)
}

pub fn comment_path(post_id: &str, comment_id: &str) -> String {
    format!("{}/{}", comments_path(post_id), comment_id)
}

pub fn replies_path(post_id: &str, comment_id: &str) -> String {
    format!("{}/replies", comment_path(post_id, comment_id))
}

pub fn reply_path(post_id: &str, comment_id: &str, reply_id: &str) -> String {
    format!("{}/{}", replies_path(post_id, comment_id), reply_id)
}

/// Author data embedded into entities at write time, so rendering never
/// needs a profile lookup.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LikeRecord {
    pub timestamp: i64,
    pub user_name: String,
}

/// Likes are a set keyed by user id, never a bare counter. The count is
/// derived from the map so re-applying a snapshot cannot drift it.
pub type LikeMap = BTreeMap<String, LikeRecord>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Post {
    #[serde(default)]
    pub id: String,
    pub author: UserSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub likes: LikeMap,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub comments_count: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Comment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub post_id: String,
    pub author: UserSnapshot,
    pub text: String,
    pub timestamp: i64,
    #[serde(default)]
    pub likes: LikeMap,
    #[serde(default)]
    pub likes_count: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Reply {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub post_id: String,
    #[serde(default)]
    pub comment_id: String,
    pub author: UserSnapshot,
    pub text: String,
    pub timestamp: i64,
    #[serde(default)]
    pub likes: LikeMap,
    #[serde(default)]
    pub likes_count: i64,
}

impl Post {
    /// Parse a child event payload. The event key is authoritative for the
    /// id, whatever the payload carries.
    pub fn from_child(id: &str, value: &Value) -> Result<Post, FeedError> {
        let mut post: Post = serde_json::from_value(value.clone())?;
        post.id = id.to_string();
        Ok(post)
    }
}

impl Comment {
    /// Parse a child event payload; the parent id comes from the path.
    pub fn from_child(post_id: &str, id: &str, value: &Value) -> Result<Comment, FeedError> {
        let mut comment: Comment = serde_json::from_value(value.clone())?;
        comment.id = id.to_string();
        comment.post_id = post_id.to_string();
        Ok(comment)
    }
}

impl Reply {
    pub fn from_child(
        post_id: &str,
        comment_id: &str,
        id: &str,
        value: &Value,
    ) -> Result<Reply, FeedError> {
        let mut reply: Reply = serde_json::from_value(value.clone())?;
        reply.id = id.to_string();
        reply.post_id = post_id.to_string();
        reply.comment_id = comment_id.to_string();
        Ok(reply)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Posts,
    Comments,
    Replies,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Posts => "posts",
            Collection::Comments => "comments",
            Collection::Replies => "replies",
        }
    }
}

/// One of the three feed entities, with uniform access to the fields the
/// engine manipulates.
#[derive(Clone, Debug, PartialEq)]
pub enum Entity {
    Post(Post),
    Comment(Comment),
    Reply(Reply),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Entity::Post(p) => &p.id,
            Entity::Comment(c) => &c.id,
            Entity::Reply(r) => &r.id,
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            Entity::Post(_) => Collection::Posts,
            Entity::Comment(_) => Collection::Comments,
            Entity::Reply(_) => Collection::Replies,
        }
    }

    /// Id of the direct parent: a comment belongs to a post, a reply to a
    /// comment. Posts have no parent.
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Entity::Post(_) => None,
            Entity::Comment(c) => Some(&c.post_id),
            Entity::Reply(r) => Some(&r.comment_id),
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Entity::Post(p) => p.timestamp,
            Entity::Comment(c) => c.timestamp,
            Entity::Reply(r) => r.timestamp,
        }
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        match self {
            Entity::Post(p) => p.timestamp = timestamp,
            Entity::Comment(c) => c.timestamp = timestamp,
            Entity::Reply(r) => r.timestamp = timestamp,
        }
    }

    pub fn likes(&self) -> &LikeMap {
        match self {
            Entity::Post(p) => &p.likes,
            Entity::Comment(c) => &c.likes,
            Entity::Reply(r) => &r.likes,
        }
    }

    pub fn likes_count(&self) -> i64 {
        match self {
            Entity::Post(p) => p.likes_count,
            Entity::Comment(c) => c.likes_count,
            Entity::Reply(r) => r.likes_count,
        }
    }

    pub fn liked_by(&self, user_id: &str) -> bool {
        self.likes().contains_key(user_id)
    }

    /// Flip the like entry for `user` and rederive the count from the map.
    /// Returns whether the entity is liked by the user afterwards.
    pub fn toggle_like_entry(&mut self, user: &UserSnapshot, timestamp: i64) -> bool {
        let (likes, count) = match self {
            Entity::Post(p) => (&mut p.likes, &mut p.likes_count),
            Entity::Comment(c) => (&mut c.likes, &mut c.likes_count),
            Entity::Reply(r) => (&mut r.likes, &mut r.likes_count),
        };
        let now_liked = if likes.remove(&user.id).is_none() {
            likes.insert(
                user.id.clone(),
                LikeRecord {
                    timestamp,
                    user_name: user.name.clone(),
                },
            );
            true
        } else {
            false
        };
        *count = likes.len() as i64;
        now_liked
    }

    pub fn to_value(&self) -> Result<Value, FeedError> {
        let value = match self {
            Entity::Post(p) => serde_json::to_value(p)?,
            Entity::Comment(c) => serde_json::to_value(c)?,
            Entity::Reply(r) => serde_json::to_value(r)?,
        };
        Ok(value)
    }
}

/// Address of a likeable entity, resolvable to its store paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityRef {
    Post {
        post_id: String,
    },
    Comment {
        post_id: String,
        comment_id: String,
    },
    Reply {
        post_id: String,
        comment_id: String,
        reply_id: String,
    },
}

impl EntityRef {
    pub fn collection(&self) -> Collection {
        match self {
            EntityRef::Post { .. } => Collection::Posts,
            EntityRef::Comment { .. } => Collection::Comments,
            EntityRef::Reply { .. } => Collection::Replies,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EntityRef::Post { post_id } => post_id,
            EntityRef::Comment { comment_id, .. } => comment_id,
            EntityRef::Reply { reply_id, .. } => reply_id,
        }
    }

    /// Path of the entity node itself.
    pub fn node_path(&self) -> String {
        match self {
            EntityRef::Post { post_id } => post_path(post_id),
            EntityRef::Comment {
                post_id,
                comment_id,
            } => comment_path(post_id, comment_id),
            EntityRef::Reply {
                post_id,
                comment_id,
                reply_id,
            } => reply_path(post_id, comment_id, reply_id),
        }
    }
}
