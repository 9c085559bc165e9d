pub mod cache;
pub mod config;
pub mod entity;
pub mod memory;
pub mod store;

// Re-export important structs for convenience
pub use cache::{CacheEntry, EchoOutcome, EntityCache};
pub use config::FeedConfig;
pub use entity::{Collection, Comment, Entity, EntityRef, LikeRecord, Post, Reply, UserSnapshot};
pub use memory::MemoryStore;
pub use store::{ChildHandlers, ListenerHandle, RealtimeStore, ReplayPolicy};
