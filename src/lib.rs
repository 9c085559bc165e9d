pub mod cli;
pub mod controllers;
pub mod error;
pub mod models;
pub mod views;

// Re-exports for convenience
pub use controllers::{FeedController, FeedCursor, PageLoad};
pub use error::FeedError;
pub use models::{
    Collection, Comment, Entity, EntityCache, EntityRef, FeedConfig, MemoryStore, Post,
    RealtimeStore, Reply, UserSnapshot,
};
pub use views::{Projector, RecordingProjector};
