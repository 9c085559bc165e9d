pub mod feed;
pub mod mutations;
pub mod pagination;
pub mod subscriptions;

// Re-export key types
pub use feed::FeedController;
pub use mutations::MutationEngine;
pub use pagination::{FeedCursor, PageLoad, PaginationController};
pub use subscriptions::SubscriptionManager;
