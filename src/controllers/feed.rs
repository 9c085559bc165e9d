use std::sync::Arc;

use crate::controllers::mutations::MutationEngine;
use crate::controllers::pagination::{FeedCursor, PageLoad, PaginationController};
use crate::controllers::subscriptions::SubscriptionManager;
use crate::error::FeedError;
use crate::models::cache::EntityCache;
use crate::models::entity::{EntityRef, UserSnapshot};
use crate::models::store::RealtimeStore;
use crate::views::projector::Projector;

/// Wires the feed engine together from its injected collaborators: the
/// store adapter, the projector, and the acting user. Nothing is reached
/// through globals; drop the controller and `shutdown` to release every
/// listener.
pub struct FeedController {
    cache: Arc<EntityCache>,
    subscriptions: Arc<SubscriptionManager>,
    pagination: PaginationController,
    mutations: MutationEngine,
}

impl FeedController {
    pub fn new(
        store: Arc<dyn RealtimeStore>,
        projector: Arc<dyn Projector>,
        user: UserSnapshot,
        page_size: usize,
    ) -> Self {
        let cache = Arc::new(EntityCache::new());
        let subscriptions =
            SubscriptionManager::new(store.clone(), cache.clone(), projector.clone());
        let pagination = PaginationController::new(
            store.clone(),
            cache.clone(),
            projector.clone(),
            subscriptions.clone(),
            page_size,
        );
        let mutations = MutationEngine::new(store, cache.clone(), projector, subscriptions.clone(), user);
        Self {
            cache,
            subscriptions,
            pagination,
            mutations,
        }
    }

    /// Attach the live feed listener, then load the first page. The
    /// listener goes first so nothing slips between the two; a post that
    /// shows up in both is deduplicated by the page loader.
    pub async fn start(&self) -> Result<PageLoad, FeedError> {
        self.subscriptions.watch_feed();
        self.pagination.load_page().await
    }

    /// Scroll-triggered: fetch the next page unless one is already in
    /// flight or the history is exhausted.
    pub async fn request_next_page(&self) -> Result<PageLoad, FeedError> {
        self.pagination.load_page().await
    }

    pub async fn toggle_like(&self, target: &EntityRef) -> Result<Option<bool>, FeedError> {
        self.mutations.toggle_like(target).await
    }

    pub async fn submit_post(&self, content: &str) -> Result<String, FeedError> {
        self.mutations.submit_post(content).await
    }

    pub async fn submit_comment(&self, post_id: &str, text: &str) -> Result<String, FeedError> {
        self.mutations.submit_comment(post_id, text).await
    }

    pub async fn submit_reply(
        &self,
        post_id: &str,
        comment_id: &str,
        text: &str,
    ) -> Result<String, FeedError> {
        self.mutations.submit_reply(post_id, comment_id, text).await
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn cursor(&self) -> FeedCursor {
        self.pagination.cursor()
    }

    pub fn is_exhausted(&self) -> bool {
        self.pagination.is_exhausted()
    }

    pub fn current_user(&self) -> &UserSnapshot {
        self.mutations.user()
    }

    /// Detach every live listener.
    pub fn shutdown(&self) {
        self.subscriptions.detach_all();
    }
}
