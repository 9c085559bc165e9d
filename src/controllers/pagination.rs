use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::controllers::subscriptions::SubscriptionManager;
use crate::error::FeedError;
use crate::models::cache::EntityCache;
use crate::models::entity::{Collection, Entity, Post, POSTS_PATH};
use crate::models::store::RealtimeStore;
use crate::views::projector::Projector;

/// Bookmark into the root collection: the last appended item's sort key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeedCursor {
    pub last_key: String,
    pub last_timestamp: i64,
    pub exhausted: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageLoad {
    /// A page settled; the count is the number of newly appended posts.
    Loaded(usize),
    /// Dropped: another load was already in flight.
    AlreadyLoading,
    /// Dropped: the collection is fully loaded.
    Exhausted,
}

/// Loads the feed's history page by page underneath the live stream.
///
/// Pages walk the root collection ascending by (timestamp, id) from the
/// oldest unseen item, so the cursor's timestamp never decreases. A page
/// shorter than `page_size` is the exhaustion signal. Items that arrived
/// through the live listener while the page was in flight are skipped, not
/// appended twice; the live path alone decides what is prepended.
pub struct PaginationController {
    store: Arc<dyn RealtimeStore>,
    cache: Arc<EntityCache>,
    projector: Arc<dyn Projector>,
    subscriptions: Arc<SubscriptionManager>,
    cursor: Mutex<FeedCursor>,
    loading: AtomicBool,
    page_size: usize,
}

impl PaginationController {
    pub fn new(
        store: Arc<dyn RealtimeStore>,
        cache: Arc<EntityCache>,
        projector: Arc<dyn Projector>,
        subscriptions: Arc<SubscriptionManager>,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            cache,
            projector,
            subscriptions,
            cursor: Mutex::new(FeedCursor::default()),
            loading: AtomicBool::new(false),
            page_size: page_size.max(1),
        }
    }

    pub fn cursor(&self) -> FeedCursor {
        self.cursor.lock().unwrap().clone()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.lock().unwrap().exhausted
    }

    /// Fetch and append the next page. Non-reentrant: a call that arrives
    /// while another is in flight is dropped, not queued.
    pub async fn load_page(&self) -> Result<PageLoad, FeedError> {
        if self.is_exhausted() {
            return Ok(PageLoad::Exhausted);
        }
        if self.loading.swap(true, Ordering::SeqCst) {
            return Ok(PageLoad::AlreadyLoading);
        }
        let result = self.load_page_inner().await;
        self.loading.store(false, Ordering::SeqCst);
        if let Err(err) = &result {
            self.projector
                .on_inline_error("feed", &format!("could not load more posts: {}", err));
        }
        result
    }

    async fn load_page_inner(&self) -> Result<PageLoad, FeedError> {
        let start_at = {
            let cursor = self.cursor.lock().unwrap();
            if cursor.last_key.is_empty() {
                None
            } else {
                Some((cursor.last_timestamp, cursor.last_key.clone()))
            }
        };
        let first_load = start_at.is_none();

        // One extra item: the inclusive start repeats the boundary item.
        let mut fetched = self
            .store
            .read_page(POSTS_PATH, start_at.clone(), self.page_size + 1)
            .await?;
        if let Some((_, boundary)) = &start_at {
            if fetched.first().map(|(id, _)| id == boundary).unwrap_or(false) {
                fetched.remove(0);
            }
        }

        if first_load && fetched.is_empty() {
            let mut cursor = self.cursor.lock().unwrap();
            cursor.exhausted = true;
            drop(cursor);
            self.projector.on_feed_empty();
            return Ok(PageLoad::Loaded(0));
        }

        let fetched: Vec<_> = fetched.into_iter().take(self.page_size).collect();
        let short_page = fetched.len() < self.page_size;

        let mut appended: Vec<Entity> = Vec::new();
        let mut last_seen: Option<(i64, String)> = None;
        for (id, value) in fetched {
            let post = match Post::from_child(&id, &value) {
                Ok(post) => post,
                Err(err) => {
                    log::warn!("skipping malformed post {} in page: {}", id, err);
                    continue;
                }
            };
            last_seen = Some((post.timestamp, id.clone()));
            // Already rendered via the live listener while this page was in
            // flight; the cache is the oracle, not the rendered output.
            if self.cache.contains(Collection::Posts, &id) {
                continue;
            }
            self.cache.upsert(Entity::Post(post.clone()));
            self.subscriptions.watch_comments(&id);
            appended.push(Entity::Post(post));
        }

        {
            let mut cursor = self.cursor.lock().unwrap();
            if let Some((timestamp, key)) = last_seen {
                cursor.last_timestamp = timestamp;
                cursor.last_key = key;
            }
            if short_page {
                cursor.exhausted = true;
            }
        }

        if !appended.is_empty() {
            self.projector.on_page_appended(&appended);
        }
        Ok(PageLoad::Loaded(appended.len()))
    }
}
