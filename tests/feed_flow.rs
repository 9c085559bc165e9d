use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use livefeed::controllers::{FeedController, PageLoad};
use livefeed::error::FeedError;
use livefeed::models::entity::{comments_path, replies_path, POSTS_PATH};
use livefeed::models::{Collection, Entity, EntityRef, MemoryStore, RealtimeStore, UserSnapshot};
use livefeed::views::RecordingProjector;

fn viewer() -> UserSnapshot {
    UserSnapshot {
        id: "viewer".to_string(),
        name: "Viewer".to_string(),
        photo_url: None,
    }
}

fn post_value(n: usize) -> serde_json::Value {
    json!({
        "author": {"id": "author", "name": "Author"},
        "content": format!("post {}", n),
        "timestamp": n as i64,
        "likes": {},
        "likes_count": 0,
        "comments_count": 0,
    })
}

fn comment_value(text: &str, timestamp: i64) -> serde_json::Value {
    json!({
        "author": {"id": "author", "name": "Author"},
        "text": text,
        "timestamp": timestamp,
        "likes": {},
        "likes_count": 0,
    })
}

fn seed_posts(store: &MemoryStore, count: usize) {
    for n in 1..=count {
        store.seed_child(POSTS_PATH, &format!("p{:02}", n), post_value(n));
    }
}

fn fixture(
    seed: usize,
    page_size: usize,
) -> (Arc<MemoryStore>, Arc<RecordingProjector>, FeedController) {
    let store = Arc::new(MemoryStore::new());
    seed_posts(&store, seed);
    let projector = Arc::new(RecordingProjector::new());
    let feed = FeedController::new(store.clone(), projector.clone(), viewer(), page_size);
    (store, projector, feed)
}

#[tokio::test]
async fn pagination_loads_batches_until_exhausted() {
    let (_store, projector, feed) = fixture(25, 10);

    assert_eq!(feed.start().await.unwrap(), PageLoad::Loaded(10));
    let first = feed.cursor();
    assert_eq!(feed.request_next_page().await.unwrap(), PageLoad::Loaded(10));
    let second = feed.cursor();
    assert_eq!(feed.request_next_page().await.unwrap(), PageLoad::Loaded(5));
    let third = feed.cursor();

    assert!(feed.is_exhausted());
    assert_eq!(feed.request_next_page().await.unwrap(), PageLoad::Exhausted);

    // the cursor only ever moves forward
    assert!(first.last_timestamp <= second.last_timestamp);
    assert!(second.last_timestamp <= third.last_timestamp);

    let order = projector.feed_order();
    assert_eq!(order.len(), 25);
    let unique: HashSet<&String> = order.iter().collect();
    assert_eq!(unique.len(), 25, "duplicate ids across batches");
    assert_eq!(order.first().unwrap(), "p01");
    assert_eq!(order.last().unwrap(), "p25");
}

#[tokio::test]
async fn empty_feed_is_exhausted_immediately() {
    let (_store, projector, feed) = fixture(0, 10);
    assert_eq!(feed.start().await.unwrap(), PageLoad::Loaded(0));
    assert!(feed.is_exhausted());
    assert!(projector.saw_empty_feed());
}

#[tokio::test]
async fn overlapping_page_requests_issue_one_query() {
    let (store, _projector, feed) = fixture(30, 10);
    feed.start().await.unwrap();

    store.set_read_delay(Some(Duration::from_millis(30)));
    let before = store.page_read_count();
    let (a, b) = tokio::join!(feed.request_next_page(), feed.request_next_page());
    let outcomes = [a.unwrap(), b.unwrap()];

    assert!(outcomes.contains(&PageLoad::Loaded(10)));
    assert!(outcomes.contains(&PageLoad::AlreadyLoading));
    assert_eq!(store.page_read_count() - before, 1);
}

#[tokio::test]
async fn live_post_during_page_load_appears_once_prepended() {
    let (store, projector, feed) = fixture(15, 10);
    feed.start().await.unwrap();

    store.set_read_delay(Some(Duration::from_millis(40)));
    let page = feed.request_next_page();
    let live_write = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        store
            .write_child(POSTS_PATH, "live1", post_value(999))
            .await
            .unwrap();
    };
    let (page, _) = tokio::join!(page, live_write);
    assert_eq!(page.unwrap(), PageLoad::Loaded(5));

    let order = projector.feed_order();
    assert_eq!(order.len(), 16);
    assert_eq!(
        order.iter().filter(|id| id.as_str() == "live1").count(),
        1,
        "live post must render exactly once"
    );
    assert_eq!(order.first().unwrap(), "live1", "live post is prepended");
}

#[tokio::test]
async fn own_comment_echo_merges_into_one_entity() {
    let (store, projector, feed) = fixture(3, 10);
    feed.start().await.unwrap();

    // the add echo fires before the write acknowledgement resolves
    store.set_write_ack_delay(Some(Duration::from_millis(30)));
    let id = feed.submit_comment("p01", "hello").await.unwrap();

    let comments = feed.cache().list(Collection::Comments, Some("p01"));
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].id(), id);
    match &comments[0] {
        Entity::Comment(comment) => assert_eq!(comment.text, "hello"),
        other => panic!("expected a comment, got {:?}", other),
    }
    assert_eq!(feed.cache().optimistic(Collection::Comments, &id), 0);

    let announced = projector.announced_new(Collection::Comments);
    assert_eq!(
        announced.iter().filter(|c| **c == id).count(),
        1,
        "comment announced as new exactly once"
    );

    // the parent's counter rode a transaction and echoed back
    let post = feed.cache().get(Collection::Posts, "p01").unwrap();
    match post {
        Entity::Post(post) => assert_eq!(post.comments_count, 1),
        other => panic!("expected a post, got {:?}", other),
    }
}

#[tokio::test]
async fn own_post_publish_renders_once() {
    let (store, projector, feed) = fixture(3, 10);
    feed.start().await.unwrap();

    store.defer_events(true);
    let id = feed.submit_post("hello world").await.unwrap();
    store.flush_events();
    store.defer_events(false);

    let order = projector.feed_order();
    assert_eq!(order.iter().filter(|p| **p == id).count(), 1);
    assert_eq!(order.first().unwrap(), &id, "own post is prepended");
    assert_eq!(
        projector
            .announced_new(Collection::Posts)
            .iter()
            .filter(|p| **p == id)
            .count(),
        1
    );
    assert_eq!(feed.cache().optimistic(Collection::Posts, &id), 0);
}

#[tokio::test]
async fn double_toggle_with_swapped_echoes_returns_to_baseline() {
    let (store, _projector, feed) = fixture(3, 10);
    feed.start().await.unwrap();

    store.defer_events(true);
    let target = EntityRef::Post {
        post_id: "p01".to_string(),
    };
    assert_eq!(feed.toggle_like(&target).await.unwrap(), Some(true));
    assert_eq!(feed.toggle_like(&target).await.unwrap(), Some(false));
    assert_eq!(store.pending_event_count(), 2);

    store.flush_events_reversed();
    store.defer_events(false);

    let post = feed.cache().get(Collection::Posts, "p01").unwrap();
    assert_eq!(post.likes_count(), 0);
    assert!(!post.liked_by("viewer"));
    assert_eq!(feed.cache().optimistic(Collection::Posts, "p01"), 0);
}

#[tokio::test]
async fn failed_like_reverts_the_optimistic_flip() {
    let (store, projector, feed) = fixture(3, 10);
    feed.start().await.unwrap();

    store.set_fail_writes(true);
    let target = EntityRef::Post {
        post_id: "p01".to_string(),
    };
    let err = feed.toggle_like(&target).await.unwrap_err();
    assert!(matches!(err, FeedError::Network(_)));

    let post = feed.cache().get(Collection::Posts, "p01").unwrap();
    assert_eq!(post.likes_count(), 0);
    assert!(!post.liked_by("viewer"));
    assert_eq!(feed.cache().optimistic(Collection::Posts, "p01"), 0);
    assert!(projector.errors().iter().any(|(scope, _)| scope == "like"));
}

#[tokio::test]
async fn failed_comment_removes_the_provisional_entity() {
    let (store, projector, feed) = fixture(3, 10);
    feed.start().await.unwrap();

    store.set_fail_writes(true);
    let err = feed.submit_comment("p01", "hello").await.unwrap_err();
    assert!(matches!(err, FeedError::Network(_)));

    assert!(feed.cache().list(Collection::Comments, Some("p01")).is_empty());
    assert!(projector
        .removals()
        .iter()
        .any(|(collection, _)| *collection == Collection::Comments));
    assert!(projector
        .errors()
        .iter()
        .any(|(scope, _)| scope == "comment"));
}

#[tokio::test]
async fn blank_comment_is_rejected_before_any_write() {
    let (store, _projector, feed) = fixture(3, 10);
    feed.start().await.unwrap();

    store.defer_events(true);
    let err = feed.submit_comment("p01", "   ").await.unwrap_err();
    assert!(matches!(err, FeedError::Validation(_)));
    assert_eq!(store.pending_event_count(), 0, "no remote call attempted");
    assert!(feed.cache().list(Collection::Comments, Some("p01")).is_empty());
}

#[tokio::test]
async fn comment_threads_go_live_with_their_posts() {
    let store = Arc::new(MemoryStore::new());
    seed_posts(&store, 1);
    let comments = comments_path("p01");
    store.seed_child(&comments, "c1", comment_value("first", 10));
    store.seed_child(&comments, "c2", comment_value("second", 20));
    store.seed_child(&replies_path("p01", "c1"), "r1", comment_value("nested", 30));

    let projector = Arc::new(RecordingProjector::new());
    let feed = FeedController::new(store.clone(), projector.clone(), viewer(), 10);
    feed.start().await.unwrap();

    // replay populated the nested collections
    assert_eq!(feed.cache().list(Collection::Comments, Some("p01")).len(), 2);
    assert_eq!(feed.cache().list(Collection::Replies, Some("c1")).len(), 1);
    let subs = feed.subscriptions();
    assert!(subs.is_listening(&comments));
    assert!(subs.is_listening(&replies_path("p01", "c1")));
    assert!(subs.is_listening(&replies_path("p01", "c2")));

    // a comment observed live gets its own replies watcher
    store
        .write_child(&comments, "c9", comment_value("late", 0))
        .await
        .unwrap();
    assert!(subs.is_listening(&replies_path("p01", "c9")));
    store
        .write_child(&replies_path("p01", "c9"), "r9", comment_value("later", 0))
        .await
        .unwrap();
    assert_eq!(feed.cache().list(Collection::Replies, Some("c9")).len(), 1);
}

#[tokio::test]
async fn removed_post_detaches_watchers_and_evicts_children() {
    let store = Arc::new(MemoryStore::new());
    seed_posts(&store, 2);
    let comments = comments_path("p01");
    store.seed_child(&comments, "c1", comment_value("first", 10));

    let projector = Arc::new(RecordingProjector::new());
    let feed = FeedController::new(store.clone(), projector.clone(), viewer(), 10);
    feed.start().await.unwrap();
    assert!(feed.subscriptions().is_listening(&comments));

    store.remove_child(POSTS_PATH, "p01");

    assert!(feed.cache().get(Collection::Posts, "p01").is_none());
    assert!(feed.cache().list(Collection::Comments, Some("p01")).is_empty());
    assert!(!feed.subscriptions().is_listening(&comments));
    assert!(projector
        .removals()
        .iter()
        .any(|(collection, id)| *collection == Collection::Posts && id == "p01"));
    assert!(!projector.feed_order().contains(&"p01".to_string()));
}

#[tokio::test]
async fn like_on_vanished_entity_evicts_quietly() {
    let (store, projector, feed) = fixture(2, 10);
    feed.start().await.unwrap();

    // the remove event is still in flight: p02 is rendered locally but
    // already gone remotely
    store.defer_events(true);
    store.remove_child(POSTS_PATH, "p02");
    assert!(feed.cache().get(Collection::Posts, "p02").is_some());

    let target = EntityRef::Post {
        post_id: "p02".to_string(),
    };
    assert_eq!(feed.toggle_like(&target).await.unwrap(), None);
    assert!(feed.cache().get(Collection::Posts, "p02").is_none());
    assert!(
        projector.errors().is_empty(),
        "a vanished target is a no-op, not an error"
    );
}
