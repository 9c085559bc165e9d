use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::FeedError;

/// Callback invoked with the child id and its current value.
pub type ChildCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// The three event hooks a child listener delivers.
#[derive(Clone)]
pub struct ChildHandlers {
    pub on_add: ChildCallback,
    pub on_change: ChildCallback,
    pub on_remove: ChildCallback,
}

impl ChildHandlers {
    pub fn new(on_add: ChildCallback, on_change: ChildCallback, on_remove: ChildCallback) -> Self {
        Self {
            on_add,
            on_change,
            on_remove,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub u64);

/// What a fresh child listener does with children that already exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayPolicy {
    /// Replay every existing child as an add event, in ascending
    /// (timestamp, id) order, before delivering live events.
    All,
    /// Deliver only events that happen after the listener attaches. Used
    /// for the feed root, where history arrives through pagination.
    NewOnly,
}

pub type TransactionFn<'a> = &'a (dyn Fn(Option<Value>) -> Option<Value> + Send + Sync);

/// Port over the hosted push-based data store.
///
/// Paths are slash-separated (`posts/{id}/comments/{id}`); a collection path
/// holds children keyed by push id. Timestamps inside written values are
/// assigned server-side at write time; the writer only learns the
/// authoritative value from its own echo.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Attach a child listener. Detached listeners never fire again, even
    /// for events that were in flight when `unsubscribe` was called.
    fn subscribe_children(
        &self,
        path: &str,
        replay: ReplayPolicy,
        handlers: ChildHandlers,
    ) -> ListenerHandle;

    /// Safe to call at any time, including from inside a listener callback.
    fn unsubscribe(&self, handle: ListenerHandle);

    async fn read_once(&self, path: &str) -> Result<Option<Value>, FeedError>;

    /// Read up to `limit` children of `path` ordered ascending by
    /// (timestamp, id), starting at `start_at` inclusive.
    async fn read_page(
        &self,
        path: &str,
        start_at: Option<(i64, String)>,
        limit: usize,
    ) -> Result<Vec<(String, Value)>, FeedError>;

    /// Generate a new globally-unique child id under `path`. Synchronous:
    /// the id is usable before any write lands.
    fn push_id(&self, path: &str) -> String;

    /// Write a child node; the local client receives its own add event.
    async fn write_child(&self, path: &str, id: &str, value: Value) -> Result<(), FeedError>;

    async fn update_fields(&self, path: &str, fields: Map<String, Value>)
        -> Result<(), FeedError>;

    /// Atomic read-modify-write of one node. The closure sees the current
    /// value and returns the new one, or `None` to abort. Returns the
    /// committed value, or `None` when aborted.
    async fn run_transaction(
        &self,
        path: &str,
        update: TransactionFn<'_>,
    ) -> Result<Option<Value>, FeedError>;
}
