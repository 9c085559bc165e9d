use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::FeedError;
use crate::models::store::{
    ChildHandlers, ListenerHandle, RealtimeStore, ReplayPolicy, TransactionFn,
};

#[derive(Clone, Copy, Debug)]
enum EventKind {
    Added,
    Changed,
    Removed,
}

struct ListenerEntry {
    path: String,
    handlers: ChildHandlers,
}

struct PendingEvent {
    listener: u64,
    kind: EventKind,
    id: String,
    value: Value,
}

/// In-memory realtime store.
///
/// Nodes live in a single `BTreeMap` keyed by full path, which keeps child
/// scans a cheap ordered range walk. Listener callbacks are dispatched only
/// after the data lock is released, and each delivery re-checks that the
/// listener is still registered, so detaching from inside a callback is
/// always safe and queued events for a detached listener are dropped.
///
/// Test hooks: `defer_events`/`flush_events` queue deliveries for explicit
/// interleaving, `set_fail_writes` makes writes fail, `set_read_delay` and
/// `set_write_ack_delay` stretch the in-flight window of reads and write
/// acknowledgements.
pub struct MemoryStore {
    nodes: Mutex<BTreeMap<String, Value>>,
    listeners: Mutex<HashMap<u64, ListenerEntry>>,
    next_listener: AtomicU64,
    next_push: AtomicU64,
    clock: Mutex<i64>,
    deferred: AtomicBool,
    pending: Mutex<VecDeque<PendingEvent>>,
    fail_writes: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
    write_ack_delay: Mutex<Option<Duration>>,
    page_reads: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
            next_push: AtomicU64::new(1),
            clock: Mutex::new(0),
            deferred: AtomicBool::new(false),
            pending: Mutex::new(VecDeque::new()),
            fail_writes: AtomicBool::new(false),
            read_delay: Mutex::new(None),
            write_ack_delay: Mutex::new(None),
            page_reads: AtomicU64::new(0),
        }
    }

    /// Strictly increasing server clock in milliseconds. Writes in the same
    /// millisecond still get distinct, ordered timestamps.
    fn server_now(&self) -> i64 {
        let mut clock = self.clock.lock().unwrap();
        let now = Utc::now().timestamp_millis();
        *clock = now.max(*clock + 1);
        *clock
    }

    /// Insert a node as pre-existing data: no timestamp stamping and no
    /// listener events. Used to seed fixtures and demo data.
    pub fn seed_child(&self, path: &str, id: &str, value: Value) {
        let mut nodes = self.nodes.lock().unwrap();
        nodes.insert(format!("{}/{}", path, id), value);
    }

    /// Remove a child node and its whole subtree, firing a remove event for
    /// the child itself.
    pub fn remove_child(&self, path: &str, id: &str) {
        let child_path = format!("{}/{}", path, id);
        let removed = {
            let mut nodes = self.nodes.lock().unwrap();
            let removed = nodes.remove(&child_path);
            let prefix = format!("{}/", child_path);
            let descendants: Vec<String> = nodes
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.clone())
                .collect();
            for key in descendants {
                nodes.remove(&key);
            }
            removed
        };
        if let Some(value) = removed {
            self.notify(path, EventKind::Removed, id, &value);
        }
    }

    pub fn defer_events(&self, on: bool) {
        self.deferred.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock().unwrap() = delay;
    }

    pub fn set_write_ack_delay(&self, delay: Option<Duration>) {
        *self.write_ack_delay.lock().unwrap() = delay;
    }

    pub fn page_read_count(&self) -> u64 {
        self.page_reads.load(Ordering::SeqCst)
    }

    pub fn pending_event_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Deliver queued events in arrival order. Events whose listener has
    /// detached in the meantime are dropped.
    pub fn flush_events(&self) {
        loop {
            let event = self.pending.lock().unwrap().pop_front();
            match event {
                Some(event) => self.deliver(event),
                None => break,
            }
        }
    }

    /// Deliver the currently queued events in reverse arrival order, for
    /// exercising reordered callback interleavings.
    pub fn flush_events_reversed(&self) {
        let drained: Vec<PendingEvent> = self.pending.lock().unwrap().drain(..).collect();
        for event in drained.into_iter().rev() {
            self.deliver(event);
        }
    }

    fn deliver(&self, event: PendingEvent) {
        let handlers = {
            let listeners = self.listeners.lock().unwrap();
            listeners.get(&event.listener).map(|l| l.handlers.clone())
        };
        if let Some(handlers) = handlers {
            Self::invoke(&handlers, event.kind, &event.id, &event.value);
        }
    }

    fn invoke(handlers: &ChildHandlers, kind: EventKind, id: &str, value: &Value) {
        match kind {
            EventKind::Added => (handlers.on_add)(id, value),
            EventKind::Changed => (handlers.on_change)(id, value),
            EventKind::Removed => (handlers.on_remove)(id, value),
        }
    }

    /// Route an event at `parent` to every listener on that path. Never
    /// called with any lock held by the caller.
    fn notify(&self, parent: &str, kind: EventKind, id: &str, value: &Value) {
        let targets: Vec<u64> = {
            let listeners = self.listeners.lock().unwrap();
            listeners
                .iter()
                .filter(|(_, l)| l.path == parent)
                .map(|(id, _)| *id)
                .collect()
        };
        if targets.is_empty() {
            return;
        }
        if self.deferred.load(Ordering::SeqCst) {
            let mut pending = self.pending.lock().unwrap();
            for listener in targets {
                pending.push_back(PendingEvent {
                    listener,
                    kind,
                    id: id.to_string(),
                    value: value.clone(),
                });
            }
        } else {
            for listener in targets {
                self.deliver(PendingEvent {
                    listener,
                    kind,
                    id: id.to_string(),
                    value: value.clone(),
                });
            }
        }
    }

    fn timestamp_of(value: &Value) -> i64 {
        value.get("timestamp").and_then(Value::as_i64).unwrap_or(0)
    }

    /// Direct children of `path`, ascending by (timestamp, id).
    fn children_sorted(&self, path: &str) -> Vec<(String, Value)> {
        let prefix = format!("{}/", path);
        let nodes = self.nodes.lock().unwrap();
        let mut children: Vec<(String, Value)> = nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, v)| {
                let rest = &k[prefix.len()..];
                if rest.contains('/') {
                    None
                } else {
                    Some((rest.to_string(), v.clone()))
                }
            })
            .collect();
        children.sort_by(|a, b| {
            (Self::timestamp_of(&a.1), a.0.as_str()).cmp(&(Self::timestamp_of(&b.1), b.0.as_str()))
        });
        children
    }

    async fn apply_read_delay(&self) {
        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeStore for MemoryStore {
    fn subscribe_children(
        &self,
        path: &str,
        replay: ReplayPolicy,
        handlers: ChildHandlers,
    ) -> ListenerHandle {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().insert(
            id,
            ListenerEntry {
                path: path.to_string(),
                handlers,
            },
        );
        if replay == ReplayPolicy::All {
            // Initial snapshot: add events in ascending (timestamp, id)
            // order, routed to this listener only.
            let snapshot = self.children_sorted(path);
            for (child_id, value) in snapshot {
                if self.deferred.load(Ordering::SeqCst) {
                    self.pending.lock().unwrap().push_back(PendingEvent {
                        listener: id,
                        kind: EventKind::Added,
                        id: child_id,
                        value,
                    });
                } else {
                    self.deliver(PendingEvent {
                        listener: id,
                        kind: EventKind::Added,
                        id: child_id,
                        value,
                    });
                }
            }
        }
        ListenerHandle(id)
    }

    fn unsubscribe(&self, handle: ListenerHandle) {
        self.listeners.lock().unwrap().remove(&handle.0);
    }

    async fn read_once(&self, path: &str) -> Result<Option<Value>, FeedError> {
        self.apply_read_delay().await;
        Ok(self.nodes.lock().unwrap().get(path).cloned())
    }

    async fn read_page(
        &self,
        path: &str,
        start_at: Option<(i64, String)>,
        limit: usize,
    ) -> Result<Vec<(String, Value)>, FeedError> {
        self.page_reads.fetch_add(1, Ordering::SeqCst);
        self.apply_read_delay().await;
        let children = self.children_sorted(path);
        let page = children
            .into_iter()
            .filter(|(id, value)| match &start_at {
                Some((ts, key)) => {
                    (Self::timestamp_of(value), id.as_str()) >= (*ts, key.as_str())
                }
                None => true,
            })
            .take(limit)
            .collect();
        Ok(page)
    }

    fn push_id(&self, _path: &str) -> String {
        // Zero-padded so ids sort in generation order, like hosted push ids.
        format!("id{:08}", self.next_push.fetch_add(1, Ordering::SeqCst))
    }

    async fn write_child(&self, path: &str, id: &str, mut value: Value) -> Result<(), FeedError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FeedError::Network(format!("write to {}/{} failed", path, id)));
        }
        // A timestamp field in the payload is a placeholder; the store
        // assigns the authoritative value at write time.
        if let Value::Object(obj) = &mut value {
            if obj.contains_key("timestamp") {
                obj.insert("timestamp".to_string(), Value::from(self.server_now()));
            }
        }
        let existed = {
            let mut nodes = self.nodes.lock().unwrap();
            nodes
                .insert(format!("{}/{}", path, id), value.clone())
                .is_some()
        };
        let kind = if existed {
            EventKind::Changed
        } else {
            EventKind::Added
        };
        self.notify(path, kind, id, &value);
        // The echo above is visible before the acknowledgement when a delay
        // is configured, mirroring a client that hears its own write early.
        let delay = *self.write_ack_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn update_fields(
        &self,
        path: &str,
        fields: Map<String, Value>,
    ) -> Result<(), FeedError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FeedError::Network(format!("update of {} failed", path)));
        }
        let (parent, id) = match path.rsplit_once('/') {
            Some(split) => split,
            None => return Err(FeedError::Store(format!("not a child path: {}", path))),
        };
        let updated = {
            let mut nodes = self.nodes.lock().unwrap();
            match nodes.get_mut(path) {
                Some(Value::Object(obj)) => {
                    for (key, value) in fields {
                        obj.insert(key, value);
                    }
                    Some(Value::Object(obj.clone()))
                }
                Some(_) => None,
                None => None,
            }
        };
        match updated {
            Some(value) => {
                self.notify(parent, EventKind::Changed, id, &value);
                Ok(())
            }
            None => Err(FeedError::NotFound(path.to_string())),
        }
    }

    async fn run_transaction(
        &self,
        path: &str,
        update: TransactionFn<'_>,
    ) -> Result<Option<Value>, FeedError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FeedError::Network(format!("transaction on {} failed", path)));
        }
        let committed = {
            let mut nodes = self.nodes.lock().unwrap();
            let current = nodes.get(path).cloned();
            match update(current) {
                Some(next) => {
                    nodes.insert(path.to_string(), next.clone());
                    Some(next)
                }
                None => None,
            }
        };
        if let Some(value) = &committed {
            if let Some((parent, id)) = path.rsplit_once('/') {
                self.notify(parent, EventKind::Changed, id, value);
            }
        }
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn recording_handlers(log: Arc<Mutex<Vec<String>>>) -> ChildHandlers {
        let added = log.clone();
        let changed = log.clone();
        let removed = log;
        ChildHandlers::new(
            Arc::new(move |id, _| added.lock().unwrap().push(format!("add:{}", id))),
            Arc::new(move |id, _| changed.lock().unwrap().push(format!("change:{}", id))),
            Arc::new(move |id, _| removed.lock().unwrap().push(format!("remove:{}", id))),
        )
    }

    #[tokio::test]
    async fn replay_is_ascending_by_timestamp_then_id() {
        let store = MemoryStore::new();
        store.seed_child("posts", "b", json!({"timestamp": 2}));
        store.seed_child("posts", "a", json!({"timestamp": 2}));
        store.seed_child("posts", "c", json!({"timestamp": 1}));

        let log = Arc::new(Mutex::new(Vec::new()));
        store.subscribe_children("posts", ReplayPolicy::All, recording_handlers(log.clone()));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["add:c", "add:a", "add:b"]
        );
    }

    #[tokio::test]
    async fn new_only_listener_skips_existing_children() {
        let store = MemoryStore::new();
        store.seed_child("posts", "old", json!({"timestamp": 1}));

        let log = Arc::new(Mutex::new(Vec::new()));
        store.subscribe_children("posts", ReplayPolicy::NewOnly, recording_handlers(log.clone()));
        assert!(log.lock().unwrap().is_empty());

        store
            .write_child("posts", "fresh", json!({"timestamp": 0}))
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["add:fresh"]);
    }

    #[tokio::test]
    async fn detached_listener_drops_queued_events() {
        let store = MemoryStore::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle =
            store.subscribe_children("posts", ReplayPolicy::NewOnly, recording_handlers(log.clone()));

        store.defer_events(true);
        store
            .write_child("posts", "p1", json!({"timestamp": 0}))
            .await
            .unwrap();
        assert_eq!(store.pending_event_count(), 1);

        store.unsubscribe(handle);
        store.flush_events();
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_from_inside_callback_is_safe() {
        let store = Arc::new(MemoryStore::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let handle_slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));
        let store_ref = store.clone();
        let slot_ref = handle_slot.clone();
        let fired_ref = fired.clone();
        let on_add: crate::models::store::ChildCallback = Arc::new(move |_, _| {
            fired_ref.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = slot_ref.lock().unwrap().take() {
                store_ref.unsubscribe(handle);
            }
        });
        let noop: crate::models::store::ChildCallback = Arc::new(|_, _| {});
        let handle = store.subscribe_children(
            "posts",
            ReplayPolicy::NewOnly,
            ChildHandlers::new(on_add, noop.clone(), noop),
        );
        *handle_slot.lock().unwrap() = Some(handle);

        store
            .write_child("posts", "p1", json!({"timestamp": 0}))
            .await
            .unwrap();
        store
            .write_child("posts", "p2", json!({"timestamp": 0}))
            .await
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn write_stamps_monotonic_timestamps() {
        let store = MemoryStore::new();
        store
            .write_child("posts", "a", json!({"timestamp": 0}))
            .await
            .unwrap();
        store
            .write_child("posts", "b", json!({"timestamp": 0}))
            .await
            .unwrap();

        let a = store.read_once("posts/a").await.unwrap().unwrap();
        let b = store.read_once("posts/b").await.unwrap().unwrap();
        assert!(MemoryStore::timestamp_of(&b) > MemoryStore::timestamp_of(&a));
    }

    #[tokio::test]
    async fn read_page_is_inclusive_at_the_cursor() {
        let store = MemoryStore::new();
        for n in 1..=5 {
            store.seed_child("posts", &format!("p{}", n), json!({"timestamp": n}));
        }

        let page = store
            .read_page("posts", Some((3, "p3".to_string())), 10)
            .await
            .unwrap();
        let ids: Vec<&str> = page.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["p3", "p4", "p5"]);
    }

    #[tokio::test]
    async fn transaction_aborts_on_missing_node() {
        let store = MemoryStore::new();
        let result = store
            .run_transaction("posts/gone", &|current| current.map(|v| v))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(store.read_once("posts/gone").await.unwrap().is_none());
    }
}
