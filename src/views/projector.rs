use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::models::entity::{Collection, Entity};

/// Rendering boundary of the feed engine.
///
/// Implementations must key their output by entity id: an upsert for a
/// known id replaces that element in place, so the engine's duplicate
/// suppression shows up as "no duplicate element" on screen. `is_new`
/// distinguishes a genuinely new element (new posts are prepended) from a
/// re-render of an existing one. Paginated history arrives separately via
/// `on_page_appended` and is always appended, never prepended.
pub trait Projector: Send + Sync {
    fn on_entity_upserted(&self, collection: Collection, id: &str, entity: &Entity, is_new: bool);

    fn on_entity_removed(&self, collection: Collection, id: &str);

    /// A paginated batch, already ordered, to append after the current feed.
    fn on_page_appended(&self, items: &[Entity]);

    /// The root collection turned out to be empty on first load.
    fn on_feed_empty(&self);

    /// A non-blocking, dismissible error near the affected control.
    /// `scope` names the control ("feed", "like", "comment", ...).
    fn on_inline_error(&self, scope: &str, message: &str);
}

/// Projector that keeps an ordered id list the way a DOM consumer would,
/// plus a log of every notification. Backs the engine tests and doubles as
/// a reference for writing real projectors.
pub struct RecordingProjector {
    /// Feed order of post ids: new posts to the front, pages to the back.
    order: Mutex<VecDeque<String>>,
    /// Every (collection, id, is_new) upsert notification, in order.
    upserts: Mutex<Vec<(Collection, String, bool)>>,
    removals: Mutex<Vec<(Collection, String)>>,
    errors: Mutex<Vec<(String, String)>>,
    empty: AtomicBool,
}

impl RecordingProjector {
    pub fn new() -> Self {
        Self {
            order: Mutex::new(VecDeque::new()),
            upserts: Mutex::new(Vec::new()),
            removals: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            empty: AtomicBool::new(false),
        }
    }

    pub fn feed_order(&self) -> Vec<String> {
        self.order.lock().unwrap().iter().cloned().collect()
    }

    pub fn upserts(&self) -> Vec<(Collection, String, bool)> {
        self.upserts.lock().unwrap().clone()
    }

    /// Ids announced as new for a collection, in announcement order.
    pub fn announced_new(&self, collection: Collection) -> Vec<String> {
        self.upserts
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _, is_new)| *c == collection && *is_new)
            .map(|(_, id, _)| id.clone())
            .collect()
    }

    pub fn removals(&self) -> Vec<(Collection, String)> {
        self.removals.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn saw_empty_feed(&self) -> bool {
        self.empty.load(Ordering::SeqCst)
    }
}

impl Default for RecordingProjector {
    fn default() -> Self {
        Self::new()
    }
}

impl Projector for RecordingProjector {
    fn on_entity_upserted(&self, collection: Collection, id: &str, _entity: &Entity, is_new: bool) {
        self.upserts
            .lock()
            .unwrap()
            .push((collection, id.to_string(), is_new));
        if collection == Collection::Posts && is_new {
            let mut order = self.order.lock().unwrap();
            if !order.iter().any(|existing| existing == id) {
                order.push_front(id.to_string());
            }
        }
    }

    fn on_entity_removed(&self, collection: Collection, id: &str) {
        self.removals
            .lock()
            .unwrap()
            .push((collection, id.to_string()));
        if collection == Collection::Posts {
            self.order.lock().unwrap().retain(|existing| existing != id);
        }
    }

    fn on_page_appended(&self, items: &[Entity]) {
        let mut order = self.order.lock().unwrap();
        for item in items {
            if !order.iter().any(|existing| existing == item.id()) {
                order.push_back(item.id().to_string());
            }
        }
    }

    fn on_feed_empty(&self) {
        self.empty.store(true, Ordering::SeqCst);
    }

    fn on_inline_error(&self, scope: &str, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .push((scope.to_string(), message.to_string()));
    }
}
