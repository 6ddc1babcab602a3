// change_stream.rs
// Process-wide change-event multiplexer (§4.10). Dispatch is synchronous on
// the mutating thread: collection-specific subscribers first, then global
// ones; a callback that panics/errors is logged and skipped, never allowed
// to abort the mutation. `watch()` hands back a blocking iterator backed by
// a subscription that unsubscribes itself on drop.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
    DropCollection,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub database: String,
    pub collection: String,
    pub doc_id: Option<String>,
    /// Full document, present for INSERT (and REPLACE-shaped updates).
    pub document: Option<Value>,
    /// Top-level field names that changed, present for UPDATE.
    pub updated_fields: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

pub type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    /// kind -> collection -> subscriber id -> callback
    by_collection: std::collections::HashMap<(EventKindKey, String), Vec<(u64, Callback)>>,
    /// kind -> subscriber id -> callback, no collection filter
    global: std::collections::HashMap<EventKindKey, Vec<(u64, Callback)>>,
}

type EventKindKey = EventKind;

/// A process-wide, shareable multiplexer. `Database` owns one and injects
/// it into every `Collection` it hands out, rather than relying on a hidden
/// global (§9 design notes).
#[derive(Clone, Default)]
pub struct ChangeStream {
    subscribers: Arc<RwLock<Subscribers>>,
    next_id: Arc<AtomicU64>,
}

pub struct SubscriptionId {
    id: u64,
    kind: EventKind,
    collection: Option<String>,
}

impl ChangeStream {
    pub fn new() -> Self {
        ChangeStream::default()
    }

    /// Register `callback` for events of `kind`, optionally scoped to one
    /// collection (`None` = every collection).
    pub fn on(
        &self,
        kind: EventKind,
        collection: Option<&str>,
        callback: Callback,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscribers.write();
        match collection {
            Some(c) => subs
                .by_collection
                .entry((kind, c.to_string()))
                .or_default()
                .push((id, callback)),
            None => subs.global.entry(kind).or_default().push((id, callback)),
        }
        SubscriptionId {
            id,
            kind,
            collection: collection.map(|s| s.to_string()),
        }
    }

    pub fn off(&self, sub: &SubscriptionId) {
        let mut subs = self.subscribers.write();
        match &sub.collection {
            Some(c) => {
                if let Some(list) = subs.by_collection.get_mut(&(sub.kind, c.clone())) {
                    list.retain(|(id, _)| *id != sub.id);
                }
            }
            None => {
                if let Some(list) = subs.global.get_mut(&sub.kind) {
                    list.retain(|(id, _)| *id != sub.id);
                }
            }
        }
    }

    /// Dispatch synchronously: collection-specific subscribers in
    /// registration order, then globals. A panicking callback is caught,
    /// logged, and skipped.
    pub fn emit(&self, event: ChangeEvent) {
        let subs = self.subscribers.read();
        if let Some(list) = subs.by_collection.get(&(event.kind, event.collection.clone())) {
            for (_, cb) in list {
                invoke(cb, &event);
            }
        }
        if let Some(list) = subs.global.get(&event.kind) {
            for (_, cb) in list {
                invoke(cb, &event);
            }
        }
    }

    /// A blocking iterator fed by a subscription on `kind` (or every kind if
    /// `None`), optionally scoped to one collection. The subscription is
    /// torn down when the iterator is dropped.
    pub fn watch(&self, collection: Option<&str>) -> ChangeWatcher {
        let (tx, rx) = crossbeam::channel::unbounded();
        let stream = self.clone();
        let tx = Arc::new(tx);
        let mut ids = Vec::new();
        for kind in [
            EventKind::Insert,
            EventKind::Update,
            EventKind::Delete,
            EventKind::DropCollection,
        ] {
            let tx = Arc::clone(&tx);
            let cb: Callback = Arc::new(move |event: &ChangeEvent| {
                let _ = tx.send(event.clone());
            });
            ids.push(stream.on(kind, collection, cb));
        }
        ChangeWatcher {
            stream,
            ids,
            receiver: rx,
        }
    }
}

fn invoke(cb: &Callback, event: &ChangeEvent) {
    let result = catch_unwind(AssertUnwindSafe(|| cb(event)));
    if result.is_err() {
        tracing::warn!(
            kind = ?event.kind,
            collection = %event.collection,
            "change-stream callback panicked, skipping"
        );
    }
}

pub struct ChangeWatcher {
    stream: ChangeStream,
    ids: Vec<SubscriptionId>,
    receiver: crossbeam::channel::Receiver<ChangeEvent>,
}

impl Iterator for ChangeWatcher {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().ok()
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        for id in &self.ids {
            self.stream.off(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event(kind: EventKind, collection: &str) -> ChangeEvent {
        ChangeEvent {
            kind,
            database: "default".into(),
            collection: collection.into(),
            doc_id: Some("id1".into()),
            document: None,
            updated_fields: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn collection_scoped_and_global_both_fire_for_matching_collection() {
        let stream = ChangeStream::new();
        let a_fired = Arc::new(Mutex::new(0));
        let b_fired = Arc::new(Mutex::new(0));

        let a = Arc::clone(&a_fired);
        stream.on(
            EventKind::Insert,
            Some("orders"),
            Arc::new(move |_| *a.lock().unwrap() += 1),
        );
        let b = Arc::clone(&b_fired);
        stream.on(EventKind::Insert, None, Arc::new(move |_| *b.lock().unwrap() += 1));

        stream.emit(event(EventKind::Insert, "orders"));
        assert_eq!(*a_fired.lock().unwrap(), 1);
        assert_eq!(*b_fired.lock().unwrap(), 1);

        stream.emit(event(EventKind::Insert, "users"));
        assert_eq!(*a_fired.lock().unwrap(), 1);
        assert_eq!(*b_fired.lock().unwrap(), 2);
    }

    #[test]
    fn delete_does_not_trigger_insert_subscribers() {
        let stream = ChangeStream::new();
        let fired = Arc::new(Mutex::new(0));
        let f = Arc::clone(&fired);
        stream.on(EventKind::Insert, None, Arc::new(move |_| *f.lock().unwrap() += 1));
        stream.emit(event(EventKind::Delete, "orders"));
        assert_eq!(*fired.lock().unwrap(), 0);
    }

    #[test]
    fn off_removes_subscription() {
        let stream = ChangeStream::new();
        let fired = Arc::new(Mutex::new(0));
        let f = Arc::clone(&fired);
        let sub = stream.on(EventKind::Insert, None, Arc::new(move |_| *f.lock().unwrap() += 1));
        stream.off(&sub);
        stream.emit(event(EventKind::Insert, "orders"));
        assert_eq!(*fired.lock().unwrap(), 0);
    }

    #[test]
    fn panicking_callback_is_caught_and_does_not_block_others() {
        let stream = ChangeStream::new();
        stream.on(EventKind::Insert, None, Arc::new(|_| panic!("boom")));
        let fired = Arc::new(Mutex::new(0));
        let f = Arc::clone(&fired);
        stream.on(EventKind::Insert, None, Arc::new(move |_| *f.lock().unwrap() += 1));
        stream.emit(event(EventKind::Insert, "orders"));
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[test]
    fn watch_yields_matching_events() {
        let stream = ChangeStream::new();
        let watcher = stream.watch(Some("orders"));
        stream.emit(event(EventKind::Insert, "orders"));
        stream.emit(event(EventKind::Insert, "users"));
        drop(stream);

        let mut iter = watcher;
        let first = iter.next();
        assert!(first.is_some());
        assert_eq!(first.unwrap().collection, "orders");
    }
}
