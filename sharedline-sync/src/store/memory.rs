//! In-process [`RealtimeStore`] shared by several simulated devices.

use super::{ChildEvent, ChildEventKind, ChildEventSink, RealtimeStore, SubscriptionId};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sharedline_types::push_id;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

struct Subscription {
    connection: u64,
    path: String,
    sink: ChildEventSink,
}

struct StoreState {
    root: Value,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    on_disconnect: Vec<(u64, String)>,
    next_subscription: u64,
    next_connection: u64,
}

/// The shared tree. Devices talk to it through [`MemoryConnection`]s.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                root: Value::Object(Map::new()),
                subscriptions: BTreeMap::new(),
                on_disconnect: Vec::new(),
                next_subscription: 0,
                next_connection: 0,
            })),
        }
    }

    /// Opens a new device connection.
    pub fn connect(&self) -> MemoryConnection {
        let id = {
            let mut state = self.lock();
            state.next_connection += 1;
            state.next_connection
        };
        MemoryConnection {
            store: self.clone(),
            id,
            connected: Arc::new(AtomicBool::new(true)),
            failing: Arc::new(AtomicBool::new(false)),
            failing_updates: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current value at `path`, bypassing any connection.
    pub fn value_at(&self, path: &str) -> Option<Value> {
        let state = self.lock();
        node_at(&state.root, path).cloned()
    }

    /// Number of live subscriptions across all connections.
    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a mutation and notifies every subscription whose children
    /// changed. Events are sent under the lock so delivery order matches
    /// write order.
    fn apply(&self, mutate: impl FnOnce(&mut Value)) {
        let mut state = self.lock();
        let before: Vec<(SubscriptionId, Map<String, Value>)> = state
            .subscriptions
            .iter()
            .map(|(id, sub)| (*id, children_of(&state.root, &sub.path)))
            .collect();

        mutate(&mut state.root);

        for (id, old) in before {
            let Some(sub) = state.subscriptions.get(&id) else {
                continue;
            };
            let new = children_of(&state.root, &sub.path);
            for event in diff_children(id, &old, &new) {
                let _ = sub.sink.send(event);
            }
        }
    }
}

/// One device's view of a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryConnection {
    store: MemoryStore,
    id: u64,
    connected: Arc<AtomicBool>,
    failing: Arc<AtomicBool>,
    failing_updates: Arc<AtomicBool>,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Makes every subsequent write fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes merge updates fail; sets and removals still go through.
    pub fn set_failing_updates(&self, failing: bool) {
        self.failing_updates.store(failing, Ordering::SeqCst);
    }

    /// Drops the connection: runs registered on-disconnect removals and
    /// cancels this connection's subscriptions.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let paths: Vec<String> = {
            let mut state = self.store.lock();
            state.subscriptions.retain(|_, sub| sub.connection != self.id);
            let (mine, others): (Vec<_>, Vec<_>) = state
                .on_disconnect
                .drain(..)
                .partition(|(connection, _)| *connection == self.id);
            state.on_disconnect = others;
            mine.into_iter().map(|(_, path)| path).collect()
        };
        debug!(connection = self.id, removals = paths.len(), "memory store connection closed");
        for path in paths {
            self.store.apply(|root| write_at(root, &path, Value::Null));
        }
    }

    fn check_writable(&self) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::Offline);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Store("write rejected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RealtimeStore for MemoryConnection {
    fn generate_key(&self) -> String {
        push_id()
    }

    async fn set(&self, path: &str, value: Value) -> SyncResult<()> {
        self.check_writable()?;
        self.store.apply(|root| write_at(root, path, value));
        Ok(())
    }

    async fn update(&self, path: &str, children: Map<String, Value>) -> SyncResult<()> {
        self.check_writable()?;
        if self.failing_updates.load(Ordering::SeqCst) {
            return Err(SyncError::Store("update rejected".into()));
        }
        self.store.apply(|root| {
            for (key, value) in children {
                write_at(root, &format!("{path}/{key}"), value);
            }
        });
        Ok(())
    }

    async fn remove(&self, path: &str) -> SyncResult<()> {
        self.set(path, Value::Null).await
    }

    async fn get(&self, path: &str) -> SyncResult<Option<Value>> {
        if !self.is_connected() {
            return Err(SyncError::Offline);
        }
        Ok(self.store.value_at(path))
    }

    fn subscribe(&self, path: &str, sink: ChildEventSink) -> SubscriptionId {
        let mut state = self.store.lock();
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        for (key, value) in children_of(&state.root, path) {
            let _ = sink.send(ChildEvent {
                subscription: id,
                key,
                kind: ChildEventKind::Added,
                value,
            });
        }
        state.subscriptions.insert(
            id,
            Subscription {
                connection: self.id,
                path: path.to_string(),
                sink,
            },
        );
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.store.lock().subscriptions.remove(&id);
    }

    async fn remove_on_disconnect(&self, path: &str) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::Offline);
        }
        self.store
            .lock()
            .on_disconnect
            .push((self.id, path.to_string()));
        Ok(())
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn node_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).try_fold(root, |node, segment| node.get(segment))
}

fn children_of(root: &Value, path: &str) -> Map<String, Value> {
    match node_at(root, path) {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        _ => Map::new(),
    }
}

/// Writes `value` at `path`, creating intermediate objects. `null` deletes.
fn write_at(root: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = parts.split_last() else {
        *root = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        };
        return;
    };

    let mut node = root;
    for segment in parents {
        if value.is_null() {
            match node.get_mut(*segment) {
                Some(child) => node = child,
                None => return,
            }
        } else {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            node = match node {
                Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
                _ => return,
            };
        }
    }

    if value.is_null() {
        if let Value::Object(map) = node {
            map.remove(*last);
        }
        return;
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.to_string(), value);
    }
}

fn diff_children(
    subscription: SubscriptionId,
    before: &Map<String, Value>,
    after: &Map<String, Value>,
) -> Vec<ChildEvent> {
    let mut events = Vec::new();
    for (key, old) in before {
        if !after.contains_key(key) {
            events.push(ChildEvent {
                subscription,
                key: key.clone(),
                kind: ChildEventKind::Removed,
                value: old.clone(),
            });
        }
    }
    for (key, new) in after {
        let kind = match before.get(key) {
            None => ChildEventKind::Added,
            Some(old) if old != new => ChildEventKind::Changed,
            Some(_) => continue,
        };
        events.push(ChildEvent {
            subscription,
            key: key.clone(),
            kind,
            value: new.clone(),
        });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_creates_intermediate_objects() {
        let mut root = json!({});
        write_at(&mut root, "a/b/c", json!(1));
        assert_eq!(root, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn null_write_deletes_leaf_only() {
        let mut root = json!({"a": {"b": 1, "c": 2}});
        write_at(&mut root, "a/b", Value::Null);
        assert_eq!(root, json!({"a": {"c": 2}}));
    }

    #[test]
    fn null_write_on_missing_path_is_noop() {
        let mut root = json!({"a": 1});
        write_at(&mut root, "x/y", Value::Null);
        assert_eq!(root, json!({"a": 1}));
    }

    #[test]
    fn diff_reports_each_kind() {
        let before = json!({"keep": 1, "change": 1, "drop": 1});
        let after = json!({"keep": 1, "change": 2, "add": 1});
        let events = diff_children(
            SubscriptionId(1),
            before.as_object().unwrap(),
            after.as_object().unwrap(),
        );
        let summary: Vec<(&str, ChildEventKind)> =
            events.iter().map(|e| (e.key.as_str(), e.kind)).collect();
        assert_eq!(
            summary,
            vec![
                ("drop", ChildEventKind::Removed),
                ("add", ChildEventKind::Added),
                ("change", ChildEventKind::Changed),
            ]
        );
    }
}
