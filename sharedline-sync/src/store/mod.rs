//! Realtime key-value store abstraction.
//!
//! The store is a JSON tree addressed by `/`-separated paths. Observers
//! subscribe to a path and receive added/changed/removed events for its
//! direct children, in the order the store applied the writes.

pub mod memory;

pub use memory::{MemoryConnection, MemoryStore};

use crate::error::SyncResult;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::mpsc;

/// Handle identifying one child-event subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What happened to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEventKind {
    Added,
    Changed,
    Removed,
}

/// Change to one direct child of a subscribed path.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildEvent {
    /// Subscription that produced the event.
    pub subscription: SubscriptionId,
    /// Child key relative to the subscribed path.
    pub key: String,
    pub kind: ChildEventKind,
    /// New value, or the last value for removals.
    pub value: Value,
}

/// Where child events are delivered.
pub type ChildEventSink = mpsc::UnboundedSender<ChildEvent>;

/// A realtime JSON store with per-path change feeds.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Allocates a unique, time-ordered child key without a round trip.
    fn generate_key(&self) -> String;

    /// Replaces the value at `path`. Writing `null` deletes it.
    async fn set(&self, path: &str, value: Value) -> SyncResult<()>;

    /// Merges `children` into the object at `path`; `null` children are deleted.
    async fn update(&self, path: &str, children: Map<String, Value>) -> SyncResult<()>;

    /// Deletes the value at `path`.
    async fn remove(&self, path: &str) -> SyncResult<()>;

    /// Reads the value at `path`.
    async fn get(&self, path: &str) -> SyncResult<Option<Value>>;

    /// Starts observing the children of `path`.
    ///
    /// Children that already exist are delivered as `Added` first.
    fn subscribe(&self, path: &str, sink: ChildEventSink) -> SubscriptionId;

    /// Stops a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Deletes `path` when this connection goes away.
    async fn remove_on_disconnect(&self, path: &str) -> SyncResult<()>;
}
