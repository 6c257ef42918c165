//! Short-range discovery of nearby rooms.
//!
//! Devices publish a small opaque message (a [`RoomAnnouncement`]) and
//! subscribe for messages from other devices. Both operations return a
//! [`DiscoveryHandle`]; dropping the handle withdraws the publication or
//! ends the subscription.
//!
//! [`RoomAnnouncement`]: crate::record::RoomAnnouncement

use crate::error::SyncResult;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// A message appearing or disappearing nearby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Found(Vec<u8>),
    Lost(Vec<u8>),
}

/// Where discovery events are delivered.
pub type DiscoverySink = mpsc::UnboundedSender<DiscoveryEvent>;

/// A nearby-message transport.
pub trait DiscoveryTransport: Send + Sync {
    /// Starts publishing `message` until the handle is dropped.
    fn publish(&self, message: Vec<u8>) -> SyncResult<DiscoveryHandle>;

    /// Delivers messages published by other devices until the handle is dropped.
    fn subscribe(&self, sink: DiscoverySink) -> SyncResult<DiscoveryHandle>;
}

/// Cancels a publication or subscription when dropped.
pub struct DiscoveryHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl DiscoveryHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancels now instead of on drop.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for DiscoveryHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for DiscoveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Hub {
    next_id: u64,
    publications: BTreeMap<u64, (u64, Vec<u8>)>,
    subscribers: BTreeMap<u64, (u64, DiscoverySink)>,
}

/// In-process discovery medium. Each device gets its own endpoint; an
/// endpoint never hears its own publications.
#[derive(Clone, Default)]
pub struct MemoryDiscovery {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self) -> MemoryDiscoveryEndpoint {
        let device = {
            let mut hub = lock(&self.hub);
            hub.next_id += 1;
            hub.next_id
        };
        MemoryDiscoveryEndpoint {
            hub: Arc::clone(&self.hub),
            device,
        }
    }

    pub fn publication_count(&self) -> usize {
        lock(&self.hub).publications.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.hub).subscribers.len()
    }
}

/// One device's attachment to a [`MemoryDiscovery`].
#[derive(Clone)]
pub struct MemoryDiscoveryEndpoint {
    hub: Arc<Mutex<Hub>>,
    device: u64,
}

impl DiscoveryTransport for MemoryDiscoveryEndpoint {
    fn publish(&self, message: Vec<u8>) -> SyncResult<DiscoveryHandle> {
        let id = {
            let mut hub = lock(&self.hub);
            hub.next_id += 1;
            let id = hub.next_id;
            for (device, sink) in hub.subscribers.values() {
                if *device != self.device {
                    let _ = sink.send(DiscoveryEvent::Found(message.clone()));
                }
            }
            hub.publications.insert(id, (self.device, message));
            id
        };
        debug!(device = self.device, publication = id, "discovery message published");

        let hub = Arc::clone(&self.hub);
        let publisher = self.device;
        Ok(DiscoveryHandle::new(move || {
            let mut hub = lock(&hub);
            if let Some((_, message)) = hub.publications.remove(&id) {
                for (device, sink) in hub.subscribers.values() {
                    if *device != publisher {
                        let _ = sink.send(DiscoveryEvent::Lost(message.clone()));
                    }
                }
            }
        }))
    }

    fn subscribe(&self, sink: DiscoverySink) -> SyncResult<DiscoveryHandle> {
        let id = {
            let mut hub = lock(&self.hub);
            hub.next_id += 1;
            let id = hub.next_id;
            for (device, message) in hub.publications.values() {
                if *device != self.device {
                    let _ = sink.send(DiscoveryEvent::Found(message.clone()));
                }
            }
            hub.subscribers.insert(id, (self.device, sink));
            id
        };

        let hub = Arc::clone(&self.hub);
        Ok(DiscoveryHandle::new(move || {
            lock(&hub).subscribers.remove(&id);
        }))
    }
}

fn lock(hub: &Mutex<Hub>) -> MutexGuard<'_, Hub> {
    hub.lock().unwrap_or_else(PoisonError::into_inner)
}
