//! Per-stroke upload serialization.
//!
//! At most one write is in flight at a time; updates arriving meanwhile are
//! buffered per stroke key, and a newer update replaces an older buffered
//! one. When the in-flight write succeeds, every buffered update is
//! re-enqueued under the same admission rule. A failed write is never
//! retried: the stroke is reported as locally removed and its record is
//! deleted. A deletion for a key whose write is in flight waits for that
//! write to finish.

use crate::error::{SyncError, SyncResult};
use crate::store::RealtimeStore;
use async_trait::async_trait;
use sharedline_stroke::{Stroke, StrokeError, diff_points};
use sharedline_types::{Point3, StrokeKey};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Performs the actual stroke writes.
#[async_trait]
pub trait StrokeUploader: Send + Sync {
    async fn upload(&self, key: &StrokeKey, stroke: &Stroke) -> SyncResult<()>;
    async fn remove(&self, key: &StrokeKey) -> SyncResult<()>;
}

/// Raised by the queue outside the caller's control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueNotification {
    /// An upload failed; the stroke should be dropped locally.
    LocalStrokeRemoved(StrokeKey),
}

#[derive(Default)]
struct QueueState {
    in_flight: HashSet<StrokeKey>,
    buffered: BTreeMap<StrokeKey, Stroke>,
    held_removals: HashSet<StrokeKey>,
    generation: u64,
}

/// Serializes and coalesces stroke uploads.
///
/// Cloning yields another handle to the same queue. Upload completions run
/// on spawned tasks, so the queue must be used inside a Tokio runtime.
#[derive(Clone)]
pub struct StrokeUploadQueue {
    state: Arc<Mutex<QueueState>>,
    uploader: Arc<dyn StrokeUploader>,
    notifications: mpsc::UnboundedSender<QueueNotification>,
}

impl StrokeUploadQueue {
    pub fn new(
        uploader: Arc<dyn StrokeUploader>,
        notifications: mpsc::UnboundedSender<QueueNotification>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            uploader,
            notifications,
        }
    }

    /// Queues an update for `key`, or a deletion when `remove` is set.
    ///
    /// Deletions skip admission and discard any buffered update for the key.
    /// If the key itself has a write in flight, the deletion is held until
    /// that write completes so the record cannot reappear behind it.
    pub fn enqueue(&self, key: StrokeKey, stroke: Stroke, remove: bool) {
        if remove {
            let held = {
                let mut state = self.lock();
                state.buffered.remove(&key);
                let in_flight = state.in_flight.contains(&key);
                if in_flight {
                    state.held_removals.insert(key.clone());
                }
                in_flight
            };
            if held {
                debug!(stroke = %key, "write in flight, holding removal");
            } else {
                self.spawn_remove(key);
            }
            return;
        }

        let generation = {
            let mut state = self.lock();
            if !state.in_flight.is_empty() {
                debug!(stroke = %key, "upload in flight, buffering update");
                state.buffered.insert(key, stroke);
                return;
            }
            state.in_flight.insert(key.clone());
            state.buffered.remove(&key);
            state.generation
        };

        let queue = self.clone();
        tokio::spawn(async move {
            let result = queue.uploader.upload(&key, &stroke).await;
            queue.complete(generation, key, result);
        });
    }

    /// Forgets all in-flight and buffered work. Completions of writes
    /// started before the reset are ignored.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.in_flight.clear();
        state.buffered.clear();
        state.held_removals.clear();
        state.generation += 1;
    }

    /// Keys with a write currently in flight, sorted.
    pub fn in_flight_keys(&self) -> Vec<StrokeKey> {
        let mut keys: Vec<StrokeKey> = self.lock().in_flight.iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of keys with a buffered update.
    pub fn buffered_len(&self) -> usize {
        self.lock().buffered.len()
    }

    fn complete(&self, generation: u64, key: StrokeKey, result: SyncResult<()>) {
        let (pending, remove) = {
            let mut state = self.lock();
            if state.generation != generation {
                debug!(stroke = %key, "ignoring upload completion from before reset");
                return;
            }
            state.in_flight.remove(&key);
            let remove = state.held_removals.remove(&key) || result.is_err();
            if remove {
                state.buffered.remove(&key);
            }
            let pending: Vec<(StrokeKey, Stroke)> =
                std::mem::take(&mut state.buffered).into_iter().collect();
            (pending, remove)
        };

        if let Err(e) = result {
            warn!(stroke = %key, error = %e, "stroke upload failed, removing stroke");
            let _ = self
                .notifications
                .send(QueueNotification::LocalStrokeRemoved(key.clone()));
        }
        if remove {
            self.spawn_remove(key);
        }

        for (key, stroke) in pending {
            self.enqueue(key, stroke, false);
        }
    }

    fn spawn_remove(&self, key: StrokeKey) {
        let uploader = Arc::clone(&self.uploader);
        tokio::spawn(async move {
            if let Err(e) = uploader.remove(&key).await {
                warn!(stroke = %key, error = %e, "stroke removal failed");
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Writes strokes into the current room's stroke collection.
///
/// The first upload of a key writes the full record; later uploads send
/// only the point indices that changed since the last successful upload.
pub struct StoreStrokeUploader {
    store: Arc<dyn RealtimeStore>,
    target: Mutex<Option<String>>,
    uploaded: Mutex<HashMap<StrokeKey, Vec<Point3>>>,
}

impl StoreStrokeUploader {
    pub fn new(store: Arc<dyn RealtimeStore>) -> Self {
        Self {
            store,
            target: Mutex::new(None),
            uploaded: Mutex::new(HashMap::new()),
        }
    }

    /// Points the uploader at a stroke collection path, or detaches it.
    /// Upload snapshots are dropped either way.
    pub fn set_target(&self, lines_path: Option<String>) {
        *self.target.lock().unwrap_or_else(PoisonError::into_inner) = lines_path;
        self.snapshots().clear();
    }

    /// Drops the upload snapshot of one stroke.
    pub fn forget(&self, key: &StrokeKey) {
        self.snapshots().remove(key);
    }

    pub fn has_snapshot(&self, key: &StrokeKey) -> bool {
        self.snapshots().contains_key(key)
    }

    fn stroke_path(&self, key: &StrokeKey) -> SyncResult<String> {
        let target = self.target.lock().unwrap_or_else(PoisonError::into_inner);
        let base = target.as_deref().ok_or(SyncError::NotInRoom)?;
        Ok(format!("{base}/{key}"))
    }

    fn snapshots(&self) -> MutexGuard<'_, HashMap<StrokeKey, Vec<Point3>>> {
        self.uploaded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StrokeUploader for StoreStrokeUploader {
    async fn upload(&self, key: &StrokeKey, stroke: &Stroke) -> SyncResult<()> {
        let path = self.stroke_path(key)?;
        let record = stroke.to_record().map_err(|e| match e {
            StrokeError::NoPoints | StrokeError::NoAnchor => SyncError::EmptyStroke,
            other => SyncError::Protocol(other.to_string()),
        })?;

        let previous = self.snapshots().get(key).cloned();
        match previous {
            None => self.store.set(&path, record.to_value()).await?,
            Some(previous) => {
                let changes = diff_points(&previous, &record.points);
                if changes.is_empty() {
                    return Ok(());
                }
                self.store.update(&format!("{path}/points"), changes).await?;
            }
        }

        self.snapshots().insert(key.clone(), record.points);
        Ok(())
    }

    async fn remove(&self, key: &StrokeKey) -> SyncResult<()> {
        let path = self.stroke_path(key)?;
        self.forget(key);
        self.store.remove(&path).await
    }
}
