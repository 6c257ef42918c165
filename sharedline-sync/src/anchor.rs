//! Anchor hosting and resolution.
//!
//! The host turns a local transform into an anchor id that the partner can
//! resolve back into the same physical transform. Operations are async and
//! may fail; the pairing state machine tags each call with the session it
//! was issued on so results from a discarded session are ignored.

use crate::error::AnchorError;
use async_trait::async_trait;
use sharedline_types::AnchorTransform;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// One anchor-resolution session.
#[async_trait]
pub trait AnchorSession: Send + Sync {
    /// Hosts an anchor at `transform` and returns its shareable id.
    async fn host_anchor(&self, transform: AnchorTransform) -> Result<String, AnchorError>;

    /// Resolves a hosted anchor id into a local transform.
    async fn resolve_anchor(&self, anchor_id: &str) -> Result<AnchorTransform, AnchorError>;
}

/// Creates anchor sessions.
pub trait AnchorService: Send + Sync {
    fn new_session(&self) -> Result<Arc<dyn AnchorSession>, AnchorError>;
}

#[derive(Default)]
struct Registry {
    anchors: HashMap<String, AnchorTransform>,
    queued_ids: VecDeque<String>,
    next_id: u64,
    sessions_created: usize,
    fail_hosting: bool,
    fail_resolving: bool,
    stalled: bool,
    unavailable: bool,
}

/// Anchor service backed by a shared in-process registry, with switches for
/// injecting failures.
#[derive(Clone, Default)]
pub struct MemoryAnchorService {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryAnchorService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `id` for the next hosted anchor instead of a generated one.
    pub fn queue_anchor_id(&self, id: impl Into<String>) {
        self.lock().queued_ids.push_back(id.into());
    }

    pub fn set_fail_hosting(&self, fail: bool) {
        self.lock().fail_hosting = fail;
    }

    pub fn set_fail_resolving(&self, fail: bool) {
        self.lock().fail_resolving = fail;
    }

    /// Makes host and resolve calls hang until the session is dropped.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// Makes `new_session` fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn sessions_created(&self) -> usize {
        self.lock().sessions_created
    }

    pub fn hosted(&self, anchor_id: &str) -> Option<AnchorTransform> {
        self.lock().anchors.get(anchor_id).copied()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AnchorService for MemoryAnchorService {
    fn new_session(&self) -> Result<Arc<dyn AnchorSession>, AnchorError> {
        let mut registry = self.lock();
        if registry.unavailable {
            return Err(AnchorError::SessionUnavailable);
        }
        registry.sessions_created += 1;
        Ok(Arc::new(MemoryAnchorSession {
            registry: Arc::clone(&self.registry),
        }))
    }
}

struct MemoryAnchorSession {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryAnchorSession {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait_if_stalled(&self) {
        let stalled = self.lock().stalled;
        if stalled {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl AnchorSession for MemoryAnchorSession {
    async fn host_anchor(&self, transform: AnchorTransform) -> Result<String, AnchorError> {
        self.wait_if_stalled().await;
        let mut registry = self.lock();
        if registry.fail_hosting {
            return Err(AnchorError::HostingFailed("service rejected anchor".into()));
        }
        let id = match registry.queued_ids.pop_front() {
            Some(id) => id,
            None => {
                registry.next_id += 1;
                format!("anchor-{}", registry.next_id)
            }
        };
        registry.anchors.insert(id.clone(), transform);
        debug!(anchor = %id, "anchor hosted");
        Ok(id)
    }

    async fn resolve_anchor(&self, anchor_id: &str) -> Result<AnchorTransform, AnchorError> {
        self.wait_if_stalled().await;
        let registry = self.lock();
        if registry.fail_resolving {
            return Err(AnchorError::ResolveFailed("service could not localize".into()));
        }
        registry
            .anchors
            .get(anchor_id)
            .copied()
            .ok_or_else(|| AnchorError::ResolveFailed(format!("unknown anchor {anchor_id}")))
    }
}
