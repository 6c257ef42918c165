//! Observable pairing state.

use crate::room::Role;
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// Where a pairing session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairingState {
    /// Nothing started yet.
    Idle,
    /// Announcing our room and listening for a nearby partner.
    Discovering,
    /// Partner found; waiting for both users to confirm the surface.
    AwaitingPartnerAnchorReady(Role),
    /// Host is creating and publishing the anchor.
    HostConnecting,
    /// Partner is waiting for, or resolving, the host's anchor.
    PartnerConnecting,
    /// Both devices share the anchor and mirror strokes.
    Synced,
    /// No partner showed up in time.
    DiscoveryTimedOut,
    /// Hosting the anchor failed, here or on the host device.
    HostAnchorError,
    /// Resolving the anchor failed, here or on the partner device.
    PartnerResolveError,
    /// The partner left or the shared anchor disappeared.
    ConnectionLost,
    /// The network is unreachable.
    Offline,
    /// The user cancelled.
    Cancelled,
}

impl PairingState {
    /// True once the session stopped making progress on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Synced
                | Self::DiscoveryTimedOut
                | Self::HostAnchorError
                | Self::PartnerResolveError
                | Self::ConnectionLost
                | Self::Offline
                | Self::Cancelled
        )
    }

    /// True for failures that [`retry`](crate::PairingStateMachine::retry)
    /// can recover from.
    pub fn is_retryable(&self) -> bool {
        self.is_terminal() && !matches!(self, Self::Synced | Self::Cancelled)
    }

    /// True while a pairing attempt is underway.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Discovering
                | Self::AwaitingPartnerAnchorReady(_)
                | Self::HostConnecting
                | Self::PartnerConnecting
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::AwaitingPartnerAnchorReady(Role::Host) => "awaiting_partner_anchor_ready(host)",
            Self::AwaitingPartnerAnchorReady(Role::Partner) => {
                "awaiting_partner_anchor_ready(partner)"
            }
            Self::HostConnecting => "host_connecting",
            Self::PartnerConnecting => "partner_connecting",
            Self::Synced => "synced",
            Self::DiscoveryTimedOut => "discovery_timed_out",
            Self::HostAnchorError => "host_anchor_error",
            Self::PartnerResolveError => "partner_resolve_error",
            Self::ConnectionLost => "connection_lost",
            Self::Offline => "offline",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle returned by [`PairingStateHolder::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(PairingState, PairingState) + Send>;

/// Current state plus the callbacks interested in changes.
///
/// Listeners run synchronously inside [`set`](Self::set), in subscription
/// order, with `(old, new)`.
pub struct PairingStateHolder {
    current: PairingState,
    listeners: BTreeMap<ListenerId, Listener>,
    next_listener: u64,
}

impl PairingStateHolder {
    pub fn new() -> Self {
        Self {
            current: PairingState::Idle,
            listeners: BTreeMap::new(),
            next_listener: 0,
        }
    }

    pub fn current(&self) -> PairingState {
        self.current
    }

    /// Moves to `new`, notifying listeners. Setting the current state again
    /// is a no-op and returns false.
    pub fn set(&mut self, new: PairingState) -> bool {
        let old = self.current;
        if old == new {
            return false;
        }
        self.current = new;
        info!(from = %old, to = %new, "pairing state changed");
        for listener in self.listeners.values_mut() {
            listener(old, new);
        }
        true
    }

    pub fn subscribe(
        &mut self,
        listener: impl FnMut(PairingState, PairingState) + Send + 'static,
    ) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.insert(id, Box::new(listener));
        id
    }

    /// Returns whether the listener was registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for PairingStateHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PairingStateHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingStateHolder")
            .field("current", &self.current)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn starts_idle() {
        let holder = PairingStateHolder::new();
        assert_eq!(holder.current(), PairingState::Idle);
        assert_eq!(holder.listener_count(), 0);
    }

    #[test]
    fn listeners_see_old_and_new_in_order() {
        let mut holder = PairingStateHolder::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let calls = Arc::clone(&calls);
            holder.subscribe(move |old, new| calls.lock().unwrap().push((tag, old, new)));
        }

        assert!(holder.set(PairingState::Discovering));

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                ("first", PairingState::Idle, PairingState::Discovering),
                ("second", PairingState::Idle, PairingState::Discovering),
            ]
        );
    }

    #[test]
    fn setting_the_same_state_is_silent() {
        let mut holder = PairingStateHolder::new();
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        holder.subscribe(move |_, _| *sink.lock().unwrap() += 1);

        assert!(holder.set(PairingState::Offline));
        assert!(!holder.set(PairingState::Offline));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let mut holder = PairingStateHolder::new();
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        let id = holder.subscribe(move |_, _| *sink.lock().unwrap() += 1);

        assert!(holder.unsubscribe(id));
        assert!(!holder.unsubscribe(id));
        holder.set(PairingState::Cancelled);
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn classification() {
        use PairingState::*;
        let retryable = [
            DiscoveryTimedOut,
            HostAnchorError,
            PartnerResolveError,
            ConnectionLost,
            Offline,
        ];
        for state in retryable {
            assert!(state.is_terminal(), "{state}");
            assert!(state.is_retryable(), "{state}");
            assert!(!state.is_active(), "{state}");
        }
        for state in [Synced, Cancelled] {
            assert!(state.is_terminal());
            assert!(!state.is_retryable());
        }
        for state in [
            Discovering,
            AwaitingPartnerAnchorReady(Role::Host),
            HostConnecting,
            PartnerConnecting,
        ] {
            assert!(state.is_active());
            assert!(!state.is_terminal());
        }
        assert!(!Idle.is_active() && !Idle.is_terminal());
    }

    #[test]
    fn display_names() {
        assert_eq!(
            PairingState::AwaitingPartnerAnchorReady(Role::Partner).to_string(),
            "awaiting_partner_anchor_ready(partner)"
        );
        assert_eq!(PairingState::DiscoveryTimedOut.to_string(), "discovery_timed_out");
    }
}
