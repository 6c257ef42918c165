//! The pairing session state machine.
//!
//! [`PairingStateMachine`] is the single coordination context of a device.
//! Every input (user actions, connectivity changes, room signals, discovery
//! messages, anchor service results, timers) is applied by one `&mut self`
//! call at a time, so no state besides the upload queue is shared across
//! tasks. Async work (anchor hosting and resolving) runs on spawned tasks
//! whose results come back as [`SessionInput::Anchor`].
//!
//! The machine never blocks and never awaits store writes. Timers are plain
//! deadlines: the driver calls [`poll_timers`](PairingStateMachine::poll_timers)
//! when [`next_deadline`](PairingStateMachine::next_deadline) passes. Clearing
//! a deadline is all it takes to invalidate a timer.

use crate::anchor::{AnchorService, AnchorSession};
use crate::config::SessionConfig;
use crate::discovery::{DiscoveryEvent, DiscoveryHandle, DiscoveryTransport};
use crate::error::{AnchorError, SyncResult};
use crate::record::{ParticipantRecord, RoomAnnouncement};
use crate::room::{AnchorLoss, Role, RoomEvent, RoomSignal, RoomSynchronizer};
use crate::state::{ListenerId, PairingState, PairingStateHolder};
use crate::store::RealtimeStore;
use sharedline_stroke::Stroke;
use sharedline_types::{AnchorTransform, ParticipantId, RoomCode, StrokeKey, Timestamp};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// External services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RealtimeStore>,
    pub discovery: Arc<dyn DiscoveryTransport>,
    pub anchors: Arc<dyn AnchorService>,
}

/// Something the user asked for.
#[derive(Debug, Clone)]
pub enum UserAction {
    BeginPairing,
    /// Both devices point at the same surface; carries the local transform
    /// the host will anchor.
    ReadyToSetAnchor(AnchorTransform),
    Retry,
    Cancel,
    UpdateStroke(Stroke),
    RemoveStroke(Stroke),
    ClearAllStrokes,
    ResumeRoom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

/// Result of an anchor service call.
#[derive(Debug, Clone)]
pub enum AnchorOutcome {
    Hosted(Result<String, AnchorError>),
    Resolved(Result<AnchorTransform, AnchorError>),
}

/// One input to the coordination loop.
#[derive(Debug, Clone)]
pub enum SessionInput {
    User(UserAction),
    Connectivity(Reachability),
    Room(RoomSignal),
    Discovery(DiscoveryEvent),
    /// `generation` identifies the anchor session the call was made on.
    Anchor {
        generation: u64,
        outcome: AnchorOutcome,
    },
    /// Stops the driver loop.
    Shutdown,
}

/// Output for the presentation layer besides state changes.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StrokeAdded(Stroke),
    StrokeUpdated(Stroke),
    StrokeRemoved(StrokeKey),
    /// A local stroke is gone from the room and should be discarded.
    LocalStrokeRemoved(StrokeKey),
    /// The shared anchor is established at this local transform.
    AnchorResolved(AnchorTransform),
}

/// Pairing and sync coordinator for one device.
pub struct PairingStateMachine {
    config: SessionConfig,
    collaborators: Collaborators,
    room: RoomSynchronizer,
    state: PairingStateHolder,
    events: mpsc::UnboundedSender<SessionEvent>,

    inputs_tx: mpsc::UnboundedSender<SessionInput>,
    inputs_rx: mpsc::UnboundedReceiver<SessionInput>,
    discovery_tx: mpsc::UnboundedSender<DiscoveryEvent>,
    discovery_rx: mpsc::UnboundedReceiver<DiscoveryEvent>,
    publication: Option<DiscoveryHandle>,
    discovery_subscription: Option<DiscoveryHandle>,

    discovery_deadline: Option<Instant>,
    pairing_deadline: Option<Instant>,

    anchor_session: Option<Arc<dyn AnchorSession>>,
    generation: u64,

    reachable: bool,
    partner: Option<ParticipantId>,
    partner_ready: bool,
    local_ready: bool,
    local_transform: AnchorTransform,
    hosted: bool,
    manual_resolve: bool,
    last_anchor_id: Option<String>,
}

impl PairingStateMachine {
    /// Creates an idle machine. Must be called inside a Tokio runtime.
    pub fn new(
        participant: ParticipantId,
        config: SessionConfig,
        collaborators: Collaborators,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
        let room = RoomSynchronizer::new(Arc::clone(&collaborators.store), participant, &config);

        let machine = Self {
            config,
            collaborators,
            room,
            state: PairingStateHolder::new(),
            events,
            inputs_tx,
            inputs_rx,
            discovery_tx,
            discovery_rx,
            publication: None,
            discovery_subscription: None,
            discovery_deadline: None,
            pairing_deadline: None,
            anchor_session: None,
            generation: 0,
            reachable: true,
            partner: None,
            partner_ready: false,
            local_ready: false,
            local_transform: AnchorTransform::IDENTITY,
            hosted: false,
            manual_resolve: false,
            last_anchor_id: None,
        };
        (machine, events_rx)
    }

    pub fn state(&self) -> PairingState {
        self.state.current()
    }

    pub fn role(&self) -> Option<Role> {
        self.room.role()
    }

    pub fn participant(&self) -> &ParticipantId {
        self.room.participant()
    }

    pub fn room_code(&self) -> Option<&RoomCode> {
        self.room.room_code()
    }

    pub fn room(&self) -> &RoomSynchronizer {
        &self.room
    }

    pub fn room_mut(&mut self) -> &mut RoomSynchronizer {
        &mut self.room
    }

    pub fn subscribe_state(
        &mut self,
        listener: impl FnMut(PairingState, PairingState) + Send + 'static,
    ) -> ListenerId {
        self.state.subscribe(listener)
    }

    pub fn unsubscribe_state(&mut self, id: ListenerId) -> bool {
        self.state.unsubscribe(id)
    }

    /// Sender for feeding inputs from other tasks.
    pub fn input_sender(&self) -> mpsc::UnboundedSender<SessionInput> {
        self.inputs_tx.clone()
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.discovery_deadline, self.pairing_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Waits for the next input from any source.
    pub async fn recv(&mut self) -> Option<SessionInput> {
        tokio::select! {
            Some(signal) = self.room.next_signal() => Some(SessionInput::Room(signal)),
            Some(event) = self.discovery_rx.recv() => Some(SessionInput::Discovery(event)),
            input = self.inputs_rx.recv() => input,
        }
    }

    /// Applies every input that is already queued. Returns how many were
    /// applied.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let input = if let Some(signal) = self.room.try_next_signal() {
                SessionInput::Room(signal)
            } else if let Ok(event) = self.discovery_rx.try_recv() {
                SessionInput::Discovery(event)
            } else if let Ok(input) = self.inputs_rx.try_recv() {
                input
            } else {
                return applied;
            };
            self.handle(input);
            applied += 1;
        }
    }

    /// Fires every timer whose deadline is at or before `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        if self.discovery_deadline.is_some_and(|d| d <= now) {
            self.discovery_deadline = None;
            self.on_discovery_timeout();
        }
        if self.pairing_deadline.is_some_and(|d| d <= now) {
            self.pairing_deadline = None;
            self.on_pairing_timeout();
        }
    }

    pub fn handle(&mut self, input: SessionInput) {
        match input {
            SessionInput::User(action) => self.on_user_action(action),
            SessionInput::Connectivity(reachability) => self.on_connectivity(reachability),
            SessionInput::Room(signal) => {
                for event in self.room.handle_signal(signal) {
                    self.on_room_event(event);
                }
            }
            SessionInput::Discovery(event) => self.on_discovery(event),
            SessionInput::Anchor {
                generation,
                outcome,
            } => {
                if generation != self.generation {
                    debug!(generation, current = self.generation, "ignoring result from discarded anchor session");
                    return;
                }
                match outcome {
                    AnchorOutcome::Hosted(result) => self.on_hosted(result),
                    AnchorOutcome::Resolved(result) => self.on_resolved(result),
                }
            }
            SessionInput::Shutdown => debug!("shutdown requested"),
        }
    }

    // ---- user actions ------------------------------------------------------

    /// Starts looking for a partner.
    pub fn begin_pairing(&mut self) {
        let state = self.state();
        if !(state == PairingState::Idle || state.is_retryable() || state == PairingState::Cancelled)
        {
            debug!(state = %state, "begin pairing ignored");
            return;
        }
        self.room.leave_room();
        self.start_discovery();
    }

    /// Records that the user confirmed the shared surface at `transform`.
    pub fn set_ready_to_set_anchor(&mut self, transform: AnchorTransform) {
        let PairingState::AwaitingPartnerAnchorReady(_) = self.state() else {
            debug!(state = %self.state(), "ready ignored");
            return;
        };
        self.local_ready = true;
        self.local_transform = transform;
        if let Err(e) = self.room.set_ready_to_set_anchor(true) {
            warn!(error = %e, "could not publish readiness");
            return;
        }
        self.evaluate_readiness();
    }

    /// Recovers from a retryable failure.
    pub fn retry(&mut self) {
        let state = self.state();
        match state {
            PairingState::DiscoveryTimedOut
            | PairingState::Offline
            | PairingState::ConnectionLost => {
                if !self.reachable {
                    info!(state = %state, "still offline, retry ignored");
                    self.transition(PairingState::Offline);
                    return;
                }
                self.room.leave_room();
                self.start_discovery();
            }
            PairingState::HostAnchorError => match self.room.role() {
                Some(role) => self.transition(PairingState::AwaitingPartnerAnchorReady(role)),
                None => {
                    self.room.leave_room();
                    self.start_discovery();
                }
            },
            PairingState::PartnerResolveError => match self.room.role() {
                Some(Role::Partner) => self.retry_resolve(),
                Some(Role::Host) => {
                    self.transition(PairingState::AwaitingPartnerAnchorReady(Role::Host))
                }
                None => {
                    self.room.leave_room();
                    self.start_discovery();
                }
            },
            _ => debug!(state = %state, "nothing to retry"),
        }
    }

    /// Abandons the session from any state.
    pub fn cancel(&mut self) {
        self.stop_discovery();
        self.discard_anchor_session();
        self.room.leave_room();
        self.reset_flags();
        self.last_anchor_id = None;
        self.partner = None;
        self.discovery_deadline = None;
        self.pairing_deadline = None;
        self.transition(PairingState::Cancelled);
    }

    /// Uploads a local stroke to the room.
    pub fn update_stroke(&mut self, stroke: &Stroke) -> SyncResult<()> {
        self.room.update_stroke(stroke, false)
    }

    /// Deletes a local stroke from the room.
    pub fn remove_stroke(&mut self, stroke: &Stroke) -> SyncResult<()> {
        self.room.update_stroke(stroke, true)
    }

    fn on_user_action(&mut self, action: UserAction) {
        let result = match action {
            UserAction::BeginPairing => {
                self.begin_pairing();
                Ok(())
            }
            UserAction::ReadyToSetAnchor(transform) => {
                self.set_ready_to_set_anchor(transform);
                Ok(())
            }
            UserAction::Retry => {
                self.retry();
                Ok(())
            }
            UserAction::Cancel => {
                self.cancel();
                Ok(())
            }
            UserAction::UpdateStroke(stroke) => self.update_stroke(&stroke),
            UserAction::RemoveStroke(stroke) => self.remove_stroke(&stroke),
            UserAction::ClearAllStrokes => self.room.clear_all_strokes(),
            UserAction::ResumeRoom => self.room.resume_room(),
        };
        if let Err(e) = result {
            warn!(error = %e, "user action dropped");
        }
    }

    // ---- discovery ---------------------------------------------------------

    fn start_discovery(&mut self) {
        self.reset_flags();
        self.partner = None;
        self.last_anchor_id = None;
        self.pairing_deadline = None;
        self.discard_anchor_session();

        if !self.reachable {
            self.transition(PairingState::Offline);
            return;
        }

        let code = match self.room.create_room(true) {
            Ok(code) => code,
            Err(e) => {
                warn!(error = %e, reason = "store_unavailable", "could not create room");
                self.transition(PairingState::Offline);
                return;
            }
        };

        let announcement = RoomAnnouncement::new(code.clone(), Timestamp::now());
        match self.collaborators.discovery.publish(announcement.encode()) {
            Ok(handle) => self.publication = Some(handle),
            Err(e) => warn!(room = %code, error = %e, "could not announce room"),
        }
        match self
            .collaborators
            .discovery
            .subscribe(self.discovery_tx.clone())
        {
            Ok(handle) => self.discovery_subscription = Some(handle),
            Err(e) => warn!(error = %e, "could not listen for nearby rooms"),
        }

        self.discovery_deadline = Some(Instant::now() + self.config.discovery_timeout());
        self.transition(PairingState::Discovering);
    }

    fn stop_discovery(&mut self) {
        self.discovery_deadline = None;
        self.publication = None;
        self.discovery_subscription = None;
    }

    fn on_discovery(&mut self, event: DiscoveryEvent) {
        let DiscoveryEvent::Found(message) = event else {
            return;
        };
        if self.state() != PairingState::Discovering {
            return;
        }
        let Some(announcement) = RoomAnnouncement::decode(&message) else {
            debug!("ignoring malformed room announcement");
            return;
        };
        match self.room.room_found(&announcement) {
            Ok(true) => {
                // Our own room is abandoned.
                self.publication = None;
            }
            Ok(false) => {}
            Err(e) => warn!(room = %announcement.code, error = %e, "could not join announced room"),
        }
    }

    fn on_discovery_timeout(&mut self) {
        if self.state() != PairingState::Discovering {
            return;
        }
        warn!(reason = "discovery_timeout", "no partner found");
        self.stop_discovery();
        self.transition(PairingState::DiscoveryTimedOut);
    }

    // ---- room events -------------------------------------------------------

    fn on_room_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::ParticipantJoined { id, record }
            | RoomEvent::ParticipantUpdated { id, record } => self.on_participant(id, record),
            RoomEvent::ParticipantRemoved { id } => self.on_participant_removed(id),
            RoomEvent::AnchorDiscovered(anchor_id) => self.on_anchor_discovered(anchor_id),
            RoomEvent::AnchorUnavailable(loss) => self.on_anchor_unavailable(loss),
            RoomEvent::StrokeAdded(stroke) => self.emit(SessionEvent::StrokeAdded(stroke)),
            RoomEvent::StrokeUpdated(stroke) => self.emit(SessionEvent::StrokeUpdated(stroke)),
            RoomEvent::StrokeRemoved(key) => self.emit(SessionEvent::StrokeRemoved(key)),
            RoomEvent::LocalStrokeRemoved(key) => {
                self.emit(SessionEvent::LocalStrokeRemoved(key))
            }
            RoomEvent::WriteFailed { path } => self.on_write_failed(path),
        }
    }

    fn on_participant(&mut self, id: ParticipantId, record: ParticipantRecord) {
        if self.partner.is_none() && self.room.role().is_some() && record.pairing {
            self.partner = Some(id.clone());
        }
        if self.partner.as_ref() != Some(&id) {
            return;
        }
        self.partner_ready = record.ready_to_set_anchor;

        match self.state() {
            PairingState::Discovering => {
                if let Some(role) = self.room.role() {
                    info!(partner = %id, role = ?role, "partner found");
                    self.stop_discovery();
                    self.transition(PairingState::AwaitingPartnerAnchorReady(role));
                    self.evaluate_readiness();
                }
            }
            PairingState::AwaitingPartnerAnchorReady(Role::Host)
            | PairingState::PartnerResolveError
                if self.room.role() == Some(Role::Host)
                    && record.anchor_resolved
                    && self.last_anchor_id.is_some() =>
            {
                // The partner recovered on its own with our published anchor.
                self.pairing_deadline = None;
                self.transition(PairingState::Synced);
            }
            PairingState::AwaitingPartnerAnchorReady(_) => self.evaluate_readiness(),
            PairingState::HostConnecting if self.hosted && record.anchor_resolved => {
                info!(partner = %id, "pair success");
                self.pairing_deadline = None;
                self.transition(PairingState::Synced);
            }
            _ => {}
        }
    }

    fn on_participant_removed(&mut self, id: ParticipantId) {
        if self.partner.as_ref() != Some(&id) {
            return;
        }
        let state = self.state();
        if !(matches!(
            state,
            PairingState::AwaitingPartnerAnchorReady(_)
                | PairingState::HostConnecting
                | PairingState::PartnerConnecting
                | PairingState::Synced
        )) {
            return;
        }
        warn!(partner = %id, reason = "partner_left", state = %state, "connection lost");
        self.pairing_deadline = None;
        self.discard_anchor_session();
        self.reset_flags();
        self.transition(PairingState::ConnectionLost);
    }

    fn on_anchor_discovered(&mut self, anchor_id: String) {
        self.last_anchor_id = Some(anchor_id.clone());
        if self.state() == PairingState::PartnerConnecting && self.room.role() == Some(Role::Partner)
        {
            self.resolve(anchor_id);
        }
    }

    fn on_anchor_unavailable(&mut self, loss: AnchorLoss) {
        let state = self.state();
        match (loss, state) {
            (AnchorLoss::ResolutionError, PairingState::HostConnecting) => {
                warn!(reason = "partner_resolve_failed", "partner could not resolve anchor");
                self.fail_pairing(PairingState::PartnerResolveError, false);
            }
            (AnchorLoss::ResolutionError, PairingState::PartnerConnecting) => {
                warn!(reason = "host_anchor_failed", "host could not create anchor");
                self.last_anchor_id = None;
                self.fail_pairing(PairingState::HostAnchorError, false);
            }
            (AnchorLoss::Removed, PairingState::Synced) => {
                warn!(reason = "anchor_removed", "shared anchor removed");
                self.reset_flags();
                self.transition(PairingState::ConnectionLost);
            }
            (AnchorLoss::Removed, _) => {
                if matches!(
                    state,
                    PairingState::Discovering
                        | PairingState::AwaitingPartnerAnchorReady(_)
                        | PairingState::PartnerConnecting
                ) {
                    self.last_anchor_id = None;
                }
            }
            _ => debug!(loss = ?loss, state = %state, "anchor loss ignored"),
        }
    }

    fn on_write_failed(&mut self, path: String) {
        match self.state() {
            PairingState::HostConnecting => {
                warn!(path = %path, reason = "store_write_failed", "hosting aborted");
                self.fail_pairing(PairingState::HostAnchorError, false);
            }
            PairingState::PartnerConnecting => {
                warn!(path = %path, reason = "store_write_failed", "resolving aborted");
                self.fail_pairing(PairingState::PartnerResolveError, false);
            }
            state => debug!(path = %path, state = %state, "write failure outside anchor exchange"),
        }
    }

    // ---- anchor exchange ---------------------------------------------------

    fn evaluate_readiness(&mut self) {
        let Some(role) = self.room.role() else {
            return;
        };
        if self.state() != PairingState::AwaitingPartnerAnchorReady(role) || !self.local_ready {
            return;
        }
        match role {
            Role::Host if self.partner_ready => {
                self.pairing_deadline = Some(Instant::now() + self.config.pairing_timeout());
                self.transition(PairingState::HostConnecting);
                self.host(self.local_transform);
            }
            Role::Host => debug!("waiting for partner readiness"),
            Role::Partner => {
                self.pairing_deadline = Some(Instant::now() + self.config.pairing_timeout());
                self.transition(PairingState::PartnerConnecting);
                if let Some(anchor_id) = self.room.anchor_id().map(str::to_string) {
                    self.resolve(anchor_id);
                }
            }
        }
    }

    fn retry_resolve(&mut self) {
        let Some(anchor_id) = self.last_anchor_id.clone() else {
            info!("no anchor id to resolve");
            return;
        };
        self.manual_resolve = true;
        self.pairing_deadline = Some(Instant::now() + self.config.pairing_timeout());
        self.transition(PairingState::PartnerConnecting);
        self.resolve(anchor_id);
    }

    fn host(&mut self, transform: AnchorTransform) {
        let session = match self.anchor_session() {
            Ok(session) => session,
            Err(e) => return self.on_hosted(Err(e)),
        };
        let generation = self.generation;
        let inputs = self.inputs_tx.clone();
        tokio::spawn(async move {
            let result = session.host_anchor(transform).await;
            let _ = inputs.send(SessionInput::Anchor {
                generation,
                outcome: AnchorOutcome::Hosted(result),
            });
        });
    }

    fn resolve(&mut self, anchor_id: String) {
        let session = match self.anchor_session() {
            Ok(session) => session,
            Err(e) => return self.on_resolved(Err(e)),
        };
        debug!(anchor = %anchor_id, "resolving anchor");
        let generation = self.generation;
        let inputs = self.inputs_tx.clone();
        tokio::spawn(async move {
            let result = session.resolve_anchor(&anchor_id).await;
            let _ = inputs.send(SessionInput::Anchor {
                generation,
                outcome: AnchorOutcome::Resolved(result),
            });
        });
    }

    fn on_hosted(&mut self, result: Result<String, AnchorError>) {
        if self.state() != PairingState::HostConnecting {
            debug!(state = %self.state(), "hosting result ignored");
            return;
        }
        let anchor_id = match result {
            Ok(anchor_id) => anchor_id,
            Err(e) => {
                warn!(error = %e, reason = "host_anchor_failed", "anchor hosting failed");
                return self.fail_pairing(PairingState::HostAnchorError, true);
            }
        };

        info!(anchor = %anchor_id, "anchor hosted");
        let published = self
            .room
            .set_anchor_id(&anchor_id)
            .and_then(|()| self.room.mark_anchor_resolved());
        if let Err(e) = published {
            warn!(error = %e, reason = "store_write_failed", "could not publish anchor");
            return self.fail_pairing(PairingState::HostAnchorError, false);
        }
        self.last_anchor_id = Some(anchor_id);
        self.hosted = true;
        self.emit(SessionEvent::AnchorResolved(self.local_transform));
    }

    fn on_resolved(&mut self, result: Result<AnchorTransform, AnchorError>) {
        if self.state() != PairingState::PartnerConnecting {
            debug!(state = %self.state(), "resolve result ignored");
            return;
        }
        let transform = match result {
            Ok(transform) => transform,
            Err(e) => {
                warn!(error = %e, reason = "partner_resolve_failed", "anchor resolve failed");
                let publish = !self.manual_resolve;
                return self.fail_pairing(PairingState::PartnerResolveError, publish);
            }
        };

        if let Err(e) = self.room.mark_anchor_resolved() {
            warn!(error = %e, reason = "store_write_failed", "could not acknowledge anchor");
            return self.fail_pairing(PairingState::PartnerResolveError, false);
        }
        info!("pair success");
        self.pairing_deadline = None;
        self.manual_resolve = false;
        self.emit(SessionEvent::AnchorResolved(transform));
        self.transition(PairingState::Synced);
    }

    fn on_pairing_timeout(&mut self) {
        let next = match self.state() {
            PairingState::HostConnecting => PairingState::HostAnchorError,
            PairingState::PartnerConnecting => PairingState::PartnerResolveError,
            _ => return,
        };
        warn!(reason = "pairing_timeout", "anchor exchange timed out");
        self.discard_anchor_session();
        let publish = !self.manual_resolve;
        self.fail_pairing(next, publish);
    }

    /// Ends the current anchor exchange in `next`, leaving everything ready
    /// for a clean retry.
    fn fail_pairing(&mut self, next: PairingState, publish_error: bool) {
        self.pairing_deadline = None;
        self.reset_flags();
        if let Err(e) = self.room.set_ready_to_set_anchor(false) {
            warn!(error = %e, "could not clear readiness");
        }
        if publish_error {
            if let Err(e) = self.room.publish_anchor_error() {
                warn!(error = %e, "could not publish anchor error");
            }
        }
        self.transition(next);
    }

    fn anchor_session(&mut self) -> Result<Arc<dyn AnchorSession>, AnchorError> {
        if let Some(session) = &self.anchor_session {
            return Ok(Arc::clone(session));
        }
        let session = self.collaborators.anchors.new_session()?;
        self.anchor_session = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Drops the anchor session; results still in flight are ignored.
    fn discard_anchor_session(&mut self) {
        self.anchor_session = None;
        self.generation += 1;
    }

    // ---- connectivity ------------------------------------------------------

    fn on_connectivity(&mut self, reachability: Reachability) {
        match reachability {
            Reachability::Reachable => {
                self.reachable = true;
                info!("network reachable");
            }
            Reachability::Unreachable => {
                self.reachable = false;
                let state = self.state();
                if !state.is_active() {
                    debug!(state = %state, "network unreachable");
                    return;
                }
                warn!(reason = "offline", state = %state, "network unreachable");
                self.stop_discovery();
                self.pairing_deadline = None;
                self.discard_anchor_session();
                self.reset_flags();
                self.transition(PairingState::Offline);
            }
        }
    }

    // ---- helpers -----------------------------------------------------------

    fn reset_flags(&mut self) {
        self.local_ready = false;
        self.partner_ready = false;
        self.hosted = false;
        self.manual_resolve = false;
    }

    fn transition(&mut self, next: PairingState) {
        self.state.set(next);
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("session event receiver dropped");
        }
    }
}
