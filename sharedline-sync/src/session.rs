//! Async driver for a [`PairingStateMachine`].

use crate::error::{SyncError, SyncResult};
use crate::pairing::{PairingStateMachine, Reachability, SessionInput, UserAction};
use sharedline_stroke::Stroke;
use sharedline_types::AnchorTransform;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

/// Runs the coordination loop of one device.
pub struct PairingSession {
    machine: PairingStateMachine,
}

impl PairingSession {
    /// Wraps `machine` and returns a handle for feeding it from other tasks.
    pub fn new(machine: PairingStateMachine) -> (Self, SessionHandle) {
        let handle = SessionHandle {
            inputs: machine.input_sender(),
        };
        (Self { machine }, handle)
    }

    /// Processes inputs and timers until [`SessionHandle::shutdown`] is
    /// called, then hands the machine back.
    pub async fn run(mut self) -> PairingStateMachine {
        info!(participant = %self.machine.participant(), "pairing session started");
        loop {
            let deadline = self.machine.next_deadline();
            tokio::select! {
                input = self.machine.recv() => match input {
                    Some(SessionInput::Shutdown) | None => break,
                    Some(input) => self.machine.handle(input),
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.machine.poll_timers(Instant::now());
                }
            }
        }
        debug!(state = %self.machine.state(), "pairing session stopped");
        self.machine
    }
}

/// Cloneable sender of inputs to a running [`PairingSession`].
#[derive(Clone)]
pub struct SessionHandle {
    inputs: mpsc::UnboundedSender<SessionInput>,
}

impl SessionHandle {
    pub fn begin_pairing(&self) -> SyncResult<()> {
        self.user(UserAction::BeginPairing)
    }

    pub fn ready_to_set_anchor(&self, transform: AnchorTransform) -> SyncResult<()> {
        self.user(UserAction::ReadyToSetAnchor(transform))
    }

    pub fn retry(&self) -> SyncResult<()> {
        self.user(UserAction::Retry)
    }

    pub fn cancel(&self) -> SyncResult<()> {
        self.user(UserAction::Cancel)
    }

    pub fn update_stroke(&self, stroke: Stroke) -> SyncResult<()> {
        self.user(UserAction::UpdateStroke(stroke))
    }

    pub fn remove_stroke(&self, stroke: Stroke) -> SyncResult<()> {
        self.user(UserAction::RemoveStroke(stroke))
    }

    pub fn clear_all_strokes(&self) -> SyncResult<()> {
        self.user(UserAction::ClearAllStrokes)
    }

    pub fn resume(&self) -> SyncResult<()> {
        self.user(UserAction::ResumeRoom)
    }

    pub fn set_reachability(&self, reachability: Reachability) -> SyncResult<()> {
        self.send(SessionInput::Connectivity(reachability))
    }

    /// Stops the session loop after the inputs already queued.
    pub fn shutdown(&self) -> SyncResult<()> {
        self.send(SessionInput::Shutdown)
    }

    pub fn send(&self, input: SessionInput) -> SyncResult<()> {
        self.inputs
            .send(input)
            .map_err(|_| SyncError::ChannelClosed)
    }

    fn user(&self, action: UserAction) -> SyncResult<()> {
        self.send(SessionInput::User(action))
    }
}
