//! Two simulated Shared Line devices on in-memory collaborators.
//!
//! [`run_simulation`] spawns a [`PairingSession`] per device, walks both
//! through discovery and the anchor exchange, and once they are synced has
//! each draw a few noisy strokes that the other must mirror.

use anyhow::{Context, Result, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sharedline_stroke::{DEFAULT_LINE_WIDTH, Stroke};
use sharedline_sync::{
    Collaborators, MemoryAnchorService, MemoryDiscovery, MemoryStore, PairingSession,
    PairingState, PairingStateMachine, SessionConfig, SessionEvent, SessionHandle,
};
use sharedline_types::{AnchorTransform, ParticipantId, Point3, RoomCode, StrokeKey};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

/// Participant id of the device that ends up hosting.
pub const HOST_DEVICE: &str = "device-a";
/// Participant id of the device that resolves the host's anchor.
pub const PARTNER_DEVICE: &str = "device-b";

const STROKE_SYNC_LIMIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Strokes each device draws once synced.
    pub seed_strokes: usize,
    /// Raw samples fed to the smoother per stroke.
    pub points_per_stroke: usize,
    /// Make the anchor service reject hosting.
    pub fail_hosting: bool,
    /// Seed for the simulated hand jitter.
    pub seed: u64,
    pub session: SessionConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed_strokes: 3,
            points_per_stroke: 60,
            fail_hosting: false,
            seed: 7,
            session: SessionConfig::default(),
        }
    }
}

/// What one device went through.
#[derive(Debug, Clone)]
pub struct DeviceReport {
    pub participant: String,
    pub transitions: Vec<PairingState>,
    pub final_state: PairingState,
    pub strokes_sent: usize,
    pub strokes_received: usize,
    pub points_received: usize,
    pub anchors_resolved: usize,
    pub uploads_dropped: usize,
}

#[derive(Debug, Clone)]
pub struct SimReport {
    pub room: Option<RoomCode>,
    pub anchor_id: Option<String>,
    pub host: DeviceReport,
    pub partner: DeviceReport,
}

impl SimReport {
    pub fn synced(&self) -> bool {
        self.host.final_state == PairingState::Synced
            && self.partner.final_state == PairingState::Synced
    }
}

impl fmt::Display for SimReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.room {
            Some(room) => writeln!(f, "room:   {room}")?,
            None => writeln!(f, "room:   -")?,
        }
        writeln!(f, "anchor: {}", self.anchor_id.as_deref().unwrap_or("-"))?;
        for device in [&self.host, &self.partner] {
            let path: Vec<&str> = device.transitions.iter().map(PairingState::name).collect();
            writeln!(f)?;
            writeln!(f, "{} ({})", device.participant, device.final_state)?;
            writeln!(f, "  states:   {}", path.join(" -> "))?;
            writeln!(
                f,
                "  strokes:  {} sent, {} received ({} points)",
                device.strokes_sent, device.strokes_received, device.points_received
            )?;
            if device.uploads_dropped > 0 {
                writeln!(f, "  dropped:  {}", device.uploads_dropped)?;
            }
        }
        Ok(())
    }
}

struct World {
    store: MemoryStore,
    discovery: MemoryDiscovery,
    anchors: MemoryAnchorService,
}

struct SimDevice {
    participant: String,
    handle: SessionHandle,
    task: JoinHandle<PairingStateMachine>,
    states: mpsc::UnboundedReceiver<PairingState>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    transitions: Vec<PairingState>,
    received: HashMap<StrokeKey, usize>,
    strokes_sent: usize,
    anchors_resolved: usize,
    uploads_dropped: usize,
}

impl SimDevice {
    fn spawn(participant: &str, world: &World, config: &SessionConfig) -> Self {
        let collaborators = Collaborators {
            store: Arc::new(world.store.connect()),
            discovery: Arc::new(world.discovery.endpoint()),
            anchors: Arc::new(world.anchors.clone()),
        };
        let (mut machine, events) = PairingStateMachine::new(
            ParticipantId::new(participant),
            config.clone(),
            collaborators,
        );
        let (tx, states) = mpsc::unbounded_channel();
        machine.subscribe_state(move |_, new| {
            let _ = tx.send(new);
        });
        let (session, handle) = PairingSession::new(machine);

        Self {
            participant: participant.to_string(),
            handle,
            task: tokio::spawn(session.run()),
            states,
            events,
            transitions: Vec::new(),
            received: HashMap::new(),
            strokes_sent: 0,
            anchors_resolved: 0,
            uploads_dropped: 0,
        }
    }

    fn current(&self) -> PairingState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(PairingState::Idle)
    }

    /// Waits for a state accepted by `done`.
    async fn wait_until(
        &mut self,
        limit: Duration,
        done: impl Fn(PairingState) -> bool,
    ) -> Result<PairingState> {
        let deadline = Instant::now() + limit;
        while !done(self.current()) {
            let state = timeout_at(deadline, self.states.recv())
                .await
                .with_context(|| format!("{} stuck in {}", self.participant, self.current()))?
                .context("session stopped")?;
            self.transitions.push(state);
        }
        Ok(self.current())
    }

    /// Draws `count` strokes through the smoother, uploading after every
    /// accepted sample. Returns the final point count per stroke.
    fn draw(
        &mut self,
        rng: &mut StdRng,
        config: &SimConfig,
        lane: f32,
    ) -> Result<HashMap<StrokeKey, usize>> {
        let mut drawn = HashMap::new();
        for i in 0..config.seed_strokes {
            let mut stroke = Stroke::new(DEFAULT_LINE_WIDTH);
            stroke.set_anchor(AnchorTransform::IDENTITY);
            for step in 0..config.points_per_stroke {
                let t = step as f32;
                let raw = Point3::new(
                    t * 0.01 + rng.gen_range(-0.001..0.001),
                    0.05 * (t * 0.3).sin() + rng.gen_range(-0.001..0.001),
                    lane + i as f32 * 0.05,
                );
                if stroke.add_point(raw).accepted {
                    self.handle.update_stroke(stroke.clone())?;
                }
            }
            debug!(device = %self.participant, stroke = %stroke.key(), points = stroke.len(), "stroke drawn");
            drawn.insert(stroke.key().clone(), stroke.len());
            self.strokes_sent += 1;
        }
        Ok(drawn)
    }

    /// Consumes session events until every stroke in `expected` arrived
    /// with its final point count.
    async fn mirror(&mut self, expected: &HashMap<StrokeKey, usize>) -> Result<()> {
        let deadline = Instant::now() + STROKE_SYNC_LIMIT;
        while !expected
            .iter()
            .all(|(key, len)| self.received.get(key) == Some(len))
        {
            let event = timeout_at(deadline, self.events.recv())
                .await
                .with_context(|| format!("{} missed remote strokes", self.participant))?
                .context("session stopped")?;
            self.apply(event);
        }
        Ok(())
    }

    fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StrokeAdded(stroke) | SessionEvent::StrokeUpdated(stroke) => {
                self.received.insert(stroke.key().clone(), stroke.len());
            }
            SessionEvent::StrokeRemoved(key) => {
                self.received.remove(&key);
            }
            SessionEvent::LocalStrokeRemoved(key) => {
                warn!(device = %self.participant, stroke = %key, "upload dropped");
                self.uploads_dropped += 1;
            }
            SessionEvent::AnchorResolved(transform) => {
                debug!(device = %self.participant, origin = ?transform.translation(), "anchor resolved");
                self.anchors_resolved += 1;
            }
        }
    }

    async fn finish(mut self) -> Result<(DeviceReport, PairingStateMachine)> {
        self.handle.shutdown()?;
        let machine = (&mut self.task).await.context("session task failed")?;
        while let Ok(state) = self.states.try_recv() {
            self.transitions.push(state);
        }
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
        }

        let report = DeviceReport {
            participant: self.participant,
            transitions: self.transitions,
            final_state: machine.state(),
            strokes_sent: self.strokes_sent,
            strokes_received: self.received.len(),
            points_received: self.received.values().sum(),
            anchors_resolved: self.anchors_resolved,
            uploads_dropped: self.uploads_dropped,
        };
        Ok((report, machine))
    }
}

/// Pairs two simulated devices and, once synced, exchanges strokes.
pub async fn run_simulation(config: &SimConfig) -> Result<SimReport> {
    let world = World {
        store: MemoryStore::new(),
        discovery: MemoryDiscovery::new(),
        anchors: MemoryAnchorService::new(),
    };
    world.anchors.set_fail_hosting(config.fail_hosting);
    let pairing_limit = config.session.discovery_timeout()
        + config.session.pairing_timeout()
        + Duration::from_secs(1);

    let mut host = SimDevice::spawn(HOST_DEVICE, &world, &config.session);
    let mut partner = SimDevice::spawn(PARTNER_DEVICE, &world, &config.session);
    info!(seed_strokes = config.seed_strokes, fail_hosting = config.fail_hosting, "simulation started");

    host.handle.begin_pairing()?;
    partner.handle.begin_pairing()?;
    let discovered = |s: PairingState| {
        matches!(s, PairingState::AwaitingPartnerAnchorReady(_)) || s.is_terminal()
    };
    let host_state = host.wait_until(pairing_limit, discovered).await?;
    let partner_state = partner.wait_until(pairing_limit, discovered).await?;

    if !host_state.is_terminal() && !partner_state.is_terminal() {
        host.handle
            .ready_to_set_anchor(AnchorTransform::from_translation(Point3::new(0.0, 0.0, -0.5)))?;
        partner.handle.ready_to_set_anchor(AnchorTransform::IDENTITY)?;
        host.wait_until(pairing_limit, |s| s.is_terminal()).await?;
        partner.wait_until(pairing_limit, |s| s.is_terminal()).await?;
    }

    if host.current() == PairingState::Synced && partner.current() == PairingState::Synced {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let from_host = host.draw(&mut rng, config, 0.0)?;
        let from_partner = partner.draw(&mut rng, config, 0.5)?;
        partner.mirror(&from_host).await?;
        host.mirror(&from_partner).await?;
    } else {
        warn!(host = %host.current(), partner = %partner.current(), "devices did not sync");
    }

    let (host, host_machine) = host.finish().await?;
    let (partner, partner_machine) = partner.finish().await?;
    if host.transitions.is_empty() {
        bail!("host never left idle");
    }

    Ok(SimReport {
        room: host_machine.room_code().cloned(),
        anchor_id: partner_machine.room().anchor_id().map(str::to_string),
        host,
        partner,
    })
}
