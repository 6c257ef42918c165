//! Room presence, anchor exchange, and stroke mirroring.
//!
//! [`RoomSynchronizer`] owns this device's view of one room record. It is
//! driven from a single coordination context: store callbacks arrive as
//! [`RoomSignal`]s and are turned into [`RoomEvent`]s by
//! [`RoomSynchronizer::handle_signal`]. Store writes are issued through a
//! dedicated writer task so they reach the store in call order without the
//! caller awaiting them.

use crate::config::SessionConfig;
use crate::error::{SyncError, SyncResult};
use crate::record::{
    ANCHOR_KEY, AnchorRecord, DISPLAY_NAME_KEY, ParticipantRecord, RoomAnnouncement, RoomPaths,
    UPDATED_AT_KEY,
};
use crate::store::{ChildEvent, ChildEventKind, RealtimeStore, SubscriptionId};
use crate::upload::{QueueNotification, StoreStrokeUploader, StrokeUploadQueue};
use serde_json::{Map, Value};
use sharedline_stroke::{Stroke, StrokeRecord};
use sharedline_types::{ParticipantId, Point3, RoomCode, StrokeKey, Timestamp};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Which side of the anchor exchange this device is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Creates and publishes the anchor.
    Host,
    /// Resolves the host's anchor.
    Partner,
}

/// Role of `local` when paired with `remote`.
///
/// The lexicographically larger id is the partner, so two devices evaluating
/// this with swapped arguments always end up with opposite roles.
pub fn compute_role(local: &ParticipantId, remote: &ParticipantId) -> Role {
    if local > remote {
        Role::Partner
    } else {
        Role::Host
    }
}

/// Why the room's anchor went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorLoss {
    /// A participant flagged that hosting or resolving failed.
    ResolutionError,
    /// The anchor child was deleted.
    Removed,
}

/// Something observed in the room.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    ParticipantJoined {
        id: ParticipantId,
        record: ParticipantRecord,
    },
    ParticipantUpdated {
        id: ParticipantId,
        record: ParticipantRecord,
    },
    ParticipantRemoved {
        id: ParticipantId,
    },
    AnchorDiscovered(String),
    AnchorUnavailable(AnchorLoss),
    /// A stroke from another participant appeared.
    StrokeAdded(Stroke),
    /// A mirrored stroke's points were replaced.
    StrokeUpdated(Stroke),
    /// A mirrored stroke was deleted.
    StrokeRemoved(StrokeKey),
    /// A local stroke is gone: its upload failed or its record was deleted.
    LocalStrokeRemoved(StrokeKey),
    WriteFailed {
        path: String,
    },
}

/// Raw input for [`RoomSynchronizer::handle_signal`].
#[derive(Debug, Clone)]
pub enum RoomSignal {
    Child(ChildEvent),
    Queue(QueueNotification),
    WriteFailed(WriteFailure),
}

/// A store write issued by the room that did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Participants,
    Room,
    Strokes,
}

enum StoreOp {
    Set { path: String, value: Value },
    Update { path: String, children: Map<String, Value> },
    Remove { path: String },
    RemoveOnDisconnect { path: String },
}

impl StoreOp {
    fn path(&self) -> &str {
        match self {
            Self::Set { path, .. }
            | Self::Update { path, .. }
            | Self::Remove { path }
            | Self::RemoveOnDisconnect { path } => path,
        }
    }

    async fn apply(self, store: &dyn RealtimeStore) -> SyncResult<()> {
        match self {
            Self::Set { path, value } => store.set(&path, value).await,
            Self::Update { path, children } => store.update(&path, children).await,
            Self::Remove { path } => store.remove(&path).await,
            Self::RemoveOnDisconnect { path } => store.remove_on_disconnect(&path).await,
        }
    }
}

fn spawn_writer(
    store: Arc<dyn RealtimeStore>,
    failures: mpsc::UnboundedSender<WriteFailure>,
) -> mpsc::UnboundedSender<StoreOp> {
    let (tx, mut rx) = mpsc::unbounded_channel::<StoreOp>();
    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            let path = op.path().to_string();
            if let Err(e) = op.apply(store.as_ref()).await {
                warn!(path = %path, error = %e, "store write failed");
                let _ = failures.send(WriteFailure {
                    path,
                    error: e.to_string(),
                });
            }
        }
    });
    tx
}

/// This device's participation in a room.
pub struct RoomSynchronizer {
    store: Arc<dyn RealtimeStore>,
    participant: ParticipantId,
    paths: RoomPaths,
    global_room_path: String,
    display_name: String,

    writer: mpsc::UnboundedSender<StoreOp>,
    child_tx: mpsc::UnboundedSender<ChildEvent>,
    child_rx: mpsc::UnboundedReceiver<ChildEvent>,
    queue_rx: mpsc::UnboundedReceiver<QueueNotification>,
    failure_rx: mpsc::UnboundedReceiver<WriteFailure>,
    queue: StrokeUploadQueue,
    uploader: Arc<StoreStrokeUploader>,

    room: Option<RoomCode>,
    subscriptions: HashMap<SubscriptionId, Channel>,
    local: ParticipantRecord,
    partners: BTreeMap<ParticipantId, ParticipantRecord>,
    role: Option<Role>,
    anchor_id: Option<String>,
    local_strokes: HashSet<StrokeKey>,
    remote_strokes: HashMap<StrokeKey, Stroke>,
}

impl RoomSynchronizer {
    /// Creates a synchronizer that is not in any room yet.
    ///
    /// Spawns the store writer task, so this must be called inside a Tokio
    /// runtime.
    pub fn new(
        store: Arc<dyn RealtimeStore>,
        participant: ParticipantId,
        config: &SessionConfig,
    ) -> Self {
        let (child_tx, child_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let uploader = Arc::new(StoreStrokeUploader::new(Arc::clone(&store)));
        let queue = StrokeUploadQueue::new(uploader.clone(), queue_tx);

        Self {
            writer: spawn_writer(Arc::clone(&store), failure_tx),
            store,
            participant,
            paths: RoomPaths::new(config.rooms_root.clone()),
            global_room_path: config.global_room_path.clone(),
            display_name: config.display_name.clone(),
            child_tx,
            child_rx,
            queue_rx,
            failure_rx,
            queue,
            uploader,
            room: None,
            subscriptions: HashMap::new(),
            local: ParticipantRecord::default(),
            partners: BTreeMap::new(),
            role: None,
            anchor_id: None,
            local_strokes: HashSet::new(),
            remote_strokes: HashMap::new(),
        }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn room_code(&self) -> Option<&RoomCode> {
        self.room.as_ref()
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn partners(&self) -> impl Iterator<Item = (&ParticipantId, &ParticipantRecord)> {
        self.partners.iter()
    }

    pub fn local_record(&self) -> &ParticipantRecord {
        &self.local
    }

    pub fn anchor_id(&self) -> Option<&str> {
        self.anchor_id.as_deref()
    }

    pub fn is_local_stroke(&self, key: &StrokeKey) -> bool {
        self.local_strokes.contains(key)
    }

    pub fn remote_stroke(&self, key: &StrokeKey) -> Option<&Stroke> {
        self.remote_strokes.get(key)
    }

    pub fn remote_stroke_count(&self) -> usize {
        self.remote_strokes.len()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn queue(&self) -> &StrokeUploadQueue {
        &self.queue
    }

    pub fn set_global_room_path(&mut self, path: impl Into<String>) {
        self.global_room_path = path.into();
    }

    /// Creates a fresh room and joins it.
    pub fn create_room(&mut self, pairing: bool) -> SyncResult<RoomCode> {
        self.leave_room();
        let code = RoomCode::new(self.store.generate_key());

        let mut meta = Map::new();
        meta.insert(
            UPDATED_AT_KEY.into(),
            Value::from(Timestamp::now().as_millis()),
        );
        meta.insert(
            DISPLAY_NAME_KEY.into(),
            Value::from(self.display_name.as_str()),
        );
        self.write(StoreOp::Update {
            path: self.paths.room(&code),
            children: meta,
        })?;

        self.enter(code.clone(), pairing)?;
        info!(room = %code, "room created");
        Ok(code)
    }

    /// Joins an existing room, leaving the current one first. Joining the
    /// room we are already in is a no-op.
    pub fn join_room(&mut self, code: &RoomCode, pairing: bool) -> SyncResult<()> {
        if self.room.as_ref() == Some(code) {
            return Ok(());
        }
        self.leave_room();
        self.enter(code.clone(), pairing)?;
        info!(room = %code, pairing, "joined room");
        Ok(())
    }

    /// Handles a room announced nearby.
    ///
    /// Joins it when we have no room yet or our own code sorts after the
    /// announced one, so two devices announcing at once converge on the
    /// smaller code. Returns whether we switched rooms.
    pub fn room_found(&mut self, announcement: &RoomAnnouncement) -> SyncResult<bool> {
        let join = match &self.room {
            None => true,
            Some(current) => *current > announcement.code,
        };
        if !join {
            debug!(room = %announcement.code, "keeping own room");
            return Ok(false);
        }
        self.join_room(&announcement.code, true)?;
        Ok(true)
    }

    /// Joins the room whose code is stored at the rendezvous path.
    ///
    /// Returns `None` when nothing usable is stored there.
    pub async fn find_global_room(&mut self, pairing: bool) -> SyncResult<Option<RoomCode>> {
        let value = self.store.get(&self.global_room_path).await?;
        let Some(raw) = value.as_ref().and_then(Value::as_str) else {
            debug!(path = %self.global_room_path, "no global room published");
            return Ok(None);
        };
        let code = RoomCode::parse(raw).map_err(|e| SyncError::Protocol(e.to_string()))?;
        self.join_room(&code, pairing)?;
        Ok(Some(code))
    }

    /// Re-announces presence in the current room, e.g. after the app
    /// returns to the foreground.
    pub fn resume_room(&mut self) -> SyncResult<()> {
        self.write_participant()
    }

    /// Leaves the current room: drops every subscription, deletes our
    /// participant entry, and forgets all room state.
    pub fn leave_room(&mut self) {
        let Some(code) = self.room.take() else {
            return;
        };

        for (id, _) in self.subscriptions.drain() {
            self.store.unsubscribe(id);
        }
        let path = self.paths.participant(&code, &self.participant);
        if let Err(e) = self.write(StoreOp::Remove { path }) {
            warn!(room = %code, error = %e, "could not clear presence");
        }

        self.queue.reset();
        self.uploader.set_target(None);
        self.local = ParticipantRecord::default();
        self.partners.clear();
        self.role = None;
        self.anchor_id = None;
        self.local_strokes.clear();
        self.remote_strokes.clear();
        info!(room = %code, "left room");
    }

    /// Sets our ready flag. Becoming ready also clears any previous anchor
    /// record so the next exchange starts from scratch.
    pub fn set_ready_to_set_anchor(&mut self, ready: bool) -> SyncResult<()> {
        let code = self.current_room()?.clone();
        if ready {
            self.anchor_id = None;
            self.write(StoreOp::Remove {
                path: self.paths.anchor(&code),
            })?;
            self.local.anchor_resolved = false;
        }
        self.local.ready_to_set_anchor = ready;
        self.write_participant()
    }

    /// Publishes the hosted anchor id.
    pub fn set_anchor_id(&mut self, anchor_id: &str) -> SyncResult<()> {
        let code = self.current_room()?.clone();
        self.anchor_id = Some(anchor_id.to_string());
        self.write(StoreOp::Set {
            path: self.paths.anchor(&code),
            value: AnchorRecord::Hosted(anchor_id.to_string()).to_value(),
        })
    }

    /// Flags that the anchor exchange failed so the peer stops waiting.
    pub fn publish_anchor_error(&mut self) -> SyncResult<()> {
        let code = self.current_room()?.clone();
        self.anchor_id = None;
        self.write(StoreOp::Set {
            path: self.paths.anchor(&code),
            value: AnchorRecord::ResolutionError.to_value(),
        })
    }

    /// Acknowledges the anchor and starts mirroring strokes.
    pub fn mark_anchor_resolved(&mut self) -> SyncResult<()> {
        let code = self.current_room()?.clone();
        self.local.anchor_resolved = true;
        self.local.ready_to_set_anchor = false;
        self.local.pairing = false;
        self.write_participant()?;

        if !self.subscriptions.values().any(|c| *c == Channel::Strokes) {
            self.subscribe(self.paths.lines(&code), Channel::Strokes);
        }
        Ok(())
    }

    /// Uploads (or deletes, when `remove` is set) a locally authored stroke.
    pub fn update_stroke(&mut self, stroke: &Stroke, remove: bool) -> SyncResult<()> {
        self.current_room()?;
        let key = stroke.key().clone();
        // Registered before the write so the store echo is recognized as ours.
        self.local_strokes.insert(key.clone());

        let mut snapshot = stroke.clone();
        if snapshot.creator().is_none() {
            snapshot.set_creator(self.participant.clone());
        }
        self.queue.enqueue(key, snapshot, remove);
        Ok(())
    }

    /// Deletes every stroke in the room.
    pub fn clear_all_strokes(&mut self) -> SyncResult<()> {
        let code = self.current_room()?.clone();
        self.write(StoreOp::Remove {
            path: self.paths.lines(&code),
        })
    }

    /// Next pending signal without waiting.
    pub fn try_next_signal(&mut self) -> Option<RoomSignal> {
        if let Ok(event) = self.child_rx.try_recv() {
            return Some(RoomSignal::Child(event));
        }
        if let Ok(notification) = self.queue_rx.try_recv() {
            return Some(RoomSignal::Queue(notification));
        }
        self.failure_rx.try_recv().ok().map(RoomSignal::WriteFailed)
    }

    /// Waits for the next signal.
    pub async fn next_signal(&mut self) -> Option<RoomSignal> {
        tokio::select! {
            Some(event) = self.child_rx.recv() => Some(RoomSignal::Child(event)),
            Some(notification) = self.queue_rx.recv() => Some(RoomSignal::Queue(notification)),
            Some(failure) = self.failure_rx.recv() => Some(RoomSignal::WriteFailed(failure)),
            else => None,
        }
    }

    pub fn handle_signal(&mut self, signal: RoomSignal) -> Vec<RoomEvent> {
        match signal {
            RoomSignal::Child(event) => self.handle_child_event(event),
            RoomSignal::Queue(QueueNotification::LocalStrokeRemoved(key)) => {
                if !self.local_strokes.remove(&key) {
                    return Vec::new();
                }
                self.uploader.forget(&key);
                vec![RoomEvent::LocalStrokeRemoved(key)]
            }
            RoomSignal::WriteFailed(failure) => {
                if self.room.is_none() {
                    return Vec::new();
                }
                vec![RoomEvent::WriteFailed { path: failure.path }]
            }
        }
    }

    /// Applies one store child event. Events from subscriptions that are no
    /// longer active are ignored.
    pub fn handle_child_event(&mut self, event: ChildEvent) -> Vec<RoomEvent> {
        let Some(channel) = self.subscriptions.get(&event.subscription).copied() else {
            debug!(subscription = %event.subscription, key = %event.key, "ignoring event from inactive subscription");
            return Vec::new();
        };
        match channel {
            Channel::Participants => self.on_participant(event),
            Channel::Room => self.on_room_child(event),
            Channel::Strokes => self.on_stroke(event),
        }
    }

    fn on_participant(&mut self, event: ChildEvent) -> Vec<RoomEvent> {
        let id = ParticipantId::new(event.key);
        if id == self.participant {
            return Vec::new();
        }

        if event.kind == ChildEventKind::Removed {
            if self.partners.remove(&id).is_none() {
                return Vec::new();
            }
            let mut orphaned: Vec<StrokeKey> = self
                .remote_strokes
                .iter()
                .filter(|(_, stroke)| stroke.creator() == Some(&id))
                .map(|(key, _)| key.clone())
                .collect();
            orphaned.sort();

            let mut events = Vec::with_capacity(orphaned.len() + 1);
            for key in orphaned {
                self.remote_strokes.remove(&key);
                events.push(RoomEvent::StrokeRemoved(key));
            }
            info!(partner = %id, "participant left");
            events.push(RoomEvent::ParticipantRemoved { id });
            return events;
        }

        let record = match ParticipantRecord::from_value(&event.value) {
            Ok(record) => record,
            Err(e) => {
                warn!(participant = %id, error = %e, "skipping malformed participant record");
                return Vec::new();
            }
        };

        if self.role.is_none() && record.pairing && self.local.pairing {
            let role = compute_role(&self.participant, &id);
            info!(partner = %id, role = ?role, "role assigned");
            self.role = Some(role);
        }

        let known = self.partners.insert(id.clone(), record.clone()).is_some();
        if known {
            vec![RoomEvent::ParticipantUpdated { id, record }]
        } else {
            debug!(partner = %id, "participant joined");
            vec![RoomEvent::ParticipantJoined { id, record }]
        }
    }

    fn on_room_child(&mut self, event: ChildEvent) -> Vec<RoomEvent> {
        if event.key != ANCHOR_KEY {
            return Vec::new();
        }

        if event.kind == ChildEventKind::Removed {
            self.anchor_id = None;
            return vec![RoomEvent::AnchorUnavailable(AnchorLoss::Removed)];
        }

        match AnchorRecord::from_value(&event.value) {
            Some(AnchorRecord::Hosted(id)) => {
                if self.anchor_id.as_deref() == Some(id.as_str()) {
                    return Vec::new();
                }
                info!(anchor = %id, "anchor discovered");
                self.anchor_id = Some(id.clone());
                vec![RoomEvent::AnchorDiscovered(id)]
            }
            Some(AnchorRecord::ResolutionError) => {
                self.anchor_id = None;
                self.local.ready_to_set_anchor = false;
                vec![RoomEvent::AnchorUnavailable(AnchorLoss::ResolutionError)]
            }
            None => {
                debug!("anchor record carries neither id nor error");
                Vec::new()
            }
        }
    }

    fn on_stroke(&mut self, event: ChildEvent) -> Vec<RoomEvent> {
        let key = StrokeKey::new(event.key);

        if self.local_strokes.contains(&key) {
            if event.kind != ChildEventKind::Removed {
                return Vec::new();
            }
            // Our own record is gone, whoever deleted it.
            self.local_strokes.remove(&key);
            self.uploader.forget(&key);
            debug!(stroke = %key, "local stroke removed from room");
            return vec![RoomEvent::LocalStrokeRemoved(key)];
        }

        if event.kind == ChildEventKind::Removed {
            return match self.remote_strokes.remove(&key) {
                Some(_) => vec![RoomEvent::StrokeRemoved(key)],
                None => Vec::new(),
            };
        }

        let record = match StrokeRecord::from_value(&event.value) {
            Ok(record) => record,
            Err(e) => {
                warn!(stroke = %key, error = %e, "skipping malformed stroke record");
                return Vec::new();
            }
        };

        if record.creator == self.participant {
            // Own write echoed back before local bookkeeping saw the key.
            debug!(stroke = %key, "ignoring echo of own stroke");
            self.local_strokes.insert(key);
            return Vec::new();
        }

        if let Some(existing) = self.remote_strokes.get_mut(&key) {
            let origin = existing
                .anchor()
                .map(|anchor| anchor.translation())
                .unwrap_or(Point3::ZERO);
            existing.replace_points(record.points.iter().map(|p| *p - origin).collect());
            return vec![RoomEvent::StrokeUpdated(existing.clone())];
        }

        match Stroke::from_record(key.clone(), &record) {
            Ok(stroke) => {
                debug!(stroke = %key, points = stroke.len(), "remote stroke added");
                self.remote_strokes.insert(key, stroke.clone());
                vec![RoomEvent::StrokeAdded(stroke)]
            }
            Err(e) => {
                warn!(stroke = %key, error = %e, "skipping undecodable stroke");
                Vec::new()
            }
        }
    }

    fn enter(&mut self, code: RoomCode, pairing: bool) -> SyncResult<()> {
        self.room = Some(code.clone());
        self.local = ParticipantRecord {
            pairing,
            ..ParticipantRecord::default()
        };
        self.uploader.set_target(Some(self.paths.lines(&code)));

        self.subscribe(self.paths.participants(&code), Channel::Participants);
        self.subscribe(self.paths.room(&code), Channel::Room);

        self.write_participant()?;
        self.write(StoreOp::RemoveOnDisconnect {
            path: self.paths.participant(&code, &self.participant),
        })
    }

    fn subscribe(&mut self, path: String, channel: Channel) {
        let id = self.store.subscribe(&path, self.child_tx.clone());
        debug!(subscription = %id, path = %path, channel = ?channel, "subscribed");
        self.subscriptions.insert(id, channel);
    }

    fn write_participant(&mut self) -> SyncResult<()> {
        let code = self.current_room()?.clone();
        self.local.last_seen_timestamp = Timestamp::now().as_millis();
        self.write(StoreOp::Set {
            path: self.paths.participant(&code, &self.participant),
            value: self.local.to_value()?,
        })
    }

    fn write(&self, op: StoreOp) -> SyncResult<()> {
        self.writer.send(op).map_err(|_| SyncError::ChannelClosed)
    }

    fn current_room(&self) -> SyncResult<&RoomCode> {
        self.room.as_ref().ok_or(SyncError::NotInRoom)
    }
}
