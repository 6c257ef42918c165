use pretty_assertions::assert_eq;
use sharedline_stroke::Stroke;
use sharedline_sync::{
    Collaborators, MemoryAnchorService, MemoryConnection, MemoryDiscovery, MemoryStore,
    PairingState, PairingStateMachine, Reachability, RealtimeStore, Role, SessionConfig,
    SessionEvent, SessionInput,
};
use sharedline_types::{AnchorTransform, ParticipantId, Point3};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, advance};

struct World {
    store: MemoryStore,
    discovery: MemoryDiscovery,
    anchors: MemoryAnchorService,
}

impl World {
    fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            discovery: MemoryDiscovery::new(),
            anchors: MemoryAnchorService::new(),
        }
    }
}

struct Device {
    machine: PairingStateMachine,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    conn: MemoryConnection,
    states: Arc<Mutex<Vec<PairingState>>>,
}

impl Device {
    fn state(&self) -> PairingState {
        self.machine.state()
    }

    fn seen(&self) -> Vec<PairingState> {
        self.states.lock().unwrap().clone()
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn device(world: &World, id: &str) -> Device {
    let conn = world.store.connect();
    let collaborators = Collaborators {
        store: Arc::new(conn.clone()),
        discovery: Arc::new(world.discovery.endpoint()),
        anchors: Arc::new(world.anchors.clone()),
    };
    let (mut machine, events) =
        PairingStateMachine::new(ParticipantId::new(id), SessionConfig::default(), collaborators);
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    machine.subscribe_state(move |_, new| sink.lock().unwrap().push(new));
    Device {
        machine,
        events,
        conn,
        states,
    }
}

/// Runs spawned tasks and applies queued inputs until every device is idle.
async fn settle(devices: &mut [&mut Device]) {
    let mut idle = 0;
    while idle < 5 {
        tokio::task::yield_now().await;
        let mut applied = 0;
        for device in devices.iter_mut() {
            applied += device.machine.process_pending();
        }
        idle = if applied > 0 { 0 } else { idle + 1 };
    }
}

fn poll_all(devices: &mut [&mut Device]) {
    let now = Instant::now();
    for device in devices.iter_mut() {
        device.machine.poll_timers(now);
    }
}

fn host_transform() -> AnchorTransform {
    AnchorTransform::from_translation(Point3::new(1.0, 2.0, 3.0))
}

/// Two devices that found each other: alice hosts, bob is the partner.
async fn discovered(world: &World) -> (Device, Device) {
    let mut alice = device(world, "alice");
    let mut bob = device(world, "bob");
    alice.machine.begin_pairing();
    bob.machine.begin_pairing();
    settle(&mut [&mut alice, &mut bob]).await;
    (alice, bob)
}

async fn synced(world: &World) -> (Device, Device) {
    let (mut alice, mut bob) = discovered(world).await;
    alice.machine.set_ready_to_set_anchor(host_transform());
    bob.machine.set_ready_to_set_anchor(AnchorTransform::IDENTITY);
    settle(&mut [&mut alice, &mut bob]).await;
    assert_eq!(alice.state(), PairingState::Synced);
    assert_eq!(bob.state(), PairingState::Synced);
    (alice, bob)
}

fn resolved_transforms(events: &[SessionEvent]) -> Vec<AnchorTransform> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::AnchorResolved(t) => Some(*t),
            _ => None,
        })
        .collect()
}

fn drawn_stroke(points: &[Point3]) -> Stroke {
    let mut stroke = Stroke::new(0.011);
    stroke.set_anchor(AnchorTransform::IDENTITY);
    stroke.replace_points(points.to_vec());
    stroke
}

// ── Discovery ────────────────────────────────────────────────────

#[tokio::test]
async fn nearby_devices_end_up_in_one_room() {
    let world = World::new();
    let (alice, bob) = discovered(&world).await;

    assert_eq!(alice.machine.room_code(), bob.machine.room_code());
    assert_eq!(
        alice.state(),
        PairingState::AwaitingPartnerAnchorReady(Role::Host)
    );
    assert_eq!(
        bob.state(),
        PairingState::AwaitingPartnerAnchorReady(Role::Partner)
    );
    assert_eq!(world.discovery.publication_count(), 0);
    assert_eq!(world.discovery.subscriber_count(), 0);
    assert_eq!(alice.machine.next_deadline(), None);
}

#[tokio::test(start_paused = true)]
async fn discovery_times_out_and_retries_with_fresh_timer() {
    let world = World::new();
    let mut alice = device(&world, "alice");
    alice.machine.begin_pairing();
    assert_eq!(alice.state(), PairingState::Discovering);

    advance(Duration::from_secs(9)).await;
    poll_all(&mut [&mut alice]);
    assert_eq!(alice.state(), PairingState::Discovering);

    advance(Duration::from_secs(1)).await;
    poll_all(&mut [&mut alice]);
    assert_eq!(alice.state(), PairingState::DiscoveryTimedOut);
    assert_eq!(world.discovery.publication_count(), 0);
    assert_eq!(world.discovery.subscriber_count(), 0);
    assert_eq!(alice.machine.next_deadline(), None);

    alice.machine.retry();
    assert_eq!(alice.state(), PairingState::Discovering);
    assert_eq!(
        alice.machine.next_deadline(),
        Some(Instant::now() + Duration::from_secs(10))
    );
    assert_eq!(world.discovery.publication_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn finding_a_partner_invalidates_discovery_timer() {
    let world = World::new();
    let (mut alice, mut bob) = discovered(&world).await;

    advance(Duration::from_secs(30)).await;
    poll_all(&mut [&mut alice, &mut bob]);

    assert!(matches!(
        alice.state(),
        PairingState::AwaitingPartnerAnchorReady(_)
    ));
    assert!(matches!(
        bob.state(),
        PairingState::AwaitingPartnerAnchorReady(_)
    ));
}

// ── Anchor exchange ──────────────────────────────────────────────

#[tokio::test]
async fn devices_pair_and_share_the_hosted_anchor() {
    let world = World::new();
    world.anchors.queue_anchor_id("anchor-123");
    let (mut alice, mut bob) = synced(&world).await;

    assert_eq!(resolved_transforms(&alice.drain_events()), vec![host_transform()]);
    assert_eq!(resolved_transforms(&bob.drain_events()), vec![host_transform()]);
    assert_eq!(bob.machine.room().anchor_id(), Some("anchor-123"));
    assert_eq!(alice.machine.next_deadline(), None);
    assert_eq!(bob.machine.next_deadline(), None);
    assert!(
        bob.seen()
            .contains(&PairingState::PartnerConnecting)
    );
    assert!(alice.seen().contains(&PairingState::HostConnecting));
}

#[tokio::test]
async fn partner_ready_first_waits_for_host() {
    let world = World::new();
    let (mut alice, mut bob) = discovered(&world).await;

    bob.machine.set_ready_to_set_anchor(AnchorTransform::IDENTITY);
    settle(&mut [&mut alice, &mut bob]).await;
    assert_eq!(bob.state(), PairingState::PartnerConnecting);
    assert_eq!(
        alice.state(),
        PairingState::AwaitingPartnerAnchorReady(Role::Host)
    );

    alice.machine.set_ready_to_set_anchor(host_transform());
    settle(&mut [&mut alice, &mut bob]).await;
    assert_eq!(alice.state(), PairingState::Synced);
    assert_eq!(bob.state(), PairingState::Synced);
}

#[tokio::test]
async fn host_ready_alone_keeps_waiting() {
    let world = World::new();
    let (mut alice, mut bob) = discovered(&world).await;

    alice.machine.set_ready_to_set_anchor(host_transform());
    settle(&mut [&mut alice, &mut bob]).await;

    assert_eq!(
        alice.state(),
        PairingState::AwaitingPartnerAnchorReady(Role::Host)
    );
    assert_eq!(world.anchors.sessions_created(), 0);
}

#[tokio::test]
async fn hosting_failure_reaches_both_sides_and_retry_skips_discovery() {
    let world = World::new();
    world.anchors.set_fail_hosting(true);
    let (mut alice, mut bob) = discovered(&world).await;
    let room = alice.machine.room_code().cloned();

    alice.machine.set_ready_to_set_anchor(host_transform());
    bob.machine.set_ready_to_set_anchor(AnchorTransform::IDENTITY);
    settle(&mut [&mut alice, &mut bob]).await;

    assert_eq!(alice.state(), PairingState::HostAnchorError);
    assert_eq!(bob.state(), PairingState::HostAnchorError);
    assert_eq!(alice.machine.next_deadline(), None);
    assert_eq!(bob.machine.next_deadline(), None);
    assert!(!alice.machine.room().local_record().ready_to_set_anchor);
    assert!(!bob.machine.room().local_record().ready_to_set_anchor);

    world.anchors.set_fail_hosting(false);
    let discovering_before = alice
        .seen()
        .iter()
        .filter(|s| **s == PairingState::Discovering)
        .count();
    alice.machine.retry();
    bob.machine.retry();
    assert_eq!(
        alice.state(),
        PairingState::AwaitingPartnerAnchorReady(Role::Host)
    );

    alice.machine.set_ready_to_set_anchor(host_transform());
    bob.machine.set_ready_to_set_anchor(AnchorTransform::IDENTITY);
    settle(&mut [&mut alice, &mut bob]).await;

    assert_eq!(alice.state(), PairingState::Synced);
    assert_eq!(bob.state(), PairingState::Synced);
    assert_eq!(alice.machine.room_code().cloned(), room);
    let discovering_after = alice
        .seen()
        .iter()
        .filter(|s| **s == PairingState::Discovering)
        .count();
    assert_eq!(discovering_before, discovering_after);
}

#[tokio::test]
async fn resolve_failure_then_manual_retry() {
    let world = World::new();
    world.anchors.set_fail_resolving(true);
    let (mut alice, mut bob) = discovered(&world).await;

    alice.machine.set_ready_to_set_anchor(host_transform());
    bob.machine.set_ready_to_set_anchor(AnchorTransform::IDENTITY);
    settle(&mut [&mut alice, &mut bob]).await;
    assert_eq!(bob.state(), PairingState::PartnerResolveError);
    assert_eq!(alice.state(), PairingState::PartnerResolveError);

    world.anchors.set_fail_resolving(false);
    bob.machine.retry();
    assert_eq!(bob.state(), PairingState::PartnerConnecting);
    settle(&mut [&mut alice, &mut bob]).await;

    assert_eq!(bob.state(), PairingState::Synced);
    assert_eq!(alice.state(), PairingState::Synced);
}

#[tokio::test(start_paused = true)]
async fn pairing_timeout_discards_anchor_session() {
    let world = World::new();
    world.anchors.set_stalled(true);
    let (mut alice, mut bob) = discovered(&world).await;

    alice.machine.set_ready_to_set_anchor(host_transform());
    bob.machine.set_ready_to_set_anchor(AnchorTransform::IDENTITY);
    settle(&mut [&mut alice, &mut bob]).await;
    assert_eq!(alice.state(), PairingState::HostConnecting);
    assert_eq!(bob.state(), PairingState::PartnerConnecting);
    assert_eq!(world.anchors.sessions_created(), 1);

    advance(Duration::from_secs(60)).await;
    poll_all(&mut [&mut alice, &mut bob]);
    settle(&mut [&mut alice, &mut bob]).await;

    assert_eq!(alice.state(), PairingState::HostAnchorError);
    assert_eq!(bob.state(), PairingState::PartnerResolveError);
    assert_eq!(alice.machine.next_deadline(), None);

    alice.machine.retry();
    assert_eq!(
        alice.state(),
        PairingState::AwaitingPartnerAnchorReady(Role::Host)
    );
    assert!(resolved_transforms(&alice.drain_events()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn partner_retry_without_anchor_id_fails_again() {
    let world = World::new();
    let (mut alice, mut bob) = discovered(&world).await;

    bob.machine.set_ready_to_set_anchor(AnchorTransform::IDENTITY);
    settle(&mut [&mut alice, &mut bob]).await;
    advance(Duration::from_secs(60)).await;
    poll_all(&mut [&mut bob]);
    assert_eq!(bob.state(), PairingState::PartnerResolveError);

    bob.machine.retry();
    assert_eq!(bob.state(), PairingState::PartnerResolveError);
}

// ── Connection loss ──────────────────────────────────────────────

#[tokio::test]
async fn partner_loss_while_synced_drops_their_strokes() {
    let world = World::new();
    let (mut alice, mut bob) = synced(&world).await;
    alice.drain_events();

    let mine = drawn_stroke(&[Point3::ZERO, Point3::new(1.0, 0.0, 0.0)]);
    let theirs = drawn_stroke(&[Point3::ZERO, Point3::new(0.0, 1.0, 0.0)]);
    alice.machine.update_stroke(&mine).unwrap();
    bob.machine.update_stroke(&theirs).unwrap();
    settle(&mut [&mut alice, &mut bob]).await;

    let added: Vec<_> = alice
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StrokeAdded(s) => Some(s.key().clone()),
            _ => None,
        })
        .collect();
    assert_eq!(added, vec![theirs.key().clone()]);

    bob.conn.disconnect();
    settle(&mut [&mut alice]).await;

    assert_eq!(alice.state(), PairingState::ConnectionLost);
    let removed: Vec<_> = alice
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StrokeRemoved(key) => Some(key),
            _ => None,
        })
        .collect();
    assert_eq!(removed, vec![theirs.key().clone()]);
    assert!(alice.machine.room().is_local_stroke(mine.key()));
}

#[tokio::test]
async fn anchor_reset_while_synced_loses_connection() {
    let world = World::new();
    let (mut alice, mut bob) = synced(&world).await;
    let code = alice.machine.room_code().cloned().unwrap();

    let other = world.store.connect();
    other.remove(&format!("rooms/{code}/anchor")).await.unwrap();
    settle(&mut [&mut alice, &mut bob]).await;

    assert_eq!(alice.state(), PairingState::ConnectionLost);
    assert_eq!(bob.state(), PairingState::ConnectionLost);
}

#[tokio::test]
async fn retry_after_connection_loss_rediscovers() {
    let world = World::new();
    let (mut alice, mut bob) = discovered(&world).await;
    let first_room = alice.machine.room_code().cloned();

    bob.machine.cancel();
    settle(&mut [&mut alice, &mut bob]).await;
    assert_eq!(alice.state(), PairingState::ConnectionLost);

    alice.machine.retry();
    assert_eq!(alice.state(), PairingState::Discovering);
    assert_ne!(alice.machine.room_code().cloned(), first_room);
}

// ── Cancellation and connectivity ────────────────────────────────

#[tokio::test]
async fn cancel_leaves_room_and_allows_fresh_start() {
    let world = World::new();
    let (mut alice, mut bob) = discovered(&world).await;

    alice.machine.cancel();
    settle(&mut [&mut alice, &mut bob]).await;

    assert_eq!(alice.state(), PairingState::Cancelled);
    assert_eq!(alice.machine.room_code(), None);
    assert_eq!(alice.machine.role(), None);
    assert_eq!(alice.machine.next_deadline(), None);
    assert_eq!(bob.state(), PairingState::ConnectionLost);

    alice.machine.begin_pairing();
    assert_eq!(alice.state(), PairingState::Discovering);
}

#[tokio::test]
async fn unreachable_network_forces_offline_until_retry() {
    let world = World::new();
    let mut alice = device(&world, "alice");
    alice.machine.begin_pairing();

    alice
        .machine
        .handle(SessionInput::Connectivity(Reachability::Unreachable));
    assert_eq!(alice.state(), PairingState::Offline);
    assert_eq!(alice.machine.next_deadline(), None);
    assert_eq!(world.discovery.publication_count(), 0);

    alice.machine.retry();
    assert_eq!(alice.state(), PairingState::Offline);

    alice
        .machine
        .handle(SessionInput::Connectivity(Reachability::Reachable));
    assert_eq!(alice.state(), PairingState::Offline);

    alice.machine.retry();
    assert_eq!(alice.state(), PairingState::Discovering);
}

#[tokio::test]
async fn begin_pairing_offline_goes_straight_to_offline() {
    let world = World::new();
    let mut alice = device(&world, "alice");
    alice
        .machine
        .handle(SessionInput::Connectivity(Reachability::Unreachable));
    assert_eq!(alice.state(), PairingState::Idle);

    alice.machine.begin_pairing();
    assert_eq!(alice.state(), PairingState::Offline);
}

#[tokio::test]
async fn state_listeners_can_unsubscribe() {
    let world = World::new();
    let mut alice = device(&world, "alice");
    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    let id = alice
        .machine
        .subscribe_state(move |_, _| *sink.lock().unwrap() += 1);

    alice.machine.begin_pairing();
    assert!(alice.machine.unsubscribe_state(id));
    alice.machine.cancel();

    assert_eq!(*count.lock().unwrap(), 1);
    assert_eq!(
        alice.seen(),
        vec![PairingState::Discovering, PairingState::Cancelled]
    );
}
