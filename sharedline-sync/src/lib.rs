//! Pairing and stroke synchronization for Shared Line.
//!
//! Two co-located devices agree on a shared spatial anchor through a
//! realtime key-value store and then mirror each other's strokes relative
//! to it. There is no direct peer-to-peer channel: every exchange is a
//! write to the shared room record observed by the other side.
//!
//! # Components
//!
//! - **Store**: the [`RealtimeStore`] collaborator, a JSON tree with
//!   per-path child change feeds ([`MemoryStore`] for tests and simulation)
//! - **Discovery**: short-range room announcements ([`DiscoveryTransport`])
//! - **Anchors**: hosting and resolving the shared anchor ([`AnchorService`])
//! - **Upload queue**: one in-flight write per stroke, with coalescing
//! - **Room**: presence, role assignment, anchor exchange, and stroke mirroring
//! - **Pairing**: the session state machine that ties it all together
//!
//! # Pairing flow
//!
//! 1. **Discover**: both devices create a room and announce its code; the
//!    device with the larger code joins the other's room
//! 2. **Assign roles**: the larger participant id becomes the partner
//! 3. **Ready**: both users point at the same surface and confirm
//! 4. **Host**: the host creates the anchor and publishes its id
//! 5. **Resolve**: the partner resolves the id and acknowledges
//! 6. **Sync**: strokes flow both ways through the upload queue
//!
//! All inputs (store events, discovery, anchor results, user actions, timers)
//! are processed one at a time by [`PairingStateMachine`]; the upload queue is
//! the only component with work running concurrently to that loop.

pub mod anchor;
pub mod config;
pub mod discovery;
mod error;
pub mod pairing;
pub mod record;
pub mod room;
pub mod session;
pub mod state;
pub mod store;
pub mod upload;

pub use anchor::{AnchorService, AnchorSession, MemoryAnchorService};
pub use config::SessionConfig;
pub use discovery::{
    DiscoveryEvent, DiscoveryHandle, DiscoveryTransport, MemoryDiscovery, MemoryDiscoveryEndpoint,
};
pub use error::{AnchorError, SyncError, SyncResult};
pub use pairing::{
    AnchorOutcome, Collaborators, PairingStateMachine, Reachability, SessionEvent, SessionInput,
    UserAction,
};
pub use record::{AnchorRecord, ParticipantRecord, RoomAnnouncement, RoomPaths};
pub use room::{AnchorLoss, Role, RoomEvent, RoomSignal, RoomSynchronizer, compute_role};
pub use session::{PairingSession, SessionHandle};
pub use state::{ListenerId, PairingState, PairingStateHolder};
pub use store::{
    ChildEvent, ChildEventKind, ChildEventSink, MemoryConnection, MemoryStore, RealtimeStore,
    SubscriptionId,
};
pub use upload::{QueueNotification, StoreStrokeUploader, StrokeUploadQueue, StrokeUploader};
