//! Core type definitions for Shared Line.
//!
//! This crate defines the small, dependency-light types shared by the
//! stroke and sync layers:
//! - Participant, room, and stroke identifiers
//! - Time-ordered push ids for client-generated store keys
//! - Wall-clock timestamps in epoch milliseconds
//! - 3D points and anchor transforms in anchor-local space

mod geometry;
mod ids;
mod push_id;
mod timestamp;

pub use geometry::{AnchorTransform, Point3};
pub use ids::{ParticipantId, RoomCode, StrokeKey};
pub use push_id::{PushIdGenerator, push_id};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
