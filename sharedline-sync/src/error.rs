//! Error types for the sync layer.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Store read or write failed.
    #[error("store error: {0}")]
    Store(String),

    /// Discovery transport failed.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Anchor service failed.
    #[error("anchor service error: {0}")]
    Anchor(#[from] AnchorError),

    /// Protocol error (malformed record or message).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation needs a joined room.
    #[error("not in a room")]
    NotInRoom,

    /// Stroke has no geometry or anchor to upload.
    #[error("stroke has nothing to upload")]
    EmptyStroke,

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Store connection is offline.
    #[error("offline")]
    Offline,
}

/// Failures reported by the anchor-resolution service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnchorError {
    #[error("anchor session unavailable")]
    SessionUnavailable,

    #[error("hosting failed: {0}")]
    HostingFailed(String),

    #[error("resolve failed: {0}")]
    ResolveFailed(String),

    #[error("anchor operation cancelled")]
    Cancelled,
}
