//! Error types for stroke records.

use thiserror::Error;

/// Result type for stroke operations.
pub type StrokeResult<T> = Result<T, StrokeError>;

/// Errors raised while decoding or encoding stroke records.
#[derive(Debug, Error)]
pub enum StrokeError {
    /// A required field is absent or has the wrong type.
    #[error("stroke record missing field: {0}")]
    MissingField(&'static str),

    /// The record decoded to zero usable points.
    #[error("stroke record has no points")]
    NoPoints,

    /// The stroke has no anchor to express its points relative to.
    #[error("stroke has no anchor")]
    NoAnchor,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
