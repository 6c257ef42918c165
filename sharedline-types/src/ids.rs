//! Identifier types used throughout Shared Line.
//!
//! All identifiers are opaque strings as stored in the realtime store.
//! Ordering is plain lexicographic string ordering, which is what role
//! assignment and room tie-breaks rely on.

use crate::Error;
use crate::push_id::push_id;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a participant (one device's anonymous user id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Creates a fresh anonymous participant id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wraps an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses a participant id, rejecting empty strings and store path separators.
    pub fn parse(s: &str) -> Result<Self, Error> {
        validate_key(s)?;
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Code of a pairing room; doubles as the room's key under the rooms root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Allocates a new time-ordered room code.
    #[must_use]
    pub fn generate() -> Self {
        Self(push_id())
    }

    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses a room code, rejecting empty strings and store path separators.
    pub fn parse(s: &str) -> Result<Self, Error> {
        validate_key(s)?;
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Key of a stroke record in the room's stroke collection.
///
/// Locally authored strokes allocate their key at creation time so the key
/// is known before the first upload completes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrokeKey(String);

impl StrokeKey {
    #[must_use]
    pub fn generate() -> Self {
        Self(push_id())
    }

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StrokeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_key(s: &str) -> Result<(), Error> {
    if s.is_empty() || s.contains(['/', '.', '#', '$', '[', ']']) {
        return Err(Error::InvalidId(s.to_string()));
    }
    Ok(())
}
