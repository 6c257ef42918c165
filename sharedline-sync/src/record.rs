//! Room record schema and store paths.
//!
//! ```text
//! <rooms_root>/<room code>/
//!     display_name          "Shared Line"
//!     updated_at_timestamp  1700000000000
//!     participants/<id>     { readyToSetAnchor, anchorResolved, pairing, lastSeenTimestamp }
//!     anchor                { anchorId } | { anchorResolutionError: true }
//!     lines/<stroke key>    { creator, lineWidth, points }
//! ```

use crate::error::SyncResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sharedline_types::{ParticipantId, RoomCode, StrokeKey, Timestamp};

pub const PARTICIPANTS_KEY: &str = "participants";
pub const ANCHOR_KEY: &str = "anchor";
pub const LINES_KEY: &str = "lines";
pub const DISPLAY_NAME_KEY: &str = "display_name";
pub const UPDATED_AT_KEY: &str = "updated_at_timestamp";
pub const ANCHOR_ID_KEY: &str = "anchorId";
pub const ANCHOR_ERROR_KEY: &str = "anchorResolutionError";

/// Presence entry for one device in a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantRecord {
    pub ready_to_set_anchor: bool,
    pub anchor_resolved: bool,
    pub pairing: bool,
    pub last_seen_timestamp: i64,
}

impl ParticipantRecord {
    pub fn from_value(value: &Value) -> SyncResult<Self> {
        Ok(Self::deserialize(value)?)
    }

    pub fn to_value(&self) -> SyncResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// The room's anchor child: a hosted anchor id or an error flag, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorRecord {
    Hosted(String),
    ResolutionError,
}

impl AnchorRecord {
    /// Decodes the anchor child. A set error flag wins over an id; a record
    /// with neither yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.get(ANCHOR_ERROR_KEY).and_then(Value::as_bool) == Some(true) {
            return Some(Self::ResolutionError);
        }
        value
            .get(ANCHOR_ID_KEY)
            .and_then(Value::as_str)
            .map(|id| Self::Hosted(id.to_string()))
    }

    pub fn to_value(&self) -> Value {
        let mut record = Map::new();
        match self {
            Self::Hosted(id) => record.insert(ANCHOR_ID_KEY.into(), Value::from(id.as_str())),
            Self::ResolutionError => record.insert(ANCHOR_ERROR_KEY.into(), Value::Bool(true)),
        };
        Value::Object(record)
    }
}

/// Short message published over discovery so nearby devices can find a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomAnnouncement {
    pub code: RoomCode,
    pub timestamp: Timestamp,
}

impl RoomAnnouncement {
    pub fn new(code: RoomCode, timestamp: Timestamp) -> Self {
        Self { code, timestamp }
    }

    /// Encodes as UTF-8 `"<code>,<timestamp millis>"`.
    pub fn encode(&self) -> Vec<u8> {
        format!("{},{}", self.code, self.timestamp.as_millis()).into_bytes()
    }

    /// Returns `None` for anything that is not a well-formed announcement.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?;
        let (code, timestamp) = text.split_once(',')?;
        Some(Self {
            code: RoomCode::parse(code).ok()?,
            timestamp: Timestamp::parse(timestamp).ok()?,
        })
    }
}

/// Builds store paths under a rooms root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomPaths {
    root: String,
}

impl RoomPaths {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn room(&self, code: &RoomCode) -> String {
        format!("{}/{}", self.root, code)
    }

    pub fn participants(&self, code: &RoomCode) -> String {
        format!("{}/{}", self.room(code), PARTICIPANTS_KEY)
    }

    pub fn participant(&self, code: &RoomCode, id: &ParticipantId) -> String {
        format!("{}/{}", self.participants(code), id)
    }

    pub fn anchor(&self, code: &RoomCode) -> String {
        format!("{}/{}", self.room(code), ANCHOR_KEY)
    }

    pub fn lines(&self, code: &RoomCode) -> String {
        format!("{}/{}", self.room(code), LINES_KEY)
    }

    pub fn stroke(&self, code: &RoomCode, key: &StrokeKey) -> String {
        format!("{}/{}", self.lines(code), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn participant_record_uses_camel_case() {
        let record = ParticipantRecord {
            ready_to_set_anchor: true,
            pairing: true,
            ..Default::default()
        };
        let value = record.to_value().unwrap();
        assert_eq!(value["readyToSetAnchor"], json!(true));
        assert_eq!(value["anchorResolved"], json!(false));
        assert_eq!(value["lastSeenTimestamp"], json!(0));
    }

    #[test]
    fn anchor_error_flag_wins() {
        let value = json!({"anchorId": "a", "anchorResolutionError": true});
        assert_eq!(AnchorRecord::from_value(&value), Some(AnchorRecord::ResolutionError));
    }

    #[test]
    fn cleared_error_flag_keeps_id() {
        let value = json!({"anchorId": "a", "anchorResolutionError": false});
        assert_eq!(
            AnchorRecord::from_value(&value),
            Some(AnchorRecord::Hosted("a".into()))
        );
    }
}
