//! Session configuration.

use crate::error::SyncResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts and store layout for a pairing session.
///
/// Every field has a default, so a JSON file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long discovery waits for a partner (ms).
    pub discovery_timeout_ms: u64,
    /// How long hosting/resolving may take before giving up (ms).
    pub pairing_timeout_ms: u64,
    /// Store path under which rooms are created.
    pub rooms_root: String,
    /// Store path holding the code of the shared rendezvous room.
    pub global_room_path: String,
    /// Display name written into new rooms.
    pub display_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: 10_000,
            pairing_timeout_ms: 60_000,
            rooms_root: "rooms".to_string(),
            global_room_path: "global_room_0".to_string(),
            display_name: "Shared Line".to_string(),
        }
    }
}

impl SessionConfig {
    /// Parses a config from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_millis(self.pairing_timeout_ms)
    }
}
