//! Configuration, state and event types for the presence tracker.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::StorePath;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where presence lives in the two stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceConfig {
    /// Root of the ephemeral status tree (`{status_root}/{user_id}`).
    pub status_root: String,
    /// Collection holding user profile documents.
    pub users_collection: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            status_root: "status".into(),
            users_collection: "users".into(),
        }
    }
}

impl PresenceConfig {
    /// Ephemeral path holding the authoritative state for `user_id`.
    pub fn status_path(&self, user_id: &str) -> StorePath {
        StorePath::ephemeral(format!("{}/{}", self.status_root, user_id))
    }

    /// Durable profile document that mirrors the state.
    pub fn profile_path(&self, user_id: &str) -> StorePath {
        StorePath::document(&self.users_collection, user_id)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// A user's presence as stored at `status/{user_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub state: PresenceStatus,
    /// Epoch millis of the transition.
    #[serde(rename = "lastChanged", alias = "lastChangedAtMillis")]
    pub last_changed: i64,
}

impl PresenceState {
    pub fn online(at: i64) -> Self {
        Self {
            state: PresenceStatus::Online,
            last_changed: at,
        }
    }

    pub fn offline(at: i64) -> Self {
        Self {
            state: PresenceStatus::Offline,
            last_changed: at,
        }
    }

    pub fn is_online(&self) -> bool {
        self.state == PresenceStatus::Online
    }

    pub fn to_value(self) -> Value {
        let state = match self.state {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
        };
        serde_json::json!({ "state": state, "lastChanged": self.last_changed })
    }

    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Where the tracker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresencePhase {
    /// No user; nothing is written.
    Uninitialized,
    /// Set up and waiting for a "connected" signal.
    Armed,
    Online,
    Offline,
}

/// Result of [`PresenceTracker::setup_presence`](super::PresenceTracker::setup_presence).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    Started,
    /// Same user already set up; nothing changed.
    AlreadyActive,
    /// Empty id, or a different user is active and `cleanup()` has not run.
    Ignored,
}

/// Which write a [`PresenceEvent::WriteFailed`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    Ephemeral,
    Durable,
    Compensation,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Transitions published by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    Armed {
        user_id: String,
    },
    CompensationArmed {
        user_id: String,
    },
    Online {
        user_id: String,
        at: i64,
    },
    Offline {
        user_id: String,
        at: i64,
    },
    WriteFailed {
        user_id: String,
        target: WriteTarget,
        error: String,
    },
    Reset {
        user_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_uses_wire_names() {
        let value = PresenceState::online(42).to_value();
        assert_eq!(value, serde_json::json!({"state": "online", "lastChanged": 42}));
        assert_eq!(serde_json::to_value(PresenceState::online(42)).unwrap(), value);
    }

    #[test]
    fn state_accepts_long_field_name() {
        let value = serde_json::json!({"state": "offline", "lastChangedAtMillis": 7});
        assert_eq!(
            PresenceState::from_value(&value).unwrap(),
            PresenceState::offline(7)
        );
    }

    #[test]
    fn malformed_state_is_rejected() {
        let value = serde_json::json!({"state": "away", "lastChanged": 1});
        assert!(PresenceState::from_value(&value).is_err());
    }

    #[test]
    fn config_paths() {
        let config = PresenceConfig::default();
        assert_eq!(config.status_path("u1").to_string(), "/status/u1");
        assert_eq!(config.profile_path("u1").to_string(), "users/u1");
    }
}
