//! Presence and conversation storage configuration types.

use serde::{Deserialize, Serialize};

/// Presence system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub enabled: bool,
    /// Ephemeral-store root under which `{root}/{user_id}` holds presence.
    pub status_root: String,
    /// Durable collection holding user profiles (presence mirror target).
    pub users_collection: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            status_root: "status".into(),
            users_collection: "users".into(),
        }
    }
}

/// Conversation and message storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationsConfig {
    pub collection: String,
    pub messages_collection: String,
}

impl Default for ConversationsConfig {
    fn default() -> Self {
        Self {
            collection: "conversations".into(),
            messages_collection: "messages".into(),
        }
    }
}
