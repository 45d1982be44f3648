//! Conversation and message records plus the pure unread arithmetic.

use std::collections::{BTreeMap, HashSet};

use konvo_common::BackendError;
use serde::{Deserialize, Deserializer, Serialize};

/// Per-participant unread counters, keyed by user id.
pub type UnreadCounts = BTreeMap<String, u32>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Collections holding conversations and messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationConfig {
    pub collection: String,
    pub messages_collection: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            collection: "conversations".into(),
            messages_collection: "messages".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The fields of a conversation document this crate reads or writes.
/// Other fields on the stored document are ignored and left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub participant_ids: Vec<String>,
    /// `None` until the first write that creates the map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_counts: Option<UnreadCounts>,
    /// Legacy aggregate, kept equal to the sum of `unread_counts`.
    #[serde(
        default,
        rename = "unreadCount",
        alias = "totalUnreadCount",
        deserialize_with = "null_as_default"
    )]
    pub total_unread_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessageSummary>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ConversationRecord {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participant_ids.iter().any(|id| id == user_id)
    }

    /// Unread count shown to `user_id`: their own entry, or the legacy
    /// total for conversations written before per-user counts existed.
    pub fn unread_for(&self, user_id: &str) -> u32 {
        self.unread_counts
            .as_ref()
            .and_then(|counts| counts.get(user_id).copied())
            .unwrap_or(self.total_unread_count)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, BackendError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Stored `null` reads the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Denormalised preview of the newest message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageSummary {
    pub id: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
    File,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
}

/// A stored message. Immutable after creation apart from status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub created_at: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub reactions: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Unread fields as written by a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadSnapshot {
    pub conversation_id: String,
    pub unread_counts: UnreadCounts,
    pub total_unread_count: u32,
}

/// Why a reconciliation wrote nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingIdentifier,
    ConversationNotFound,
    NoUnreadMap,
    NotAParticipant,
    AlreadyRead,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Applied(UnreadSnapshot),
    Unchanged(SkipReason),
    /// The backend failed; persisted state is as it was.
    Failed(BackendError),
}

impl ReconcileOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ReconcileOutcome::Applied(_))
    }

    pub fn snapshot(&self) -> Option<&UnreadSnapshot> {
        match self {
            ReconcileOutcome::Applied(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

/// Sum of all counters, saturating at `u32::MAX`.
pub fn total_unread(counts: &UnreadCounts) -> u32 {
    counts
        .values()
        .fold(0u32, |total, count| total.saturating_add(*count))
}

/// Counters after `sender_id` sends a message: every other participant
/// goes up by one, absent entries start from zero. Entries for users no
/// longer in `participant_ids` are carried over unchanged.
pub fn increment_for_send(
    participant_ids: &[String],
    counts: &UnreadCounts,
    sender_id: &str,
) -> UnreadCounts {
    let mut next = counts.clone();
    let mut seen = HashSet::new();
    for participant in participant_ids {
        if participant == sender_id || !seen.insert(participant.as_str()) {
            continue;
        }
        let entry = next.entry(participant.clone()).or_insert(0);
        *entry = entry.saturating_add(1);
    }
    next
}

/// Counters after `reader_id` reads the conversation.
pub fn clear_for_read(counts: &UnreadCounts, reader_id: &str) -> UnreadCounts {
    let mut next = counts.clone();
    next.insert(reader_id.to_string(), 0);
    next
}
