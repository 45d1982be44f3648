//! Unread counters on conversations.
//!
//! Every conversation document carries `unreadCounts` (participant id to
//! count) and the legacy `unreadCount` aggregate, which always equals the
//! sum of the map. [`UnreadReconciler`] is the only writer of those fields;
//! [`ConversationService`] creates conversations and messages and routes
//! sends and reads through it.

mod conversations;
mod reconciler;
mod types;


pub use conversations::{
    ConversationService, NewConversation, ReadReceipt, SentMessage, StartedConversation,
};
pub use reconciler::UnreadReconciler;
pub use types::{
    clear_for_read, increment_for_send, total_unread, ConversationConfig, ConversationRecord,
    LastMessageSummary, Message, MessageStatus, MessageType, ReconcileOutcome, SkipReason,
    UnreadCounts, UnreadSnapshot,
};
