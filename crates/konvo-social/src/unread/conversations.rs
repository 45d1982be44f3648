//! Conversation lifecycle: create, send, mark read.

use std::collections::HashSet;
use std::sync::Arc;

use konvo_common::{millis_to_iso, BackendError, KonvoError, Result};
use tracing::{info, warn};

use crate::backend::Backend;

use super::reconciler::UnreadReconciler;
use super::types::{
    ConversationConfig, ConversationRecord, LastMessageSummary, Message, MessageStatus,
    MessageType, ReconcileOutcome, UnreadCounts,
};

const DEFAULT_GROUP_NAME: &str = "New Group";

/// Input to [`ConversationService::start_conversation`].
#[derive(Debug, Clone)]
pub struct NewConversation {
    /// Everyone in the conversation, sender included. Duplicates are
    /// dropped, first occurrence wins.
    pub participant_ids: Vec<String>,
    pub sender_id: String,
    pub initial_message: String,
    pub is_group: bool,
    pub group_name: Option<String>,
}

/// A persisted message and what happened to the unread counters.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub message_id: String,
    pub created_at: String,
    pub unread: ReconcileOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartedConversation {
    pub conversation_id: String,
    pub first_message: SentMessage,
}

/// Results of the two read markers applied by
/// [`ConversationService::mark_read`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReadReceipt {
    pub conversation: ReconcileOutcome,
    pub messages: ReconcileOutcome,
}

/// Writes conversations and messages, delegating every unread change to
/// the [`UnreadReconciler`].
pub struct ConversationService {
    backend: Arc<dyn Backend>,
    reconciler: UnreadReconciler,
    config: ConversationConfig,
}

impl ConversationService {
    pub fn new(backend: Arc<dyn Backend>, config: ConversationConfig) -> Self {
        let reconciler = UnreadReconciler::new(Arc::clone(&backend), config.collection.clone());
        Self {
            backend,
            reconciler,
            config,
        }
    }

    pub fn reconciler(&self) -> &UnreadReconciler {
        &self.reconciler
    }

    /// Create a conversation with every counter at zero, then send the
    /// first message into it.
    ///
    /// Always creates a new document: an existing 1:1 conversation between
    /// the same pair is not looked up, so repeated calls yield duplicates.
    pub async fn start_conversation(
        &self,
        request: NewConversation,
    ) -> Result<StartedConversation> {
        let sender_id = request.sender_id.trim();
        if sender_id.is_empty() {
            return Err(KonvoError::InvalidInput("missing sender id".into()));
        }

        let mut seen = HashSet::new();
        let participant_ids: Vec<String> = request
            .participant_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && seen.insert(*id))
            .map(str::to_string)
            .collect();
        if participant_ids.len() < 2 {
            return Err(KonvoError::InvalidInput(format!(
                "a conversation needs at least two participants, got {}",
                participant_ids.len()
            )));
        }
        if !participant_ids.iter().any(|id| id == sender_id) {
            return Err(KonvoError::InvalidInput(format!(
                "sender {sender_id} is not a participant"
            )));
        }

        let now = millis_to_iso(self.backend.server_timestamp());
        let unread_counts: UnreadCounts =
            participant_ids.iter().map(|id| (id.clone(), 0)).collect();
        let group_name = request.is_group.then(|| {
            request
                .group_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GROUP_NAME.to_string())
        });
        let record = ConversationRecord {
            participant_ids,
            unread_counts: Some(unread_counts),
            total_unread_count: 0,
            last_message: None,
            is_group: request.is_group,
            group_name,
            created_at: Some(now.clone()),
            updated_at: Some(now),
        };

        let value = serde_json::to_value(&record).map_err(BackendError::from)?;
        let conversation_id = self
            .backend
            .create_document(&self.config.collection, value)
            .await?;
        info!(
            conversation_id = %conversation_id,
            participants = record.participant_ids.len(),
            is_group = record.is_group,
            "conversation created"
        );

        let first_message = self
            .send_message(&conversation_id, sender_id, &request.initial_message)
            .await?;
        Ok(StartedConversation {
            conversation_id,
            first_message,
        })
    }

    /// Persist a text message, then update the unread counters together
    /// with the `lastMessage` preview.
    ///
    /// The message stays persisted even if the counter update fails; the
    /// outcome is reported in [`SentMessage::unread`].
    pub async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<SentMessage> {
        if conversation_id.trim().is_empty() || sender_id.trim().is_empty() {
            return Err(KonvoError::InvalidInput(
                "send_message needs a conversation id and a sender id".into(),
            ));
        }

        let created_at = millis_to_iso(self.backend.server_timestamp());
        let message = Message {
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            message_type: MessageType::Text,
            created_at: created_at.clone(),
            status: MessageStatus::Sent,
            reactions: Vec::new(),
        };
        let value = serde_json::to_value(&message).map_err(BackendError::from)?;
        let message_id = self
            .backend
            .create_document(&self.config.messages_collection, value)
            .await?;

        let summary = LastMessageSummary {
            id: message_id.clone(),
            content: content.to_string(),
            created_at: created_at.clone(),
        };
        let unread = self
            .reconciler
            .on_message_sent_with_summary(conversation_id, sender_id, Some(summary))
            .await;
        if !unread.is_applied() {
            warn!(
                conversation_id,
                message_id = %message_id,
                outcome = ?unread,
                "message stored without unread update"
            );
        }

        Ok(SentMessage {
            message_id,
            created_at,
            unread,
        })
    }

    /// Apply the conversation-level and message-level read markers. Each
    /// is its own reconciliation and may fail on its own.
    pub async fn mark_read(&self, conversation_id: &str, user_id: &str) -> ReadReceipt {
        let conversation = self
            .reconciler
            .on_conversation_read(conversation_id, user_id)
            .await;
        let messages = self
            .reconciler
            .on_conversation_read(conversation_id, user_id)
            .await;
        ReadReceipt {
            conversation,
            messages,
        }
    }

    /// Unread count to show `user_id` for the conversation.
    pub async fn unread_for(&self, conversation_id: &str, user_id: &str) -> Result<u32> {
        Ok(self.reconciler.unread_for(conversation_id, user_id).await?)
    }
}
