//! Per-participant unread bookkeeping on conversation documents.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use konvo_common::BackendError;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::{Backend, Fields, StorePath};

use super::types::{
    clear_for_read, increment_for_send, total_unread, ConversationRecord, LastMessageSummary,
    ReconcileOutcome, SkipReason, UnreadCounts, UnreadSnapshot,
};

/// Keeps `unreadCounts` and the legacy `unreadCount` total on conversation
/// documents.
///
/// Each operation reads the conversation, computes the new counters and
/// merges them back. Operations on the same conversation are serialised so
/// a second send cannot read before the first one's merge has landed; the
/// merge itself only touches the unread fields (plus `lastMessage` and
/// `updatedAt` on send). Counters and total are always written together.
pub struct UnreadReconciler {
    backend: Arc<dyn Backend>,
    collection: String,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UnreadReconciler {
    pub fn new(backend: Arc<dyn Backend>, collection: impl Into<String>) -> Self {
        Self {
            backend,
            collection: collection.into(),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn path(&self, conversation_id: &str) -> StorePath {
        StorePath::document(&self.collection, conversation_id)
    }

    /// `sender_id` sent a message: bump every other participant by one.
    pub async fn on_message_sent(
        &self,
        conversation_id: &str,
        sender_id: &str,
    ) -> ReconcileOutcome {
        self.on_message_sent_with_summary(conversation_id, sender_id, None)
            .await
    }

    /// As [`on_message_sent`](Self::on_message_sent), also writing the
    /// `lastMessage` preview and `updatedAt` in the same merge.
    pub async fn on_message_sent_with_summary(
        &self,
        conversation_id: &str,
        sender_id: &str,
        summary: Option<LastMessageSummary>,
    ) -> ReconcileOutcome {
        if conversation_id.trim().is_empty() || sender_id.trim().is_empty() {
            warn!(
                conversation_id,
                sender_id, "send reconciliation without identifiers"
            );
            return ReconcileOutcome::Unchanged(SkipReason::MissingIdentifier);
        }

        self.serialised(conversation_id, move || async move {
            let record = match self.load(conversation_id).await {
                Ok(Some(record)) => record,
                Ok(None) => return ReconcileOutcome::Unchanged(SkipReason::ConversationNotFound),
                Err(err) => return self.failed(conversation_id, "load", err),
            };

            let current = record.unread_counts.unwrap_or_default();
            let counts = increment_for_send(&record.participant_ids, &current, sender_id);
            let mut fields = unread_fields(&counts);
            if let Some(summary) = summary {
                fields.insert("updatedAt".into(), Value::String(summary.created_at.clone()));
                match serde_json::to_value(&summary) {
                    Ok(value) => {
                        fields.insert("lastMessage".into(), value);
                    }
                    Err(err) => return self.failed(conversation_id, "encode", err.into()),
                }
            }

            self.commit(conversation_id, counts, fields).await
        })
        .await
    }

    /// `user_id` has read the conversation: zero their counter.
    ///
    /// Does nothing when the conversation has no unread map yet, when the
    /// user is not a participant, or when they have nothing unread.
    pub async fn on_conversation_read(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> ReconcileOutcome {
        if conversation_id.trim().is_empty() || user_id.trim().is_empty() {
            warn!(conversation_id, user_id, "read reconciliation without identifiers");
            return ReconcileOutcome::Unchanged(SkipReason::MissingIdentifier);
        }

        self.serialised(conversation_id, move || async move {
            let record = match self.load(conversation_id).await {
                Ok(Some(record)) => record,
                Ok(None) => return ReconcileOutcome::Unchanged(SkipReason::ConversationNotFound),
                Err(err) => return self.failed(conversation_id, "load", err),
            };

            let Some(current) = record.unread_counts.as_ref() else {
                debug!(conversation_id, "no unread map yet");
                return ReconcileOutcome::Unchanged(SkipReason::NoUnreadMap);
            };
            if !record.is_participant(user_id) {
                debug!(conversation_id, user_id, "reader is not a participant");
                return ReconcileOutcome::Unchanged(SkipReason::NotAParticipant);
            }
            if current.get(user_id) == Some(&0)
                && record.total_unread_count == total_unread(current)
            {
                return ReconcileOutcome::Unchanged(SkipReason::AlreadyRead);
            }

            let counts = clear_for_read(current, user_id);
            let fields = unread_fields(&counts);
            self.commit(conversation_id, counts, fields).await
        })
        .await
    }

    /// What `user_id` should see as unread in the conversation.
    pub async fn unread_for(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<u32, BackendError> {
        match self.load(conversation_id).await? {
            Some(record) => Ok(record.unread_for(user_id)),
            None => Err(BackendError::NotFound(self.path(conversation_id).to_string())),
        }
    }

    async fn load(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>, BackendError> {
        self.backend
            .read(&self.path(conversation_id))
            .await?
            .map(ConversationRecord::from_value)
            .transpose()
    }

    async fn commit(
        &self,
        conversation_id: &str,
        counts: UnreadCounts,
        fields: Fields,
    ) -> ReconcileOutcome {
        let total = total_unread(&counts);
        match self
            .backend
            .atomic_merge_write(&self.path(conversation_id), fields)
            .await
        {
            Ok(()) => {
                debug!(conversation_id, total, "unread counts written");
                ReconcileOutcome::Applied(UnreadSnapshot {
                    conversation_id: conversation_id.to_string(),
                    unread_counts: counts,
                    total_unread_count: total,
                })
            }
            Err(err) => self.failed(conversation_id, "write", err),
        }
    }

    fn failed(&self, conversation_id: &str, stage: &str, err: BackendError) -> ReconcileOutcome {
        warn!(conversation_id, stage, error = %err, "unread reconciliation failed");
        ReconcileOutcome::Failed(err)
    }

    /// Run `op` while holding the conversation's lock.
    async fn serialised<F, Fut>(&self, conversation_id: &str, op: F) -> ReconcileOutcome
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ReconcileOutcome>,
    {
        let lock = self.lock_for(conversation_id);
        let outcome = {
            let _guard = lock.lock().await;
            op().await
        };
        self.release(conversation_id, lock);
        outcome
    }

    fn lock_for(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(
            locks
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop the map entry once nobody else holds or waits on the lock.
    fn release(&self, conversation_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(conversation_id);
        }
    }

    /// Conversations with a lock currently allocated.
    pub fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

fn unread_fields(counts: &UnreadCounts) -> Fields {
    let mut fields = Fields::new();
    let map = counts
        .iter()
        .map(|(user, count)| (user.clone(), Value::from(*count)))
        .collect();
    fields.insert("unreadCounts".into(), Value::Object(map));
    fields.insert("unreadCount".into(), Value::from(total_unread(counts)));
    fields
}
