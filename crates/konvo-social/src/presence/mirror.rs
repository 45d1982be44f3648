//! Server-side relay from the ephemeral status tree to profile documents.

use std::sync::{Arc, Mutex, MutexGuard};

use konvo_common::millis_to_iso;
use tracing::{debug, warn};

use crate::backend::{Backend, Fields, SubscriptionSet};

use super::types::{PresenceConfig, PresenceState};

/// Keeps `users/{id}.status` and `lastSeen` converged with `status/{id}`.
///
/// The client mirrors its own transitions, but a disconnect compensation is
/// written by the server after the client is gone. The mirror picks those
/// writes up and merges them into the durable profile. It never writes the
/// ephemeral tree.
pub struct PresenceMirror {
    backend: Arc<dyn Backend>,
    config: PresenceConfig,
    subscriptions: Mutex<SubscriptionSet<String>>,
}

impl PresenceMirror {
    pub fn new(backend: Arc<dyn Backend>, config: PresenceConfig) -> Self {
        Self {
            backend,
            config,
            subscriptions: Mutex::new(SubscriptionSet::new()),
        }
    }

    fn subscriptions(&self) -> MutexGuard<'_, SubscriptionSet<String>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start mirroring `user_id`. Watching a user again replaces the
    /// previous relay.
    pub fn watch(&self, user_id: &str) {
        let mut subscription = self.backend.subscribe(&self.config.status_path(user_id));
        self.subscriptions()
            .insert(user_id.to_string(), subscription.handle());

        let backend = Arc::clone(&self.backend);
        let profile = self.config.profile_path(user_id);
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            while let Some(value) = subscription.next().await {
                let Some(value) = value else { continue };
                let state = match PresenceState::from_value(&value) {
                    Ok(state) => state,
                    Err(err) => {
                        warn!(user_id = %user_id, error = %err, "ignoring malformed status");
                        continue;
                    }
                };

                let mut fields = Fields::new();
                fields.insert("status".into(), state.to_value());
                fields.insert("lastSeen".into(), millis_to_iso(state.last_changed).into());
                match backend.atomic_merge_write(&profile, fields).await {
                    Ok(()) => debug!(user_id = %user_id, ?state, "status mirrored"),
                    Err(err) => warn!(user_id = %user_id, error = %err, "status mirror failed"),
                }
            }
            debug!(user_id = %user_id, "status mirror stopped");
        });
    }

    pub fn unwatch(&self, user_id: &str) -> bool {
        self.subscriptions().remove(&user_id.to_string())
    }

    /// Number of users being mirrored.
    pub fn watching(&self) -> usize {
        self.subscriptions().active()
    }

    pub fn clear(&self) {
        self.subscriptions().clear();
    }
}
