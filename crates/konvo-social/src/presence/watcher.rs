//! Observer side of presence: follow other users' status.

use std::sync::{Arc, Mutex, MutexGuard};

use konvo_common::Clock;
use serde_json::Value;
use tracing::warn;

use crate::backend::{Backend, Subscription, SubscriptionSet};

use super::types::{PresenceConfig, PresenceState};

/// Hands out one status stream per watched user.
pub struct StatusWatcher {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    config: PresenceConfig,
    subscriptions: Mutex<SubscriptionSet<String>>,
}

/// Presence updates for one user.
pub struct StatusStream {
    user_id: String,
    subscription: Subscription<Option<Value>>,
    clock: Arc<dyn Clock>,
}

impl StatusWatcher {
    pub fn new(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>, config: PresenceConfig) -> Self {
        Self {
            backend,
            clock,
            config,
            subscriptions: Mutex::new(SubscriptionSet::new()),
        }
    }

    fn subscriptions(&self) -> MutexGuard<'_, SubscriptionSet<String>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Follow `user_id`. A previous stream for the same user ends.
    pub fn watch(&self, user_id: &str) -> StatusStream {
        let subscription = self.backend.subscribe(&self.config.status_path(user_id));
        self.subscriptions()
            .insert(user_id.to_string(), subscription.handle());
        StatusStream {
            user_id: user_id.to_string(),
            subscription,
            clock: Arc::clone(&self.clock),
        }
    }

    pub fn unwatch(&self, user_id: &str) -> bool {
        self.subscriptions().remove(&user_id.to_string())
    }

    pub fn active(&self) -> usize {
        self.subscriptions().active()
    }

    pub fn clear(&self) {
        self.subscriptions().clear();
    }
}

impl StatusStream {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Next known state. An absent or unreadable status reads as offline
    /// as of now. `None` once the stream has been replaced or cancelled.
    pub async fn next(&mut self) -> Option<PresenceState> {
        let value = self.subscription.next().await?;
        let state = match value {
            Some(value) => PresenceState::from_value(&value).unwrap_or_else(|err| {
                warn!(user_id = %self.user_id, error = %err, "malformed status");
                PresenceState::offline(self.clock.now_millis())
            }),
            None => PresenceState::offline(self.clock.now_millis()),
        };
        Some(state)
    }

    pub fn cancel(&self) {
        self.subscription.cancel();
    }
}
