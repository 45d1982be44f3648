//! Online/offline lifecycle for the signed-in user.

use std::sync::{Arc, Mutex};

use konvo_common::{millis_to_iso, BackendError, Clock};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::backend::{Backend, Connectivity, Fields, Subscription, SubscriptionHandle};

use super::types::{
    PresenceConfig, PresenceEvent, PresencePhase, PresenceState, PresenceStatus, SetupOutcome,
    WriteTarget,
};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Session {
    user_id: Option<String>,
    phase: PresencePhase,
    /// Bumped on every setup and cleanup; stale connectivity tasks compare
    /// against it before writing.
    generation: u64,
    unload_attached: bool,
}

impl Session {
    fn empty() -> Self {
        Self {
            user_id: None,
            phase: PresencePhase::Uninitialized,
            generation: 0,
            unload_attached: false,
        }
    }
}

struct Inner {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    config: PresenceConfig,
    session: RwLock<Session>,
    /// Outside `session` so `Drop` can always reach it.
    connectivity: Mutex<Option<SubscriptionHandle>>,
    events: broadcast::Sender<PresenceEvent>,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Tracks one user's presence across the ephemeral status tree and the
/// durable profile document.
///
/// After [`setup_presence`](Self::setup_presence) the tracker listens to the
/// backend's connectivity signal. Every "connected" signal re-registers the
/// disconnect compensation (an `offline` write the server performs if this
/// client vanishes) and then re-affirms `online`. [`cleanup`](Self::cleanup)
/// detaches everything without writing.
pub struct PresenceTracker {
    inner: Arc<Inner>,
}

impl PresenceTracker {
    pub fn new(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>, config: PresenceConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                backend,
                clock,
                config,
                session: RwLock::new(Session::empty()),
                connectivity: Mutex::new(None),
                events,
            }),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.inner.events.subscribe()
    }

    pub async fn phase(&self) -> PresencePhase {
        self.inner.session.read().await.phase
    }

    pub async fn user_id(&self) -> Option<String> {
        self.inner.session.read().await.user_id.clone()
    }

    /// Whether the unload handler is attached.
    pub async fn unload_attached(&self) -> bool {
        self.inner.session.read().await.unload_attached
    }

    /// Start tracking `user_id`.
    ///
    /// Writes `online` once, then follows the connectivity signal. Calling
    /// again for the active user is a no-op; a different user is ignored
    /// until [`cleanup`](Self::cleanup) has run.
    pub async fn setup_presence(&self, user_id: &str) -> SetupOutcome {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            warn!("setup_presence called without a user id");
            return SetupOutcome::Ignored;
        }

        let (generation, subscription) = {
            let mut session = self.inner.session.write().await;
            match session.user_id.as_deref() {
                Some(active) if active == user_id => {
                    debug!(user_id, "presence already set up");
                    return SetupOutcome::AlreadyActive;
                }
                Some(active) => {
                    warn!(
                        active,
                        requested = user_id,
                        "presence active for another user; cleanup first"
                    );
                    return SetupOutcome::Ignored;
                }
                None => {}
            }

            session.generation += 1;
            session.user_id = Some(user_id.to_string());
            session.phase = PresencePhase::Armed;
            session.unload_attached = true;

            let subscription = self.inner.backend.connectivity();
            self.inner.replace_connectivity(Some(subscription.handle()));
            (session.generation, subscription)
        };

        info!(user_id, "presence set up");
        self.inner.emit(PresenceEvent::Armed {
            user_id: user_id.to_string(),
        });

        if let Some(at) = self
            .inner
            .write_status(user_id, PresenceStatus::Online)
            .await
        {
            self.inner.announce(user_id, PresenceStatus::Online, at);
        }

        tokio::spawn(connectivity_loop(
            Arc::clone(&self.inner),
            user_id.to_string(),
            generation,
            subscription,
        ));

        SetupOutcome::Started
    }

    /// Mark the active user online in both stores.
    pub async fn go_online(&self) {
        self.inner.transition(PresenceStatus::Online).await;
    }

    /// Mark the active user offline in both stores.
    pub async fn go_offline(&self) {
        self.inner.transition(PresenceStatus::Offline).await;
    }

    /// Detach the connectivity listener and unload handler. No final write
    /// is made; the compensation or an explicit [`go_offline`](Self::go_offline)
    /// is responsible for that.
    pub async fn cleanup(&self) {
        let mut session = self.inner.session.write().await;
        let Some(user_id) = session.user_id.take() else {
            debug!("cleanup with no active presence");
            return;
        };
        self.inner.replace_connectivity(None);
        session.generation += 1;
        session.phase = PresencePhase::Uninitialized;
        session.unload_attached = false;
        drop(session);

        info!(user_id = %user_id, "presence cleaned up");
        self.inner.emit(PresenceEvent::Reset { user_id });
    }

    /// Page/process unload: go offline while the handler is attached.
    pub async fn handle_before_unload(&self) {
        if self.unload_attached().await {
            self.go_offline().await;
        }
    }

    /// Logout flow: explicit offline, then cleanup.
    pub async fn sign_out(&self) {
        self.go_offline().await;
        self.cleanup().await;
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        self.inner.replace_connectivity(None);
    }
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

impl Inner {
    fn emit(&self, event: PresenceEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Swap the connectivity handle, cancelling the previous one.
    fn replace_connectivity(&self, next: Option<SubscriptionHandle>) {
        let previous = {
            let mut slot = self
                .connectivity
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *slot, next)
        };
        if let Some(handle) = previous {
            handle.cancel();
        }
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.session.read().await.generation == generation
    }

    async fn transition(&self, status: PresenceStatus) {
        let (user_id, generation) = {
            let session = self.session.read().await;
            match session.user_id.clone() {
                Some(user_id) => (user_id, session.generation),
                None => {
                    debug!(?status, "presence not set up; ignoring transition");
                    return;
                }
            }
        };
        self.apply(&user_id, generation, status).await;
    }

    /// Write `status` and, when it landed, move the phase and announce it.
    async fn apply(&self, user_id: &str, generation: u64, status: PresenceStatus) {
        if let Some(at) = self.write_status(user_id, status).await {
            self.set_phase(generation, status).await;
            self.announce(user_id, status, at);
        }
    }

    fn announce(&self, user_id: &str, status: PresenceStatus, at: i64) {
        let user_id = user_id.to_string();
        self.emit(match status {
            PresenceStatus::Online => PresenceEvent::Online { user_id, at },
            PresenceStatus::Offline => PresenceEvent::Offline { user_id, at },
        });
    }

    async fn set_phase(&self, generation: u64, status: PresenceStatus) {
        let mut session = self.session.write().await;
        if session.generation == generation {
            session.phase = match status {
                PresenceStatus::Online => PresencePhase::Online,
                PresenceStatus::Offline => PresencePhase::Offline,
            };
        }
    }

    /// Dual write: plain write to the ephemeral path, then a merge of
    /// `status` and `lastSeen` into the profile, both stamped with one
    /// timestamp. Returns the timestamp if the ephemeral write landed. A
    /// failed ephemeral write skips the durable one.
    async fn write_status(&self, user_id: &str, status: PresenceStatus) -> Option<i64> {
        let at = self.clock.now_millis();
        let state = PresenceState {
            state: status,
            last_changed: at,
        };
        let value = state.to_value();

        let status_path = self.config.status_path(user_id);
        if let Err(err) = self.backend.write(&status_path, value.clone()).await {
            self.report(user_id, WriteTarget::Ephemeral, &err);
            return None;
        }

        let mut fields = Fields::new();
        fields.insert("status".into(), value);
        fields.insert("lastSeen".into(), millis_to_iso(at).into());
        let profile_path = self.config.profile_path(user_id);
        if let Err(err) = self.backend.atomic_merge_write(&profile_path, fields).await {
            self.report(user_id, WriteTarget::Durable, &err);
        }

        debug!(user_id, ?status, at, "presence written");
        Some(at)
    }

    async fn arm_compensation(&self, user_id: &str) -> bool {
        let offline = PresenceState::offline(self.clock.now_millis()).to_value();
        let path = self.config.status_path(user_id);
        match self
            .backend
            .register_disconnect_compensation(&path, offline)
            .await
        {
            Ok(()) => {
                debug!(user_id, "disconnect compensation armed");
                self.emit(PresenceEvent::CompensationArmed {
                    user_id: user_id.to_string(),
                });
                true
            }
            Err(err) => {
                self.report(user_id, WriteTarget::Compensation, &err);
                false
            }
        }
    }

    fn report(&self, user_id: &str, target: WriteTarget, err: &BackendError) {
        warn!(user_id, ?target, error = %err, "presence write failed");
        self.emit(PresenceEvent::WriteFailed {
            user_id: user_id.to_string(),
            target,
            error: err.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Connectivity loop
// ---------------------------------------------------------------------------

async fn connectivity_loop(
    inner: Arc<Inner>,
    user_id: String,
    generation: u64,
    mut subscription: Subscription<Connectivity>,
) {
    while let Some(signal) = subscription.next().await {
        if !inner.is_current(generation).await {
            break;
        }
        match signal {
            Connectivity::Connected => {
                // Never online without a compensation in place.
                if !inner.arm_compensation(&user_id).await {
                    continue;
                }
                if !inner.is_current(generation).await {
                    break;
                }
                inner
                    .apply(&user_id, generation, PresenceStatus::Online)
                    .await;
            }
            Connectivity::Disconnected => {
                debug!(user_id = %user_id, "connection lost");
                let mut session = inner.session.write().await;
                if session.generation == generation {
                    session.phase = PresencePhase::Armed;
                }
            }
        }
    }
    debug!(user_id = %user_id, "connectivity listener stopped");
}
