//! In-process backend with the same observable semantics as the hosted one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use konvo_common::{new_document_id, BackendError, Clock, SystemClock};
use serde_json::Value;
use tracing::{debug, info};

use super::subscription::{subscription_channel, Subscription, SubscriptionSender};
use super::types::{Connectivity, StorePath};
use super::{Backend, Fields};

/// Which operations should fail with `BackendError::Unavailable`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub reads: bool,
    pub ephemeral_writes: bool,
    pub document_writes: bool,
    pub compensations: bool,
}

impl FaultPlan {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            reads: true,
            ephemeral_writes: true,
            document_writes: true,
            compensations: true,
        }
    }
}

struct Watcher {
    path: StorePath,
    tx: SubscriptionSender<Option<Value>>,
}

struct MemoryState {
    values: HashMap<StorePath, Value>,
    watchers: Vec<Watcher>,
    connectivity: Connectivity,
    connectivity_watchers: Vec<SubscriptionSender<Connectivity>>,
    compensations: Vec<(StorePath, Value)>,
    compensation_registrations: u64,
    faults: FaultPlan,
    last_server_ts: i64,
}

impl MemoryState {
    fn set_value(&mut self, path: &StorePath, value: Value) {
        self.values.insert(path.clone(), value.clone());
        self.notify(path, Some(value));
    }

    fn notify(&mut self, path: &StorePath, value: Option<Value>) {
        self.watchers.retain(|w| !w.tx.is_closed());
        for watcher in self.watchers.iter().filter(|w| &w.path == path) {
            watcher.tx.send(value.clone());
        }
    }

    fn set_connectivity(&mut self, connectivity: Connectivity) {
        self.connectivity = connectivity;
        self.connectivity_watchers.retain(|tx| tx.send(connectivity));
    }

    fn check_write(&self, path: &StorePath) -> Result<(), BackendError> {
        let failing = if path.is_ephemeral() {
            self.faults.ephemeral_writes
        } else {
            self.faults.document_writes
        };
        if failing {
            return Err(BackendError::Unavailable(format!("write to {path} failed")));
        }
        Ok(())
    }
}

/// In-memory realtime backend.
///
/// Subscriptions match exact paths only. Compensations registered with
/// [`Backend::register_disconnect_compensation`] are applied, in
/// registration order, when [`MemoryBackend::disconnect`] is called, and
/// then discarded.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                values: HashMap::new(),
                watchers: Vec::new(),
                connectivity: Connectivity::Disconnected,
                connectivity_watchers: Vec::new(),
                compensations: Vec::new(),
                compensation_registrations: 0,
                faults: FaultPlan::none(),
                last_server_ts: 0,
            }),
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Signal "connected" to every connectivity subscriber.
    pub fn connect(&self) {
        info!("memory backend: connected");
        self.state().set_connectivity(Connectivity::Connected);
    }

    /// Drop the connection: fire pending compensations, then signal
    /// "disconnected".
    pub fn disconnect(&self) {
        let mut state = self.state();
        let pending = std::mem::take(&mut state.compensations);
        info!(compensations = pending.len(), "memory backend: disconnected");
        for (path, value) in pending {
            state.set_value(&path, value);
        }
        state.set_connectivity(Connectivity::Disconnected);
    }

    pub fn set_faults(&self, faults: FaultPlan) {
        self.state().faults = faults;
    }

    /// Store a value directly, bypassing faults.
    pub fn seed(&self, path: &StorePath, value: Value) {
        self.state().set_value(path, value);
    }

    /// Current value at `path`.
    pub fn value(&self, path: &StorePath) -> Option<Value> {
        self.state().values.get(path).cloned()
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.value(&StorePath::document(collection, id))
    }

    /// All documents in `collection`, in no particular order.
    pub fn documents_in(&self, collection: &str) -> Vec<(String, Value)> {
        self.state()
            .values
            .iter()
            .filter_map(|(path, value)| match path {
                StorePath::Document { collection: c, id } if c == collection => {
                    Some((id.clone(), value.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn connectivity_state(&self) -> Connectivity {
        self.state().connectivity
    }

    /// Total number of compensation registrations since creation.
    pub fn compensation_registrations(&self) -> u64 {
        self.state().compensation_registrations
    }

    /// Compensations armed and not yet fired.
    pub fn pending_compensations(&self) -> usize {
        self.state().compensations.len()
    }

    /// Live value subscriptions on `path`.
    pub fn active_subscriptions(&self, path: &StorePath) -> usize {
        self.state()
            .watchers
            .iter()
            .filter(|w| &w.path == path && !w.tx.is_closed())
            .count()
    }

    /// Live connectivity subscriptions.
    pub fn active_connectivity_subscriptions(&self) -> usize {
        self.state()
            .connectivity_watchers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn subscribe(&self, path: &StorePath) -> Subscription<Option<Value>> {
        let (tx, sub) = subscription_channel();
        let mut state = self.state();
        tx.send(state.values.get(path).cloned());
        state.watchers.push(Watcher {
            path: path.clone(),
            tx,
        });
        debug!(path = %path, "subscribed");
        sub
    }

    fn connectivity(&self) -> Subscription<Connectivity> {
        let (tx, sub) = subscription_channel();
        let mut state = self.state();
        tx.send(state.connectivity);
        state.connectivity_watchers.push(tx);
        sub
    }

    async fn read(&self, path: &StorePath) -> Result<Option<Value>, BackendError> {
        let value = {
            let state = self.state();
            if state.faults.reads {
                return Err(BackendError::Unavailable(format!("read of {path} failed")));
            }
            state.values.get(path).cloned()
        };
        // A network round trip: let other tasks run before the caller resumes.
        tokio::task::yield_now().await;
        Ok(value)
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<(), BackendError> {
        let mut state = self.state();
        state.check_write(path)?;
        state.set_value(path, value);
        Ok(())
    }

    async fn atomic_merge_write(
        &self,
        path: &StorePath,
        fields: Fields,
    ) -> Result<(), BackendError> {
        let mut state = self.state();
        state.check_write(path)?;
        let mut record = match state.values.get(path) {
            Some(Value::Object(existing)) => existing.clone(),
            Some(_) => {
                return Err(BackendError::Serialization(format!(
                    "cannot merge fields into non-object value at {path}"
                )))
            }
            None => Fields::new(),
        };
        for (key, value) in fields {
            record.insert(key, value);
        }
        state.set_value(path, Value::Object(record));
        Ok(())
    }

    async fn register_disconnect_compensation(
        &self,
        path: &StorePath,
        value: Value,
    ) -> Result<(), BackendError> {
        if !path.is_ephemeral() {
            return Err(BackendError::Unsupported(format!(
                "disconnect compensation on document {path}"
            )));
        }
        let mut state = self.state();
        if state.faults.compensations {
            return Err(BackendError::Unavailable(format!(
                "compensation registration for {path} failed"
            )));
        }
        state.compensations.push((path.clone(), value));
        state.compensation_registrations += 1;
        debug!(path = %path, "disconnect compensation registered");
        Ok(())
    }

    async fn create_document(
        &self,
        collection: &str,
        value: Value,
    ) -> Result<String, BackendError> {
        let id = new_document_id();
        let path = StorePath::document(collection, id.clone());
        let mut state = self.state();
        state.check_write(&path)?;
        state.set_value(&path, value);
        Ok(id)
    }

    fn server_timestamp(&self) -> i64 {
        let now = self.clock.now_millis();
        let mut state = self.state();
        let ts = now.max(state.last_server_ts + 1);
        state.last_server_ts = ts;
        ts
    }
}
