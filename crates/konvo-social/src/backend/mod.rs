//! The narrow contract the presence and read-state core needs from the
//! realtime database platform.
//!
//! Everything the core persists or observes goes through [`Backend`]:
//! value subscriptions, the connectivity meta-signal, last-writer-wins
//! writes, atomic field-level merges, disconnect compensation, and
//! server-assigned ids and timestamps. [`MemoryBackend`] is a complete
//! in-process implementation used by tests and the demo binary.

mod memory;
mod subscription;
mod types;


use async_trait::async_trait;
use konvo_common::BackendError;
use serde_json::{Map, Value};

pub use memory::{FaultPlan, MemoryBackend};
pub use subscription::{
    subscription_channel, Subscription, SubscriptionHandle, SubscriptionSender, SubscriptionSet,
};
pub use types::{Connectivity, StorePath};

/// A JSON object used for partial (merge) writes.
pub type Fields = Map<String, Value>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Subscribe to the value at `path`. The current value (or `None` when
    /// absent) is delivered first, then every subsequent change.
    fn subscribe(&self, path: &StorePath) -> Subscription<Option<Value>>;

    /// Subscribe to the connectivity meta-signal. The current state is
    /// delivered first.
    fn connectivity(&self) -> Subscription<Connectivity>;

    /// One-shot read of the value at `path`.
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, BackendError>;

    /// Replace the value at `path` (last writer wins).
    async fn write(&self, path: &StorePath, value: Value) -> Result<(), BackendError>;

    /// Upsert the named top-level fields of the record at `path` without
    /// touching its other fields. Creates the record if absent. The merge
    /// is applied atomically.
    async fn atomic_merge_write(&self, path: &StorePath, fields: Fields)
        -> Result<(), BackendError>;

    /// Register a write the server performs if this client's connection
    /// drops. Fires at most once; a reconnect drops it and it must be
    /// registered again.
    async fn register_disconnect_compensation(
        &self,
        path: &StorePath,
        value: Value,
    ) -> Result<(), BackendError>;

    /// Create a document with a server-assigned id and return the id.
    async fn create_document(&self, collection: &str, value: Value)
        -> Result<String, BackendError>;

    /// Monotonic server time in epoch milliseconds.
    fn server_timestamp(&self) -> i64;
}
