//! Presence tracking backed by the realtime store.
//!
//! The tracker owns the signed-in user's `status/{id}` entry and mirrors each
//! transition into the `users/{id}` profile. A disconnect compensation,
//! re-armed on every reconnect, lets the server flip the user offline when
//! the client disappears; the [`PresenceMirror`] carries that write over to
//! the profile. [`StatusWatcher`] is the read side used to show other users'
//! status.

mod format;
mod mirror;
mod tracker;
mod types;
mod watcher;

#[cfg(test)]
mod tests;

pub use format::{format_relative_time, format_status_time, update_interval};
pub use mirror::PresenceMirror;
pub use tracker::PresenceTracker;
pub use types::{
    PresenceConfig, PresenceEvent, PresencePhase, PresenceState, PresenceStatus, SetupOutcome,
    WriteTarget,
};
pub use watcher::{StatusStream, StatusWatcher};
