//! Configuration schema types for Konvo.
//!
//! All structs use `serde(default)` so partial configs work correctly.
//! Missing fields are filled with the paths the hosted backend uses.

mod social;
mod system;

pub use social::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration for Konvo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct KonvoConfig {
    pub presence: PresenceConfig,
    pub conversations: ConversationsConfig,
    pub logging: LoggingConfig,
}
