//! Logging configuration types.

use serde::{Deserialize, Serialize};

/// Log level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
#[derive(Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// The `tracing_subscriber::EnvFilter` directive for Konvo crates.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "konvo=trace",
            LogLevel::Debug => "konvo=debug",
            LogLevel::Info => "konvo=info",
            LogLevel::Warning => "konvo=warn",
            LogLevel::Error => "konvo=error",
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}
