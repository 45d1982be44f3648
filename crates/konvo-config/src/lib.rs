//! Konvo configuration system.
//!
//! TOML-based configuration for the presence and read-state core. All
//! sections use defaults matching the hosted backend's layout, so partial
//! configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use konvo_config::{load_config, config_to_json};
//!
//! let config = load_config(None).expect("failed to load config");
//! println!("{}", config_to_json(&config));
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{KonvoConfig, CONFIG_SCHEMA_VERSION};

use std::path::Path;

use konvo_common::ConfigError;

/// Load config from `path` if given, otherwise from the platform default
/// path (creating a commented default file when none exists), then validate.
pub fn load_config(path: Option<&Path>) -> Result<KonvoConfig, ConfigError> {
    let config = match path {
        Some(path) => toml_loader::load_from_path(path)?,
        None => toml_loader::load_default()?,
    };
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &KonvoConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
