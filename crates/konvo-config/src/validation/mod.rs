//! Configuration validation.
//!
//! Collects every problem into a single `ConfigError` so a user fixing
//! their file sees all of them at once.

mod helpers;


use crate::schema::KonvoConfig;
use konvo_common::ConfigError;

use helpers::validate_segment;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &KonvoConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_segment(&mut errors, "presence.status_root", &config.presence.status_root);
    validate_segment(
        &mut errors,
        "presence.users_collection",
        &config.presence.users_collection,
    );
    validate_segment(
        &mut errors,
        "conversations.collection",
        &config.conversations.collection,
    );
    validate_segment(
        &mut errors,
        "conversations.messages_collection",
        &config.conversations.messages_collection,
    );

    let collections = [
        &config.presence.users_collection,
        &config.conversations.collection,
        &config.conversations.messages_collection,
    ];
    for (i, a) in collections.iter().enumerate() {
        if collections[i + 1..].contains(a) && !a.is_empty() {
            errors.push(format!("collection \"{a}\" is used for more than one record type"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
