//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Konvo Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[presence]
# enabled = true
# status_root = "status"          # ephemeral store: {status_root}/{user_id}
# users_collection = "users"      # durable profile mirror

[conversations]
# collection = "conversations"
# messages_collection = "messages"

[logging]
# level = "INFO"                  # TRACE, DEBUG, INFO, WARNING, ERROR
"##
    .to_string()
}
