//! Shared path-segment validation helpers.

/// Push an error if `value` is not a usable single path segment.
pub(crate) fn validate_segment(errors: &mut Vec<String>, name: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{name} must not be empty"));
    } else if value.contains('/') {
        errors.push(format!("{name} = \"{value}\" must not contain '/'"));
    } else if value.starts_with('.') {
        errors.push(format!("{name} = \"{value}\" must not start with '.'"));
    }
}
