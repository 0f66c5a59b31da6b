//! Input validation utilities.
//!
//! Centralized validation helpers used by the router before it trusts a payload.

use validator::Validate;

use crate::error::HuddleError;

/// Validate a request body, returning a HuddleError::Validation on failure.
pub fn validate_request<T: Validate>(body: &T) -> Result<(), HuddleError> {
    body.validate().map_err(|e| HuddleError::Validation {
        message: format_validation_errors(e),
    })
}

/// Format validation errors into a human-readable string.
fn format_validation_errors(errors: validator::ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for '{field}'"))
            })
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

/// Display names are shown verbatim in other users' lobbies: no blank names, no control
/// characters.
pub fn validate_display_name(name: &str) -> Result<(), HuddleError> {
    if name.trim().is_empty() {
        return Err(HuddleError::Validation {
            message: "Name cannot be empty or whitespace only".into(),
        });
    }

    if name.chars().any(char::is_control) {
        return Err(HuddleError::Validation {
            message: "Name cannot contain control characters".into(),
        });
    }

    Ok(())
}
