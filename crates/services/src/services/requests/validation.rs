use std::sync::LazyLock;

use db::models::request::REQUEST_NAME_MAX_LEN;
use regex::Regex;

use super::RequestError;

static NAME_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*$"));

/// Lowercase alphanumerics, single `.`, `_` or `-` between them, at most
/// 255 characters.
pub fn validate_name(name: &str) -> Result<(), RequestError> {
    if name.is_empty() {
        return Err(RequestError::Validation("request name is required".to_string()));
    }
    if name.chars().count() > REQUEST_NAME_MAX_LEN {
        return Err(RequestError::Validation(format!(
            "request name is longer than {REQUEST_NAME_MAX_LEN} characters"
        )));
    }

    let pattern = NAME_PATTERN
        .as_ref()
        .map_err(|e| RequestError::Validation(format!("name pattern unavailable: {e}")))?;
    if !pattern.is_match(name) {
        return Err(RequestError::Validation(format!(
            "request name {name:?} must match {}",
            pattern.as_str()
        )));
    }
    Ok(())
}

pub fn validate_owner(owner_id: i64) -> Result<(), RequestError> {
    if owner_id <= 0 {
        return Err(RequestError::Validation(format!(
            "owner id must be positive, got {owner_id}"
        )));
    }
    Ok(())
}
