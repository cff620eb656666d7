//! Snapshot file naming rules.

use chrono::{DateTime, SecondsFormat, Utc};

use super::{SNAPSHOT_SUFFIX, StoreError};

/// Replaces every character outside `[A-Za-z0-9_-]` with `-`.
#[must_use]
pub fn normalize_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '-'
            }
        })
        .collect()
}

/// Builds `<label>-<environment>-<timestamp>.json`, where the timestamp is
/// ISO 8601 with its separators normalised to `-`.
#[must_use]
pub fn snapshot_file_name(label: &str, environment_id: &str, created_at: DateTime<Utc>) -> String {
    let timestamp = created_at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!(
        "{}-{}-{timestamp}{SNAPSHOT_SUFFIX}",
        normalize_label(label),
        normalize_label(environment_id)
    )
}

/// Validates a user supplied snapshot name and appends `.json` when it is
/// missing.
///
/// # Errors
///
/// Returns [`StoreError::InvalidName`] when the name is empty, starts with a
/// dot, or contains characters outside `[A-Za-z0-9_.-]`.
pub fn validate_new_name(name: &str) -> Result<String, StoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(invalid(name, "name must not be empty"));
    }
    if trimmed.starts_with('.') {
        return Err(invalid(name, "name must not start with a dot"));
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')))
    {
        return Err(invalid(
            name,
            &format!("character {bad:?} is not allowed; use letters, digits, '_', '-' or '.'"),
        ));
    }

    if trimmed.ends_with(SNAPSHOT_SUFFIX) {
        Ok(trimmed.to_owned())
    } else {
        Ok(format!("{trimmed}{SNAPSHOT_SUFFIX}"))
    }
}

/// Rejects path components that could escape the store root.
pub(super) fn check_component(component: &str) -> Result<(), StoreError> {
    if component.is_empty() {
        return Err(invalid(component, "name must not be empty"));
    }
    if component == "." || component == ".." || component.contains(['/', '\\', '\0']) {
        return Err(invalid(component, "name must be a single path component"));
    }
    Ok(())
}

fn invalid(name: &str, reason: &str) -> StoreError {
    StoreError::InvalidName {
        name: name.to_owned(),
        reason: reason.to_owned(),
    }
}
