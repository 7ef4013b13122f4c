use std::env;

use once_cell::sync::Lazy;

static ARRAYFLOW_DUMP_SCOPES: Lazy<bool> =
    Lazy::new(|| env_flag("ARRAYFLOW_DUMP_SCOPES").unwrap_or(false));

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Reads a boolean override; unset or blank variables yield `None`.
pub(crate) fn env_flag(name: &str) -> Option<bool> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(parse_bool(&value)),
        _ => None,
    }
}

/// Reads a numeric override. Unparseable values are ignored with a warning.
pub(crate) fn env_usize(name: &str) -> Option<usize> {
    let value = env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<usize>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(variable = name, value = trimmed, "ignoring non-numeric override");
            None
        }
    }
}

pub(crate) fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_ascii_lowercase()),
        _ => None,
    }
}

/// Whether compiled programs are dumped to the log before execution.
pub(crate) fn dump_scopes_enabled() -> bool {
    *ARRAYFLOW_DUMP_SCOPES
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", " YES ", "On"] {
            assert!(parse_bool(value), "{value} should parse as true");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value} should parse as false");
        }
    }
}
