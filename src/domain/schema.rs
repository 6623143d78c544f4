//! Column contract for the configuration and state tables.
//!
//! Existing column order in a file is always kept. Required columns that are
//! missing get appended in canonical order after everything already present,
//! so operator-added columns never move.

pub const ID_COLUMN: &str = "id";

pub const CONFIG_REQUIRED: [&str; 8] = [
    "id",
    "pair",
    "threshold_price",
    "threshold_type",
    "direction",
    "volume",
    "trailing_offset_percent",
    "enabled",
];

pub const CONFIG_OPTIONAL: [&str; 1] = ["linked_order_id"];

pub const STATE_REQUIRED: [&str; 11] = [
    "id",
    "triggered",
    "trigger_price",
    "trigger_time",
    "order_id",
    "activated_on",
    "last_checked",
    "offset",
    "fill_notified",
    "last_error",
    "error_notified",
];

pub const STATE_OPTIONAL: [&str; 2] = ["trigger_notified", "initial_price"];

/// Canonical state header for a freshly created state file.
pub fn state_columns() -> Vec<String> {
    STATE_REQUIRED
        .iter()
        .chain(STATE_OPTIONAL.iter())
        .map(|c| c.to_string())
        .collect()
}

/// Canonical configuration header for a freshly created configuration file.
pub fn config_columns() -> Vec<String> {
    CONFIG_REQUIRED
        .iter()
        .chain(CONFIG_OPTIONAL.iter())
        .map(|c| c.to_string())
        .collect()
}

/// Existing columns followed by any of `wanted` not yet present.
pub fn merge_columns(existing: &[String], wanted: &[&str]) -> Vec<String> {
    let mut merged = existing.to_vec();
    for name in wanted {
        if !merged.iter().any(|c| c == name) {
            merged.push(name.to_string());
        }
    }
    merged
}

/// Required columns absent from `existing`, in canonical order.
pub fn missing_columns<'a>(existing: &[String], required: &[&'a str]) -> Vec<&'a str> {
    required
        .iter()
        .filter(|name| !existing.iter().any(|c| c == *name))
        .copied()
        .collect()
}

/// Columns in `existing` that the schema does not know about, in file order.
pub fn extra_columns(existing: &[String], required: &[&str], optional: &[&str]) -> Vec<String> {
    existing
        .iter()
        .filter(|c| !required.contains(&c.as_str()) && !optional.contains(&c.as_str()))
        .cloned()
        .collect()
}
