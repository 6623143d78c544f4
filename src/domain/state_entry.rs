//! Per-entry lifecycle state, one row per configuration id.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;

use super::schema::{STATE_OPTIONAL, STATE_REQUIRED};
use super::table::{RowView, Table};

/// Where an entry sits in the order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Triggered,
    Filled,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Triggered => "triggered",
            Phase::Filled => "filled",
            Phase::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateEntry {
    pub id: String,
    pub triggered: bool,
    pub trigger_price: Option<Decimal>,
    pub trigger_time: Option<String>,
    pub order_id: Option<String>,
    pub activated_on: Option<String>,
    pub last_checked: Option<String>,
    pub offset: Option<Decimal>,
    pub fill_notified: bool,
    pub last_error: Option<String>,
    pub error_notified: bool,
    pub trigger_notified: bool,
    pub initial_price: Option<Decimal>,
    pub extra: BTreeMap<String, String>,
}

impl StateEntry {
    pub fn new(id: &str) -> Self {
        StateEntry {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn from_row(view: RowView<'_>) -> Self {
        let text = |column: &str| view.non_empty(column).map(str::to_string);
        let flag = |column: &str| parse_flag(view.get(column));
        let decimal = |column: &str| view.non_empty(column).and_then(|v| Decimal::from_str(v).ok());
        let known: Vec<&str> = STATE_REQUIRED
            .iter()
            .chain(STATE_OPTIONAL.iter())
            .copied()
            .collect();

        StateEntry {
            id: view.id().to_string(),
            triggered: flag("triggered"),
            trigger_price: decimal("trigger_price"),
            trigger_time: text("trigger_time"),
            order_id: text("order_id"),
            activated_on: text("activated_on"),
            last_checked: text("last_checked"),
            offset: decimal("offset"),
            fill_notified: flag("fill_notified"),
            last_error: text("last_error"),
            error_notified: flag("error_notified"),
            trigger_notified: flag("trigger_notified"),
            initial_price: decimal("initial_price"),
            extra: view.extras(&known),
        }
    }

    pub fn phase(&self) -> Phase {
        if !self.triggered {
            Phase::Idle
        } else if self.fill_notified {
            Phase::Filled
        } else if self.last_error.is_some() {
            Phase::Failed
        } else {
            Phase::Triggered
        }
    }

    /// Triggered with an order that is still waiting for a fill.
    pub fn awaiting_fill(&self) -> bool {
        self.phase() == Phase::Triggered && self.order_id.is_some()
    }

    /// Record an error, returning true when it differs from the one already notified.
    pub fn record_error(&mut self, message: &str) -> bool {
        let fresh = self.last_error.as_deref() != Some(message) || !self.error_notified;
        self.last_error = Some(message.to_string());
        fresh
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.error_notified = false;
    }

    /// Column/value pairs of every schema field, in canonical column order.
    pub fn to_values(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.clone()),
            ("triggered", format_flag(self.triggered)),
            ("trigger_price", format_decimal(self.trigger_price)),
            ("trigger_time", self.trigger_time.clone().unwrap_or_default()),
            ("order_id", self.order_id.clone().unwrap_or_default()),
            ("activated_on", self.activated_on.clone().unwrap_or_default()),
            ("last_checked", self.last_checked.clone().unwrap_or_default()),
            ("offset", format_decimal(self.offset)),
            ("fill_notified", format_flag(self.fill_notified)),
            ("last_error", self.last_error.clone().unwrap_or_default()),
            ("error_notified", format_flag(self.error_notified)),
            ("trigger_notified", format_flag(self.trigger_notified)),
            ("initial_price", format_decimal(self.initial_price)),
        ]
    }
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_lowercase()).as_deref(),
        Some("true" | "yes" | "1")
    )
}

fn format_flag(value: bool) -> String {
    let text = if value { "true" } else { "false" };
    text.to_string()
}

fn format_decimal(value: Option<Decimal>) -> String {
    value.map(|d| d.normalize().to_string()).unwrap_or_default()
}

/// Every state entry of a state table, keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateBook {
    entries: BTreeMap<String, StateEntry>,
}

impl StateBook {
    pub fn new() -> Self {
        StateBook::default()
    }

    pub fn from_table(table: &Table) -> Self {
        let mut book = StateBook::new();
        for view in table.data_rows() {
            let entry = StateEntry::from_row(view);
            book.entries.insert(entry.id.clone(), entry);
        }
        book
    }

    pub fn get(&self, id: &str) -> Option<&StateEntry> {
        self.entries.get(id)
    }

    /// State for `id`, created on first access.
    pub fn entry(&mut self, id: &str) -> &mut StateEntry {
        self.entries
            .entry(id.to_string())
            .or_insert_with(|| StateEntry::new(id))
    }

    pub fn insert(&mut self, entry: StateEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overlay `newer` on top of this book; entries in `newer` win.
    pub fn overlay(&mut self, newer: StateBook) {
        self.entries.extend(newer.entries);
    }

    /// Write every entry into `table`: existing rows are updated in place,
    /// unknown ids are appended. Rows are never removed.
    pub fn apply_to(&self, table: &mut Table) {
        for name in STATE_REQUIRED.iter().chain(STATE_OPTIONAL.iter()) {
            table.ensure_column(name);
        }
        for entry in self.entries.values() {
            let values = entry.to_values();
            if table.find(&entry.id).is_some() {
                table.update(
                    |id| id == entry.id,
                    |row| {
                        for (column, value) in &values {
                            row.set(column, value);
                        }
                    },
                );
            } else {
                table.push_record(&values);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::state_columns;
    use crate::domain::table::Row;
    use rust_decimal_macros::dec;

    #[test]
    fn phases() {
        let mut entry = StateEntry::new("a");
        assert_eq!(entry.phase(), Phase::Idle);
        entry.triggered = true;
        entry.order_id = Some("O-1".into());
        assert_eq!(entry.phase(), Phase::Triggered);
        assert!(entry.awaiting_fill());
        entry.last_error = Some("order canceled".into());
        assert_eq!(entry.phase(), Phase::Failed);
        entry.fill_notified = true;
        assert_eq!(entry.phase(), Phase::Filled);
    }

    #[test]
    fn record_error_reports_only_new_messages() {
        let mut entry = StateEntry::new("a");
        assert!(entry.record_error("below minimum"));
        entry.error_notified = true;
        assert!(!entry.record_error("below minimum"));
        assert!(entry.record_error("insufficient funds"));
    }

    #[test]
    fn parses_row_leniently() {
        let mut table = Table::new(vec!["id".into(), "triggered".into(), "offset".into(), "memo".into()]);
        table.push(Row::new(vec!["a".into(), "TRUE".into(), "oops".into(), "keep".into()]));
        let book = StateBook::from_table(&table);
        let entry = book.get("a").unwrap();
        assert!(entry.triggered);
        assert_eq!(entry.offset, None);
        assert_eq!(entry.extra.get("memo").map(String::as_str), Some("keep"));
    }

    #[test]
    fn apply_updates_existing_and_appends_new() {
        let mut table = Table::new(vec!["id".into(), "triggered".into(), "memo".into()]);
        table.push(Row::verbatim(vec!["# state".into()], "# state".into()));
        table.push(Row::new(vec!["a".into(), "false".into(), "keep".into()]));

        let mut book = StateBook::from_table(&table);
        book.entry("a").triggered = true;
        book.entry("b").initial_price = Some(dec!(51000.00));
        book.apply_to(&mut table);

        assert_eq!(table.len(), 3);
        assert_eq!(&table.columns()[..3], &["id", "triggered", "memo"]);
        assert_eq!(table.columns().len(), 1 + state_columns().len());
        assert_eq!(table.find("a").unwrap().get("triggered"), Some("true"));
        assert_eq!(table.find("a").unwrap().get("memo"), Some("keep"));
        assert_eq!(table.find("b").unwrap().get("initial_price"), Some("51000"));
        assert_eq!(table.rows()[0].key(), "# state");
    }

    #[test]
    fn overlay_prefers_newer_entries() {
        let mut base = StateBook::new();
        base.entry("a").triggered = false;
        base.entry("b");
        let mut newer = StateBook::new();
        newer.entry("a").triggered = true;
        base.overlay(newer);
        assert!(base.get("a").unwrap().triggered);
        assert!(base.get("b").is_some());
    }
}
