//! Configuration entries: one trigger condition per table row.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use super::schema::{CONFIG_OPTIONAL, CONFIG_REQUIRED};
use super::table::{RowView, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdType {
    Above,
    Below,
}

impl ThresholdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdType::Above => "above",
            ThresholdType::Below => "below",
        }
    }
}

impl FromStr for ThresholdType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "above" => Ok(ThresholdType::Above),
            "below" => Ok(ThresholdType::Below),
            other => Err(format!("threshold_type must be above or below, got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(Direction::Buy),
            "sell" => Ok(Direction::Sell),
            other => Err(format!("direction must be buy or sell, got '{other}'")),
        }
    }
}

/// Value of the `enabled` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnabledState {
    True,
    False,
    Paused,
    Canceled,
}

impl EnabledState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnabledState::True => "true",
            EnabledState::False => "false",
            EnabledState::Paused => "paused",
            EnabledState::Canceled => "canceled",
        }
    }
}

impl FromStr for EnabledState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(EnabledState::True),
            "false" | "no" | "0" | "" => Ok(EnabledState::False),
            "paused" => Ok(EnabledState::Paused),
            "canceled" | "cancelled" => Ok(EnabledState::Canceled),
            other => Err(format!(
                "enabled must be true, false, paused or canceled, got '{other}'"
            )),
        }
    }
}

/// A configuration row that could not be used, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryProblem {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEntry {
    pub id: String,
    pub pair: String,
    pub threshold_price: Decimal,
    pub threshold_type: ThresholdType,
    pub direction: Direction,
    pub volume: Decimal,
    pub trailing_offset_percent: Decimal,
    pub enabled: EnabledState,
    pub linked_order_id: Option<String>,
    /// Operator-defined columns, passed through untouched.
    pub extra: BTreeMap<String, String>,
}

impl ConfigEntry {
    pub fn from_row(view: RowView<'_>) -> Result<Self, EntryProblem> {
        let id = view.id().to_string();
        let problem = |reason: String| EntryProblem {
            id: id.clone(),
            reason,
        };
        if id.is_empty() {
            return Err(problem("missing id".to_string()));
        }

        let pair = required(&view, "pair").map_err(problem)?.to_string();
        let threshold_price = decimal(&view, "threshold_price").map_err(problem)?;
        let threshold_type: ThresholdType = required(&view, "threshold_type")
            .and_then(str::parse)
            .map_err(problem)?;
        let direction: Direction = required(&view, "direction")
            .and_then(str::parse)
            .map_err(problem)?;
        let volume = decimal(&view, "volume").map_err(problem)?;
        let trailing_offset_percent =
            decimal(&view, "trailing_offset_percent").map_err(problem)?;
        let enabled: EnabledState = view.get("enabled").unwrap_or("").parse().map_err(problem)?;
        let linked_order_id = view.non_empty("linked_order_id").map(str::to_string);

        let known: Vec<&str> = CONFIG_REQUIRED
            .iter()
            .chain(CONFIG_OPTIONAL.iter())
            .copied()
            .collect();

        Ok(ConfigEntry {
            id: id.clone(),
            pair,
            threshold_price,
            threshold_type,
            direction,
            volume,
            trailing_offset_percent,
            enabled,
            linked_order_id,
            extra: view.extras(&known),
        })
    }

    /// Inclusive threshold comparison.
    pub fn condition_met(&self, price: Decimal) -> bool {
        match self.threshold_type {
            ThresholdType::Above => price >= self.threshold_price,
            ThresholdType::Below => price <= self.threshold_price,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled == EnabledState::True
    }
}

fn required<'a>(view: &RowView<'a>, column: &str) -> Result<&'a str, String> {
    view.non_empty(column)
        .ok_or_else(|| format!("missing {column}"))
}

fn decimal(view: &RowView<'_>, column: &str) -> Result<Decimal, String> {
    let raw = required(view, column)?;
    Decimal::from_str(raw).map_err(|_| format!("{column} is not a number: '{raw}'"))
}

/// All usable entries of a configuration table plus the rows that failed to parse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    pub entries: Vec<ConfigEntry>,
    pub problems: Vec<EntryProblem>,
}

impl ConfigSnapshot {
    pub fn from_table(table: &Table) -> Self {
        let mut snapshot = ConfigSnapshot::default();
        for view in table.data_rows() {
            match ConfigEntry::from_row(view) {
                Ok(entry) => snapshot.entries.push(entry),
                Err(problem) => snapshot.problems.push(problem),
            }
        }
        snapshot
    }

    pub fn get(&self, id: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.problems.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::config_columns;
    use crate::domain::table::Row;
    use rust_decimal_macros::dec;

    fn table_with(rows: &[&[&str]]) -> Table {
        let mut columns = config_columns();
        columns.push("owner".to_string());
        let mut table = Table::new(columns);
        for cells in rows {
            table.push(Row::new(cells.iter().map(|s| s.to_string()).collect()));
        }
        table
    }

    #[test]
    fn parses_full_row() {
        let table = table_with(&[&[
            "btc_1", "XBT/USD", "50000", "above", "sell", "0.01", "5.0", "true", "eth_1", "alice",
        ]]);
        let snapshot = ConfigSnapshot::from_table(&table);
        assert!(snapshot.problems.is_empty());
        let entry = &snapshot.entries[0];
        assert_eq!(entry.id, "btc_1");
        assert_eq!(entry.threshold_price, dec!(50000));
        assert_eq!(entry.threshold_type, ThresholdType::Above);
        assert_eq!(entry.direction, Direction::Sell);
        assert_eq!(entry.volume, dec!(0.01));
        assert_eq!(entry.trailing_offset_percent, dec!(5.0));
        assert!(entry.is_enabled());
        assert_eq!(entry.linked_order_id.as_deref(), Some("eth_1"));
        assert_eq!(entry.extra.get("owner").map(String::as_str), Some("alice"));
    }

    #[test]
    fn malformed_threshold_is_a_problem() {
        let table = table_with(&[&[
            "bad", "XBT/USD", "fifty", "above", "sell", "0.01", "5", "true",
        ]]);
        let snapshot = ConfigSnapshot::from_table(&table);
        assert!(snapshot.entries.is_empty());
        assert_eq!(snapshot.problems[0].id, "bad");
        assert!(snapshot.problems[0].reason.contains("threshold_price"));
    }

    #[test]
    fn short_row_reports_missing_column() {
        let table = table_with(&[&["short", "XBT/USD", "1"]]);
        let snapshot = ConfigSnapshot::from_table(&table);
        assert_eq!(snapshot.problems[0].reason, "missing threshold_type");
    }

    #[test]
    fn comments_and_blank_rows_ignored() {
        let table = table_with(&[&["# note"], &["", "", ""], &[
            "e1", "ETH/USD", "3000", "below", "buy", "1", "2", "paused",
        ]]);
        let snapshot = ConfigSnapshot::from_table(&table);
        assert_eq!(snapshot.entries.len(), 1);
        assert!(snapshot.problems.is_empty());
        assert_eq!(snapshot.entries[0].enabled, EnabledState::Paused);
    }

    #[test]
    fn condition_is_inclusive_at_threshold() {
        let table = table_with(&[
            &["a", "XBT/USD", "50000.10", "above", "sell", "1", "1", "true"],
            &["b", "XBT/USD", "50000.10", "below", "buy", "1", "1", "true"],
        ]);
        let snapshot = ConfigSnapshot::from_table(&table);
        let above = snapshot.get("a").unwrap();
        let below = snapshot.get("b").unwrap();
        assert!(above.condition_met(dec!(50000.1)));
        assert!(below.condition_met(dec!(50000.100)));
        assert!(!above.condition_met(dec!(50000.09)));
        assert!(!below.condition_met(dec!(50000.11)));
    }

    #[test]
    fn enabled_state_parsing() {
        assert_eq!("TRUE".parse::<EnabledState>(), Ok(EnabledState::True));
        assert_eq!("".parse::<EnabledState>(), Ok(EnabledState::False));
        assert_eq!("cancelled".parse::<EnabledState>(), Ok(EnabledState::Canceled));
        assert!("maybe".parse::<EnabledState>().is_err());
    }
}
