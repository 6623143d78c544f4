//! Repair state lost between order submission and the state save.
//!
//! The order log is written before state is saved, so a crash in between
//! leaves an id whose latest log line has no matching triggered state row.
//! When the exchange confirms the logged order and it is still working, the
//! state row is rebuilt from the log line. A logged order that already
//! settled is only reported: the same file shape is left behind when an
//! operator re-arms an entry by deleting its state row.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::config_entry::{ConfigSnapshot, EnabledState};
use super::state_entry::{StateBook, StateEntry};
use crate::ports::entry_store_port::Placement;
use crate::ports::exchange_port::{OrderRecord, OrderStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct Repair {
    pub entry: StateEntry,
    pub status: OrderStatus,
    /// The configuration row still says `enabled=true`.
    pub disable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// Logged but the exchange has no record of the order.
    Unconfirmed { id: String, order_id: String },
    /// State points at a different order than the latest log line.
    Mismatch {
        id: String,
        state_order_id: String,
        logged_order_id: String,
    },
    /// Triggered state whose order the exchange does not know.
    UnknownOrder { id: String, order_id: String },
    /// No triggered state, and the logged order is no longer working.
    Settled {
        id: String,
        order_id: String,
        status: OrderStatus,
    },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::Unconfirmed { id, order_id } => {
                write!(f, "{id}: logged order {order_id} not found on the exchange")
            }
            Finding::Mismatch {
                id,
                state_order_id,
                logged_order_id,
            } => write!(
                f,
                "{id}: state has order {state_order_id} but the log's latest is {logged_order_id}"
            ),
            Finding::UnknownOrder { id, order_id } => {
                write!(f, "{id}: triggered order {order_id} not found on the exchange")
            }
            Finding::Settled {
                id,
                order_id,
                status,
            } => write!(
                f,
                "{id}: logged order {order_id} is already {}; state not restored",
                status.as_str()
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub repairs: Vec<Repair>,
    pub findings: Vec<Finding>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.repairs.is_empty() && self.findings.is_empty()
    }

    /// Merge repairs into `book`; returns ids whose configuration rows need disabling.
    pub fn apply(&self, book: &mut StateBook) -> Vec<String> {
        let mut disable = Vec::new();
        for repair in &self.repairs {
            book.insert(repair.entry.clone());
            if repair.disable {
                disable.push(repair.entry.id.clone());
            }
        }
        disable
    }
}

pub fn plan_reconciliation(
    config: &ConfigSnapshot,
    book: &StateBook,
    log: &[Placement],
    history: &[OrderRecord],
) -> ReconcilePlan {
    let known: HashMap<&str, &OrderRecord> =
        history.iter().map(|o| (o.order_id.as_str(), o)).collect();

    let mut latest: BTreeMap<&str, &Placement> = BTreeMap::new();
    for placement in log {
        latest.insert(placement.id.as_str(), placement);
    }

    let mut plan = ReconcilePlan::default();
    for (id, placement) in &latest {
        let existing = book.get(id);
        if let Some(state) = existing.filter(|s| s.triggered) {
            match state.order_id.as_deref() {
                Some(order_id) if order_id == placement.order_id => {}
                Some(order_id) => plan.findings.push(Finding::Mismatch {
                    id: id.to_string(),
                    state_order_id: order_id.to_string(),
                    logged_order_id: placement.order_id.clone(),
                }),
                None => {}
            }
            continue;
        }

        let Some(order) = known.get(placement.order_id.as_str()) else {
            plan.findings.push(Finding::Unconfirmed {
                id: id.to_string(),
                order_id: placement.order_id.clone(),
            });
            continue;
        };
        if !matches!(order.status, OrderStatus::Open | OrderStatus::Unknown) {
            plan.findings.push(Finding::Settled {
                id: id.to_string(),
                order_id: placement.order_id.clone(),
                status: order.status,
            });
            continue;
        }

        let mut entry = existing.cloned().unwrap_or_else(|| StateEntry::new(id));
        entry.triggered = true;
        entry.order_id = Some(placement.order_id.clone());
        entry.trigger_price = Some(placement.trigger_price);
        entry.trigger_time = Some(placement.logged_at.clone());
        entry.offset = Some(placement.offset);
        entry.trigger_notified = true;
        entry.clear_error();

        plan.repairs.push(Repair {
            entry,
            status: order.status,
            disable: config
                .get(id)
                .is_some_and(|c| c.enabled == EnabledState::True),
        });
    }

    for state in book.iter().filter(|s| s.triggered) {
        if let Some(order_id) = state.order_id.as_deref() {
            if !known.contains_key(order_id) {
                plan.findings.push(Finding::UnknownOrder {
                    id: state.id.clone(),
                    order_id: order_id.to_string(),
                });
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config_entry::{ConfigEntry, Direction, ThresholdType};
    use rust_decimal_macros::dec;

    fn placement(id: &str, order_id: &str) -> Placement {
        Placement {
            logged_at: "2024-05-01T12:00:00Z".into(),
            id: id.into(),
            pair: "XBT/USD".into(),
            direction: Direction::Sell,
            volume: dec!(0.01),
            trigger_price: dec!(51000),
            offset: dec!(5),
            order_id: order_id.into(),
        }
    }

    fn order(order_id: &str, status: OrderStatus) -> OrderRecord {
        OrderRecord {
            order_id: order_id.into(),
            pair: "XBT/USD".into(),
            direction: Direction::Sell,
            volume: dec!(0.01),
            status,
            opened_at: None,
        }
    }

    fn config(id: &str, enabled: EnabledState) -> ConfigSnapshot {
        ConfigSnapshot {
            entries: vec![ConfigEntry {
                id: id.into(),
                pair: "XBT/USD".into(),
                threshold_price: dec!(50000),
                threshold_type: ThresholdType::Above,
                direction: Direction::Sell,
                volume: dec!(0.01),
                trailing_offset_percent: dec!(5),
                enabled,
                linked_order_id: None,
                extra: Default::default(),
            }],
            problems: vec![],
        }
    }

    #[test]
    fn rebuilds_lost_state_from_log() {
        let mut book = StateBook::new();
        book.entry("btc_1").initial_price = Some(dec!(49000));
        let plan = plan_reconciliation(
            &config("btc_1", EnabledState::True),
            &book,
            &[placement("btc_1", "O-1")],
            &[order("O-1", OrderStatus::Open)],
        );
        assert!(plan.findings.is_empty());
        assert_eq!(plan.repairs.len(), 1);
        let repair = &plan.repairs[0];
        assert!(repair.disable);
        assert!(repair.entry.triggered);
        assert_eq!(repair.entry.order_id.as_deref(), Some("O-1"));
        assert_eq!(repair.entry.initial_price, Some(dec!(49000)));

        let disable = plan.apply(&mut book);
        assert_eq!(disable, vec!["btc_1".to_string()]);
        assert!(book.get("btc_1").unwrap().awaiting_fill());
    }

    #[test]
    fn consistent_state_needs_nothing() {
        let mut book = StateBook::new();
        let state = book.entry("btc_1");
        state.triggered = true;
        state.order_id = Some("O-1".into());
        let plan = plan_reconciliation(
            &config("btc_1", EnabledState::False),
            &book,
            &[placement("btc_1", "O-1")],
            &[order("O-1", OrderStatus::Filled)],
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn unconfirmed_order_is_reported_not_repaired() {
        let plan = plan_reconciliation(
            &config("btc_1", EnabledState::True),
            &StateBook::new(),
            &[placement("btc_1", "O-9")],
            &[],
        );
        assert!(plan.repairs.is_empty());
        assert_eq!(
            plan.findings,
            vec![Finding::Unconfirmed {
                id: "btc_1".into(),
                order_id: "O-9".into()
            }]
        );
    }

    #[test]
    fn latest_log_line_wins() {
        let mut book = StateBook::new();
        let state = book.entry("btc_1");
        state.triggered = true;
        state.order_id = Some("O-1".into());
        let plan = plan_reconciliation(
            &config("btc_1", EnabledState::False),
            &book,
            &[placement("btc_1", "O-1"), placement("btc_1", "O-2")],
            &[order("O-1", OrderStatus::Filled), order("O-2", OrderStatus::Open)],
        );
        assert_eq!(plan.findings.len(), 1);
        assert!(plan.findings[0].to_string().contains("log's latest is O-2"));
    }

    #[test]
    fn settled_order_is_reported_not_repaired() {
        for status in [OrderStatus::Filled, OrderStatus::Canceled, OrderStatus::Expired] {
            let plan = plan_reconciliation(
                &config("btc_1", EnabledState::True),
                &StateBook::new(),
                &[placement("btc_1", "O-1")],
                &[order("O-1", status)],
            );
            assert!(plan.repairs.is_empty());
            assert_eq!(
                plan.findings,
                vec![Finding::Settled {
                    id: "btc_1".into(),
                    order_id: "O-1".into(),
                    status
                }]
            );
        }
    }

    #[test]
    fn unknown_status_is_still_repaired() {
        let plan = plan_reconciliation(
            &config("btc_1", EnabledState::False),
            &StateBook::new(),
            &[placement("btc_1", "O-1")],
            &[order("O-1", OrderStatus::Unknown)],
        );
        assert_eq!(plan.repairs.len(), 1);
        assert!(!plan.repairs[0].disable);
    }

    #[test]
    fn triggered_state_unknown_to_exchange() {
        let mut book = StateBook::new();
        let state = book.entry("eth_1");
        state.triggered = true;
        state.order_id = Some("O-7".into());
        let plan = plan_reconciliation(&ConfigSnapshot::default(), &book, &[], &[]);
        assert_eq!(
            plan.findings,
            vec![Finding::UnknownOrder {
                id: "eth_1".into(),
                order_id: "O-7".into()
            }]
        );
    }
}
