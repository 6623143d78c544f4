//! Per-entry order lifecycle: Idle -> Triggered -> Filled, with Failed on the side.
//!
//! [`Lifecycle::advance`] moves one entry forward by at most one step per
//! cycle. It talks to the exchange and the notification sink directly and
//! returns the file-side effects (order log, configuration writes) for the
//! caller to apply, so no file is held while the exchange is being called.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::config_entry::ConfigEntry;
use super::state_entry::{Phase, StateEntry};
use crate::ports::entry_store_port::Placement;
use crate::ports::exchange_port::{ExchangeError, ExchangePort, OrderStatus};
use crate::ports::notify_port::{EventKind, Notification, NotifyPort};

/// File-side consequence of a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// An order was placed: log it and disable the entry's configuration row.
    Placed(Placement),
    /// The entry's order filled and it names a linked entry to enable.
    ActivateLinked { parent: String, child: String },
}

#[derive(Debug, Clone, PartialEq)]
enum SubmitFailure {
    Transient(ExchangeError),
    /// `reason` is a stable label; `message` is what the operator sees.
    Rejected { reason: &'static str, message: String },
}

pub struct Lifecycle<'a, E: ExchangePort + ?Sized, N: NotifyPort + ?Sized> {
    exchange: &'a E,
    notifier: &'a N,
    prices: HashMap<String, Result<Decimal, ExchangeError>>,
    now: String,
}

impl<'a, E: ExchangePort + ?Sized, N: NotifyPort + ?Sized> Lifecycle<'a, E, N> {
    /// One lifecycle pass; prices are fetched at most once per pair.
    pub fn new(exchange: &'a E, notifier: &'a N, now: &str) -> Self {
        Lifecycle {
            exchange,
            notifier,
            prices: HashMap::new(),
            now: now.to_string(),
        }
    }

    pub fn now(&self) -> &str {
        &self.now
    }

    fn price(&mut self, pair: &str) -> Result<Decimal, ExchangeError> {
        if let Some(cached) = self.prices.get(pair) {
            return cached.clone();
        }
        let fetched = self.exchange.get_current_price(pair);
        self.prices.insert(pair.to_string(), fetched.clone());
        fetched
    }

    pub fn advance(&mut self, entry: &ConfigEntry, state: &mut StateEntry) -> Vec<Effect> {
        match state.phase() {
            Phase::Idle if entry.is_enabled() => self.try_trigger(entry, state),
            Phase::Idle => Vec::new(),
            Phase::Triggered => self.poll_fill(entry, state),
            Phase::Filled | Phase::Failed => Vec::new(),
        }
    }

    fn try_trigger(&mut self, entry: &ConfigEntry, state: &mut StateEntry) -> Vec<Effect> {
        let price = match self.price(&entry.pair) {
            Ok(price) => price,
            Err(err) if err.is_transient() => {
                warn!(id = %entry.id, pair = %entry.pair, "price unavailable: {err}");
                return Vec::new();
            }
            Err(err) => {
                self.report_error(entry, state, EventKind::SubmissionFailed, err.kind(), &err.to_string());
                return Vec::new();
            }
        };

        state.last_checked = Some(self.now.clone());
        if state.initial_price.is_none() {
            state.initial_price = Some(price);
        }

        if !entry.condition_met(price) {
            // Condition cleared: the next crossing is a new event.
            state.trigger_notified = false;
            state.clear_error();
            debug!(id = %entry.id, %price, threshold = %entry.threshold_price, "condition not met");
            return Vec::new();
        }

        let outcome = self.submit(entry, price);
        let mut effects = Vec::new();
        match outcome {
            Ok(order_id) => {
                info!(id = %entry.id, %price, order_id = %order_id, "trigger reached, order placed");
                state.triggered = true;
                state.order_id = Some(order_id.clone());
                state.trigger_price = Some(price);
                state.trigger_time = Some(self.now.clone());
                state.offset = Some(entry.trailing_offset_percent);
                state.clear_error();
                self.notify_trigger(entry, state, price, Some(&order_id));
                effects.push(Effect::Placed(Placement {
                    logged_at: self.now.clone(),
                    id: entry.id.clone(),
                    pair: entry.pair.clone(),
                    direction: entry.direction,
                    volume: entry.volume,
                    trigger_price: price,
                    offset: entry.trailing_offset_percent,
                    order_id,
                }));
            }
            Err(SubmitFailure::Transient(err)) => {
                warn!(id = %entry.id, "submission deferred: {err}");
            }
            Err(SubmitFailure::Rejected { reason, message }) => {
                self.notify_trigger(entry, state, price, None);
                self.report_error(entry, state, EventKind::SubmissionFailed, reason, &message);
            }
        }
        effects
    }

    /// Check exchange minimums, then place the trailing stop.
    fn submit(&self, entry: &ConfigEntry, price: Decimal) -> Result<String, SubmitFailure> {
        let classify = |err: ExchangeError| {
            if err.is_transient() {
                SubmitFailure::Transient(err)
            } else {
                SubmitFailure::Rejected {
                    reason: err.kind(),
                    message: err.to_string(),
                }
            }
        };

        let min_volume = self
            .exchange
            .get_minimum_volume(&entry.pair)
            .map_err(classify)?;
        if entry.volume < min_volume {
            return Err(SubmitFailure::Rejected {
                reason: "below_minimum_volume",
                message: format!(
                    "volume {} below exchange minimum {} for {}",
                    entry.volume, min_volume, entry.pair
                ),
            });
        }

        let min_cost = self.exchange.get_minimum_cost(&entry.pair).map_err(classify)?;
        let cost = entry.volume * price;
        if cost < min_cost {
            return Err(SubmitFailure::Rejected {
                reason: "below_minimum_cost",
                message: format!(
                    "order cost {} below exchange minimum cost {} for {}",
                    cost.normalize(),
                    min_cost,
                    entry.pair
                ),
            });
        }

        self.exchange
            .submit_trailing_stop(
                &entry.pair,
                entry.direction,
                entry.volume,
                entry.trailing_offset_percent,
            )
            .map_err(classify)
    }

    fn poll_fill(&mut self, entry: &ConfigEntry, state: &mut StateEntry) -> Vec<Effect> {
        let Some(order_id) = state.order_id.clone() else {
            return Vec::new();
        };
        let status = match self.exchange.get_order_status(&order_id) {
            Ok(status) => status,
            Err(err) => {
                warn!(id = %entry.id, %order_id, "order status unavailable: {err}");
                return Vec::new();
            }
        };
        state.last_checked = Some(self.now.clone());

        let mut effects = Vec::new();
        match status {
            OrderStatus::Filled => {
                info!(id = %entry.id, %order_id, "order filled");
                state.fill_notified = true;
                self.notifier.notify(
                    &Notification::new(EventKind::OrderFilled, &entry.id)
                        .with("order_id", &order_id)
                        .with("pair", &entry.pair),
                );
                if let Some(child) = &entry.linked_order_id {
                    effects.push(Effect::ActivateLinked {
                        parent: entry.id.clone(),
                        child: child.clone(),
                    });
                }
            }
            OrderStatus::Canceled | OrderStatus::Expired => {
                let message = format!("order {} {}", order_id, status.as_str());
                self.report_error(entry, state, EventKind::OrderFailed, status.as_str(), &message);
            }
            OrderStatus::Open | OrderStatus::Unknown => {}
        }
        effects
    }

    fn notify_trigger(
        &self,
        entry: &ConfigEntry,
        state: &mut StateEntry,
        price: Decimal,
        order_id: Option<&str>,
    ) {
        if state.trigger_notified {
            return;
        }
        let mut notification = Notification::new(EventKind::TriggerReached, &entry.id)
            .with("pair", &entry.pair)
            .with("price", price)
            .with("threshold", entry.threshold_price)
            .with("threshold_type", entry.threshold_type.as_str());
        if let Some(order_id) = order_id {
            notification = notification.with("order_id", order_id);
        }
        self.notifier.notify(&notification);
        state.trigger_notified = true;
    }

    /// Record `message` on the entry and notify once per distinct message.
    fn report_error(
        &self,
        entry: &ConfigEntry,
        state: &mut StateEntry,
        kind: EventKind,
        reason: &str,
        message: &str,
    ) {
        state.last_checked = Some(self.now.clone());
        if !state.record_error(message) {
            debug!(id = %entry.id, "repeat error suppressed: {message}");
            return;
        }
        warn!(id = %entry.id, "{message}");
        self.notifier.notify(
            &Notification::new(kind, &entry.id)
                .with("pair", &entry.pair)
                .with("reason", reason)
                .with("error", message),
        );
        state.error_notified = true;
    }
}
