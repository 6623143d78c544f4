//! Exchange client port.
//!
//! The wire protocol lives behind this trait. The lifecycle only calls these
//! methods and interprets the errors they return.

use rust_decimal::Decimal;

use crate::domain::config_entry::Direction;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("unknown pair {0}")]
    UnknownPair(String),

    #[error("exchange unavailable: {0}")]
    Unavailable(String),
}

impl ExchangeError {
    /// Stable label used to deduplicate notifications per error type.
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::InsufficientFunds(_) => "insufficient_funds",
            ExchangeError::Rejected(_) => "rejected",
            ExchangeError::UnknownPair(_) => "unknown_pair",
            ExchangeError::Unavailable(_) => "unavailable",
        }
    }

    /// Transient errors are retried next cycle without touching entry state.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
    Expired,
    Unknown,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Expired => "expired",
            OrderStatus::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> OrderStatus {
        match value.trim().to_lowercase().as_str() {
            "open" | "pending" => OrderStatus::Open,
            "filled" | "closed" => OrderStatus::Filled,
            "canceled" | "cancelled" => OrderStatus::Canceled,
            "expired" => OrderStatus::Expired,
            _ => OrderStatus::Unknown,
        }
    }
}

/// One order as reported by the exchange's order history.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub order_id: String,
    pub pair: String,
    pub direction: Direction,
    pub volume: Decimal,
    pub status: OrderStatus,
    pub opened_at: Option<String>,
}

pub trait ExchangePort {
    fn get_current_price(&self, pair: &str) -> Result<Decimal, ExchangeError>;

    /// Place a trailing-stop order, returning the exchange order id.
    fn submit_trailing_stop(
        &self,
        pair: &str,
        direction: Direction,
        volume: Decimal,
        offset_percent: Decimal,
    ) -> Result<String, ExchangeError>;

    fn get_minimum_volume(&self, pair: &str) -> Result<Decimal, ExchangeError>;

    fn get_minimum_cost(&self, pair: &str) -> Result<Decimal, ExchangeError>;

    fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, ExchangeError>;

    fn order_history(&self) -> Result<Vec<OrderRecord>, ExchangeError>;
}
