//! Storage port for configuration and state, gated by editor coordination.

use rust_decimal::Decimal;

use crate::domain::config_entry::{ConfigSnapshot, Direction};
use crate::domain::error::TrailError;
use crate::domain::state_entry::StateBook;

/// Result of a read that coordination may have refused.
#[derive(Debug, Clone, PartialEq)]
pub enum Gated<T> {
    Ready(T),
    Paused,
}

impl<T> Gated<T> {
    pub fn is_paused(&self) -> bool {
        matches!(self, Gated::Paused)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Gated::Ready(value) => Some(value),
            Gated::Paused => None,
        }
    }
}

impl<T: Default> Gated<T> {
    /// The empty value while paused.
    pub fn unwrap_or_default(self) -> T {
        self.ready().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { rows: usize },
    Unchanged,
    Paused,
}

impl WriteOutcome {
    pub fn is_paused(&self) -> bool {
        matches!(self, WriteOutcome::Paused)
    }
}

/// A submitted order, appended to the order log before state is saved.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub logged_at: String,
    pub id: String,
    pub pair: String,
    pub direction: Direction,
    pub volume: Decimal,
    pub trigger_price: Decimal,
    pub offset: Decimal,
    pub order_id: String,
}

pub trait EntryStore {
    fn load_config(&mut self) -> Result<Gated<ConfigSnapshot>, TrailError>;

    fn load_state(&mut self) -> Result<Gated<StateBook>, TrailError>;

    /// Persist every entry of `book` in one atomic rewrite.
    fn save_state(&mut self, book: &StateBook) -> Result<WriteOutcome, TrailError>;

    fn update_config_field(
        &mut self,
        id: &str,
        field: &str,
        value: &str,
    ) -> Result<WriteOutcome, TrailError>;

    fn disable_entries(&mut self, ids: &[String]) -> Result<WriteOutcome, TrailError>;

    /// Set `enabled=true` unless the row already says so.
    fn enable_entry(&mut self, id: &str) -> Result<WriteOutcome, TrailError>;

    fn record_placement(&mut self, placement: &Placement) -> Result<(), TrailError>;
}
