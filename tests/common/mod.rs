#![allow(dead_code)]

use rust_decimal::Decimal;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use trailtrigger::adapters::coordination::{Coordinator, CoordinatorOptions};
use trailtrigger::adapters::file_entry_store::FileEntryStore;
use trailtrigger::adapters::order_log::OrderLog;
use trailtrigger::adapters::table_store::TableStore;
use trailtrigger::domain::config_entry::Direction;
use trailtrigger::domain::service::TriggerService;
use trailtrigger::ports::exchange_port::{ExchangeError, ExchangePort, OrderRecord, OrderStatus};
use trailtrigger::ports::notify_port::{EventKind, Notification, NotifyPort};

pub const HEADER: &str =
    "id,pair,threshold_price,threshold_type,direction,volume,trailing_offset_percent,enabled,linked_order_id";

pub const BTC_1: &str = "btc_1,XBT/USD,50000,above,sell,0.01,5.0,true,";

/// In-memory exchange with settable prices, minimums and order statuses.
pub struct MockExchange {
    pub prices: RefCell<HashMap<String, Result<Decimal, ExchangeError>>>,
    pub min_volume: RefCell<HashMap<String, Decimal>>,
    pub min_cost: RefCell<HashMap<String, Decimal>>,
    pub submit_error: RefCell<Option<ExchangeError>>,
    pub orders: RefCell<Vec<OrderRecord>>,
    pub submissions: RefCell<usize>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            prices: RefCell::new(HashMap::new()),
            min_volume: RefCell::new(HashMap::new()),
            min_cost: RefCell::new(HashMap::new()),
            submit_error: RefCell::new(None),
            orders: RefCell::new(Vec::new()),
            submissions: RefCell::new(0),
        }
    }

    pub fn with_price(self, pair: &str, price: Decimal) -> Self {
        self.set_price(pair, price);
        self
    }

    pub fn with_min_volume(self, pair: &str, volume: Decimal) -> Self {
        self.min_volume.borrow_mut().insert(pair.to_string(), volume);
        self
    }

    pub fn set_price(&self, pair: &str, price: Decimal) {
        self.prices.borrow_mut().insert(pair.to_string(), Ok(price));
    }

    pub fn set_price_error(&self, pair: &str, err: ExchangeError) {
        self.prices.borrow_mut().insert(pair.to_string(), Err(err));
    }

    pub fn set_status(&self, order_id: &str, status: OrderStatus) {
        for order in self.orders.borrow_mut().iter_mut() {
            if order.order_id == order_id {
                order.status = status;
            }
        }
    }

    pub fn submissions(&self) -> usize {
        *self.submissions.borrow()
    }
}

impl ExchangePort for MockExchange {
    fn get_current_price(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        self.prices
            .borrow()
            .get(pair)
            .cloned()
            .unwrap_or_else(|| Err(ExchangeError::UnknownPair(pair.to_string())))
    }

    fn submit_trailing_stop(
        &self,
        pair: &str,
        direction: Direction,
        volume: Decimal,
        _offset_percent: Decimal,
    ) -> Result<String, ExchangeError> {
        *self.submissions.borrow_mut() += 1;
        if let Some(err) = self.submit_error.borrow().clone() {
            return Err(err);
        }
        let order_id = format!("O-{}", self.orders.borrow().len() + 1);
        self.orders.borrow_mut().push(OrderRecord {
            order_id: order_id.clone(),
            pair: pair.to_string(),
            direction,
            volume,
            status: OrderStatus::Open,
            opened_at: None,
        });
        Ok(order_id)
    }

    fn get_minimum_volume(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        Ok(self.min_volume.borrow().get(pair).copied().unwrap_or(Decimal::ZERO))
    }

    fn get_minimum_cost(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        Ok(self.min_cost.borrow().get(pair).copied().unwrap_or(Decimal::ZERO))
    }

    fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, ExchangeError> {
        Ok(self
            .orders
            .borrow()
            .iter()
            .find(|o| o.order_id == order_id)
            .map(|o| o.status)
            .unwrap_or(OrderStatus::Unknown))
    }

    fn order_history(&self) -> Result<Vec<OrderRecord>, ExchangeError> {
        Ok(self.orders.borrow().clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: RefCell<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn count(&self, kind: EventKind) -> usize {
        self.sent.borrow().iter().filter(|n| n.kind == kind).count()
    }

    pub fn count_for(&self, kind: EventKind, id: &str) -> usize {
        self.sent
            .borrow()
            .iter()
            .filter(|n| n.kind == kind && n.entry_id == id)
            .count()
    }
}

impl NotifyPort for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.sent.borrow_mut().push(notification.clone());
    }
}

/// A temp directory holding a configuration file and its companions.
pub struct Fixture {
    pub dir: TempDir,
    pub config: PathBuf,
    pub state: PathBuf,
    pub log: PathBuf,
}

impl Fixture {
    pub fn new(rows: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("orders.csv");
        let mut text = format!("{HEADER}\n");
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        fs::write(&config, text).unwrap();
        Self {
            state: dir.path().join("orders_state.csv"),
            log: dir.path().join("orders_log.csv"),
            config,
            dir,
        }
    }

    pub fn store(&self) -> FileEntryStore {
        let coordinator = Coordinator::new(
            &self.config,
            CoordinatorOptions {
                fallback_dir: self.dir.path().to_path_buf(),
                honor_flock: false,
                ..CoordinatorOptions::default()
            },
        );
        FileEntryStore::new(
            &self.state,
            TableStore::default(),
            coordinator,
            OrderLog::new(&self.log),
        )
    }

    pub fn service(
        &self,
        exchange: MockExchange,
    ) -> TriggerService<FileEntryStore, MockExchange, RecordingNotifier> {
        TriggerService::new(
            self.store(),
            exchange,
            RecordingNotifier::default(),
            Decimal::new(1, 1),
        )
    }

    pub fn config_text(&self) -> String {
        fs::read_to_string(&self.config).unwrap()
    }
}
