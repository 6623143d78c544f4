//! File-driven exchange for dry runs and tests.
//!
//! Prices (`pair,price`) and minimums (`pair,min_volume,min_cost`) are read
//! fresh on every call so an operator can move the market by editing a file.
//! Submitted orders go to a CSV ledger whose `status` column the operator
//! edits to simulate fills and cancellations.

use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::domain::config_entry::Direction;
use crate::ports::exchange_port::{ExchangeError, ExchangePort, OrderRecord, OrderStatus};

const LEDGER_COLUMNS: [&str; 7] = [
    "order_id",
    "pair",
    "direction",
    "volume",
    "offset",
    "status",
    "opened_at",
];

#[derive(Debug, Clone, PartialEq)]
pub struct PaperPaths {
    pub prices: PathBuf,
    pub minimums: PathBuf,
    pub orders: PathBuf,
}

#[derive(Debug)]
pub struct PaperExchange {
    paths: PaperPaths,
    next_id: Cell<Option<u64>>,
}

impl PaperExchange {
    pub fn new(paths: PaperPaths) -> Self {
        PaperExchange {
            paths,
            next_id: Cell::new(None),
        }
    }

    fn unavailable(path: &Path, err: impl std::fmt::Display) -> ExchangeError {
        ExchangeError::Unavailable(format!("{}: {}", path.display(), err))
    }

    fn open(path: &Path) -> Result<Option<csv::Reader<File>>, ExchangeError> {
        match File::open(path) {
            Ok(file) => Ok(Some(
                csv::ReaderBuilder::new()
                    .flexible(true)
                    .trim(csv::Trim::All)
                    .comment(Some(b'#'))
                    .from_reader(file),
            )),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::unavailable(path, err)),
        }
    }

    /// Row for `pair` in a `pair,...` file.
    fn lookup(path: &Path, pair: &str) -> Result<Option<csv::StringRecord>, ExchangeError> {
        let Some(mut reader) = Self::open(path)? else {
            return Ok(None);
        };
        for result in reader.records() {
            let record = result.map_err(|e| Self::unavailable(path, e))?;
            if record.get(0) == Some(pair) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn decimal_at(record: &csv::StringRecord, index: usize, path: &Path) -> Result<Decimal, ExchangeError> {
        match record.get(index).filter(|v| !v.is_empty()) {
            None => Ok(Decimal::ZERO),
            Some(value) => value
                .parse::<Decimal>()
                .map_err(|e| Self::unavailable(path, format!("bad number '{value}': {e}"))),
        }
    }

    fn minimum(&self, pair: &str, index: usize) -> Result<Decimal, ExchangeError> {
        match Self::lookup(&self.paths.minimums, pair)? {
            Some(record) => Self::decimal_at(&record, index, &self.paths.minimums),
            None => Ok(Decimal::ZERO),
        }
    }

    fn ledger(&self) -> Result<Vec<OrderRecord>, ExchangeError> {
        let path = &self.paths.orders;
        let Some(mut reader) = Self::open(path)? else {
            return Ok(Vec::new());
        };
        let mut orders = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| Self::unavailable(path, e))?;
            let field = |i: usize| record.get(i).unwrap_or("");
            orders.push(OrderRecord {
                order_id: field(0).to_string(),
                pair: field(1).to_string(),
                direction: field(2)
                    .parse()
                    .map_err(|e: String| Self::unavailable(path, e))?,
                volume: Self::decimal_at(&record, 3, path)?,
                status: OrderStatus::parse(field(5)),
                opened_at: Some(field(6).to_string()).filter(|v| !v.is_empty()),
            });
        }
        Ok(orders)
    }

    fn allocate_id(&self) -> Result<String, ExchangeError> {
        let next = match self.next_id.get() {
            Some(next) => next,
            None => self.ledger()?.len() as u64 + 1,
        };
        self.next_id.set(Some(next + 1));
        Ok(format!("PAPER-{next:06}"))
    }

    fn append_order(&self, values: [String; 7]) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.paths.orders)?;
        let needs_header = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(LEDGER_COLUMNS)?;
        }
        writer.write_record(&values)?;
        writer.flush()
    }
}

impl ExchangePort for PaperExchange {
    fn get_current_price(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        let record = Self::lookup(&self.paths.prices, pair)?
            .ok_or_else(|| ExchangeError::UnknownPair(pair.to_string()))?;
        let price = Self::decimal_at(&record, 1, &self.paths.prices)?;
        if price <= Decimal::ZERO {
            return Err(ExchangeError::Unavailable(format!("no price quoted for {pair}")));
        }
        Ok(price)
    }

    fn submit_trailing_stop(
        &self,
        pair: &str,
        direction: Direction,
        volume: Decimal,
        offset_percent: Decimal,
    ) -> Result<String, ExchangeError> {
        self.get_current_price(pair)?;
        let order_id = self.allocate_id()?;
        let opened_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        self.append_order([
            order_id.clone(),
            pair.to_string(),
            direction.to_string(),
            volume.to_string(),
            offset_percent.to_string(),
            OrderStatus::Open.as_str().to_string(),
            opened_at,
        ])
        .map_err(|e| Self::unavailable(&self.paths.orders, e))?;
        info!(%order_id, pair, %direction, %volume, offset = %offset_percent, "paper trailing stop placed");
        Ok(order_id)
    }

    fn get_minimum_volume(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        self.minimum(pair, 1)
    }

    fn get_minimum_cost(&self, pair: &str) -> Result<Decimal, ExchangeError> {
        self.minimum(pair, 2)
    }

    fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, ExchangeError> {
        Ok(self
            .ledger()?
            .into_iter()
            .find(|o| o.order_id == order_id)
            .map(|o| o.status)
            .unwrap_or(OrderStatus::Unknown))
    }

    fn order_history(&self) -> Result<Vec<OrderRecord>, ExchangeError> {
        self.ledger()
    }
}
