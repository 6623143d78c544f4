//! Append-only CSV log of submitted orders.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::config_entry::Direction;
use crate::domain::error::TrailError;
use crate::ports::entry_store_port::Placement;

pub const LOG_COLUMNS: [&str; 8] = [
    "logged_at",
    "id",
    "pair",
    "direction",
    "volume",
    "trigger_price",
    "offset",
    "order_id",
];

#[derive(Debug, Clone)]
pub struct OrderLog {
    path: PathBuf,
}

impl OrderLog {
    pub fn new(path: &Path) -> Self {
        OrderLog {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line and sync it to disk.
    pub fn append(&self, placement: &Placement) -> Result<(), TrailError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        let mut write = || -> csv::Result<()> {
            if needs_header {
                writer.write_record(LOG_COLUMNS)?;
            }
            writer.write_record(&[
                placement.logged_at.clone(),
                placement.id.clone(),
                placement.pair.clone(),
                placement.direction.to_string(),
                placement.volume.to_string(),
                placement.trigger_price.to_string(),
                placement.offset.to_string(),
                placement.order_id.clone(),
            ])?;
            writer.flush()?;
            Ok(())
        };
        write().map_err(|e| self.table_error(e.to_string()))?;

        let file = writer
            .into_inner()
            .map_err(|e| self.table_error(e.to_string()))?;
        file.sync_all()?;
        Ok(())
    }

    /// Every parseable placement in file order. A missing log is empty.
    pub fn read_all(&self) -> Result<Vec<Placement>, TrailError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);

        let mut placements = Vec::new();
        for (index, result) in reader.records().enumerate() {
            let record = result.map_err(|e| self.table_error(e.to_string()))?;
            match parse_placement(&record) {
                Some(placement) => placements.push(placement),
                None => warn!(
                    path = %self.path.display(),
                    line = index + 2,
                    "skipping unreadable order log line"
                ),
            }
        }
        Ok(placements)
    }

    fn table_error(&self, reason: String) -> TrailError {
        TrailError::Table {
            path: self.path.display().to_string(),
            reason,
        }
    }
}

fn parse_placement(record: &csv::StringRecord) -> Option<Placement> {
    let field = |i: usize| record.get(i).map(str::trim);
    let decimal = |i: usize| field(i).and_then(|v| v.parse::<Decimal>().ok());
    Some(Placement {
        logged_at: field(0)?.to_string(),
        id: field(1).filter(|v| !v.is_empty())?.to_string(),
        pair: field(2)?.to_string(),
        direction: field(3)?.parse::<Direction>().ok()?,
        volume: decimal(4)?,
        trigger_price: decimal(5)?,
        offset: decimal(6)?,
        order_id: field(7).filter(|v| !v.is_empty())?.to_string(),
    })
}
