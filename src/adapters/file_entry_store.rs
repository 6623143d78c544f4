//! `EntryStore` over the configuration and state CSV files.
//!
//! Every call first asks the [`Coordinator`] whether an editor wants the
//! configuration. While paused, reads come back as [`Gated::Paused`] and
//! writes as [`WriteOutcome::Paused`] without touching disk. The order log
//! is owned by the service alone and is never gated.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::coordination::{CoordinationState, Coordinator};
use super::order_log::OrderLog;
use super::table_store::TableStore;
use crate::domain::config_entry::{ConfigSnapshot, EnabledState};
use crate::domain::error::TrailError;
use crate::domain::schema::{state_columns, ID_COLUMN};
use crate::domain::state_entry::StateBook;
use crate::domain::table::Table;
use crate::ports::entry_store_port::{EntryStore, Gated, Placement, WriteOutcome};

#[derive(Debug)]
pub struct FileEntryStore {
    config_path: PathBuf,
    state_path: PathBuf,
    tables: TableStore,
    coordinator: Coordinator,
    order_log: OrderLog,
}

impl FileEntryStore {
    pub fn new(
        state_path: &Path,
        tables: TableStore,
        coordinator: Coordinator,
        order_log: OrderLog,
    ) -> Self {
        FileEntryStore {
            config_path: coordinator.config_path().to_path_buf(),
            state_path: state_path.to_path_buf(),
            tables,
            coordinator,
            order_log,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn order_log(&self) -> &OrderLog {
        &self.order_log
    }

    pub fn coordination(&self) -> CoordinationState {
        self.coordinator.state()
    }

    fn active(&mut self) -> Result<bool, TrailError> {
        Ok(self.coordinator.check()? == CoordinationState::Active)
    }

    /// The raw configuration table, comments and all.
    pub fn read_config_table(&mut self) -> Result<Gated<Table>, TrailError> {
        if !self.active()? {
            return Ok(Gated::Paused);
        }
        Ok(Gated::Ready(self.tables.read_all(&self.config_path)?))
    }

    fn outcome(changed: usize) -> WriteOutcome {
        if changed == 0 {
            WriteOutcome::Unchanged
        } else {
            WriteOutcome::Written { rows: changed }
        }
    }
}

impl EntryStore for FileEntryStore {
    fn load_config(&mut self) -> Result<Gated<ConfigSnapshot>, TrailError> {
        Ok(match self.read_config_table()? {
            Gated::Ready(table) => {
                if !table.has_id_column() {
                    return Err(TrailError::Table {
                        path: self.config_path.display().to_string(),
                        reason: format!("first column must be '{ID_COLUMN}'"),
                    });
                }
                Gated::Ready(ConfigSnapshot::from_table(&table))
            }
            Gated::Paused => Gated::Paused,
        })
    }

    fn load_state(&mut self) -> Result<Gated<StateBook>, TrailError> {
        if !self.active()? {
            return Ok(Gated::Paused);
        }
        let table = self
            .tables
            .read_or_default(&self.state_path, &state_columns())?;
        Ok(Gated::Ready(StateBook::from_table(&table)))
    }

    fn save_state(&mut self, book: &StateBook) -> Result<WriteOutcome, TrailError> {
        if !self.active()? {
            return Ok(WriteOutcome::Paused);
        }
        let ((), changed) = self
            .tables
            .modify(&self.state_path, &state_columns(), |table| book.apply_to(table))?;
        if changed > 0 {
            debug!(rows = changed, path = %self.state_path.display(), "state saved");
        }
        Ok(Self::outcome(changed))
    }

    fn update_config_field(
        &mut self,
        id: &str,
        field: &str,
        value: &str,
    ) -> Result<WriteOutcome, TrailError> {
        if field.trim() == ID_COLUMN {
            return Err(TrailError::ImmutableField {
                field: field.to_string(),
            });
        }
        if !self.active()? {
            return Ok(WriteOutcome::Paused);
        }
        let (found, changed) = self.tables.modify(&self.config_path, &[], |table| {
            if table.count_id(id) == 0 {
                return false;
            }
            table.update(|row_id| row_id == id, |row| row.set(field.trim(), value));
            true
        })?;
        if !found {
            return Err(TrailError::UnknownEntry { id: id.to_string() });
        }
        if changed > 0 {
            info!(%id, field, value, "configuration updated");
        }
        Ok(Self::outcome(changed))
    }

    fn disable_entries(&mut self, ids: &[String]) -> Result<WriteOutcome, TrailError> {
        if ids.is_empty() {
            return Ok(WriteOutcome::Unchanged);
        }
        if !self.active()? {
            return Ok(WriteOutcome::Paused);
        }
        let changed = self.tables.update_rows(
            &self.config_path,
            |id| ids.iter().any(|wanted| wanted == id),
            |row| {
                let current = row.get("enabled").unwrap_or("").parse::<EnabledState>();
                // Leave paused and canceled rows as the operator set them.
                if matches!(current, Ok(EnabledState::True) | Err(_)) {
                    row.set("enabled", EnabledState::False.as_str());
                }
            },
        )?;
        if changed > 0 {
            info!(rows = changed, "entries disabled");
        }
        Ok(Self::outcome(changed))
    }

    fn enable_entry(&mut self, id: &str) -> Result<WriteOutcome, TrailError> {
        if !self.active()? {
            return Ok(WriteOutcome::Paused);
        }
        let changed = self.tables.update_rows(
            &self.config_path,
            |row_id| row_id == id,
            |row| {
                let current = row.get("enabled").unwrap_or("").parse::<EnabledState>();
                if current != Ok(EnabledState::True) {
                    row.set("enabled", EnabledState::True.as_str());
                }
            },
        )?;
        Ok(Self::outcome(changed))
    }

    fn record_placement(&mut self, placement: &Placement) -> Result<(), TrailError> {
        self.order_log.append(placement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::coordination::{idle_path, intent_path, CoordinatorOptions};
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = "id,pair,threshold_price,threshold_type,direction,volume,trailing_offset_percent,enabled,linked_order_id,note\n\
        # core positions\n\
        btc_1,XBT/USD,50000,above,sell,0.01,5.0,true,eth_1,keep me\n\
        \n\
        eth_1,ETH/USD,3000,below,buy,0.5,2.0,false,,\n\
        sol_1,SOL/USD,100,above,sell,1,3,paused,,\n";

    fn store(dir: &TempDir) -> FileEntryStore {
        let config = dir.path().join("orders.csv");
        fs::write(&config, CONFIG).unwrap();
        let coordinator = Coordinator::new(
            &config,
            CoordinatorOptions {
                fallback_dir: dir.path().to_path_buf(),
                honor_flock: false,
                ..CoordinatorOptions::default()
            },
        );
        FileEntryStore::new(
            &dir.path().join("orders_state.csv"),
            TableStore::default(),
            coordinator,
            OrderLog::new(&dir.path().join("orders_log.csv")),
        )
    }

    #[test]
    fn load_config_parses_entries() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let config = store.load_config().unwrap().ready().unwrap();
        assert_eq!(config.entries.len(), 3);
        assert_eq!(config.get("btc_1").unwrap().extra.get("note").map(String::as_str), Some("keep me"));
    }

    #[test]
    fn missing_state_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        assert!(store.load_state().unwrap().ready().unwrap().is_empty());
    }

    #[test]
    fn save_state_creates_file_with_canonical_columns() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let mut book = StateBook::new();
        book.entry("btc_1").last_checked = Some("2024-05-01T00:00:00Z".into());
        assert_eq!(store.save_state(&book).unwrap(), WriteOutcome::Written { rows: 1 });
        assert_eq!(store.save_state(&book).unwrap(), WriteOutcome::Unchanged);

        let text = fs::read_to_string(store.state_path()).unwrap();
        assert!(text.starts_with(&state_columns().join(",")));
        let reloaded = store.load_state().unwrap().ready().unwrap();
        assert_eq!(reloaded.get("btc_1"), book.get("btc_1"));
    }

    #[test]
    fn disable_touches_only_enabled_rows_and_keeps_comments() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let outcome = store
            .disable_entries(&["btc_1".into(), "sol_1".into(), "eth_1".into()])
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Written { rows: 1 });

        let text = fs::read_to_string(store.config_path()).unwrap();
        assert!(text.contains("# core positions\nbtc_1,XBT/USD,50000,above,sell,0.01,5.0,false,eth_1,keep me\n\neth_1"));
        assert!(text.contains("sol_1,SOL/USD,100,above,sell,1,3,paused,,\n"));
    }

    #[test]
    fn enable_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        assert_eq!(store.enable_entry("eth_1").unwrap(), WriteOutcome::Written { rows: 1 });
        assert_eq!(store.enable_entry("eth_1").unwrap(), WriteOutcome::Unchanged);
    }

    #[test]
    fn update_field_rejects_id_and_unknown_entries() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        assert!(matches!(
            store.update_config_field("btc_1", "id", "x"),
            Err(TrailError::ImmutableField { .. })
        ));
        assert!(matches!(
            store.update_config_field("ghost", "volume", "1"),
            Err(TrailError::UnknownEntry { .. })
        ));
        assert_eq!(
            store.update_config_field("btc_1", "volume", "0.02").unwrap(),
            WriteOutcome::Written { rows: 1 }
        );
        let config = store.load_config().unwrap().ready().unwrap();
        assert_eq!(config.get("btc_1").unwrap().volume.to_string(), "0.02");
    }

    #[test]
    fn update_field_can_add_operator_column() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.update_config_field("eth_1", "desk", "fx").unwrap();
        let text = fs::read_to_string(store.config_path()).unwrap();
        assert!(text.starts_with("id,pair,threshold_price,threshold_type,direction,volume,trailing_offset_percent,enabled,linked_order_id,note,desk\n"));
    }

    #[test]
    fn paused_store_reads_nothing_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let config_path = store.config_path().to_path_buf();
        fs::write(intent_path(&config_path), "").unwrap();

        assert!(store.load_config().unwrap().is_paused());
        assert!(store.load_state().unwrap().is_paused());
        assert!(store.disable_entries(&["btc_1".into()]).unwrap().is_paused());
        assert!(store.save_state(&StateBook::new()).unwrap().is_paused());
        assert_eq!(fs::read_to_string(&config_path).unwrap(), CONFIG);
        assert!(!store.state_path().exists());
        assert!(idle_path(&config_path).exists());

        fs::remove_file(intent_path(&config_path)).unwrap();
        assert_eq!(store.load_config().unwrap().ready().unwrap().entries.len(), 3);
        assert!(!idle_path(&config_path).exists());
    }

    #[test]
    fn rejects_config_without_id_column() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        fs::write(store.config_path(), "pair,enabled\nXBT/USD,true\n").unwrap();
        assert!(matches!(store.load_config(), Err(TrailError::Table { .. })));
    }
}
