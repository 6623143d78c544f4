//! Concrete adapter implementations for ports.

pub mod coordination;
pub mod editor_lease;
pub mod file_config_adapter;
pub mod file_entry_store;
pub mod log_notifier;
pub mod order_log;
pub mod paper_exchange;
pub mod platform;
pub mod table_store;
