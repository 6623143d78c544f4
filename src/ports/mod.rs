//! Port traits the domain depends on.

pub mod config_port;
pub mod entry_store_port;
pub mod exchange_port;
pub mod notify_port;
