//! Core domain types and logic.

pub mod error;
pub mod schema;
pub mod table;
pub mod config_entry;
pub mod state_entry;
pub mod entry_validation;
pub mod lifecycle;
pub mod service;
pub mod service_config;
pub mod reconcile;
