//! Domain error types.
//!
//! `TrailError` covers unexpected faults only. Expected conditions such as a
//! paused coordinator, a rejected order or a malformed configuration row are
//! returned as ordinary values by the operations that produce them.

use crate::ports::exchange_port::ExchangeError;

/// Top-level error type for trailtrigger.
#[derive(Debug, thiserror::Error)]
pub enum TrailError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("malformed table {path}: {reason}")]
    Table { path: String, reason: String },

    #[error("write to {path} failed after {attempts} attempts: {reason}")]
    WriteFailed {
        path: String,
        attempts: u32,
        reason: String,
    },

    #[error("no entry with id {id}")]
    UnknownEntry { id: String },

    #[error("column {field} cannot be changed")]
    ImmutableField { field: String },

    #[error("could not take editor lock on {path}: {reason}")]
    Lock { path: String, reason: String },

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&TrailError> for std::process::ExitCode {
    fn from(err: &TrailError) -> Self {
        let code: u8 = match err {
            TrailError::Io(_) => 1,
            TrailError::ConfigParse { .. }
            | TrailError::ConfigMissing { .. }
            | TrailError::ConfigInvalid { .. } => 2,
            TrailError::Table { .. } | TrailError::WriteFailed { .. } => 3,
            TrailError::UnknownEntry { .. } | TrailError::ImmutableField { .. } => 4,
            TrailError::Lock { .. } => 5,
            TrailError::Exchange(_) => 6,
        };
        std::process::ExitCode::from(code)
    }
}
