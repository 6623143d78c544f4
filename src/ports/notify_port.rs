//! Notification sink port.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TriggerReached,
    SubmissionFailed,
    OrderFilled,
    OrderFailed,
    LinkedActivated,
    ConfigError,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TriggerReached => "trigger_reached",
            EventKind::SubmissionFailed => "submission_failed",
            EventKind::OrderFilled => "order_filled",
            EventKind::OrderFailed => "order_failed",
            EventKind::LinkedActivated => "linked_activated",
            EventKind::ConfigError => "config_error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: EventKind,
    pub entry_id: String,
    pub payload: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(kind: EventKind, entry_id: &str) -> Self {
        Notification {
            kind,
            entry_id: entry_id.to_string(),
            payload: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.payload.insert(key.to_string(), value.to_string());
        self
    }
}

/// Fire-and-forget delivery. Implementations swallow and log their own failures.
pub trait NotifyPort {
    fn notify(&self, notification: &Notification);
}
