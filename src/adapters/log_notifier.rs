use tracing::{info, warn};

use crate::ports::notify_port::{EventKind, Notification, NotifyPort};

/// Emits notifications as structured log events on the `trailtrigger::notify` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl NotifyPort for LogNotifier {
    fn notify(&self, notification: &Notification) {
        let details = notification
            .payload
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        match notification.kind {
            EventKind::SubmissionFailed | EventKind::OrderFailed | EventKind::ConfigError => warn!(
                target: "trailtrigger::notify",
                kind = %notification.kind,
                id = %notification.entry_id,
                "{details}"
            ),
            _ => info!(
                target: "trailtrigger::notify",
                kind = %notification.kind,
                id = %notification.entry_id,
                "{details}"
            ),
        }
    }
}
