//! The poll cycle: read configuration once, advance every entry, write state once.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::config_entry::{ConfigSnapshot, EnabledState};
use super::entry_validation::{validate_entries, ValidationReport};
use super::error::TrailError;
use super::lifecycle::{Effect, Lifecycle};
use super::state_entry::StateBook;
use crate::ports::entry_store_port::{EntryStore, Gated, WriteOutcome};
use crate::ports::exchange_port::ExchangePort;
use crate::ports::notify_port::{EventKind, Notification, NotifyPort};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub paused: bool,
    pub evaluated: usize,
    pub triggered: Vec<String>,
    pub filled: Vec<String>,
    pub activated: Vec<String>,
    pub disabled: Vec<String>,
    pub state_saved: bool,
}

pub struct TriggerService<S: EntryStore, E: ExchangePort, N: NotifyPort> {
    store: S,
    exchange: E,
    notifier: N,
    min_offset: Decimal,
    unsaved: Option<StateBook>,
    pending_disable: BTreeSet<String>,
    pending_enable: BTreeSet<String>,
}

impl<S: EntryStore, E: ExchangePort, N: NotifyPort> TriggerService<S, E, N> {
    pub fn new(store: S, exchange: E, notifier: N, min_offset: Decimal) -> Self {
        TriggerService {
            store,
            exchange,
            notifier,
            min_offset,
            unsaved: None,
            pending_disable: BTreeSet::new(),
            pending_enable: BTreeSet::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Evaluate every entry once.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, TrailError> {
        let now = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut report = CycleReport::default();

        let config = match self.store.load_config()? {
            Gated::Ready(config) => config,
            Gated::Paused => {
                report.paused = true;
                return Ok(report);
            }
        };
        let mut book = match self.store.load_state()? {
            Gated::Ready(book) => book,
            Gated::Paused => {
                report.paused = true;
                return Ok(report);
            }
        };
        if let Some(unsaved) = self.unsaved.take() {
            debug!(entries = unsaved.len(), "replaying state held back by a pause");
            book.overlay(unsaved);
        }

        self.flush_pending(&config, &book);

        let validation = validate_entries(&config, self.min_offset);
        self.handle_problems(&config, &validation, &mut book, &now, &mut report);

        let mut lifecycle = Lifecycle::new(&self.exchange, &self.notifier, &now);
        let mut effects = Vec::new();
        for entry in &config.entries {
            let triggered = book.get(&entry.id).is_some_and(|s| s.triggered);
            if validation.problem_for(&entry.id).is_some() && !triggered {
                continue;
            }
            if book.get(&entry.id).is_none() && !entry.is_enabled() {
                continue;
            }
            let state = book.entry(&entry.id);
            let was_triggered = state.triggered;
            let was_filled = state.fill_notified;
            effects.extend(lifecycle.advance(entry, state));
            report.evaluated += 1;
            if !was_triggered && state.triggered {
                report.triggered.push(entry.id.clone());
            }
            if !was_filled && state.fill_notified {
                report.filled.push(entry.id.clone());
            }
        }

        for effect in effects {
            self.apply_effect(effect, &config, &mut book, &now, &mut report);
        }

        match self.store.save_state(&book)? {
            WriteOutcome::Paused => {
                info!("state save deferred: editor holds the configuration");
                self.unsaved = Some(book);
            }
            WriteOutcome::Written { .. } | WriteOutcome::Unchanged => {
                report.state_saved = true;
            }
        }
        Ok(report)
    }

    /// Run cycles until `shutdown` is set. Only the sleep between cycles is interrupted.
    pub fn run(&mut self, interval: Duration, shutdown: &AtomicBool) {
        info!(interval_secs = interval.as_secs(), "service started");
        while !shutdown.load(Ordering::SeqCst) {
            match self.run_cycle(Utc::now()) {
                Ok(report) if report.paused => debug!("cycle skipped: paused for editor"),
                Ok(report) => debug!(
                    evaluated = report.evaluated,
                    triggered = report.triggered.len(),
                    filled = report.filled.len(),
                    "cycle complete"
                ),
                Err(err) => error!("cycle failed: {err}"),
            }
            sleep_until_shutdown(interval, shutdown);
        }
        info!("service stopped");
    }

    fn flush_pending(&mut self, config: &ConfigSnapshot, book: &StateBook) {
        if !self.pending_disable.is_empty() {
            let ids: Vec<String> = self.pending_disable.iter().cloned().collect();
            match self.store.disable_entries(&ids) {
                Ok(WriteOutcome::Paused) => {}
                Ok(_) => self.pending_disable.clear(),
                Err(err) => warn!("deferred disable failed: {err}"),
            }
        }
        let pending: Vec<String> = self.pending_enable.iter().cloned().collect();
        for child in pending {
            let still_wanted = config
                .get(&child)
                .is_some_and(|c| c.enabled != EnabledState::True)
                && !book.get(&child).is_some_and(|s| s.triggered);
            if !still_wanted {
                self.pending_enable.remove(&child);
                continue;
            }
            match self.store.enable_entry(&child) {
                Ok(WriteOutcome::Paused) => {}
                Ok(_) => {
                    self.pending_enable.remove(&child);
                }
                Err(err) => warn!(id = %child, "deferred activation failed: {err}"),
            }
        }
    }

    fn handle_problems(
        &mut self,
        config: &ConfigSnapshot,
        validation: &ValidationReport,
        book: &mut StateBook,
        now: &str,
        report: &mut CycleReport,
    ) {
        for warning in &validation.warnings {
            warn!("{warning}");
        }

        let mut to_disable = Vec::new();
        for problem in &validation.problems {
            if problem.id.is_empty() {
                warn!("configuration row without id: {}", problem.reason);
                continue;
            }
            let active = config
                .get(&problem.id)
                .map(|e| e.enabled == EnabledState::True)
                .unwrap_or(true);
            if !active && book.get(&problem.id).is_none() {
                continue;
            }
            if book.get(&problem.id).is_some_and(|s| s.triggered) {
                // Order already placed; an edit to the row cannot undo that.
                warn!(id = %problem.id, "triggered entry has a configuration error: {}", problem.reason);
                continue;
            }
            let state = book.entry(&problem.id);
            state.last_checked = Some(now.to_string());
            if state.record_error(&problem.reason) {
                warn!(id = %problem.id, "configuration error: {}", problem.reason);
                self.notifier.notify(
                    &Notification::new(EventKind::ConfigError, &problem.id)
                        .with("error", &problem.reason),
                );
                state.error_notified = true;
            }
            if active {
                to_disable.push(problem.id.clone());
            }
        }

        if to_disable.is_empty() {
            return;
        }
        match self.store.disable_entries(&to_disable) {
            Ok(WriteOutcome::Paused) => self.pending_disable.extend(to_disable),
            Ok(_) => report.disabled.extend(to_disable),
            Err(err) => {
                error!("could not disable invalid entries: {err}");
                self.pending_disable.extend(to_disable);
            }
        }
    }

    fn apply_effect(
        &mut self,
        effect: Effect,
        config: &ConfigSnapshot,
        book: &mut StateBook,
        now: &str,
        report: &mut CycleReport,
    ) {
        match effect {
            Effect::Placed(placement) => {
                if let Err(err) = self.store.record_placement(&placement) {
                    error!(id = %placement.id, order_id = %placement.order_id, "order log append failed: {err}");
                }
                let ids = vec![placement.id.clone()];
                match self.store.disable_entries(&ids) {
                    Ok(WriteOutcome::Paused) => {
                        self.pending_disable.insert(placement.id);
                    }
                    Ok(_) => report.disabled.push(placement.id),
                    Err(err) => {
                        error!(id = %placement.id, "could not disable triggered entry: {err}");
                        self.pending_disable.insert(placement.id);
                    }
                }
            }
            Effect::ActivateLinked { parent, child } => {
                let Some(linked) = config.get(&child) else {
                    warn!(%parent, %child, "linked entry not found");
                    return;
                };
                if linked.enabled == EnabledState::True {
                    debug!(%parent, %child, "linked entry already enabled");
                    return;
                }
                if book.get(&child).is_some_and(|s| s.triggered) {
                    debug!(%parent, %child, "linked entry already triggered");
                    return;
                }
                match self.store.enable_entry(&child) {
                    Ok(WriteOutcome::Written { .. }) => {
                        info!(%parent, %child, "linked entry enabled");
                        book.entry(&child).activated_on = Some(now.to_string());
                        self.notifier.notify(
                            &Notification::new(EventKind::LinkedActivated, &child)
                                .with("parent", &parent),
                        );
                        report.activated.push(child);
                    }
                    Ok(WriteOutcome::Unchanged) => {}
                    Ok(WriteOutcome::Paused) => {
                        self.pending_enable.insert(child);
                    }
                    Err(err) => {
                        error!(%parent, %child, "could not enable linked entry: {err}");
                        self.pending_enable.insert(child);
                    }
                }
            }
        }
    }
}

fn sleep_until_shutdown(interval: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + interval;
    let slice = Duration::from_millis(200);
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(slice.min(deadline - now));
    }
}
