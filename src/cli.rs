//! CLI definition and dispatch.

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{self, ExitCode};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::adapters::coordination::{Coordinator, CoordinatorOptions};
use crate::adapters::editor_lease::{EditorLease, LeaseOptions};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::file_entry_store::FileEntryStore;
use crate::adapters::log_notifier::LogNotifier;
use crate::adapters::order_log::OrderLog;
use crate::adapters::paper_exchange::{PaperExchange, PaperPaths};
use crate::adapters::platform;
use crate::adapters::table_store::{RetryPolicy, TableStore};
use crate::domain::entry_validation::validate_entries;
use crate::domain::error::TrailError;
use crate::domain::reconcile::plan_reconciliation;
use crate::domain::service::{CycleReport, TriggerService};
use crate::domain::service_config::{build_service_config, ExchangeSettings, ServiceConfig};
use crate::ports::entry_store_port::{EntryStore, Gated, WriteOutcome};
use crate::ports::exchange_port::ExchangePort;

#[derive(Parser, Debug)]
#[command(name = "trailtrigger", about = "Threshold-armed trailing-stop order service")]
pub struct Cli {
    /// Service settings (INI)
    #[arg(short, long, global = true, default_value = "trailtrigger.ini")]
    pub config: PathBuf,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll until interrupted
    Run,
    /// Run a single cycle and exit
    Once,
    /// Print every entry with its lifecycle state
    Status,
    /// Check configuration entries without touching any file
    Validate,
    /// Open the configuration in $EDITOR with the service paused
    Edit {
        /// Seconds to wait for the service to acknowledge
        #[arg(long, default_value_t = 10)]
        wait_secs: u64,
    },
    /// Change one field of one entry
    Set {
        id: String,
        field: String,
        value: String,
    },
    /// Set enabled=false on the given entries
    Disable {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Repair state from the order log and exchange history
    Reconcile {
        /// Write the repairs (default is a dry run)
        #[arg(long)]
        apply: bool,
    },
}

pub fn init_logging(verbose: bool) {
    let default = if verbose {
        "debug,trailtrigger=debug"
    } else {
        "info,trailtrigger=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> ExitCode {
    init_logging(cli.verbose);

    let settings = match load_settings(&cli.config) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let result = match cli.command {
        Command::Run => run_service(&settings),
        Command::Once => run_once(&settings),
        Command::Status => run_status(&settings),
        Command::Validate => run_validate(&settings),
        Command::Edit { wait_secs } => run_edit(&settings, Duration::from_secs(wait_secs)),
        Command::Set { id, field, value } => run_set(&settings, &id, &field, &value),
        Command::Disable { ids } => run_disable(&settings, &ids),
        Command::Reconcile { apply } => run_reconcile(&settings, apply),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

/// Read, validate and sanity-check the service settings. Any failure here is fatal.
pub fn load_settings(path: &Path) -> Result<ServiceConfig, ExitCode> {
    let fail = |err: TrailError| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    };
    let adapter = FileConfigAdapter::from_file(path).map_err(|e| {
        fail(TrailError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        })
    })?;
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let settings = build_service_config(&adapter, base_dir).map_err(fail)?;

    let config_dir = settings
        .config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::read_dir(config_dir).map_err(|e| {
        fail(TrailError::ConfigInvalid {
            section: "files".to_string(),
            key: "config_path".to_string(),
            reason: format!("directory {} is not readable: {e}", config_dir.display()),
        })
    })?;
    Ok(settings)
}

fn coordinator_options(settings: &ServiceConfig) -> CoordinatorOptions {
    CoordinatorOptions {
        ttl: settings.lock_ttl,
        fallback_dir: settings.fallback_dir.clone(),
        honor_flock: true,
        acknowledge: true,
    }
}

/// Store for the service itself; it owns the `.service_idle` acknowledgement.
fn open_store(settings: &ServiceConfig) -> FileEntryStore {
    let coordinator = Coordinator::new(&settings.config_path, coordinator_options(settings));
    store_with(settings, coordinator)
}

/// Store for one-shot commands: honours editor intent, leaves the idle file alone.
fn open_collaborator_store(settings: &ServiceConfig) -> FileEntryStore {
    let coordinator = Coordinator::gate_only(&settings.config_path, coordinator_options(settings));
    store_with(settings, coordinator)
}

fn store_with(settings: &ServiceConfig, coordinator: Coordinator) -> FileEntryStore {
    let tables = TableStore::new(RetryPolicy {
        attempts: settings.write_attempts,
        initial_delay_ms: settings.retry_backoff_ms,
        ..RetryPolicy::default()
    });
    FileEntryStore::new(
        &settings.state_path,
        tables,
        coordinator,
        OrderLog::new(&settings.order_log_path),
    )
}

fn open_exchange(settings: &ServiceConfig) -> PaperExchange {
    match &settings.exchange {
        ExchangeSettings::Paper {
            prices_path,
            minimums_path,
            orders_path,
        } => PaperExchange::new(PaperPaths {
            prices: prices_path.clone(),
            minimums: minimums_path.clone(),
            orders: orders_path.clone(),
        }),
    }
}

fn open_service(settings: &ServiceConfig) -> TriggerService<FileEntryStore, PaperExchange, LogNotifier> {
    TriggerService::new(
        open_store(settings),
        open_exchange(settings),
        LogNotifier,
        settings.min_trailing_offset_percent,
    )
}

fn paused_exit() -> ExitCode {
    eprintln!("configuration is being edited; try again later");
    ExitCode::from(5)
}

fn run_service(settings: &ServiceConfig) -> Result<ExitCode, TrailError> {
    let shutdown = platform::install_shutdown_handler()?;
    info!(
        config = %settings.config_path.display(),
        state = %settings.state_path.display(),
        "starting"
    );
    open_service(settings).run(settings.poll_interval, shutdown);
    Ok(ExitCode::SUCCESS)
}

fn run_once(settings: &ServiceConfig) -> Result<ExitCode, TrailError> {
    let report = open_service(settings).run_cycle(Utc::now())?;
    if report.paused {
        return Ok(paused_exit());
    }
    print_report(&report);
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &CycleReport) {
    println!("evaluated: {}", report.evaluated);
    for (label, ids) in [
        ("triggered", &report.triggered),
        ("filled", &report.filled),
        ("activated", &report.activated),
        ("disabled", &report.disabled),
    ] {
        if !ids.is_empty() {
            println!("{label}: {}", ids.join(", "));
        }
    }
    if !report.state_saved {
        println!("state save deferred");
    }
}

fn run_status(settings: &ServiceConfig) -> Result<ExitCode, TrailError> {
    let mut store = open_collaborator_store(settings);
    let (Gated::Ready(config), Gated::Ready(book)) = (store.load_config()?, store.load_state()?) else {
        return Ok(paused_exit());
    };

    println!(
        "{:<16} {:<10} {:>14} {:<6} {:<9} {:<10} {:<16} {}",
        "ID", "PAIR", "THRESHOLD", "TYPE", "ENABLED", "PHASE", "ORDER", "LAST ERROR"
    );
    for entry in &config.entries {
        let state = book.get(&entry.id);
        println!(
            "{:<16} {:<10} {:>14} {:<6} {:<9} {:<10} {:<16} {}",
            entry.id,
            entry.pair,
            entry.threshold_price,
            entry.threshold_type.as_str(),
            entry.enabled.as_str(),
            state.map(|s| s.phase().as_str()).unwrap_or("idle"),
            state.and_then(|s| s.order_id.as_deref()).unwrap_or("-"),
            state.and_then(|s| s.last_error.as_deref()).unwrap_or(""),
        );
    }
    for problem in &config.problems {
        println!("{:<16} unreadable row: {}", problem.id, problem.reason);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_validate(settings: &ServiceConfig) -> Result<ExitCode, TrailError> {
    let mut store = open_collaborator_store(settings);
    let Gated::Ready(config) = store.load_config()? else {
        return Ok(paused_exit());
    };
    let report = validate_entries(&config, settings.min_trailing_offset_percent);
    for problem in &report.problems {
        println!("error   {}: {}", problem.id, problem.reason);
    }
    for warning in &report.warnings {
        println!("warning {warning}");
    }
    if report.problems.is_empty() {
        println!("{} entries OK", config.entries.len());
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn run_edit(settings: &ServiceConfig, wait: Duration) -> Result<ExitCode, TrailError> {
    let lease = EditorLease::acquire(
        &settings.config_path,
        &LeaseOptions {
            wait,
            fallback_dir: settings.fallback_dir.clone(),
            ..LeaseOptions::default()
        },
    )?;
    if !lease.acknowledged() {
        eprintln!("warning: no running service acknowledged; editing anyway");
    }

    let editor = env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| "vi".to_string());
    let mut child = process::Command::new(&editor)
        .arg(&settings.config_path)
        .spawn()?;

    // Keep the intent fresh while the editor is open.
    let refresh_every = settings.lock_ttl / 3;
    let mut last_refresh = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if last_refresh.elapsed() >= refresh_every {
            lease.refresh()?;
            last_refresh = Instant::now();
        }
        thread::sleep(Duration::from_millis(200));
    };
    drop(lease);

    if status.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("{editor} exited with {status}");
        Ok(ExitCode::FAILURE)
    }
}

fn report_write(outcome: WriteOutcome) -> ExitCode {
    match outcome {
        WriteOutcome::Written { rows } => {
            println!("{rows} row(s) updated");
            ExitCode::SUCCESS
        }
        WriteOutcome::Unchanged => {
            println!("nothing to change");
            ExitCode::SUCCESS
        }
        WriteOutcome::Paused => paused_exit(),
    }
}

fn run_set(settings: &ServiceConfig, id: &str, field: &str, value: &str) -> Result<ExitCode, TrailError> {
    let outcome = open_collaborator_store(settings).update_config_field(id, field, value)?;
    Ok(report_write(outcome))
}

fn run_disable(settings: &ServiceConfig, ids: &[String]) -> Result<ExitCode, TrailError> {
    let outcome = open_collaborator_store(settings).disable_entries(ids)?;
    Ok(report_write(outcome))
}

fn run_reconcile(settings: &ServiceConfig, apply: bool) -> Result<ExitCode, TrailError> {
    let mut store = open_collaborator_store(settings);
    let exchange = open_exchange(settings);

    let (Gated::Ready(config), Gated::Ready(mut book)) = (store.load_config()?, store.load_state()?) else {
        return Ok(paused_exit());
    };
    let log = store.order_log().read_all()?;
    let history = exchange.order_history()?;
    let plan = plan_reconciliation(&config, &book, &log, &history);

    for finding in &plan.findings {
        println!("finding: {finding}");
    }
    for repair in &plan.repairs {
        println!(
            "repair:  {} -> order {} ({})",
            repair.entry.id,
            repair.entry.order_id.as_deref().unwrap_or("-"),
            repair.status.as_str()
        );
    }
    if plan.repairs.is_empty() {
        println!("no repairs needed");
        return Ok(ExitCode::SUCCESS);
    }
    if !apply {
        println!("dry run; pass --apply to write {} repair(s)", plan.repairs.len());
        return Ok(ExitCode::SUCCESS);
    }

    let disable = plan.apply(&mut book);
    if store.save_state(&book)?.is_paused() || store.disable_entries(&disable)?.is_paused() {
        return Ok(paused_exit());
    }
    info!(repairs = plan.repairs.len(), "reconciliation applied");
    Ok(ExitCode::SUCCESS)
}
