//! Editor side of the handshake.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use super::coordination::{fallback_intent_path, idle_path, intent_path};
use super::platform::{self, ExclusiveLock};
use crate::domain::error::TrailError;

#[derive(Debug, Clone)]
pub struct LeaseOptions {
    /// How long to wait for the service to acknowledge.
    pub wait: Duration,
    pub poll: Duration,
    pub fallback_dir: PathBuf,
}

impl Default for LeaseOptions {
    fn default() -> Self {
        LeaseOptions {
            wait: Duration::from_secs(10),
            poll: Duration::from_millis(250),
            fallback_dir: std::env::temp_dir(),
        }
    }
}

/// Exclusive editing rights on a configuration file. Dropping the lease
/// releases the lock and withdraws the intent signal.
#[derive(Debug)]
pub struct EditorLease {
    intent_file: PathBuf,
    acknowledged: bool,
    _lock: ExclusiveLock,
}

impl EditorLease {
    /// Lock first so a second editor is refused before it touches the signal files.
    pub fn acquire(config_path: &Path, options: &LeaseOptions) -> Result<EditorLease, TrailError> {
        let lock_error = |reason: String| TrailError::Lock {
            path: config_path.display().to_string(),
            reason,
        };
        let lock = ExclusiveLock::try_acquire(config_path)
            .map_err(|err| lock_error(err.to_string()))?
            .ok_or_else(|| lock_error("held by another editor".to_string()))?;

        let intent_file = announce(config_path, &options.fallback_dir)?;
        debug!(path = %intent_file.display(), "editor intent written");

        let acknowledged = wait_for_idle(&idle_path(config_path), options.wait, options.poll);
        if acknowledged {
            info!("service acknowledged the edit request");
        } else {
            warn!(
                "no service acknowledged within {}s; proceeding",
                options.wait.as_secs()
            );
        }

        Ok(EditorLease {
            intent_file,
            acknowledged,
            _lock: lock,
        })
    }

    pub fn acknowledged(&self) -> bool {
        self.acknowledged
    }

    pub fn intent_file(&self) -> &Path {
        &self.intent_file
    }

    /// Bump the intent mtime so long sessions do not go stale.
    pub fn refresh(&self) -> io::Result<()> {
        write_intent(&self.intent_file)
    }
}

impl Drop for EditorLease {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.intent_file) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.intent_file.display(), "could not remove intent file: {err}");
            }
        }
    }
}

fn write_intent(path: &Path) -> io::Result<()> {
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    fs::write(path, format!("{} {}\n", std::process::id(), stamp))
}

fn announce(config_path: &Path, fallback_dir: &Path) -> Result<PathBuf, TrailError> {
    let primary = intent_path(config_path);
    match write_intent(&primary) {
        Ok(()) => Ok(primary),
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            let fallback = fallback_intent_path(config_path, fallback_dir, &platform::current_user());
            debug!(
                path = %fallback.display(),
                "config directory not writable; using fallback intent file"
            );
            write_intent(&fallback)?;
            Ok(fallback)
        }
        Err(err) => Err(err.into()),
    }
}

fn wait_for_idle(idle: &Path, wait: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        if idle.exists() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(poll.min(deadline - now));
    }
}
