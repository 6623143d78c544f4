//! Service side of the editor handshake.
//!
//! An editor announces intent by touching `<config>.editor_wants_lock` (or a
//! per-user fallback file in the temp directory when the config directory is
//! read-only). While a fresh intent file exists the service is Paused and
//! keeps `<config>.service_idle` (content: PID) on disk as acknowledgement.
//! Intent files older than the TTL belong to crashed editors and are removed,
//! as are idle files whose PID no longer runs.
//!
//! Short-lived collaborators (`status`, `set`, ...) use a gate-only
//! coordinator: it honours intent but never touches the idle file, which
//! belongs to the long-running service.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use super::platform::{self, UserIdentity};
use crate::domain::error::TrailError;

pub const INTENT_SUFFIX: &str = ".editor_wants_lock";
pub const IDLE_SUFFIX: &str = ".service_idle";
pub const FALLBACK_PREFIX: &str = "trailtrigger-intent__";
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationState {
    Active,
    Paused,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

pub fn intent_path(config_path: &Path) -> PathBuf {
    with_suffix(config_path, INTENT_SUFFIX)
}

pub fn idle_path(config_path: &Path) -> PathBuf {
    with_suffix(config_path, IDLE_SUFFIX)
}

/// The config path as it appears in fallback file names: absolute, URL-encoded.
pub fn encoded_config_path(config_path: &Path) -> String {
    let absolute = fs::canonicalize(config_path)
        .or_else(|_| std::path::absolute(config_path))
        .unwrap_or_else(|_| config_path.to_path_buf());
    urlencoding::encode(&absolute.to_string_lossy()).into_owned()
}

pub fn fallback_intent_path(config_path: &Path, fallback_dir: &Path, user: &UserIdentity) -> PathBuf {
    fallback_dir.join(format!(
        "{FALLBACK_PREFIX}{}__{}__{}",
        user.uid,
        urlencoding::encode(&user.name),
        encoded_config_path(config_path)
    ))
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub ttl: Duration,
    pub fallback_dir: PathBuf,
    /// Also pause while another process holds an exclusive `flock` on the config.
    pub honor_flock: bool,
    /// Own `.service_idle`: write it while paused, remove it on resume and drop.
    pub acknowledge: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        CoordinatorOptions {
            ttl: DEFAULT_TTL,
            fallback_dir: std::env::temp_dir(),
            honor_flock: true,
            acknowledge: true,
        }
    }
}

#[derive(Debug)]
pub struct Coordinator {
    config_path: PathBuf,
    intent_path: PathBuf,
    idle_path: PathBuf,
    fallback_suffix: String,
    options: CoordinatorOptions,
    state: CoordinationState,
}

impl Coordinator {
    /// Coordinator for a one-shot command that must not touch the service's idle file.
    pub fn gate_only(config_path: &Path, mut options: CoordinatorOptions) -> Self {
        options.acknowledge = false;
        Coordinator::new(config_path, options)
    }

    pub fn new(config_path: &Path, options: CoordinatorOptions) -> Self {
        Coordinator {
            config_path: config_path.to_path_buf(),
            intent_path: intent_path(config_path),
            idle_path: idle_path(config_path),
            fallback_suffix: format!("__{}", encoded_config_path(config_path)),
            options,
            state: CoordinationState::Active,
        }
    }

    pub fn state(&self) -> CoordinationState {
        self.state
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Look for editor intent, evict stale signals and move between states.
    pub fn check(&mut self) -> Result<CoordinationState, TrailError> {
        let mut wanted = self.fresh_intent_present();
        if !wanted && self.options.honor_flock {
            match platform::is_exclusively_locked(&self.config_path) {
                Ok(true) => {
                    debug!(path = %self.config_path.display(), "config is flock-held; treating as editor intent");
                    wanted = true;
                }
                Ok(false) => {}
                Err(err) => debug!("flock check failed: {err}"),
            }
        }

        let acknowledge = self.options.acknowledge;
        match (self.state, wanted) {
            (CoordinationState::Active, true) => {
                if acknowledge {
                    self.write_idle()?;
                }
                self.state = CoordinationState::Paused;
                info!(config = %self.config_path.display(), "editor wants the configuration; pausing");
            }
            (CoordinationState::Paused, true) => {
                if acknowledge && !self.idle_path.exists() {
                    self.write_idle()?;
                }
            }
            (CoordinationState::Paused, false) => {
                if acknowledge {
                    remove_if_exists(&self.idle_path)?;
                }
                self.state = CoordinationState::Active;
                info!(config = %self.config_path.display(), "editor finished; resuming");
            }
            (CoordinationState::Active, false) => {
                if acknowledge {
                    self.clear_stale_idle();
                }
            }
        }
        Ok(self.state)
    }

    fn write_idle(&self) -> Result<(), TrailError> {
        fs::write(&self.idle_path, std::process::id().to_string())?;
        Ok(())
    }

    /// An idle file left by a killed service would tell editors it is safe to
    /// write. Keep it only while the PID inside is still running.
    fn clear_stale_idle(&self) {
        let content = match fs::read_to_string(&self.idle_path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return,
            Err(err) => {
                debug!(path = %self.idle_path.display(), "idle file unreadable: {err}");
                return;
            }
        };
        if let Ok(pid) = content.trim().parse::<i32>() {
            if platform::process_alive(pid) {
                return;
            }
        }
        warn!(
            path = %self.idle_path.display(),
            owner = content.trim(),
            "removing idle file left by a service that is no longer running"
        );
        if let Err(err) = remove_if_exists(&self.idle_path) {
            warn!(path = %self.idle_path.display(), "could not remove stale idle file: {err}");
        }
    }

    fn fresh_intent_present(&self) -> bool {
        let mut candidates = vec![self.intent_path.clone()];
        candidates.extend(self.fallback_candidates());

        let mut present = false;
        for path in candidates {
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO);
            if age > self.options.ttl {
                warn!(
                    path = %path.display(),
                    age_secs = age.as_secs(),
                    "removing stale editor intent file"
                );
                if let Err(err) = remove_if_exists(&path) {
                    warn!(path = %path.display(), "could not remove stale intent file: {err}");
                }
            } else {
                present = true;
            }
        }
        present
    }

    fn fallback_candidates(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.options.fallback_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.starts_with(FALLBACK_PREFIX) && name.ends_with(&self.fallback_suffix)
            })
            .map(|e| e.path())
            .collect()
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if self.options.acknowledge && self.state == CoordinationState::Paused {
            let _ = fs::remove_file(&self.idle_path);
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
