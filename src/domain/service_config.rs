//! Service settings, validated before the service starts.
//!
//! Every path in the INI file may be relative; relative paths resolve against
//! the directory holding the INI file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::error::TrailError;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_POLL_INTERVAL_SECS: i64 = 60;
pub const DEFAULT_LOCK_TTL_SECS: i64 = 300;
pub const DEFAULT_WRITE_ATTEMPTS: i64 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: i64 = 100;
pub const DEFAULT_MIN_OFFSET: Decimal = dec!(0.1);

#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeSettings {
    Paper {
        prices_path: PathBuf,
        minimums_path: PathBuf,
        orders_path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub config_path: PathBuf,
    pub state_path: PathBuf,
    pub order_log_path: PathBuf,
    pub poll_interval: Duration,
    pub min_trailing_offset_percent: Decimal,
    pub lock_ttl: Duration,
    pub write_attempts: u32,
    pub retry_backoff_ms: u64,
    pub fallback_dir: PathBuf,
    pub exchange: ExchangeSettings,
}

fn missing(section: &str, key: &str) -> TrailError {
    TrailError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TrailError {
    TrailError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn resolve(base_dir: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn required_path(
    config: &dyn ConfigPort,
    base_dir: &Path,
    section: &str,
    key: &str,
) -> Result<PathBuf, TrailError> {
    match config.get_string(section, key) {
        Some(value) if !value.trim().is_empty() => Ok(resolve(base_dir, value.trim())),
        _ => Err(missing(section, key)),
    }
}

fn positive(config: &dyn ConfigPort, section: &str, key: &str, default: i64) -> Result<u64, TrailError> {
    let value = config.get_int(section, key, default);
    if value <= 0 {
        return Err(invalid(section, key, format!("{key} must be positive")));
    }
    Ok(value as u64)
}

fn validate_min_offset(config: &dyn ConfigPort) -> Result<Decimal, TrailError> {
    let key = "min_trailing_offset_percent";
    let value = match config.get_decimal("service", key) {
        None => DEFAULT_MIN_OFFSET,
        Some(Ok(value)) => value,
        Some(Err(raw)) => return Err(invalid("service", key, format!("'{raw}' is not a number"))),
    };
    if value <= Decimal::ZERO || value >= dec!(100) {
        return Err(invalid("service", key, "must be between 0 and 100"));
    }
    Ok(value)
}

fn validate_exchange(config: &dyn ConfigPort, base_dir: &Path) -> Result<ExchangeSettings, TrailError> {
    let kind = config
        .get_string("exchange", "kind")
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| missing("exchange", "kind"))?;
    match kind.as_str() {
        "paper" => Ok(ExchangeSettings::Paper {
            prices_path: required_path(config, base_dir, "paper", "prices_path")?,
            minimums_path: required_path(config, base_dir, "paper", "minimums_path")?,
            orders_path: required_path(config, base_dir, "paper", "orders_path")?,
        }),
        other => Err(invalid(
            "exchange",
            "kind",
            format!("unsupported exchange '{other}'"),
        )),
    }
}

/// Read and validate every service setting.
pub fn build_service_config(config: &dyn ConfigPort, base_dir: &Path) -> Result<ServiceConfig, TrailError> {
    let config_path = required_path(config, base_dir, "files", "config_path")?;
    let state_path = match config.get_string("files", "state_path") {
        Some(value) if !value.trim().is_empty() => resolve(base_dir, value.trim()),
        _ => sibling(&config_path, "_state"),
    };
    let order_log_path = match config.get_string("files", "order_log_path") {
        Some(value) if !value.trim().is_empty() => resolve(base_dir, value.trim()),
        _ => sibling(&config_path, "_log"),
    };
    if state_path == config_path || order_log_path == config_path || order_log_path == state_path {
        return Err(invalid("files", "state_path", "config, state and log files must differ"));
    }

    let attempts = positive(config, "service", "write_attempts", DEFAULT_WRITE_ATTEMPTS)?;
    let fallback_dir = match config.get_string("service", "fallback_dir") {
        Some(value) if !value.trim().is_empty() => resolve(base_dir, value.trim()),
        _ => std::env::temp_dir(),
    };

    Ok(ServiceConfig {
        poll_interval: Duration::from_secs(positive(
            config,
            "service",
            "poll_interval_secs",
            DEFAULT_POLL_INTERVAL_SECS,
        )?),
        min_trailing_offset_percent: validate_min_offset(config)?,
        lock_ttl: Duration::from_secs(positive(config, "service", "lock_ttl_secs", DEFAULT_LOCK_TTL_SECS)?),
        write_attempts: u32::try_from(attempts)
            .map_err(|_| invalid("service", "write_attempts", "too large"))?,
        retry_backoff_ms: positive(config, "service", "retry_backoff_ms", DEFAULT_RETRY_BACKOFF_MS)?,
        fallback_dir,
        exchange: validate_exchange(config, base_dir)?,
        config_path,
        state_path,
        order_log_path,
    })
}

/// `orders.csv` -> `orders<tag>.csv`
fn sibling(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{tag}.{}", ext.to_string_lossy()),
        None => format!("{stem}{tag}"),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapConfig(HashMap<(String, String), String>);

    impl MapConfig {
        fn new(entries: &[(&str, &str, &str)]) -> Self {
            MapConfig(
                entries
                    .iter()
                    .map(|(s, k, v)| ((s.to_string(), k.to_string()), v.to_string()))
                    .collect(),
            )
        }
    }

    impl ConfigPort for MapConfig {
        fn get_string(&self, section: &str, key: &str) -> Option<String> {
            self.0.get(&(section.to_string(), key.to_string())).cloned()
        }
        fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
            self.get_string(section, key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        fn get_decimal(&self, section: &str, key: &str) -> Option<Result<Decimal, String>> {
            self.get_string(section, key)
                .map(|v| v.parse::<Decimal>().map_err(|_| v))
        }
        fn get_bool(&self, _section: &str, _key: &str, default: bool) -> bool {
            default
        }
    }

    fn minimal() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("files", "config_path", "orders.csv"),
            ("exchange", "kind", "paper"),
            ("paper", "prices_path", "prices.csv"),
            ("paper", "minimums_path", "/srv/minimums.csv"),
            ("paper", "orders_path", "paper_orders.csv"),
        ]
    }

    #[test]
    fn defaults_and_relative_paths() {
        let config = build_service_config(&MapConfig::new(&minimal()), Path::new("/etc/tt")).unwrap();
        assert_eq!(config.config_path, PathBuf::from("/etc/tt/orders.csv"));
        assert_eq!(config.state_path, PathBuf::from("/etc/tt/orders_state.csv"));
        assert_eq!(config.order_log_path, PathBuf::from("/etc/tt/orders_log.csv"));
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.lock_ttl, Duration::from_secs(300));
        assert_eq!(config.min_trailing_offset_percent, dec!(0.1));
        assert_eq!(config.write_attempts, 3);
        assert_eq!(
            config.exchange,
            ExchangeSettings::Paper {
                prices_path: PathBuf::from("/etc/tt/prices.csv"),
                minimums_path: PathBuf::from("/srv/minimums.csv"),
                orders_path: PathBuf::from("/etc/tt/paper_orders.csv"),
            }
        );
    }

    #[test]
    fn explicit_service_values() {
        let mut entries = minimal();
        entries.push(("service", "poll_interval_secs", "15"));
        entries.push(("service", "min_trailing_offset_percent", "0.5"));
        entries.push(("files", "state_path", "state/s.csv"));
        let config = build_service_config(&MapConfig::new(&entries), Path::new("/d")).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.min_trailing_offset_percent, dec!(0.5));
        assert_eq!(config.state_path, PathBuf::from("/d/state/s.csv"));
    }

    #[test]
    fn missing_config_path() {
        let entries: Vec<_> = minimal().into_iter().skip(1).collect();
        let err = build_service_config(&MapConfig::new(&entries), Path::new("/d")).unwrap_err();
        assert!(matches!(err, TrailError::ConfigMissing { ref key, .. } if key == "config_path"));
    }

    #[test]
    fn missing_exchange_settings_are_fatal() {
        let entries: Vec<_> = minimal().into_iter().take(1).collect();
        let err = build_service_config(&MapConfig::new(&entries), Path::new("/d")).unwrap_err();
        assert!(matches!(err, TrailError::ConfigMissing { ref section, .. } if section == "exchange"));
    }

    #[test]
    fn unsupported_exchange() {
        let mut entries = minimal();
        entries[1] = ("exchange", "kind", "kraken");
        let err = build_service_config(&MapConfig::new(&entries), Path::new("/d")).unwrap_err();
        assert!(err.to_string().contains("unsupported exchange 'kraken'"));
    }

    #[test]
    fn rejects_bad_numbers() {
        let mut entries = minimal();
        entries.push(("service", "poll_interval_secs", "0"));
        assert!(build_service_config(&MapConfig::new(&entries), Path::new("/d")).is_err());

        let mut entries = minimal();
        entries.push(("service", "min_trailing_offset_percent", "abc"));
        let err = build_service_config(&MapConfig::new(&entries), Path::new("/d")).unwrap_err();
        assert!(matches!(err, TrailError::ConfigInvalid { .. }));
    }

    #[test]
    fn state_must_differ_from_config() {
        let mut entries = minimal();
        entries.push(("files", "state_path", "orders.csv"));
        assert!(build_service_config(&MapConfig::new(&entries), Path::new("/d")).is_err());
    }
}
