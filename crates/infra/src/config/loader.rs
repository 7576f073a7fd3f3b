//! Configuration loader
//!
//! Loads [`WardenConfig`] from a file, environment variables, or both.
//!
//! ## Loading Strategy
//! 1. Probe the standard locations for a config file
//! 2. Fall back to defaults when none exists
//! 3. Apply `STREAMWARDEN_*` environment overrides
//! 4. Validate the result
//!
//! ## Environment Variables
//! - `STREAMWARDEN_MAX_RETRIES`, `STREAMWARDEN_INITIAL_DELAY_MS`,
//!   `STREAMWARDEN_MAX_DELAY_MS`, `STREAMWARDEN_JITTER_FACTOR`: operation retry
//! - `STREAMWARDEN_CIRCUIT_FAILURE_THRESHOLD`,
//!   `STREAMWARDEN_CIRCUIT_RESET_TIMEOUT_MS`: circuit breakers
//! - `STREAMWARDEN_COLLECTIONS` (comma separated), `STREAMWARDEN_STREAM_MAX_RETRIES`:
//!   change streams
//! - `STREAMWARDEN_HEALTH_INTERVAL_MS`, `STREAMWARDEN_PROBE_TIMEOUT_MS`,
//!   `STREAMWARDEN_LATENCY_THRESHOLD_MS`, `STREAMWARDEN_CRITICAL_LATENCY_MS`,
//!   `STREAMWARDEN_MAX_ERROR_RATE`, `STREAMWARDEN_UNHEALTHY_THRESHOLD`,
//!   `STREAMWARDEN_ALERT_THRESHOLD`: health monitor
//! - `STREAMWARDEN_MAX_RECOVERY_ATTEMPTS`, `STREAMWARDEN_RECOVERY_BACKOFF_MS`,
//!   `STREAMWARDEN_OPERATION_TIMEOUT_MS`, `STREAMWARDEN_CACHE_CAPACITY`,
//!   `STREAMWARDEN_CACHE_TTL_SECS`, `STREAMWARDEN_WRITE_QUEUE_CAPACITY`: recovery
//! - `STREAMWARDEN_PUBLISH_DELETES` (true/false): fan-out
//! - `STREAMWARDEN_LOG_FILTER`, `STREAMWARDEN_LOG_FORMAT` (`pretty`/`json`): logging
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./streamwarden.toml`, `./streamwarden.json`, `./config.toml`,
//!    `./config.json` (current working directory)
//! 2. The same names in the parent and grandparent directories
//! 3. The same names next to the executable

use std::path::{Path, PathBuf};
use std::str::FromStr;

use streamwarden_domain::{LogFormat, Result, WardenConfig, WardenError};
use tracing::{debug, info};

const ENV_PREFIX: &str = "STREAMWARDEN_";
const FILE_NAMES: [&str; 4] =
    ["streamwarden.toml", "streamwarden.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `WardenError::Config` if a probed file is unreadable or invalid,
/// an override does not parse, or the result fails validation.
pub fn load() -> Result<WardenConfig> {
    let config = match probe_config_paths() {
        Some(path) => read_config(&path)?,
        None => {
            debug!("No config file found, using defaults");
            WardenConfig::default()
        }
    };

    let config = apply_env_overrides(config)?;
    config.validate()?;
    Ok(config)
}

/// Defaults plus environment overrides
///
/// # Errors
/// Returns `WardenError::Config` for unparsable or invalid values.
pub fn load_from_env() -> Result<WardenConfig> {
    let config = apply_env_overrides(WardenConfig::default())?;
    config.validate()?;
    info!("Configuration loaded from environment variables");
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. Format is detected by
/// extension (`.json` or `.toml`). Environment overrides are not applied.
///
/// # Errors
/// Returns `WardenError::Config` if:
/// - The file does not exist (when path is specified)
/// - No config file is found (when path is `None`)
/// - The format is unsupported or the contents are invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<WardenConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(WardenError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            WardenError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    let config = read_config(&config_path)?;
    config.validate()?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<WardenConfig> {
    info!(path = %path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| WardenError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
///
/// # Errors
/// Returns `WardenError::Config` if format is unsupported or parsing fails.
pub fn parse_config(contents: &str, path: &Path) -> Result<WardenConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| WardenError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| WardenError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(WardenError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations for a configuration file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
        }
    }

    roots
        .iter()
        .flat_map(|root| FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

/// Apply `STREAMWARDEN_*` overrides from the process environment
///
/// # Errors
/// Returns `WardenError::Config` naming the variable that does not parse.
pub fn apply_env_overrides(config: WardenConfig) -> Result<WardenConfig> {
    apply_env_overrides_from(config, |key| std::env::var(key).ok())
}

/// Apply overrides read through `lookup`
///
/// `lookup` receives the full variable name, e.g. `STREAMWARDEN_MAX_RETRIES`.
///
/// # Errors
/// Returns `WardenError::Config` naming the variable that does not parse.
pub fn apply_env_overrides_from<F>(mut config: WardenConfig, lookup: F) -> Result<WardenConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvSource { lookup };

    env.parse("MAX_RETRIES", &mut config.retry.max_retries)?;
    env.parse("INITIAL_DELAY_MS", &mut config.retry.initial_delay_ms)?;
    env.parse("MAX_DELAY_MS", &mut config.retry.max_delay_ms)?;
    env.parse("JITTER_FACTOR", &mut config.retry.jitter_factor)?;

    env.parse("CIRCUIT_FAILURE_THRESHOLD", &mut config.circuit.failure_threshold)?;
    env.parse("CIRCUIT_RESET_TIMEOUT_MS", &mut config.circuit.reset_timeout_ms)?;

    if let Some(list) = env.get("COLLECTIONS") {
        config.stream.collections = list
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
    }
    env.parse("STREAM_MAX_RETRIES", &mut config.stream.max_retries)?;

    env.parse("HEALTH_INTERVAL_MS", &mut config.health.interval_ms)?;
    env.parse("PROBE_TIMEOUT_MS", &mut config.health.probe_timeout_ms)?;
    env.parse("LATENCY_THRESHOLD_MS", &mut config.health.latency_threshold_ms)?;
    env.parse("CRITICAL_LATENCY_MS", &mut config.health.critical_latency_ms)?;
    env.parse("MAX_ERROR_RATE", &mut config.health.max_error_rate)?;
    env.parse("UNHEALTHY_THRESHOLD", &mut config.health.unhealthy_threshold)?;
    env.parse("ALERT_THRESHOLD", &mut config.health.alert_threshold)?;

    env.parse("MAX_RECOVERY_ATTEMPTS", &mut config.recovery.max_attempts)?;
    env.parse("RECOVERY_BACKOFF_MS", &mut config.recovery.backoff_ms)?;
    env.parse("OPERATION_TIMEOUT_MS", &mut config.recovery.operation_timeout_ms)?;
    env.parse("CACHE_CAPACITY", &mut config.recovery.cache_capacity)?;
    env.parse("CACHE_TTL_SECS", &mut config.recovery.cache_ttl_secs)?;
    env.parse("WRITE_QUEUE_CAPACITY", &mut config.recovery.write_queue_capacity)?;

    if let Some(value) = env.get("PUBLISH_DELETES") {
        config.fanout.publish_deletes = parse_bool(&value).ok_or_else(|| {
            WardenError::Config(format!(
                "Invalid {ENV_PREFIX}PUBLISH_DELETES '{value}' (expected true or false)"
            ))
        })?;
    }

    if let Some(filter) = env.get("LOG_FILTER") {
        config.logging.filter = filter;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.logging.format = match format.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" | "text" => LogFormat::Pretty,
            other => {
                return Err(WardenError::Config(format!(
                    "Invalid {ENV_PREFIX}LOG_FORMAT: '{other}' (expected pretty or json)"
                )))
            }
        };
    }

    Ok(config)
}

struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, suffix: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{suffix}"))
    }

    /// Overwrite `target` when the variable is set
    fn parse<T>(&self, suffix: &str, target: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = self.get(suffix) {
            *target = raw.trim().parse().map_err(|e| {
                WardenError::Config(format!("Invalid {ENV_PREFIX}{suffix} '{raw}': {e}"))
            })?;
        }
        Ok(())
    }
}

/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
