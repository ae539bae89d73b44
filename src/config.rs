//! Application-level configuration loading: canvas geometry, cache and presence timings,
//! storage timeouts, and the administrative secret.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PIXEL_CANVAS_CONFIG_PATH";
/// Environment variable holding the shared secret guarding the reset endpoint.
const ADMIN_SECRET_ENV: &str = "ADMIN_SECRET_KEY";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Number of columns of the canvas.
    pub width: i32,
    /// Number of rows of the canvas.
    pub height: i32,
    /// Maximum age of a cached snapshot before the store is scanned again.
    pub snapshot_ttl: Duration,
    /// Upper bound applied to every storage operation on the realtime path.
    pub store_timeout: Duration,
    /// Period of the presence sweeper.
    pub presence_sweep_interval: Duration,
    /// Idle time after which a presence entry is evicted.
    pub presence_max_idle: Duration,
    /// Shared secret for the destructive reset; `None` disables the operation.
    pub admin_secret: Option<String>,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults, then apply
    /// environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        width = app_config.width,
                        height = app_config.height,
                        "loaded canvas configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        if let Some(secret) = env::var(ADMIN_SECRET_ENV)
            .ok()
            .filter(|value| !value.is_empty())
        {
            config.admin_secret = Some(secret);
        }
        if config.admin_secret.is_none() {
            warn!("no admin secret configured; pixel reset is disabled");
        }

        config
    }

    /// Whether `(x, y)` lies inside the configured canvas.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        (0..self.width).contains(&x) && (0..self.height).contains(&y)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    width: i32,
    height: i32,
    snapshot_ttl_ms: u64,
    store_timeout_ms: u64,
    presence_sweep_interval_secs: u64,
    presence_max_idle_secs: u64,
    admin_secret: Option<String>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 1000,
            snapshot_ttl_ms: 10_000,
            store_timeout_ms: 5_000,
            presence_sweep_interval_secs: 5 * 60,
            presence_max_idle_secs: 10 * 60,
            admin_secret: None,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            width: value.width,
            height: value.height,
            snapshot_ttl: Duration::from_millis(value.snapshot_ttl_ms),
            store_timeout: Duration::from_millis(value.store_timeout_ms),
            presence_sweep_interval: Duration::from_secs(value.presence_sweep_interval_secs),
            presence_max_idle: Duration::from_secs(value.presence_max_idle_secs),
            admin_secret: value.admin_secret.filter(|secret| !secret.is_empty()),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
