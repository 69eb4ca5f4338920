//! Bridge configuration file.
//!
//! Lives at `<config dir>/caseta-bridge/config.json`:
//!
//! ```json
//! {
//!   "hubs": [{ "identifier": "0123ABCD", "address": "192.168.1.40", "name": "Smart Bridge" }],
//!   "supervisor": { "connectTimeoutSecs": 15, "retry": { "initialDelaySecs": 5 } }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{HubCredentials, HubIdentity};

/// Shortest retry delay worth configuring against a real hub.
pub const RECOMMENDED_MIN_DELAY_SECS: u64 = 5;

/// Errors loading or saving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no config directory available")]
    NoConfigDir,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    pub hubs: Vec<HubEntry>,
    pub supervisor: SupervisorConfig,
}

/// A paired hub as written by the setup flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubEntry {
    pub identifier: String,
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl HubEntry {
    pub fn identity(&self, credentials: Option<HubCredentials>) -> HubIdentity {
        HubIdentity {
            identifier: self.identifier.clone(),
            address: self.address.clone(),
            name: if self.name.is_empty() {
                self.identifier.clone()
            } else {
                self.name.clone()
            },
            model: self.model.clone(),
            credentials,
        }
    }
}

/// Per-hub supervisor tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SupervisorConfig {
    pub connect_timeout_secs: u64,
    pub watchdog_interval_secs: u64,
    pub retry: RetryConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            watchdog_interval_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }
}

/// Reconnect backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    /// First delay, and the floor for every later one.
    pub initial_delay_secs: u64,
    /// Backoff cap.
    pub max_delay_secs: u64,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Upward-only jitter as a fraction of the delay (0.1 = up to +10%).
    pub jitter: f64,
    /// Give up after this many retries. `None` retries forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: RECOMMENDED_MIN_DELAY_SECS,
            max_delay_secs: 60,
            backoff_factor: 2.0,
            jitter: 0.1,
            max_attempts: None,
        }
    }
}

impl RetryConfig {
    /// Delay before retry `attempt` (1-based).
    ///
    /// Exponential from `initial_delay_secs`, capped at `max_delay_secs`,
    /// never below `initial_delay_secs` nor below one second.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay_secs.max(1) as f64;
        let max = (self.max_delay_secs as f64).max(initial);
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let base = (initial * self.backoff_factor.max(1.0).powi(exp)).min(max);

        let fraction = f64::from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos(),
        ) / 1_000_000_000.0; // [0.0, 1.0)
        let jittered = base * (1.0 + self.jitter.clamp(0.0, 1.0) * fraction);

        Duration::from_secs_f64(jittered.min(max).max(initial))
    }
}

impl BridgeConfig {
    /// Loads from the default path. A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = default_config_path().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: BridgeConfig = serde_json::from_str(&data)?;
        if config.supervisor.retry.initial_delay_secs < RECOMMENDED_MIN_DELAY_SECS {
            warn!(
                initial_delay_secs = config.supervisor.retry.initial_delay_secs,
                "retry delay below {RECOMMENDED_MIN_DELAY_SECS}s may flood the hub"
            );
        }
        debug!(path = %path.display(), hubs = config.hubs.len(), "loaded config");
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = default_config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        set_permissions_0600(path);
        Ok(())
    }

    pub fn hub(&self, identifier: &str) -> Option<&HubEntry> {
        self.hubs.iter().find(|h| h.identifier == identifier)
    }
}

/// Returns `<config dir>/caseta-bridge/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("caseta-bridge").join("config.json"))
}

/// Returns the platform-specific config directory.
pub(crate) fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}

/// Restricts a file to owner read/write (no-op off unix).
pub(crate) fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            warn!(path = %path.display(), error = %e, "failed to restrict permissions");
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
