use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use color_eyre::{eyre::bail, Result};
use cryptoshield_core::StrategyKind;
use cryptoshield_drive::{default_media_dirs, StrategySettings};
use cryptoshield_session::{HeartbeatSettings, SessionSettings, DEFAULT_HEARTBEAT_URL};
use dirs::config_dir;
use serde::{Deserialize, Serialize};

/// User-level configuration loaded from `~/.config/cryptoshield/config.toml`
/// (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub drives: DrivesConfig,
    pub heartbeat: HeartbeatConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Presence check period.
    pub interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { interval_ms: 2000 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DrivesConfig {
    /// Bound on each detection strategy.
    pub strategy_timeout_ms: u64,
    /// Strategies in priority order.
    pub strategies: Vec<StrategyKind>,
    /// Roots always treated as candidates when they exist.
    pub extra_roots: Vec<PathBuf>,
    /// Media parents to scan; platform defaults when unset.
    pub media_dirs: Option<Vec<PathBuf>>,
}

impl Default for DrivesConfig {
    fn default() -> Self {
        Self {
            strategy_timeout_ms: 1000,
            strategies: StrategySettings::default().order,
            extra_roots: Vec::new(),
            media_dirs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub url: String,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: DEFAULT_HEARTBEAT_URL.to_string(),
            interval_ms: 2000,
            timeout_ms: 800,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Keep the drive passphrase in the OS keyring.
    pub remember_passphrase: bool,
}

/// Smallest accepted polling period for the monitor and the heartbeat.
pub const MIN_INTERVAL_MS: u64 = 100;

impl Config {
    /// Reject timer values that would spin or disable a loop.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.interval_ms < MIN_INTERVAL_MS {
            bail!(
                "[monitor] interval_ms must be at least {MIN_INTERVAL_MS}, got {}",
                self.monitor.interval_ms
            );
        }
        if self.drives.strategy_timeout_ms == 0 {
            bail!("[drives] strategy_timeout_ms must be greater than 0");
        }
        if self.heartbeat.enabled {
            if self.heartbeat.interval_ms < MIN_INTERVAL_MS {
                bail!(
                    "[heartbeat] interval_ms must be at least {MIN_INTERVAL_MS}, got {}",
                    self.heartbeat.interval_ms
                );
            }
            if self.heartbeat.timeout_ms == 0 {
                bail!("[heartbeat] timeout_ms must be greater than 0");
            }
        }
        Ok(())
    }

    pub fn strategy_settings(&self) -> StrategySettings {
        StrategySettings {
            order: self.drives.strategies.clone(),
            command_timeout: Duration::from_millis(self.drives.strategy_timeout_ms),
            extra_roots: self.drives.extra_roots.clone(),
            media_dirs: self
                .drives
                .media_dirs
                .clone()
                .unwrap_or_else(default_media_dirs),
        }
    }

    /// Session timers. The heartbeat only runs for long-lived sessions.
    pub fn session_settings(&self, long_lived: bool) -> SessionSettings {
        let heartbeat = (long_lived && self.heartbeat.enabled).then(|| HeartbeatSettings {
            url: self.heartbeat.url.clone(),
            interval: Duration::from_millis(self.heartbeat.interval_ms),
            timeout: Duration::from_millis(self.heartbeat.timeout_ms),
        });
        SessionSettings {
            monitor_interval: Duration::from_millis(self.monitor.interval_ms),
            heartbeat,
        }
    }
}

/// Load config from `path`, or the default location when `None`.
pub fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_from_path(path),
        None => load_from_path(default_path()?),
    }
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    cfg.validate()
        .map_err(|err| err.wrap_err(format!("invalid config {}", path.display())))?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("cryptoshield").join("config.toml"))
}

/// Write `config` to `path` unless a file is already there.
pub fn write_default_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
