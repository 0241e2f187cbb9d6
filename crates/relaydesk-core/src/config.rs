//! Configuration file handling (`~/.relaydesk/config.toml`).
//!
//! ```toml
//! [gateway]
//! http_listen = "127.0.0.1:7420"
//! ws_listen = "127.0.0.1:7421"
//! watchdog_interval_secs = 30
//!
//! [locks]
//! default_timeout_ms = 120000
//! max_hold_secs = 900            # force-release holders stuck longer than this
//!
//! [ask_user]
//! http_timeout_secs = 600
//! max_pending_secs = 3600
//!
//! [threads]
//! db_path = "/var/lib/relaydesk/threads.db"
//! compaction_threshold = 20
//! keep_recent = 5
//! ```

use crate::threads::CompactionPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_settings_dir() -> PathBuf {
    let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home_dir.join(".relaydesk")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// State directory; the thread database lives here unless overridden
    #[serde(default = "default_settings_dir")]
    pub settings_dir: PathBuf,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub ask_user: AskUserConfig,
    #[serde(default)]
    pub threads: ThreadsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address for the HTTP bridge
    #[serde(default = "GatewayConfig::default_http_listen")]
    pub http_listen: String,
    /// Address for observer WebSocket connections
    #[serde(default = "GatewayConfig::default_ws_listen")]
    pub ws_listen: String,
    /// How often the watchdog sweeps stuck locks and stale questions
    #[serde(default = "GatewayConfig::default_watchdog_interval")]
    pub watchdog_interval_secs: u64,
}

impl GatewayConfig {
    fn default_http_listen() -> String {
        "127.0.0.1:7420".to_string()
    }

    fn default_ws_listen() -> String {
        "127.0.0.1:7421".to_string()
    }

    fn default_watchdog_interval() -> u64 {
        30
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_listen: Self::default_http_listen(),
            ws_listen: Self::default_ws_listen(),
            watchdog_interval_secs: Self::default_watchdog_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockConfig {
    /// Wait limit for lock acquisition; unset waits forever
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
    /// Holders older than this are force-released by the watchdog
    #[serde(default)]
    pub max_hold_secs: Option<u64>,
}

impl LockConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    pub fn max_hold(&self) -> Option<Duration> {
        self.max_hold_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AskUserConfig {
    /// How long `POST /ask-user` waits before answering 504
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    /// Questions older than this are abandoned by the watchdog
    #[serde(default)]
    pub max_pending_secs: Option<u64>,
}

impl AskUserConfig {
    pub fn http_timeout(&self) -> Option<Duration> {
        self.http_timeout_secs.map(Duration::from_secs)
    }

    pub fn max_pending(&self) -> Option<Duration> {
        self.max_pending_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadsConfig {
    /// SQLite file; defaults to `<settings_dir>/threads.db`
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default = "ThreadsConfig::default_threshold")]
    pub compaction_threshold: usize,
    #[serde(default = "ThreadsConfig::default_keep_recent")]
    pub keep_recent: usize,
}

impl ThreadsConfig {
    fn default_threshold() -> usize {
        CompactionPolicy::default().threshold
    }

    fn default_keep_recent() -> usize {
        CompactionPolicy::default().keep_recent
    }
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            compaction_threshold: Self::default_threshold(),
            keep_recent: Self::default_keep_recent(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings_dir: default_settings_dir(),
            gateway: GatewayConfig::default(),
            locks: LockConfig::default(),
            ask_user: AskUserConfig::default(),
            threads: ThreadsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (or the default location). A missing
    /// file yields the defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = path.unwrap_or_else(|| default_settings_dir().join("config.toml"));

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config: {}", config_path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config: {}", config_path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to `path`, or `<settings_dir>/config.toml`.
    pub fn save(&self, path: Option<PathBuf>) -> Result<()> {
        let config_path = path.unwrap_or_else(|| self.settings_dir.join("config.toml"));

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        Ok(())
    }

    pub fn thread_db_path(&self) -> PathBuf {
        self.threads
            .db_path
            .clone()
            .unwrap_or_else(|| self.settings_dir.join("threads.db"))
    }

    pub fn compaction_policy(&self) -> CompactionPolicy {
        CompactionPolicy {
            threshold: self.threads.compaction_threshold,
            keep_recent: self.threads.keep_recent,
        }
    }

    /// Point the state directory somewhere else.
    pub fn with_settings_dir(mut self, dir: &Path) -> Self {
        self.settings_dir = dir.to_path_buf();
        self
    }
}
