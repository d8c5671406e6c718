//! # Station Configuration
//!
//! One explicit configuration struct, loaded once at startup and shared
//! through a [`ConfigStore`].
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     PRINTHUB_PORT=8089                                                 │
//! │     PRINTHUB_WS_URL=wss://cloud.example.com/station                    │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/printhub/station.toml (Linux)                            │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Hot Reload
//! `update` and `reload` build a complete new struct, validate it, and swap
//! it under the lock. Readers always see either the old or the new config.
//!
//! ## Configuration File Format
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8089
//!
//! [printing]
//! default_printer = "front"
//! max_retries = 3
//! retry_delay_ms = 5000
//! backoff = "flat"
//!
//! [routing]
//! default_category = "receipts"
//!
//! [websocket]
//! url = "wss://cloud.example.com/station"
//! station_id = "store-17"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use printhub_core::retry::{BackoffKind, RetryPolicy};
use printhub_core::validation::{validate_api_key, validate_connection, validate_paper_width};

// =============================================================================
// Config Error
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to write config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No config path available")]
    NoPath,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Server
// =============================================================================

/// HTTP listener and storage location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8089
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: default_host(),
            port: default_port(),
            database_path: None,
        }
    }
}

// =============================================================================
// Security
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Provisioned key. While unset, `default_api_key` is accepted.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_api_key")]
    pub default_api_key: String,
}

fn default_api_key() -> String {
    "printhub-default-key".to_string()
}

impl Default for SecuritySettings {
    fn default() -> Self {
        SecuritySettings {
            api_key: None,
            default_api_key: default_api_key(),
        }
    }
}

// =============================================================================
// Printing
// =============================================================================

/// Dispatch, retry and printer polling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintingSettings {
    /// Printer used by the `--dry-run` bootstrap and shown as default.
    #[serde(default)]
    pub default_printer: Option<String>,

    /// Spool directory for rendered documents.
    #[serde(default = "default_temp_directory")]
    pub temp_directory: PathBuf,

    /// Paper width in millimetres when a job does not specify one.
    #[serde(default = "default_receipt_width")]
    pub receipt_width: u32,

    #[serde(default = "default_true")]
    pub auto_retry: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub backoff: BackoffKind,

    /// Cap for exponential backoff.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Failures on one printer before a job moves to another member.
    #[serde(default = "default_failover_after")]
    pub failover_after: u32,

    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Bluetooth receipt printer registered at startup, e.g.
    /// `serial:///dev/rfcomm0`.
    #[serde(default)]
    pub bluetooth_printer: Option<String>,

    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,

    #[serde(default = "default_dispatch_poll_interval_ms")]
    pub dispatch_poll_interval_ms: u64,

    /// Jobs dispatched concurrently.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_true() -> bool {
    true
}

fn default_temp_directory() -> PathBuf {
    std::env::temp_dir().join("printhub")
}

fn default_receipt_width() -> u32 {
    80
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_failover_after() -> u32 {
    1
}

fn default_attempt_timeout_ms() -> u64 {
    30_000
}

fn default_status_poll_interval_ms() -> u64 {
    10_000
}

fn default_dispatch_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_in_flight() -> usize {
    8
}

impl Default for PrintingSettings {
    fn default() -> Self {
        PrintingSettings {
            default_printer: None,
            temp_directory: default_temp_directory(),
            receipt_width: default_receipt_width(),
            auto_retry: true,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff: BackoffKind::default(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            failover_after: default_failover_after(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            bluetooth_printer: None,
            status_poll_interval_ms: default_status_poll_interval_ms(),
            dispatch_poll_interval_ms: default_dispatch_poll_interval_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl PrintingSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            auto_retry: self.auto_retry,
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            backoff: self.backoff,
            max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
            failover_after: self.failover_after,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

// =============================================================================
// Routing
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingSettings {
    /// Category (id or name) for jobs no rule matches.
    #[serde(default)]
    pub default_category: Option<String>,
}

// =============================================================================
// WebSocket
// =============================================================================

/// Realtime channel to the cloud backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketSettings {
    /// Backend URL. The channel is disabled while unset.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_station_id")]
    pub station_id: String,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Consecutive failures before the channel goes offline.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_offline_retry_interval_ms")]
    pub offline_retry_interval_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Printer status and analytics summary push interval.
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,

    #[serde(default = "default_max_buffered_messages")]
    pub max_buffered_messages: usize,
}

fn default_station_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_reconnect_interval_ms() -> u64 {
    3_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_offline_retry_interval_ms() -> u64 {
    60_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_snapshot_interval_ms() -> u64 {
    60_000
}

fn default_max_buffered_messages() -> usize {
    1_000
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        WebSocketSettings {
            url: None,
            station_id: default_station_id(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            offline_retry_interval_ms: default_offline_retry_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
            max_buffered_messages: default_max_buffered_messages(),
        }
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Sound assets per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundSettings {
    #[serde(default = "default_new_job_sound")]
    pub new_job: PathBuf,
    #[serde(default = "default_success_sound")]
    pub success: PathBuf,
    #[serde(default = "default_failure_sound")]
    pub failure: PathBuf,
}

fn default_new_job_sound() -> PathBuf {
    PathBuf::from("sounds/new_job.wav")
}

fn default_success_sound() -> PathBuf {
    PathBuf::from("sounds/success.wav")
}

fn default_failure_sound() -> PathBuf {
    PathBuf::from("sounds/failure.wav")
}

impl Default for SoundSettings {
    fn default() -> Self {
        SoundSettings {
            new_job: default_new_job_sound(),
            success: default_success_sound(),
            failure: default_failure_sound(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 0-100. Zero mutes playback.
    #[serde(default = "default_volume")]
    pub volume: u8,

    /// Player command; receives the asset path as its last argument.
    #[serde(default = "default_player")]
    pub player: String,

    #[serde(default)]
    pub sounds: SoundSettings,
}

fn default_volume() -> u8 {
    80
}

fn default_player() -> String {
    "aplay".to_string()
}

impl Default for NotificationSettings {
    fn default() -> Self {
        NotificationSettings {
            enabled: true,
            volume: default_volume(),
            player: default_player(),
            sounds: SoundSettings::default(),
        }
    }
}

// =============================================================================
// GPIO
// =============================================================================

/// Hardware reset line for a wedged printer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpioSettings {
    /// sysfs GPIO number. Reset is disabled while unset.
    #[serde(default)]
    pub reset_pin: Option<u32>,

    #[serde(default = "default_pulse_ms")]
    pub pulse_ms: u64,

    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
}

fn default_pulse_ms() -> u64 {
    200
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

impl Default for GpioSettings {
    fn default() -> Self {
        GpioSettings {
            reset_pin: None,
            pulse_ms: default_pulse_ms(),
            sysfs_root: default_sysfs_root(),
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info,printhub=debug,sqlx=warn".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: default_log_level(),
            json: false,
        }
    }
}

// =============================================================================
// Station Configuration
// =============================================================================

/// Complete station configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub security: SecuritySettings,

    #[serde(default)]
    pub printing: PrintingSettings,

    #[serde(default)]
    pub routing: RoutingSettings,

    #[serde(default)]
    pub websocket: WebSocketSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub gpio: GpioSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl StationConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (station.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading station config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load station config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<&Path>) -> ConfigResult<()> {
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(Self::default_config_path)
            .ok_or(ConfigError::NoPath)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Station config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |e: printhub_core::ValidationError| ConfigError::Invalid(e.to_string());

        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be greater than 0".into()));
        }

        validate_api_key(&self.security.default_api_key).map_err(invalid)?;
        if let Some(ref key) = self.security.api_key {
            validate_api_key(key).map_err(invalid)?;
        }

        validate_paper_width(self.printing.receipt_width).map_err(invalid)?;
        if self.printing.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "printing.max_in_flight must be greater than 0".into(),
            ));
        }
        if self.printing.failover_after == 0 {
            return Err(ConfigError::Invalid(
                "printing.failover_after must be at least 1".into(),
            ));
        }
        if self.printing.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "printing.attempt_timeout_ms must be greater than 0".into(),
            ));
        }
        if let Some(ref descriptor) = self.printing.bluetooth_printer {
            validate_connection(descriptor).map_err(invalid)?;
        }

        if let Some(ref url) = self.websocket.url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(ConfigError::Invalid(format!(
                    "websocket.url must start with ws:// or wss://, got: {}",
                    url
                )));
            }
        }
        if self.websocket.station_id.trim().is_empty() {
            return Err(ConfigError::Invalid("websocket.station_id is required".into()));
        }

        if self.notifications.volume > 100 {
            return Err(ConfigError::Invalid(
                "notifications.volume must be between 0 and 100".into(),
            ));
        }

        Ok(())
    }

    /// Applies `PRINTHUB_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("PRINTHUB_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("PRINTHUB_PORT") {
            match port.parse::<u16>() {
                Ok(p) => {
                    debug!(port = p, "Overriding port from environment");
                    self.server.port = p;
                }
                Err(_) => warn!(port = %port, "Ignoring invalid PRINTHUB_PORT"),
            }
        }

        if let Some(path) = lookup("PRINTHUB_DATABASE_PATH") {
            self.server.database_path = Some(PathBuf::from(path));
        }

        if let Some(key) = lookup("PRINTHUB_API_KEY") {
            debug!("Overriding API key from environment");
            self.security.api_key = Some(key);
        }

        if let Some(printer) = lookup("PRINTHUB_DEFAULT_PRINTER") {
            self.printing.default_printer = Some(printer);
        }

        if let Some(retries) = lookup("PRINTHUB_MAX_RETRIES") {
            if let Ok(n) = retries.parse::<u32>() {
                self.printing.max_retries = n;
            }
        }

        if let Some(delay) = lookup("PRINTHUB_RETRY_DELAY_MS") {
            if let Ok(ms) = delay.parse::<u64>() {
                self.printing.retry_delay_ms = ms;
            }
        }

        if let Some(category) = lookup("PRINTHUB_DEFAULT_CATEGORY") {
            self.routing.default_category = Some(category);
        }

        if let Some(url) = lookup("PRINTHUB_WS_URL") {
            debug!(url = %url, "Overriding websocket URL from environment");
            self.websocket.url = Some(url);
        }

        if let Some(id) = lookup("PRINTHUB_STATION_ID") {
            self.websocket.station_id = id;
        }

        if let Some(level) = lookup("PRINTHUB_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(json) = lookup("PRINTHUB_LOG_JSON") {
            match json.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.logging.json = true,
                "0" | "false" | "no" => self.logging.json = false,
                _ => warn!(value = %json, "Ignoring invalid PRINTHUB_LOG_JSON"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "printhub", "station")
            .map(|dirs| dirs.config_dir().join("station.toml"))
    }

    /// Returns the default database path.
    pub fn default_database_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "printhub", "station")
            .map(|dirs| dirs.data_dir().join("printhub.db"))
    }

    /// Copy with credentials masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.security.api_key.is_some() {
            copy.security.api_key = Some(REDACTED.to_string());
        }
        copy.security.default_api_key = REDACTED.to_string();
        copy
    }
}

const REDACTED: &str = "********";

// =============================================================================
// Config Store
// =============================================================================

/// Shared, swappable configuration.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    current: RwLock<StationConfig>,
}

impl ConfigStore {
    /// Wraps an already loaded config. `path` is where updates are persisted.
    pub fn new(config: StationConfig, path: Option<PathBuf>) -> Self {
        ConfigStore {
            path,
            current: RwLock::new(config),
        }
    }

    /// Loads from `path` (or the platform default) and remembers the path.
    pub fn load(path: Option<PathBuf>) -> ConfigResult<Self> {
        let path = path.or_else(StationConfig::default_config_path);
        let config = StationConfig::load(path.clone())?;
        Ok(Self::new(config, path))
    }

    /// In-memory store that never touches disk.
    pub fn in_memory(config: StationConfig) -> Self {
        Self::new(config, None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshot of the current config.
    pub async fn get(&self) -> StationConfig {
        self.current.read().await.clone()
    }

    pub async fn retry_policy(&self) -> RetryPolicy {
        self.current.read().await.printing.retry_policy()
    }

    /// Applies `change` to a copy, validates, persists and swaps it in.
    ///
    /// On error the running config is unchanged.
    pub async fn update<F>(&self, change: F) -> ConfigResult<StationConfig>
    where
        F: FnOnce(&mut StationConfig),
    {
        let mut guard = self.current.write().await;
        let mut next = guard.clone();
        change(&mut next);
        next.validate()?;

        if let Some(ref path) = self.path {
            next.save(Some(path))?;
        }

        *guard = next.clone();
        info!("Station config updated");
        Ok(next)
    }

    /// Re-reads the config file and swaps it in.
    pub async fn reload(&self) -> ConfigResult<StationConfig> {
        let path = self.path.clone().ok_or(ConfigError::NoPath)?;
        let next = StationConfig::load(Some(path))?;

        let mut guard = self.current.write().await;
        *guard = next.clone();
        info!("Station config reloaded");
        Ok(next)
    }
}

/// Deep-merges `patch` into `base`; objects merge per key, anything else
/// replaces.
pub fn merge_json(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                merge_json(base.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (base, patch) => *base = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = StationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.printing.max_retries, 3);
        assert_eq!(config.printing.backoff, BackoffKind::Flat);
        assert_eq!(config.printing.failover_after, 1);
        assert!(config.websocket.url.is_none());
        assert!(!config.websocket.station_id.is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: StationConfig = toml::from_str(
            r#"
            [printing]
            max_retries = 5
            backoff = "exponential"

            [routing]
            default_category = "receipts"
            "#,
        )
        .unwrap();

        assert_eq!(config.printing.max_retries, 5);
        assert_eq!(config.printing.backoff, BackoffKind::Exponential);
        assert_eq!(config.printing.retry_delay_ms, 5_000);
        assert_eq!(config.server.port, 8089);
        assert_eq!(config.routing.default_category.as_deref(), Some("receipts"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = StationConfig::default();
        config.websocket.url = Some("http://cloud".into());
        assert!(config.validate().is_err());

        config.websocket.url = Some("wss://cloud.example.com/station".into());
        assert!(config.validate().is_ok());

        config.security.api_key = Some("short".into());
        assert!(config.validate().is_err());

        config.security.api_key = None;
        config.notifications.volume = 101;
        assert!(config.validate().is_err());

        config.notifications.volume = 50;
        config.printing.bluetooth_printer = Some("bluetooth".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PRINTHUB_PORT", "9000"),
            ("PRINTHUB_WS_URL", "ws://localhost:1234"),
            ("PRINTHUB_MAX_RETRIES", "1"),
            ("PRINTHUB_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = StationConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.websocket.url.as_deref(), Some("ws://localhost:1234"));
        assert_eq!(config.printing.max_retries, 1);
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_env_port_is_ignored() {
        let mut config = StationConfig::default();
        config.apply_overrides(|key| (key == "PRINTHUB_PORT").then(|| "nope".to_string()));
        assert_eq!(config.server.port, 8089);
    }

    #[test]
    fn test_retry_policy_from_settings() {
        let mut config = StationConfig::default();
        config.printing.max_retries = 2;
        config.printing.retry_delay_ms = 250;
        let policy = config.printing.retry_policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_redacted_hides_keys() {
        let mut config = StationConfig::default();
        config.security.api_key = Some("a-very-secret-key-123".into());
        let shown = config.redacted();
        assert_eq!(shown.security.api_key.as_deref(), Some("********"));
        assert_eq!(shown.security.default_api_key, "********");
    }

    #[test]
    fn test_merge_json() {
        let mut base = serde_json::json!({"printing": {"max_retries": 3, "auto_retry": true}});
        merge_json(&mut base, serde_json::json!({"printing": {"max_retries": 1}}));
        assert_eq!(base["printing"]["max_retries"], 1);
        assert_eq!(base["printing"]["auto_retry"], true);
    }

    #[tokio::test]
    async fn test_store_update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.toml");
        let store = ConfigStore::new(StationConfig::default(), Some(path.clone()));

        store
            .update(|c| c.printing.max_retries = 7)
            .await
            .unwrap();
        assert!(path.exists());

        std::fs::write(&path, "[printing]\nmax_retries = 4\n").unwrap();
        let reloaded = store.reload().await.unwrap();
        assert_eq!(reloaded.printing.max_retries, 4);
        assert_eq!(store.get().await.printing.max_retries, 4);
    }

    #[tokio::test]
    async fn test_invalid_update_leaves_config_unchanged() {
        let store = ConfigStore::in_memory(StationConfig::default());
        let result = store.update(|c| c.printing.max_in_flight = 0).await;
        assert!(result.is_err());
        assert_eq!(store.get().await.printing.max_in_flight, 8);
    }
}
