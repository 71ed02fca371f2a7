//! Application configuration.
//!
//! Aggregates per-component settings into a single Config struct loaded
//! from YAML files and environment variables.

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "CARGOTRACK_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "CARGOTRACK";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "CARGOTRACK_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub database: DatabaseConfig,
    /// Snapshot cache endpoint, consumed by the embedding front-end.
    pub cache: CacheConfig,
    /// Push-session authentication.
    pub auth: AuthConfig,
    /// External industry feed.
    pub feed: FeedConfig,
    /// Poll scheduler.
    pub scheduler: SchedulerConfig,
    /// Subscription hub.
    pub hub: HubConfig,
    /// Notification dispatcher.
    pub notifications: NotificationConfig,
    /// Graceful shutdown drain window.
    pub shutdown: ShutdownConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources in priority order (later overrides earlier):
    /// 1. `config.yaml` in the current directory (if present)
    /// 2. File given by the `path` argument (if provided)
    /// 3. File named by `CARGOTRACK_CONFIG` (if set)
    /// 4. Environment variables with the `CARGOTRACK` prefix (`__` separator)
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL. `sqlite::memory:` runs fully in-process.
    pub url: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:cargotrack.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Snapshot cache endpoint (read by the front-end; the core does not
/// connect to it).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub url: Option<String>,
}

/// Push-session authentication settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret the front-end mints session tokens with.
    pub token_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
        }
    }
}

/// External industry feed connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    /// Per-request deadline, seconds.
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://feed.example.com/v2".to_string(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Poll scheduler settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Global sweep interval, minutes.
    pub interval_minutes: u64,
    /// Maximum shipments refreshed per tick.
    pub batch_size: u32,
    /// Concurrent fetches allowed per source.
    pub per_source_concurrency: usize,
    /// Per-fetch deadline, seconds. Deadline hits count as transient.
    pub fetch_deadline_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 1,
            batch_size: 100,
            per_source_concurrency: 4,
            fetch_deadline_secs: 30,
        }
    }
}

/// Subscription hub settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Outbound queue capacity per client. Publishers never block: the
    /// oldest unsent message is dropped when full.
    pub queue_capacity: usize,
    /// Total drops after which a client is force-disconnected.
    pub max_drops: u64,
    /// Events included in the subscribe snapshot.
    pub snapshot_events: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_drops: 256,
            snapshot_events: 10,
        }
    }
}

/// Notification dispatcher settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// First retry delay, seconds.
    pub retry_initial_secs: u64,
    /// Retry delay cap, seconds.
    pub retry_max_secs: u64,
    /// Attempts before a job is marked failed.
    pub retry_max_attempts: usize,
    /// Sweeper cadence, seconds.
    pub sweep_interval_secs: u64,
    /// Concurrent deliveries per method.
    pub per_method_concurrency: usize,
    /// Job queue capacity.
    pub queue_capacity: usize,
    /// Per-delivery deadline, seconds.
    pub deliver_deadline_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            retry_initial_secs: 2,
            retry_max_secs: 30,
            retry_max_attempts: 3,
            sweep_interval_secs: 300,
            per_method_concurrency: 8,
            queue_capacity: 1024,
            deliver_deadline_secs: 30,
        }
    }
}

/// Graceful shutdown settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Drain window for the in-flight tick and notifications, seconds.
    pub deadline_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { deadline_secs: 30 }
    }
}
