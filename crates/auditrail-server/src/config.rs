//! Server configuration loading from file and environment variables.

use auditrail_db::DbRuntimeSettings;
use auditrail_search::DocumentIds;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryConfig;

/// `search.url` value that selects the in-process store.
pub const MEMORY_STORE_URL: &str = "memory";

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings for the durable stream.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Ingestion buffer and writer pool.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Stream names and consumer-group reader tuning.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Search store connection.
    #[serde(default)]
    pub search: SearchConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

impl DatabaseConfig {
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "auditrail_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Ingestion front door configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Slots in the bounded buffer between `submit` and the writer pool.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Number of writer workers appending to the stream.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long shutdown waits for buffered events to flush.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Append attempts per event before it is reported as undeliverable.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl IngestConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Durable stream and consumer-group reader configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Stream the front door appends to and the reader drains.
    #[serde(default = "default_stream_name")]
    pub stream_name: String,

    /// Entry field carrying the JSON-encoded event.
    #[serde(default = "default_field_name")]
    pub field_name: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Identity of this reader inside the group.
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Maximum entries per read.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long an empty read waits for new entries.
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,

    /// Sleep after a failed poll or ack cycle.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Idle time before an unacknowledged entry is delivered again.
    #[serde(default = "default_redeliver_after_ms")]
    pub redeliver_after_ms: u64,

    /// Deliveries after which a failing entry is parked.
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,

    /// How long `stop` waits for the poll loop before cancelling it.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

/// Search store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// OpenSearch base URL, or `"memory"` for the in-process store.
    #[serde(default = "default_search_url")]
    pub url: String,

    #[serde(default = "default_index_name")]
    pub index_name: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How indexed documents are keyed.
    #[serde(default)]
    pub document_ids: DocumentIds,

    /// Delay between connection attempts while the store is unreachable.
    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,
}

impl SearchConfig {
    pub fn is_memory(&self) -> bool {
        self.url == MEMORY_STORE_URL
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "auditrail.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_buffer_capacity() -> usize {
    10_000
}

fn default_workers() -> usize {
    4
}

fn default_drain_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_stream_name() -> String {
    "audit-events".to_string()
}

fn default_field_name() -> String {
    "payload".to_string()
}

fn default_consumer_group() -> String {
    "audit-indexer".to_string()
}

fn default_consumer_name() -> String {
    "indexer-1".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_block_ms() -> u64 {
    2_000
}

fn default_error_backoff_ms() -> u64 {
    5_000
}

fn default_redeliver_after_ms() -> u64 {
    30_000
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_stop_timeout_ms() -> u64 {
    10_000
}

fn default_search_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_index_name() -> String {
    "audit-events".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_retry_ms() -> u64 {
    5_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            workers: default_workers(),
            drain_timeout_ms: default_drain_timeout_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_name: default_stream_name(),
            field_name: default_field_name(),
            consumer_group: default_consumer_group(),
            consumer_name: default_consumer_name(),
            batch_size: default_batch_size(),
            block_ms: default_block_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            redeliver_after_ms: default_redeliver_after_ms(),
            max_deliveries: default_max_deliveries(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: default_search_url(),
            index_name: default_index_name(),
            username: None,
            password: None,
            request_timeout_ms: default_request_timeout_ms(),
            document_ids: DocumentIds::default(),
            connect_retry_ms: default_connect_retry_ms(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `AUDITRAIL_HOST` overrides `server.host`
/// - `AUDITRAIL_PORT` overrides `server.port`
/// - `AUDITRAIL_DB_PATH` overrides `database.path`
/// - `AUDITRAIL_LOG_LEVEL` overrides `logging.level`
/// - `AUDITRAIL_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `AUDITRAIL_SEARCH_URL` overrides `search.url`
/// - `AUDITRAIL_SEARCH_INDEX` overrides `search.index_name`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("AUDITRAIL_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("AUDITRAIL_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("AUDITRAIL_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("AUDITRAIL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("AUDITRAIL_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = var("AUDITRAIL_SEARCH_URL") {
        config.search.url = url;
    }
    if let Some(index) = var("AUDITRAIL_SEARCH_INDEX") {
        config.search.index_name = index;
    }
}
