use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while assembling the client configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Main configuration for the sharing client
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Hosted posts backend configuration
    #[serde(default)]
    pub backend: BackendConfig,
    /// Self-hosted PostgreSQL configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Media processing configuration
    #[serde(default)]
    pub media: MediaConfig,
    /// Upload pipeline configuration
    #[serde(default)]
    pub upload: UploadConfig,
    /// Feed cache configuration
    #[serde(default)]
    pub feed: FeedConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub log_json: bool,
    /// Serve Prometheus metrics on this port; unset records nothing
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Hosted backend (REST over the `posts` table)
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Backend endpoint URL, e.g. `https://xyz.supabase.co`
    #[serde(default)]
    pub url: String,
    /// Anonymous access key sent as `apikey` and bearer token
    #[serde(default)]
    pub anon_key: String,
    /// Table holding post records
    #[serde(default = "default_posts_table")]
    pub posts_table: String,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl BackendConfig {
    /// Per-request timeout for backend calls
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// PostgreSQL configuration for the self-hosted store
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Run migrations on connect
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

impl DatabaseConfig {
    /// How long to wait for a pooled connection
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Media compression configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Maximum length of the long edge after compression, in pixels
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    /// JPEG quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Directory where compressed images are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Largest accepted asset, in megabytes
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

/// Upload pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Placeholder owner identifier attached to every post
    #[serde(default = "default_owner_id")]
    pub owner_id: String,
    /// Delay before a successful upload returns to idle, in milliseconds
    #[serde(default = "default_success_reset_delay_ms")]
    pub success_reset_delay_ms: u64,
}

/// Feed cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Freshness window of the cached feed, in seconds
    #[serde(default = "default_stale_time_secs")]
    pub stale_time_secs: u64,
    /// Extra attempts after a failed fetch
    #[serde(default = "default_retry")]
    pub retry: u32,
    /// Pause between fetch attempts, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Number of posts requested per fetch
    #[serde(default = "default_page_limit")]
    pub limit: usize,
}

// Default value functions
fn default_service_name() -> String {
    "snapshare".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_posts_table() -> String {
    "posts".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_max_dimension() -> u32 {
    1920
}

fn default_jpeg_quality() -> u8 {
    80
}

fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join("snapshare")
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_owner_id() -> String {
    format!("demo-user-{}", chrono::Utc::now().timestamp_millis())
}

fn default_success_reset_delay_ms() -> u64 {
    1500
}

fn default_stale_time_secs() -> u64 {
    30
}

fn default_retry() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_page_limit() -> usize {
    50
}

impl Config {
    /// Load configuration from config files and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/snapshare").required(false))
            .add_source(config::File::with_name("/etc/snapshare/client").required(false))
            // SNAPSHARE__BACKEND__URL -> backend.url
            .add_source(
                config::Environment::with_prefix("SNAPSHARE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Names of the backend settings that are required but absent.
    ///
    /// Startup continues when this is non-empty; backend calls fail later.
    pub fn missing_backend_settings(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.backend.url.trim().is_empty() {
            missing.push("SNAPSHARE__BACKEND__URL");
        }
        if self.backend.anon_key.trim().is_empty() {
            missing.push("SNAPSHARE__BACKEND__ANON_KEY");
        }
        missing
    }

    /// Get the post-success idle delay as Duration
    pub fn success_reset_delay(&self) -> Duration {
        Duration::from_millis(self.upload.success_reset_delay_ms)
    }

    /// Get the feed freshness window as Duration
    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.feed.stale_time_secs)
    }

    /// Get the pause between feed fetch attempts as Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.feed.retry_delay_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_json: false,
            metrics_port: None,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            posts_table: default_posts_table(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            run_migrations: default_true(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
            jpeg_quality: default_jpeg_quality(),
            output_dir: default_output_dir(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            owner_id: default_owner_id(),
            success_reset_delay_ms: default_success_reset_delay_ms(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            stale_time_secs: default_stale_time_secs(),
            retry: default_retry(),
            retry_delay_ms: default_retry_delay_ms(),
            limit: default_page_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_config() -> Config {
        config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_max_dimension(), 1920);
        assert_eq!(default_jpeg_quality(), 80);
        assert_eq!(default_stale_time_secs(), 30);
        assert_eq!(default_retry(), 2);
        assert_eq!(default_success_reset_delay_ms(), 1500);
    }

    #[test]
    fn test_empty_sources_fall_back_to_defaults() {
        let config = empty_config();

        assert_eq!(config.backend.posts_table, "posts");
        assert_eq!(config.feed.limit, 50);
        assert_eq!(config.stale_time(), Duration::from_secs(30));
        assert_eq!(config.backend.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.database.acquire_timeout(), Duration::from_secs(30));
        assert_eq!(config.service.metrics_port, None);
        assert!(config.upload.owner_id.starts_with("demo-user-"));
    }

    #[test]
    fn test_missing_backend_settings_reported() {
        let mut config = empty_config();
        assert_eq!(
            config.missing_backend_settings(),
            vec!["SNAPSHARE__BACKEND__URL", "SNAPSHARE__BACKEND__ANON_KEY"]
        );

        config.backend.url = "https://example.supabase.co".to_string();
        config.backend.anon_key = "anon".to_string();
        assert!(config.missing_backend_settings().is_empty());
    }

    #[test]
    fn test_nested_overrides() {
        let config: Config = config::Config::builder()
            .set_override("backend.url", "http://localhost:54321")
            .unwrap()
            .set_override("feed.retry", 0)
            .unwrap()
            .set_override("service.metrics_port", 9464)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.backend.url, "http://localhost:54321");
        assert_eq!(config.feed.retry, 0);
        assert_eq!(config.service.metrics_port, Some(9464));
        assert_eq!(config.media.max_file_size_mb, 50);
    }
}
