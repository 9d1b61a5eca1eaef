//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub partitioning: PartitioningConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Catalog database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,

    /// How long a unit of work waits for a competing writer (ms)
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Schema assumed for table names given without one
    #[serde(default = "default_schema")]
    pub default_schema: String,
}

fn default_catalog_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("hyperchunk").join("catalog.db"))
        .unwrap_or_else(|| PathBuf::from("./hyperchunk_data/catalog.db"))
}

fn default_busy_timeout() -> u64 {
    5000 // 5 seconds
}

fn default_schema() -> String {
    "main".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
            busy_timeout_ms: default_busy_timeout(),
            default_schema: default_schema(),
        }
    }
}

/// Partitioning defaults
#[derive(Debug, Clone, Deserialize)]
pub struct PartitioningConfig {
    /// Chunk width used when `create-table` is given no interval
    #[serde(default = "default_chunk_interval")]
    pub default_chunk_interval: String,
}

fn default_chunk_interval() -> String {
    "7d".to_string()
}

impl Default for PartitioningConfig {
    fn default() -> Self {
        Self {
            default_chunk_interval: default_chunk_interval(),
        }
    }
}

impl PartitioningConfig {
    pub fn default_chunk_interval_us(&self) -> Result<i64, ConfigError> {
        parse_interval(&self.default_chunk_interval)
    }
}

/// Background retention worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_enabled")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_retention_enabled() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    60
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_retention_enabled(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("hyperchunk").join("config.toml")),
            Some(PathBuf::from("/etc/hyperchunk/config.toml")),
            Some(PathBuf::from("./hyperchunk.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("HYPERCHUNK_CATALOG") {
            self.catalog.path = PathBuf::from(path);
        }
        if let Some(timeout) = var("HYPERCHUNK_BUSY_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => self.catalog.busy_timeout_ms = ms,
                Err(_) => tracing::warn!("Ignoring invalid HYPERCHUNK_BUSY_TIMEOUT_MS={}", timeout),
            }
        }
        if let Some(interval) = var("HYPERCHUNK_CHUNK_INTERVAL") {
            self.partitioning.default_chunk_interval = interval;
        }
        if let Some(level) = var("HYPERCHUNK_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("HYPERCHUNK_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid interval {0:?}: expected a number and one of us, ms, s, m, h, d, w")]
    InvalidInterval(String),
}

/// Parse an interval like `500ms`, `90s`, `15m`, `1h`, `7d` or `2w` into
/// microseconds
pub fn parse_interval(input: &str) -> Result<i64, ConfigError> {
    let invalid = || ConfigError::InvalidInterval(input.to_string());

    let re = regex::Regex::new(r"^(\d+)\s*(us|ms|s|m|h|d|w)$").map_err(|_| invalid())?;
    let caps = re.captures(input.trim()).ok_or_else(invalid)?;

    let amount: i64 = caps[1].parse().map_err(|_| invalid())?;
    let unit: i64 = match &caps[2] {
        "us" => 1,
        "ms" => 1_000,
        "s" => 1_000_000,
        "m" => 60 * 1_000_000,
        "h" => 3_600 * 1_000_000,
        "d" => 86_400 * 1_000_000,
        "w" => 7 * 86_400 * 1_000_000,
        _ => return Err(invalid()),
    };

    match amount.checked_mul(unit) {
        Some(us) if us > 0 => Ok(us),
        _ => Err(invalid()),
    }
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Hyperchunk Configuration
#
# Environment variables override these settings:
# - HYPERCHUNK_CATALOG
# - HYPERCHUNK_BUSY_TIMEOUT_MS
# - HYPERCHUNK_CHUNK_INTERVAL
# - HYPERCHUNK_LOG_LEVEL
# - HYPERCHUNK_LOG_FORMAT

[catalog]
# SQLite database holding the catalog, the partitioned tables and their chunks
path = "~/.local/share/hyperchunk/catalog.db"

# How long a writer waits for a competing unit of work (ms)
busy_timeout_ms = 5000

# Schema for table names given without one
default_schema = "main"

[partitioning]
# Chunk width when none is given: us, ms, s, m, h, d or w
default_chunk_interval = "7d"

[retention]
# Run retention policies in `hyperchunk worker`
enabled = true

# Seconds between retention passes
poll_interval_secs = 60

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
