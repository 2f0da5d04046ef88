//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `SMARTMARKS_*` environment overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::bookmarks::ReconcilerOptions;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub realtime: RealtimeConfig,

    #[serde(default)]
    pub bookmarks: BookmarksConfig,

    #[serde(default)]
    pub demo: DemoConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which backend implementation to use
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process backend, nothing leaves the machine
    #[default]
    Memory,
    /// Hosted Supabase-compatible backend
    Rest,
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "rest" => Ok(BackendKind::Rest),
            other => Err(ConfigError::Invalid(format!("unknown backend: {}", other))),
        }
    }
}

/// Hosted backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default = "default_backend_url")]
    pub url: String,

    #[serde(default)]
    pub anon_key: String,

    /// Access token from a finished OAuth sign-in
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_backend_url() -> String {
    "http://localhost:54321".to_string()
}

fn default_request_timeout() -> u64 {
    10_000 // 10 seconds
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            url: default_backend_url(),
            anon_key: String::new(),
            access_token: None,
            request_timeout_ms: default_request_timeout(),
        }
    }
}

/// Realtime channel configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

fn default_heartbeat() -> u64 {
    30
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat(),
        }
    }
}

/// Bookmark list behavior
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookmarksConfig {
    /// Put a bookmark back in the list when its delete request fails
    #[serde(default)]
    pub rollback_failed_deletes: bool,
}

impl From<&BookmarksConfig> for ReconcilerOptions {
    fn from(config: &BookmarksConfig) -> Self {
        Self {
            rollback_failed_deletes: config.rollback_failed_deletes,
        }
    }
}

/// Identity the in-memory backend signs in as
#[derive(Debug, Clone, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "default_demo_user")]
    pub user_id: String,

    #[serde(default = "default_demo_name")]
    pub full_name: String,

    #[serde(default)]
    pub avatar_url: String,
}

fn default_demo_user() -> String {
    "demo-user".to_string()
}

fn default_demo_name() -> String {
    "Demo User".to_string()
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            user_id: default_demo_user(),
            full_name: default_demo_name(),
            avatar_url: String::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

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

impl LoggingConfig {
    /// Install the global tracing subscriber.
    ///
    /// `RUST_LOG` wins over the configured level. Logs go to stderr so they
    /// never interleave with rendered output.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("smartmarks={}", self.level)));

        let registry = tracing_subscriber::registry().with(filter);
        if self.format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
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
        for path in default_config_paths() {
            if path.exists() {
                match Self::load_with_env(&path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Backend overrides
        if let Some(kind) = var("SMARTMARKS_BACKEND") {
            match kind.parse() {
                Ok(kind) => self.backend.kind = kind,
                Err(e) => tracing::warn!("Ignoring SMARTMARKS_BACKEND: {}", e),
            }
        }
        if let Some(url) = var("SMARTMARKS_URL") {
            self.backend.url = url;
        }
        if let Some(key) = var("SMARTMARKS_ANON_KEY") {
            self.backend.anon_key = key;
        }
        if let Some(token) = var("SMARTMARKS_ACCESS_TOKEN") {
            self.backend.access_token = Some(token);
        }

        // Logging overrides
        if let Some(level) = var("SMARTMARKS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("SMARTMARKS_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    [
        dirs::config_dir().map(|p| p.join("smartmarks").join("config.toml")),
        Some(PathBuf::from("/etc/smartmarks/config.toml")),
        Some(PathBuf::from("./config.toml")),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Smartmarks Configuration
#
# Environment variables override these settings:
# - SMARTMARKS_BACKEND
# - SMARTMARKS_URL
# - SMARTMARKS_ANON_KEY
# - SMARTMARKS_ACCESS_TOKEN
# - SMARTMARKS_LOG_LEVEL
# - SMARTMARKS_LOG_FORMAT

[backend]
# Backend: memory (in-process) or rest (hosted)
kind = "memory"

# Project URL of the hosted backend
url = "http://localhost:54321"

# Public API key of the hosted backend
anon_key = ""

# Access token from a finished OAuth sign-in (optional)
# access_token = ""

# Request timeout in milliseconds
request_timeout_ms = 10000

[realtime]
# Seconds between realtime heartbeats
heartbeat_secs = 30

[bookmarks]
# Put a bookmark back in the list when deleting it fails
rollback_failed_deletes = false

[demo]
# Identity the in-memory backend signs in as
user_id = "demo-user"
full_name = "Demo User"
avatar_url = ""

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
