//! Core configuration types and loading.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use super::rate_limit::RateLimitConfig;
use super::security::SecurityConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Secrets and request-authentication settings.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Per-caller request ceilings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise start from defaults, then
    /// apply environment overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = if path.as_ref().exists() {
            Self::load(path)?
        } else {
            tracing::info!(
                path = %path.as_ref().display(),
                "Config file not found, using defaults plus environment"
            );
            Self::default()
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Overlay values from the environment.
    ///
    /// `lookup` is injected so tests can supply a fixed environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(salt) = lookup("SALT") {
            self.security.salt = Some(salt);
        }
        if let Some(secret) = lookup("SIGNING_SECRET") {
            self.security.signing_secret = Some(secret);
        }
        // API_KEY / API_KEY_FALLBACK replace the file's key list as a pair so
        // a rotation can run both keys side by side.
        let env_keys: Vec<String> = ["API_KEY", "API_KEY_FALLBACK"]
            .into_iter()
            .filter_map(|var| lookup(var))
            .filter(|k| !k.is_empty())
            .collect();
        if !env_keys.is_empty() {
            self.security.api_keys = env_keys;
        }
        if let Some(list) = lookup("ALLOWED_IPS") {
            self.security.allowed_ips = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.rate_limit.redis_url = Some(url).filter(|u| !u.is_empty());
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(addr) = lookup("LISTEN_ADDRESS") {
            self.server.listen = addr.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Env {
                    var: "LISTEN_ADDRESS",
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(())
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the API binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Take the caller IP from the first `X-Forwarded-For` entry.
    /// Only enable behind a proxy that overwrites the header.
    #[serde(default = "default_true")]
    pub trust_forwarded_for: bool,
    /// Emit logs as JSON lines instead of human-readable text.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            trust_forwarded_for: true,
            json_logs: false,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file (`:memory:` for an ephemeral store).
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Upper bound for any single store step, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_timeout_ms)
    }
}

fn default_db_path() -> String {
    "trustguard.db".to_string()
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}
