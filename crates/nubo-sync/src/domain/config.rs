//! Server configuration with validation.
//!
//! Sources, lowest to highest precedence: built-in defaults, an optional TOML
//! file, then `NUBO_*` environment variables.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listener configuration
    pub http: HttpConfig,
    /// Database and archive location
    pub storage: StorageConfig,
    /// Request limits
    pub limits: LimitsConfig,
    /// Password and token parameters
    pub security: SecurityConfig,
}

impl ServerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.port == 0 {
            return Err(ConfigError::Invalid("http.port cannot be 0".into()));
        }

        if !self.http.endpoint.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "http.endpoint must start with '/': {}",
                self.http.endpoint
            )));
        }

        if self.limits.max_request_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_request_size cannot be 0".into(),
            ));
        }

        if self.security.password_rounds == 0 {
            return Err(ConfigError::Invalid(
                "security.password_rounds cannot be 0".into(),
            ));
        }

        if self.security.token_bytes < 8 {
            return Err(ConfigError::Invalid(
                "security.token_bytes must be at least 8".into(),
            ));
        }

        if self.storage.database_file.is_empty() {
            return Err(ConfigError::Invalid(
                "storage.database_file cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }

    /// Full path of the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.database_file)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Loads the optional file, applies the environment and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let source = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
                Self::from_toml_str(&source)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `NUBO_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("NUBO_HOST") {
            self.http.host = parse_env("NUBO_HOST", &host)?;
        }
        if let Some(port) = lookup("NUBO_PORT") {
            self.http.port = parse_env("NUBO_PORT", &port)?;
        }
        if let Some(endpoint) = lookup("NUBO_ENDPOINT") {
            self.http.endpoint = endpoint;
        }
        if let Some(dir) = lookup("NUBO_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(size) = lookup("NUBO_MAX_REQUEST_SIZE") {
            self.limits.max_request_size = parse_env("NUBO_MAX_REQUEST_SIZE", &size)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}: cannot parse {value:?}")))
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8080)
    pub port: u16,
    /// Path of the sync endpoint
    pub endpoint: String,
    /// How long in-flight requests may run after shutdown is requested
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
            endpoint: "/sync".to_string(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Database and archive location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the database and `file%09d.bin` archives
    pub data_dir: PathBuf,
    /// Database file name inside `data_dir`
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./storage"),
            database_file: "nubo.rdb".to_string(),
        }
    }
}

/// Request limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max request body size in bytes
    pub max_request_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_size: 64 * 1024 * 1024,
        }
    }
}

/// Password and token parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Minimum install password length (after trimming)
    pub min_password_len: usize,
    /// PBKDF2 rounds for new password records
    pub password_rounds: u32,
    /// Random bytes per selector and validator
    pub token_bytes: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            min_password_len: 4,
            password_rounds: 100_000,
            token_bytes: 16,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid size limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Config file could not be read
    #[error("cannot read configuration: {0}")]
    Io(String),
    /// Config file is not valid TOML for this schema
    #[error("cannot parse configuration: {0}")]
    Parse(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
