//! Server configuration, loaded from an optional TOML file

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Origins of the bundled frontend in development and production
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://localhost:8000",
    "http://127.0.0.1:5173",
    "http://127.0.0.1:8000",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid bind address '{0}'")]
    InvalidBind(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Settings for the HTTP server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: String,
    /// Signal directory used by init-volume when none is given
    pub default_signal_path: PathBuf,
    /// Largest accepted upload, in megabytes
    pub max_upload_mb: usize,
    /// Origins allowed to call the API from a browser
    pub allowed_origins: Vec<String>,
    /// Built frontend served at `/`
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            default_signal_path: PathBuf::from("/signal"),
            max_upload_mb: 2048,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect(),
            static_dir: None,
        }
    }
}

impl ServerConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            log::info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded server config from {:?}", path);
        Ok(config)
    }

    pub fn bind_addr(&self) -> ConfigResult<SocketAddr> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.bind.clone()))
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}
