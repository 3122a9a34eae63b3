//! Application configuration.
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables:
//! - `CONFIG_PATH`: TOML file (default: `./config.toml`, skipped if absent)
//! - `HOST`: bind address (default: `"0.0.0.0"`)
//! - `PORT`: listen port (default: `3000`)
//! - `RUST_LOG`: tracing filter directive (default: `"info"`)
//! - `KEYSTORE_PATH`: keystore file or directory (default: `./keystore`)
//! - `KEYSTORE_PASSWORD`: keystore password
//! - `LEDGER_RPC_URL`: ledger JSON-RPC endpoint

use std::path::{Path, PathBuf};
use std::time::Duration;

use saga::services::geocoder::DEFAULT_NOMINATIM_URL;
use saga::{OracleEndpoint, SagaConfig, TokenConfig};
use serde::Deserialize;
use session::SessionConfig;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    pub path: PathBuf,
    pub password: Option<String>,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./keystore"),
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub rpc_url: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    pub url: String,
    /// Sent as `User-Agent`; the public Nominatim instance requires one.
    pub user_agent: String,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_NOMINATIM_URL.to_string(),
            user_agent: concat!("gping-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SagaTimings {
    pub locate_deadline_secs: u64,
    pub approval_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub oracle_timeout_secs: u64,
}

impl Default for SagaTimings {
    fn default() -> Self {
        Self {
            locate_deadline_secs: 30,
            approval_ttl_secs: 300,
            sweep_interval_secs: 60,
            oracle_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionBounds {
    pub max_frame_bytes: usize,
    pub write_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for SessionBounds {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            max_frame_bytes: defaults.max_frame_bytes,
            write_timeout_secs: defaults.write_timeout.as_secs(),
            idle_timeout_secs: defaults.idle_timeout.as_secs(),
        }
    }
}

/// Server configuration with sensible defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub keystore: KeystoreConfig,
    pub ledger: LedgerConfig,
    pub geocoder: GeocoderConfig,
    pub oracles: Vec<OracleEndpoint>,
    pub token: TokenConfig,
    pub saga: SagaTimings,
    pub session: SessionBounds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            keystore: KeystoreConfig::default(),
            ledger: LedgerConfig::default(),
            geocoder: GeocoderConfig::default(),
            oracles: Vec::new(),
            token: TokenConfig::default(),
            saga: SagaTimings::default(),
            session: SessionBounds::default(),
        }
    }
}

impl Config {
    /// Loads the TOML file named by `CONFIG_PATH` (or the default path if it
    /// exists) and applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("CONFIG_PATH") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            Err(_) => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var: "PORT", value: port })?;
        }
        if let Some(level) = lookup("RUST_LOG") {
            self.log_level = level;
        }
        if let Some(path) = lookup("KEYSTORE_PATH") {
            self.keystore.path = PathBuf::from(path);
        }
        if let Some(password) = lookup("KEYSTORE_PASSWORD") {
            self.keystore.password = Some(password);
        }
        if let Some(url) = lookup("LEDGER_RPC_URL") {
            self.ledger.rpc_url = url;
        }
        Ok(())
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            locate_deadline: Duration::from_secs(self.saga.locate_deadline_secs),
            approval_ttl: Duration::from_secs(self.saga.approval_ttl_secs),
            token: self.token.clone(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_frame_bytes: self.session.max_frame_bytes,
            write_timeout: Duration::from_secs(self.session.write_timeout_secs),
            idle_timeout: Duration::from_secs(self.session.idle_timeout_secs),
            ..SessionConfig::default()
        }
    }
}
