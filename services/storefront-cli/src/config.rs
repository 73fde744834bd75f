//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The login password comes from STOREFRONT_PASSWORD or password_file and
//! is never stored in the TOML directly.

use std::fmt;
use std::path::{Path, PathBuf};

use auth_client::Endpoints;
use serde::Deserialize;
use storefront_session::DEFAULT_RECORD_FILE;
use zeroize::Zeroizing;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub endpoints: Endpoints,
}

/// Backend connection settings
#[derive(Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Path to a file containing the login password (alternative to STOREFRONT_PASSWORD)
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(skip)]
    pub password: Option<Zeroizing<String>>,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("password_file", &self.password_file)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Where the session record lives
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_path")]
    pub path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: default_session_path(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_session_path() -> PathBuf {
    PathBuf::from(DEFAULT_RECORD_FILE)
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Password resolution order:
    /// 1. STOREFRONT_PASSWORD env var
    /// 2. password_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| common::Error::io(path, e))?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.api.base_url.starts_with("http://") && !config.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.api.base_url
            )));
        }

        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if let Ok(password) = std::env::var("STOREFRONT_PASSWORD") {
            config.api.password = Some(Zeroizing::new(password));
        } else if let Some(ref password_file) = config.api.password_file {
            let password = Zeroizing::new(
                std::fs::read_to_string(password_file)
                    .map_err(|e| common::Error::io(password_file, e))?,
            );
            let password = password.trim_end_matches(['\r', '\n']);
            if !password.is_empty() {
                config.api.password = Some(Zeroizing::new(password.to_owned()));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("storefront.toml")
    }
}
