//! Configuration management.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    #[error("invalid bind address '{addr}': {source}")]
    InvalidBind {
        addr: String,
        source: std::net::AddrParseError,
    },
}

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_bind")]
    bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    log_level: Option<String>,
}

fn default_port() -> u16 {
    strata_types::DEFAULT_PORT
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on
    pub port: u16,
    /// Requested bind address (loopback is enforced at bind time)
    pub bind: IpAddr,
    /// Log level (if set, overrides RUST_LOG environment variable)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars >
    /// config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `.strata.toml` in current directory
    /// 2. `config.toml` in user config directory (~/.config/strata/ on Linux)
    pub fn from_figment(port: Option<u16>, bind: Option<String>) -> Result<Self, ConfigError> {
        let local_config = std::env::current_dir().ok().map(|d| d.join(".strata.toml"));
        let user_config = directories::ProjectDirs::from("", "", "strata")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        let mut figment = Figment::new().merge(Serialized::defaults(ConfigFile {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }));

        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(
            Env::prefixed("STRATA_")
                .map(|key| key.as_str().replace("__", ".").into())
                .split("_"),
        );

        if let Some(p) = port {
            figment = figment.merge(Serialized::default("server.port", p));
        }
        if let Some(ref b) = bind {
            figment = figment.merge(Serialized::default("server.bind", b));
        }

        let config_file: ConfigFile = figment.extract()?;
        let bind: IpAddr = config_file
            .server
            .bind
            .parse()
            .map_err(|source| ConfigError::InvalidBind {
                addr: config_file.server.bind.clone(),
                source,
            })?;

        Ok(Self {
            port: config_file.server.port,
            bind,
            log_level: config_file.logging.log_level,
        })
    }

    /// The address the server will actually bind.
    ///
    /// The transport refuses any non-loopback listening address: a
    /// configured wildcard or external address is rewritten to loopback
    /// and the override is logged.
    pub fn effective_bind(&self) -> IpAddr {
        enforce_loopback(self.bind)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: strata_types::DEFAULT_PORT,
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            log_level: None,
        }
    }
}

/// Rewrite non-loopback addresses to the loopback of the same family.
pub fn enforce_loopback(addr: IpAddr) -> IpAddr {
    if addr.is_loopback() {
        return addr;
    }
    let loopback = match addr {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
    };
    warn!(
        "Enforcing localhost-only binding for security: {} -> {}",
        addr, loopback
    );
    loopback
}
