//! Configuration loading and daemon address resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`MPD_HOST`, `MPD_PORT`, `MPD_PASSWORD`)
//! 3. TOML config file
//! 4. Compiled default (fallback)

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::{Error, Result};

/// Standard MPD control port
pub const DEFAULT_PORT: u16 = 6600;

/// Host used when nothing else is configured
pub const DEFAULT_HOST: &str = "localhost";

/// Acceptable distance from the target duration, in seconds
pub const DEFAULT_TOLERANCE_SECS: i64 = 30;

/// Per-round-trip protocol timeout, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "MPDFIT_CONFIG";

/// Where and how to reach one daemon
///
/// Parsed from `[PASSWORD@]HOST[:PORT][/LATENCY]`, where `LATENCY` is a fixed
/// start offset in seconds that overrides measured latency for followers.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonAddress {
    pub host: String,
    pub port: u16,
    pub latency: Option<f64>,
    pub password: Option<String>,
}

impl DaemonAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            latency: None,
            password: None,
        }
    }

    /// `host:port` suitable for `TcpStream::connect`
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for DaemonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        if let Some(latency) = self.latency {
            write!(f, "/{}", latency)?;
        }
        Ok(())
    }
}

impl FromStr for DaemonAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        let (password, rest) = match s.split_once('@') {
            Some((password, rest)) if !password.is_empty() => (Some(password.to_string()), rest),
            Some((_, rest)) => (None, rest),
            None => (None, s),
        };

        let (rest, latency) = match rest.rsplit_once('/') {
            Some((rest, latency)) => {
                let latency = latency.parse::<f64>().map_err(|e| {
                    Error::InvalidInput(format!("invalid latency '{}' in '{}': {}", latency, s, e))
                })?;
                if !latency.is_finite() {
                    return Err(Error::InvalidInput(format!("invalid latency in '{}'", s)));
                }
                (rest, Some(latency))
            }
            None => (rest, None),
        };

        // A single colon separates the port; more than one means a bare IPv6 host
        let (host, port) = match rest.split_once(':') {
            Some((host, port)) if !port.contains(':') => {
                let port = port.parse::<u16>().map_err(|e| {
                    Error::InvalidInput(format!("invalid port '{}' in '{}': {}", port, s, e))
                })?;
                (host, port)
            }
            _ => (rest, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(Error::InvalidInput(format!("missing host in '{}'", s)));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            latency,
            password,
        })
    }
}

/// Configuration file contents
///
/// Every field is optional; missing values fall back to compiled defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Reference daemon, `[PASSWORD@]HOST[:PORT][/LATENCY]`
    pub server: Option<String>,

    /// Password sent after connecting when the address carries none
    pub password: Option<String>,

    /// Follower daemons started in sync with the reference
    pub followers: Vec<String>,

    /// Acceptable distance from the target duration
    pub tolerance_secs: Option<i64>,

    /// Per-round-trip timeout
    pub timeout_secs: Option<u64>,

    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: Option<String>,
}

impl TomlConfig {
    /// Parse config text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    pub fn tolerance_secs(&self) -> i64 {
        self.tolerance_secs.unwrap_or(DEFAULT_TOLERANCE_SECS)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Parsed follower addresses
    pub fn follower_addresses(&self) -> Result<Vec<DaemonAddress>> {
        self.followers.iter().map(|f| f.parse()).collect()
    }
}

/// Load configuration
///
/// An explicitly named file must exist. Otherwise the first file found by
/// [`find_config_file`] is used, and defaults apply when there is none.
pub fn load_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!("Config file not found: {:?}", path)));
            }
            path.to_path_buf()
        }
        None => match find_config_file() {
            Some(path) => path,
            None => {
                debug!("No config file found, using defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    debug!(path = %path.display(), "Loading config file");
    let content = std::fs::read_to_string(&path)?;
    TomlConfig::from_toml_str(&content)
}

/// Locate the configuration file
///
/// Checks `MPDFIT_CONFIG`, then `~/.config/mpdfit/config.toml`, then
/// `/etc/mpdfit/config.toml` (Linux only).
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("mpdfit").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/mpdfit/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Resolve the reference daemon address
pub fn resolve_server(cli_arg: Option<&str>, config: &TomlConfig) -> Result<DaemonAddress> {
    // Priority 1: Command-line argument
    if let Some(server) = cli_arg {
        return server.parse();
    }

    // Priority 2: Environment variables
    if let Ok(host) = std::env::var("MPD_HOST") {
        let mut address: DaemonAddress = host.parse()?;
        if let Ok(port) = std::env::var("MPD_PORT") {
            address.port = port
                .parse()
                .map_err(|e| Error::Config(format!("Invalid MPD_PORT '{}': {}", port, e)))?;
        }
        return Ok(address);
    }

    // Priority 3: TOML config file
    if let Some(server) = config.server.as_deref() {
        return server.parse();
    }

    // Priority 4: Compiled default
    Ok(DaemonAddress::new(DEFAULT_HOST, DEFAULT_PORT))
}

/// Resolve the password for `address`
///
/// A password embedded in the address wins, then the command line, then
/// `MPD_PASSWORD`, then the config file.
pub fn resolve_password(
    address: &DaemonAddress,
    cli_arg: Option<&str>,
    config: &TomlConfig,
) -> Option<String> {
    address
        .password
        .clone()
        .or_else(|| cli_arg.map(str::to_string))
        .or_else(|| std::env::var("MPD_PASSWORD").ok())
        .or_else(|| config.password.clone())
}
