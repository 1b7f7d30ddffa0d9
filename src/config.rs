//! Control-plane configuration loaded from `warren.toml`.
//!
//! Every field has a default, so an empty or missing file yields a working
//! single-process setup listening on all interfaces.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bastion::services::DEFAULT_BANNER;
use crate::fleet::domain::Resources;
use crate::fleet::services::{DEFAULT_HEARTBEAT_TIMEOUT_SECS, PlacementPolicy};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Configuration file path.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },
    /// The file is not valid configuration TOML.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Configuration file path.
        path: Utf8PathBuf,
        /// Underlying parse failure.
        source: Box<toml::de::Error>,
    },
}

/// Complete process configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WarrenConfig {
    /// Fleet registry settings.
    pub registry: RegistryConfig,
    /// HTTP API settings.
    pub api: ApiConfig,
    /// Node agent client settings.
    pub agent: AgentConfig,
    /// SSH bastion settings.
    pub bastion: BastionConfig,
    /// Logging settings.
    pub log: LogConfig,
}

impl WarrenConfig {
    /// Loads configuration from `path`, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read and
    /// [`ConfigError::Parse`] when it is not valid configuration.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let read_error = |source| ConfigError::Read {
            path: path.to_owned(),
            source,
        };
        let Some(file_name) = path.file_name() else {
            return Err(read_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "configuration path has no file name",
            )));
        };
        let directory = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));

        let contents = match Dir::open_ambient_dir(directory, ambient_authority())
            .and_then(|dir| dir.read_to_string(file_name))
        {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(read_error(err)),
        };
        Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source: Box::new(source),
        })
    }

    /// Parses configuration TOML.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input or unknown keys.
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

/// Fleet registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Interval node agents are expected to heartbeat at.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a node is swept offline.
    pub heartbeat_timeout_secs: u64,
    /// Interval between liveness sweeps.
    pub sweep_interval_secs: u64,
    /// Node selection policy for new containers.
    pub placement: PlacementPolicy,
    /// JSON snapshot loaded at startup and written at shutdown.
    pub snapshot_path: Option<Utf8PathBuf>,
    /// Allocation for containers requested without one.
    pub default_allocation: Resources,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: DEFAULT_HEARTBEAT_TIMEOUT_SECS.unsigned_abs(),
            sweep_interval_secs: 30,
            placement: PlacementPolicy::default(),
            snapshot_path: None,
            default_allocation: Resources::DEFAULT,
        }
    }
}

impl RegistryConfig {
    /// Returns the heartbeat timeout as a signed duration for the registry.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.heartbeat_timeout_secs).unwrap_or(i64::MAX))
    }

    /// Returns the sweep interval, at least one second.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        if self.sweep_interval_secs == 0 {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(self.sweep_interval_secs)
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    /// Listen address.
    pub listen: SocketAddr,
    /// Bearer token for admin routes; admin routes are disabled without one.
    pub admin_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            admin_token: None,
        }
    }
}

/// Node agent client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Port node agents listen on.
    pub port: u16,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            request_timeout_secs: 10,
        }
    }
}

impl AgentConfig {
    /// Returns the per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// SSH bastion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BastionConfig {
    /// Listen address.
    pub listen: SocketAddr,
    /// Gateway key file, generated on first start.
    pub host_key_path: Utf8PathBuf,
    /// Bound on dialling and authenticating a backend node.
    pub dial_timeout_secs: u64,
    /// SSH port used for node addresses without one.
    pub backend_ssh_port: u16,
    /// JSON user directory file.
    pub users_path: Utf8PathBuf,
    /// minijinja template shown to users without a container.
    pub banner: String,
}

impl Default for BastionConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 2222)),
            host_key_path: Utf8PathBuf::from("warren_host_ed25519"),
            dial_timeout_secs: 10,
            backend_ssh_port: 22,
            users_path: Utf8PathBuf::from("users.json"),
            banner: DEFAULT_BANNER.to_owned(),
        }
    }
}

impl BastionConfig {
    /// Returns the backend dial bound.
    #[must_use]
    pub const fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}
