//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, `cloudvol.toml` discovered through the usual
//! locations (or `CLOUDVOL_CONFIG_PATH`), and `CLOUDVOL_*` environment
//! variables. Command-line flags are applied afterwards through
//! [`CloudvolConfig::with_overrides`].

use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::gce::IdentityOverrides;
use crate::plugin::ListenTarget;

/// Storage backend selected when none is configured.
pub const DEFAULT_MODE: &str = "gce";

/// TCP port used when none is configured.
pub const DEFAULT_PORT: u16 = 8080;

/// Unix socket Docker discovers plugins from.
pub const DEFAULT_SOCKET_PATH: &str = "/run/docker/plugins/cloudvol.sock";

/// Directory holding mount points when none is configured.
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt";

/// Log filter used when neither `RUST_LOG` nor `log_level` is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Where the host filesystem is expected when running inside a container.
pub const CONTAINER_HOST_ROOT: &str = "/host";

/// File whose presence in `/` marks a Docker container.
const CONTAINER_MARKER: &str = ".dockerenv";

/// Address the TCP listener binds to.
pub const TCP_LISTEN_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Storage backend behind the volume driver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StorageMode {
    /// Google Compute Engine persistent disks.
    Gce,
}

impl FromStr for StorageMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gce" => Ok(Self::Gce),
            _ => Err(ConfigError::UnknownMode(value.to_owned())),
        }
    }
}

/// Plugin settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CLOUDVOL",
    discovery(
        app_name = "cloudvol",
        env_var = "CLOUDVOL_CONFIG_PATH",
        config_file_name = "cloudvol.toml",
        dotfile_name = ".cloudvol.toml",
        project_file_name = "cloudvol.toml"
    )
)]
pub struct CloudvolConfig {
    /// Storage backend; only `gce` is available.
    #[ortho_config(default = DEFAULT_MODE.to_owned())]
    pub mode: String,
    /// TCP port of the plugin endpoint.
    #[ortho_config(default = DEFAULT_PORT)]
    pub port: u16,
    /// Listen on [`CloudvolConfig::socket_path`] instead of TCP.
    #[ortho_config(default = false)]
    pub sock: bool,
    /// Unix socket path used when `sock` is set.
    #[ortho_config(default = DEFAULT_SOCKET_PATH.to_owned())]
    pub socket_path: String,
    /// Directory under which `<mount_root>/<name>` mount points are created.
    #[ortho_config(default = DEFAULT_MOUNT_ROOT.to_owned())]
    pub mount_root: String,
    /// Host filesystem root when running inside a container. Detected as
    /// `/host` when unset and `/.dockerenv` exists.
    pub host_root: Option<String>,
    /// Project override; read from the metadata server when unset.
    pub project: Option<String>,
    /// Zone override; read from the metadata server when unset.
    pub zone: Option<String>,
    /// Instance name override; read from the metadata server when unset.
    pub instance: Option<String>,
    /// Log filter used when `RUST_LOG` is unset.
    #[ortho_config(default = DEFAULT_LOG_LEVEL.to_owned())]
    pub log_level: String,
}

impl Default for CloudvolConfig {
    fn default() -> Self {
        Self {
            mode: DEFAULT_MODE.to_owned(),
            port: DEFAULT_PORT,
            sock: false,
            socket_path: DEFAULT_SOCKET_PATH.to_owned(),
            mount_root: DEFAULT_MOUNT_ROOT.to_owned(),
            host_root: None,
            project: None,
            zone: None,
            instance: None,
            log_level: DEFAULT_LOG_LEVEL.to_owned(),
        }
    }
}

/// Values supplied on the command line, applied over loaded configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigOverrides {
    /// Replaces `mode`.
    pub mode: Option<String>,
    /// Replaces `port`.
    pub port: Option<u16>,
    /// Forces Unix socket mode when set.
    pub sock: bool,
}

impl CloudvolConfig {
    /// Loads configuration from defaults, files and environment variables
    /// without parsing process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("cloudvol")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies command-line values over the loaded configuration.
    #[must_use]
    pub fn with_overrides(self, overrides: ConfigOverrides) -> Self {
        Self {
            mode: overrides.mode.unwrap_or(self.mode),
            port: overrides.port.unwrap_or(self.port),
            sock: self.sock || overrides.sock,
            ..self
        }
    }

    /// Performs semantic validation of every field used at start-up.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage_mode()?;
        self.mount_root_path()?;
        self.listen_target()?;
        Ok(())
    }

    /// Parses the configured storage backend.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownMode`] for anything but `gce`.
    pub fn storage_mode(&self) -> Result<StorageMode, ConfigError> {
        self.mode.parse()
    }

    /// Returns the mount root as an absolute path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMountRoot`] when the value is blank or
    /// relative.
    pub fn mount_root_path(&self) -> Result<Utf8PathBuf, ConfigError> {
        let value = self.mount_root.trim();
        if value.is_empty() {
            return Err(ConfigError::InvalidMountRoot(String::from(
                "mount root is empty: set CLOUDVOL_MOUNT_ROOT or add mount_root to cloudvol.toml",
            )));
        }
        let path = Utf8PathBuf::from(value);
        if path.is_relative() {
            return Err(ConfigError::InvalidMountRoot(format!(
                "mount root '{value}' must be an absolute path"
            )));
        }
        Ok(path)
    }

    /// Returns where the plugin endpoint listens.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPort`] when TCP is selected with port 0,
    /// or [`ConfigError::InvalidSocketPath`] when the socket path is blank.
    pub fn listen_target(&self) -> Result<ListenTarget, ConfigError> {
        if self.sock {
            let path = self.socket_path.trim();
            if path.is_empty() {
                return Err(ConfigError::InvalidSocketPath);
            }
            return Ok(ListenTarget::Unix(Utf8PathBuf::from(path)));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(ListenTarget::Tcp(SocketAddr::new(
            TCP_LISTEN_ADDRESS,
            self.port,
        )))
    }

    /// Returns the host root to re-scope filesystem operations into,
    /// detecting a container from `/.dockerenv` when none is configured.
    #[must_use]
    pub fn host_root_path(&self) -> Option<Utf8PathBuf> {
        self.resolve_host_root(running_in_container())
    }

    /// Like [`CloudvolConfig::host_root_path`] with container detection
    /// supplied by the caller.
    #[must_use]
    pub fn resolve_host_root(&self, in_container: bool) -> Option<Utf8PathBuf> {
        match non_blank(self.host_root.as_deref()) {
            Some(root) => Some(Utf8PathBuf::from(root)),
            None if in_container => Some(Utf8PathBuf::from(CONTAINER_HOST_ROOT)),
            None => None,
        }
    }

    /// Identity components configured instead of discovered.
    #[must_use]
    pub fn identity_overrides(&self) -> IdentityOverrides {
        IdentityOverrides {
            project: non_blank(self.project.as_deref()).map(str::to_owned),
            zone: non_blank(self.zone.as_deref()).map(str::to_owned),
            instance: non_blank(self.instance.as_deref()).map(str::to_owned),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn running_in_container() -> bool {
    Dir::open_ambient_dir(Utf8Path::new("/"), ambient_authority())
        .is_ok_and(|root| root.exists(CONTAINER_MARKER))
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when the storage backend is not recognised.
    #[error("unknown mode '{0}': only 'gce' is supported")]
    UnknownMode(String),
    /// Raised when the mount root is unusable.
    #[error("invalid mount root: {0}")]
    InvalidMountRoot(String),
    /// Raised when TCP is selected without a usable port.
    #[error("invalid port: set CLOUDVOL_PORT or --port to a non-zero value")]
    InvalidPort,
    /// Raised when Unix socket mode is selected without a path.
    #[error("socket path is empty: set CLOUDVOL_SOCKET_PATH or add socket_path to cloudvol.toml")]
    InvalidSocketPath,
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
