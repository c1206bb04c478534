//! Error taxonomy for volume operations.
//!
//! Every reconciler operation returns [`VolumeError`]. Remote and local
//! failures that interrupt a state transition are reported as
//! [`VolumeError::Provider`], tagged with the [`Stage`] that failed so the
//! caller can diagnose the problem without reading the logs.

use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Step of a volume transition that produced a provider failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Fetching the remote disk by name.
    Lookup,
    /// Listing all remote disks.
    List,
    /// Resolving the local mount point of an attached device.
    DeviceLookup,
    /// Attaching the disk to the local instance.
    Attach,
    /// Detaching the disk from the local instance.
    Detach,
    /// Creating the local mount-point directory.
    MountPoint,
    /// Mounting the device.
    Mount,
    /// Unmounting the device.
    Unmount,
    /// Formatting the device.
    Format,
    /// Resolving a disk type through the cache.
    DiskType,
    /// Creating the remote disk.
    CreateDisk,
    /// Deleting the remote disk.
    Delete,
}

impl Stage {
    /// Returns the human-readable stage label used in error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::List => "list",
            Self::DeviceLookup => "device lookup",
            Self::Attach => "attach",
            Self::Detach => "detach",
            Self::MountPoint => "mount point",
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Format => "format",
            Self::DiskType => "disk type",
            Self::CreateDisk => "create disk",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the volume reconciler.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VolumeError {
    /// Raised when the named disk does not exist remotely.
    #[error("volume '{name}' not found")]
    NotFound {
        /// Volume name used for the lookup.
        name: String,
    },
    /// Raised when a requested disk type does not exist in the zone.
    #[error("disk type '{name}' not found in zone {zone}")]
    DiskTypeNotFound {
        /// Disk type name passed by the caller.
        name: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Raised by `mount` when the volume is already mounted. No side effect
    /// took place; `path` is the existing mount point.
    #[error("volume '{name}' already mounted on '{path}'")]
    AlreadyMounted {
        /// Volume name.
        name: String,
        /// Existing mount point.
        path: Utf8PathBuf,
    },
    /// Raised by `unmount` when the volume is not mounted.
    #[error("volume '{name}' not mounted")]
    NotMounted {
        /// Volume name.
        name: String,
    },
    /// Raised when a create option is unrecognised or has an invalid value.
    #[error("invalid option '{key}': {reason}")]
    InvalidOption {
        /// Offending option key.
        key: String,
        /// Why the option was rejected.
        reason: String,
    },
    /// Raised when a remote call, a remote operation, or a local command
    /// fails part-way through a transition.
    #[error("{stage} failed for volume '{name}': {message}")]
    Provider {
        /// Volume name.
        name: String,
        /// Step that failed.
        stage: Stage,
        /// Underlying failure rendered as text.
        message: String,
    },
    /// Raised when removal is requested for a mounted volume.
    #[error("volume '{name}' is in use, mounted on '{path}'")]
    InUse {
        /// Volume name.
        name: String,
        /// Current mount point.
        path: Utf8PathBuf,
    },
    /// Raised when the backend does not offer the requested operation.
    #[error("{operation} is not supported by this backend")]
    NotSupported {
        /// Operation name.
        operation: &'static str,
    },
}

impl VolumeError {
    /// Builds a [`VolumeError::Provider`] from any displayable failure.
    pub fn provider(name: &str, stage: Stage, err: impl fmt::Display) -> Self {
        Self::Provider {
            name: name.to_owned(),
            stage,
            message: err.to_string(),
        }
    }

    /// Returns the failing stage for provider errors.
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::Provider { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
