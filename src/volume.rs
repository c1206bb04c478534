//! Volume data model and `create` option parsing.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::VolumeError;

/// Disk size used when `sizeGb` is not supplied.
pub const DEFAULT_SIZE_GB: u64 = 10;

/// Option key selecting the disk size in gigabytes.
pub const OPTION_SIZE_GB: &str = "sizeGb";

/// Option key selecting the disk type by name.
pub const OPTION_TYPE: &str = "type";

/// A named volume as exposed to callers.
///
/// `path` is only ever set while `ready` is true: a disk must be attached to
/// the local instance before it can be mounted.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Volume {
    /// Volume name; matches the remote disk name.
    pub name: String,
    /// Local mount point, `None` while unmounted.
    pub path: Option<Utf8PathBuf>,
    /// Whether the disk is attached to the local instance.
    pub ready: bool,
}

impl Volume {
    /// Creates a volume that is neither attached nor mounted.
    #[must_use]
    pub fn detached(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            ready: false,
        }
    }

    /// Returns the mount point, if any.
    #[must_use]
    pub fn mount_path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    /// Returns the observed state of the volume.
    #[must_use]
    pub const fn state(&self) -> VolumeState {
        match (self.ready, self.path.is_some()) {
            (true, true) => VolumeState::AttachedMounted,
            (true, false) => VolumeState::AttachedUnmounted,
            (false, _) => VolumeState::Detached,
        }
    }
}

/// State of a volume as observed from the disk service and the local mount
/// table. States are recomputed on every call and never persisted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VolumeState {
    /// The disk exists but is not attached to this instance.
    Detached,
    /// The disk is attached but no mount point was found for its device.
    AttachedUnmounted,
    /// The disk is attached and its device is mounted.
    AttachedMounted,
}

/// Validated options for `create`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateOptions {
    /// Disk size in gigabytes.
    pub size_gb: u64,
    /// Disk type name, resolved through the disk-type cache.
    pub disk_type: Option<String>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            size_gb: DEFAULT_SIZE_GB,
            disk_type: None,
        }
    }
}

impl CreateOptions {
    /// Parses a flat option map against the recognised schema.
    ///
    /// Keys are visited in sorted order so the first offending key reported
    /// is stable.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidOption`] naming the key when a key is not
    /// recognised, `sizeGb` is not a positive integer, or `type` is blank.
    pub fn parse(options: &BTreeMap<String, String>) -> Result<Self, VolumeError> {
        let mut parsed = Self::default();
        for (key, value) in options {
            match key.as_str() {
                OPTION_SIZE_GB => parsed.size_gb = parse_size(key, value)?,
                OPTION_TYPE => {
                    let name = value.trim();
                    if name.is_empty() {
                        return Err(invalid(key, "disk type must not be empty"));
                    }
                    parsed.disk_type = Some(name.to_owned());
                }
                _ => return Err(invalid(key, "unrecognised option")),
            }
        }
        Ok(parsed)
    }
}

fn parse_size(key: &str, value: &str) -> Result<u64, VolumeError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(invalid(key, "size must be greater than zero")),
        Ok(size) => Ok(size),
        Err(err) => Err(invalid(key, &format!("'{value}' is not an integer: {err}"))),
    }
}

fn invalid(key: &str, reason: &str) -> VolumeError {
    VolumeError::InvalidOption {
        key: key.to_owned(),
        reason: reason.to_owned(),
    }
}
