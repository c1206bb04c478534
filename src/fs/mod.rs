//! Local filesystem capability.
//!
//! [`Filesystem`] covers the directory and block-device operations the
//! reconciler needs. [`HostFilesystem`] is the production adapter: directory
//! work goes through `cap-std`, while `mount`, `umount` and `mkfs.ext4` are
//! run through a [`CommandRunner`], optionally inside the host mount
//! namespace.

mod command;
mod host;
mod mounts;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

pub use command::{CommandOutput, CommandRunner, ProcessCommandRunner, render_command};
pub use host::{HOST_MOUNT_NAMESPACE, HostFilesystem, MOUNT_OPTIONS};
pub use mounts::{MountEntry, find_mount_point, parse_mount_table};

/// Errors raised by filesystem operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FsError {
    /// Raised when a command exits unsuccessfully.
    #[error("{command} failed\noutput: {output}")]
    Execution {
        /// Rendered command line.
        command: String,
        /// Combined stdout and stderr.
        output: String,
    },
    /// Raised when a command cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// Operating system error.
        message: String,
    },
    /// Raised when a directory or file operation fails.
    #[error("{path}: {message}")]
    Io {
        /// Path the operation acted upon.
        path: Utf8PathBuf,
        /// Operating system error.
        message: String,
    },
    /// Raised when the mount table contains a malformed line.
    #[error("malformed mount table line: {line}")]
    MountTable {
        /// Offending line.
        line: String,
    },
}

/// Directory and block-device operations against the local host.
pub trait Filesystem {
    /// Returns `true` when `dir` exists and is a directory.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Io`] when existence cannot be determined.
    fn dir_exists(&self, dir: &Utf8Path) -> Result<bool, FsError>;

    /// Creates `dir` with permission bits `mode`.
    ///
    /// Recursive creation tolerates an existing directory and creates
    /// missing parents.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Io`] when the directory cannot be created.
    fn create_dir(&self, dir: &Utf8Path, recursive: bool, mode: u32) -> Result<(), FsError>;

    /// Removes `dir`. Recursive removal deletes contents and tolerates a
    /// missing directory.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Io`] when the directory cannot be removed.
    fn remove_dir(&self, dir: &Utf8Path, recursive: bool) -> Result<(), FsError>;

    /// Mounts the block `device` at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Execution`] when the mount command fails.
    fn mount(&self, device: &Utf8Path, target: &Utf8Path) -> Result<(), FsError>;

    /// Unmounts whatever is mounted at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Execution`] when the unmount command fails.
    fn unmount(&self, target: &Utf8Path) -> Result<(), FsError>;

    /// Creates an ext4 filesystem on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::Execution`] when formatting fails.
    fn format(&self, device: &Utf8Path) -> Result<(), FsError>;

    /// Returns where `device` is mounted, or `None` when it is not.
    ///
    /// # Errors
    ///
    /// Returns an error when the device cannot be resolved or the mount
    /// table cannot be read.
    fn mount_point(&self, device: &Utf8Path) -> Result<Option<Utf8PathBuf>, FsError>;
}
