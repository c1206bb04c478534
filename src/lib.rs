//! Core library for the cloudvol Docker volume plugin.
//!
//! Volumes are cloud persistent disks. The [`VolumeDriver`] reconciles each
//! request against the state observed from the [`disk::DiskService`] and the
//! local [`fs::Filesystem`], attaching, formatting and mounting disks on
//! demand. The [`plugin`] module serves it over the Docker volume plugin
//! protocol and [`gce`] provides the Compute Engine backend.

pub mod config;
pub mod disk;
pub mod disk_types;
pub mod driver;
pub mod error;
pub mod fs;
pub mod gce;
pub mod identity;
pub mod logging;
pub mod plugin;
pub mod test_support;
pub mod volume;
pub mod wait;

pub use config::{CloudvolConfig, ConfigError};
pub use disk::DiskService;
pub use driver::VolumeDriver;
pub use error::{Stage, VolumeError};
pub use fs::{Filesystem, FsError, HostFilesystem};
pub use gce::{GceDiskService, GceError};
pub use identity::InstanceIdentity;
pub use volume::{CreateOptions, Volume, VolumeState};
pub use wait::{OperationWaiter, WaitError};
