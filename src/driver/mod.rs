//! Volume state reconciler.
//!
//! [`VolumeDriver`] derives each volume's state afresh from the disk service
//! and the local mount table, then drives the transitions a request needs:
//! attach, format and mount on the way up; unmount and detach on the way
//! down. Nothing is persisted between calls apart from the disk-type cache,
//! so a failed transition leaves the next call to rediscover the true state.
//!
//! State-changing operations run under a per-name lock; different volumes
//! proceed concurrently.

mod locks;

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, instrument, warn};

use crate::disk::{AttachRequest, DiskService, DiskSpec};
use crate::disk_types::{DiskTypeCache, DiskTypeError};
use crate::error::{Stage, VolumeError};
use crate::fs::Filesystem;
use crate::identity::InstanceIdentity;
use crate::volume::{CreateOptions, Volume};
use crate::wait::OperationWaiter;

pub use locks::VolumeLocks;

/// Prefix of the stable device path of an attached disk.
pub const DEVICE_PATH_PREFIX: &str = "/dev/disk/by-id/google-";

/// Permission bits of mount-point directories.
pub const MOUNT_POINT_MODE: u32 = 0o700;

/// Volume name used in provider errors raised by [`VolumeDriver::list`].
pub const ALL_VOLUMES: &str = "*";

/// Returns the device path for an attachment named `device_name`.
#[must_use]
pub fn device_path(device_name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{DEVICE_PATH_PREFIX}{device_name}"))
}

/// Remote and local facts gathered for one volume.
#[derive(Debug)]
struct Observed {
    volume: Volume,
    disk_link: String,
    device_name: String,
    device_path: Utf8PathBuf,
}

/// Reconciles named volumes against a disk service and the local host.
#[derive(Debug)]
pub struct VolumeDriver<D, F> {
    service: D,
    filesystem: F,
    identity: InstanceIdentity,
    mount_root: Utf8PathBuf,
    waiter: OperationWaiter,
    disk_types: DiskTypeCache,
    locks: VolumeLocks,
}

impl<D, F> VolumeDriver<D, F>
where
    D: DiskService + Send + Sync,
    F: Filesystem + Send + Sync,
{
    /// Creates a driver mounting volumes under `mount_root`.
    #[must_use]
    pub fn new(
        service: D,
        filesystem: F,
        identity: InstanceIdentity,
        mount_root: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            service,
            filesystem,
            identity,
            mount_root: mount_root.into(),
            waiter: OperationWaiter::default(),
            disk_types: DiskTypeCache::new(),
            locks: VolumeLocks::new(),
        }
    }

    /// Replaces the operation waiter.
    #[must_use]
    pub const fn with_waiter(mut self, waiter: OperationWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    /// Identity of the local instance.
    #[must_use]
    pub const fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    /// Mount point used for `name`.
    #[must_use]
    pub fn mount_path_for(&self, name: &str) -> Utf8PathBuf {
        self.mount_root.join(name)
    }

    /// Lists every disk in the zone as a volume.
    ///
    /// `ready` reflects attachment to this instance; mount points are not
    /// resolved, so `path` is always `None`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Provider`] when the listing fails; no partial
    /// result is returned.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Volume>, VolumeError> {
        let disks = self
            .service
            .list_disks()
            .await
            .map_err(|err| VolumeError::provider(ALL_VOLUMES, Stage::List, err))?;
        Ok(disks
            .into_iter()
            .map(|disk| Volume {
                ready: self.identity.is_attached(&disk.users),
                name: disk.name,
                path: None,
            })
            .collect())
    }

    /// Returns the current state of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotFound`] when the disk does not exist and
    /// [`VolumeError::Provider`] when the lookup fails or an attached disk's
    /// device cannot be resolved locally.
    #[instrument(skip(self))]
    pub async fn get(&self, name: &str) -> Result<Volume, VolumeError> {
        self.observe(name).await.map(|observed| observed.volume)
    }

    /// Attaches and mounts `name`, returning the mount point.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::AlreadyMounted`] carrying the existing path
    /// when nothing needed doing, and [`VolumeError::Provider`] when attach
    /// or mount fails. A failed mount leaves the disk attached.
    #[instrument(skip(self))]
    pub async fn mount(&self, name: &str) -> Result<Utf8PathBuf, VolumeError> {
        let _guard = self.locks.acquire(name).await;
        let observed = self.observe(name).await?;
        if let Some(path) = observed.volume.path {
            return Err(VolumeError::AlreadyMounted {
                name: name.to_owned(),
                path,
            });
        }
        let device = if observed.volume.ready {
            observed.device_path
        } else {
            self.attach(name, &observed.disk_link).await?
        };
        self.mount_device(name, &device)
    }

    /// Unmounts and detaches `name`.
    ///
    /// Failing to remove the mount-point directory is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotMounted`] when there is nothing to unmount
    /// and [`VolumeError::Provider`] when unmount or detach fails. A failed
    /// unmount stops before any directory removal or detach.
    #[instrument(skip(self))]
    pub async fn unmount(&self, name: &str) -> Result<(), VolumeError> {
        let _guard = self.locks.acquire(name).await;
        let observed = self.observe(name).await?;
        let Some(path) = observed.volume.path else {
            return Err(VolumeError::NotMounted {
                name: name.to_owned(),
            });
        };

        self.filesystem
            .unmount(&path)
            .map_err(|err| VolumeError::provider(name, Stage::Unmount, err))?;
        info!(volume = %name, path = %path, "unmounted volume");

        if let Err(err) = self.filesystem.remove_dir(&path, false) {
            warn!(volume = %name, path = %path, error = %err, "failed to remove mount point");
        }

        self.detach(name, &observed.device_name).await
    }

    /// Creates, attaches, formats and mounts a new disk.
    ///
    /// Options are validated before any remote call. Later failures are not
    /// rolled back; the disk may remain created but unattached.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidOption`] for a bad option,
    /// [`VolumeError::DiskTypeNotFound`] for an unknown disk type and
    /// [`VolumeError::Provider`] tagged with the failing stage otherwise.
    #[instrument(skip(self, options))]
    pub async fn create(
        &self,
        name: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<Volume, VolumeError> {
        let parsed = CreateOptions::parse(options)?;
        let _guard = self.locks.acquire(name).await;

        let disk_type = self
            .resolve_disk_type(name, parsed.disk_type.as_deref())
            .await?;
        let spec = DiskSpec {
            name: name.to_owned(),
            size_gb: parsed.size_gb,
            disk_type,
        };
        info!(volume = %name, size_gb = spec.size_gb, "creating disk");
        let operation = self
            .service
            .create_disk(&spec)
            .await
            .map_err(|err| VolumeError::provider(name, Stage::CreateDisk, err))?;
        self.waiter
            .wait(&self.service, &operation)
            .await
            .map_err(|err| VolumeError::provider(name, Stage::CreateDisk, err))?;

        let observed = self.observe(name).await?;
        let device = if observed.volume.ready {
            observed.device_path
        } else {
            self.attach(name, &observed.disk_link).await?
        };
        self.filesystem
            .format(&device)
            .map_err(|err| VolumeError::provider(name, Stage::Format, err))?;
        let path = self.mount_device(name, &device)?;

        Ok(Volume {
            name: name.to_owned(),
            path: Some(path),
            ready: true,
        })
    }

    /// Deletes the remote disk backing `name`, detaching it first if it is
    /// still attached to this instance.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotSupported`] when the backend cannot delete
    /// disks, [`VolumeError::InUse`] while the volume is mounted, and
    /// [`VolumeError::Provider`] when detach or delete fails.
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> Result<(), VolumeError> {
        if !self.service.supports_delete() {
            return Err(VolumeError::NotSupported {
                operation: "remove",
            });
        }
        let _guard = self.locks.acquire(name).await;
        let observed = self.observe(name).await?;
        if let Some(path) = observed.volume.path {
            return Err(VolumeError::InUse {
                name: name.to_owned(),
                path,
            });
        }
        if observed.volume.ready {
            self.detach(name, &observed.device_name).await?;
        }

        info!(volume = %name, "deleting disk");
        let operation = self
            .service
            .delete_disk(name)
            .await
            .map_err(|err| VolumeError::provider(name, Stage::Delete, err))?;
        self.waiter
            .wait(&self.service, &operation)
            .await
            .map_err(|err| VolumeError::provider(name, Stage::Delete, err))
    }

    async fn observe(&self, name: &str) -> Result<Observed, VolumeError> {
        let disk = self
            .service
            .get_disk(name)
            .await
            .map_err(|err| VolumeError::provider(name, Stage::Lookup, err))?
            .ok_or_else(|| VolumeError::NotFound {
                name: name.to_owned(),
            })?;

        if !self.identity.is_attached(&disk.users) {
            return Ok(Observed {
                volume: Volume::detached(name),
                device_name: name.to_owned(),
                device_path: device_path(name),
                disk_link: disk.self_link,
            });
        }

        let device_name = self.attached_device_name(name, &disk.self_link).await;
        let device = device_path(&device_name);
        let path = self
            .filesystem
            .mount_point(&device)
            .map_err(|err| VolumeError::provider(name, Stage::DeviceLookup, err))?;
        Ok(Observed {
            volume: Volume {
                name: name.to_owned(),
                path,
                ready: true,
            },
            device_name,
            device_path: device,
            disk_link: disk.self_link,
        })
    }

    async fn attached_device_name(&self, name: &str, disk_link: &str) -> String {
        match self.service.get_instance(self.identity.instance()).await {
            Ok(instance) => instance
                .attachment_for(disk_link)
                .map_or_else(|| name.to_owned(), |attached| attached.device_name.clone()),
            Err(err) => {
                warn!(volume = %name, error = %err, "instance lookup failed, using volume name as device name");
                name.to_owned()
            }
        }
    }

    async fn attach(&self, name: &str, disk_link: &str) -> Result<Utf8PathBuf, VolumeError> {
        let request = AttachRequest {
            device_name: name.to_owned(),
            source: disk_link.to_owned(),
        };
        info!(volume = %name, instance = %self.identity.instance(), "attaching disk");
        let operation = self
            .service
            .attach_disk(self.identity.instance(), &request)
            .await
            .map_err(|err| VolumeError::provider(name, Stage::Attach, err))?;
        self.waiter
            .wait(&self.service, &operation)
            .await
            .map_err(|err| VolumeError::provider(name, Stage::Attach, err))?;
        Ok(device_path(&request.device_name))
    }

    async fn detach(&self, name: &str, device_name: &str) -> Result<(), VolumeError> {
        info!(volume = %name, device = %device_name, "detaching disk");
        let operation = self
            .service
            .detach_disk(self.identity.instance(), device_name)
            .await
            .map_err(|err| VolumeError::provider(name, Stage::Detach, err))?;
        self.waiter
            .wait(&self.service, &operation)
            .await
            .map_err(|err| VolumeError::provider(name, Stage::Detach, err))
    }

    fn mount_device(&self, name: &str, device: &Utf8Path) -> Result<Utf8PathBuf, VolumeError> {
        let target = self.mount_path_for(name);
        self.filesystem
            .create_dir(&target, true, MOUNT_POINT_MODE)
            .map_err(|err| VolumeError::provider(name, Stage::MountPoint, err))?;
        self.filesystem
            .mount(device, &target)
            .map_err(|err| VolumeError::provider(name, Stage::Mount, err))?;
        info!(volume = %name, device = %device, path = %target, "mounted volume");
        Ok(target)
    }

    async fn resolve_disk_type(
        &self,
        name: &str,
        requested: Option<&str>,
    ) -> Result<Option<String>, VolumeError> {
        let Some(type_name) = requested else {
            return Ok(None);
        };
        match self.disk_types.resolve(&self.service, type_name).await {
            Ok(disk_type) => Ok(Some(disk_type.self_link)),
            Err(DiskTypeError::NotFound { name: missing }) => Err(VolumeError::DiskTypeNotFound {
                name: missing,
                zone: self.identity.zone().to_owned(),
            }),
            Err(err @ DiskTypeError::Listing { .. }) => {
                Err(VolumeError::provider(name, Stage::DiskType, err))
            }
        }
    }
}
