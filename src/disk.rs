//! Cloud disk capability consumed by the volume reconciler.
//!
//! [`DiskService`] is the narrow seam between the reconciler and a cloud
//! provider. Project and zone scoping belong to the implementation; callers
//! only pass disk and instance names. Calls that start asynchronous remote
//! work return an [`Operation`] handle which the caller polls through
//! [`DiskService::get_operation`].

use std::future::Future;
use std::pin::Pin;

/// Future returned by disk service operations.
pub type DiskFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Remote disk as reported by the provider.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Disk {
    /// Disk name, unique within the zone.
    pub name: String,
    /// Canonical resource URI used as the attachment source.
    pub self_link: String,
    /// Provisioned size in gigabytes.
    pub size_gb: u64,
    /// URIs of the instances the disk is attached to.
    pub users: Vec<String>,
    /// Resource URI of the disk type, when reported.
    pub disk_type: Option<String>,
}

/// A disk attachment as listed on an instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttachedDisk {
    /// Device name exposed to the guest under `/dev/disk/by-id`.
    pub device_name: String,
    /// Resource URI of the attached disk.
    pub source: String,
}

/// Compute instance details relevant to disk attachment.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceInfo {
    /// Instance name.
    pub name: String,
    /// Canonical resource URI.
    pub self_link: String,
    /// Disks currently attached.
    pub disks: Vec<AttachedDisk>,
}

impl InstanceInfo {
    /// Returns the attachment whose source is `disk_link`.
    #[must_use]
    pub fn attachment_for(&self, disk_link: &str) -> Option<&AttachedDisk> {
        self.disks.iter().find(|disk| disk.source == disk_link)
    }
}

/// Disk type descriptor.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DiskType {
    /// Type name, for example `pd-ssd`.
    pub name: String,
    /// Resource URI passed when creating a disk of this type.
    pub self_link: String,
}

/// Parameters for creating a disk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiskSpec {
    /// Disk name.
    pub name: String,
    /// Size in gigabytes.
    pub size_gb: u64,
    /// Resolved disk type URI; the provider default applies when absent.
    pub disk_type: Option<String>,
}

/// Parameters for attaching a disk to an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachRequest {
    /// Device name the guest sees.
    pub device_name: String,
    /// Resource URI of the disk.
    pub source: String,
}

/// Progress of a remote operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OperationStatus {
    /// Queued by the provider.
    Pending,
    /// In progress.
    Running,
    /// Finished, successfully or not.
    Done,
    /// Status string the adapter did not recognise.
    Other(String),
}

impl From<&str> for OperationStatus {
    fn from(value: &str) -> Self {
        match value {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "DONE" => Self::Done,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Handle to an asynchronous remote operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Operation {
    /// Provider operation name.
    pub name: String,
    /// Resource the operation acts upon.
    pub target_link: String,
    /// Last observed status.
    pub status: OperationStatus,
    /// Error reported by a finished operation.
    pub error: Option<String>,
}

impl Operation {
    /// Returns `true` once the provider reports the operation finished.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.status, OperationStatus::Done)
    }
}

/// Remote disk operations required by the reconciler.
pub trait DiskService {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists every disk in the zone, in provider order.
    fn list_disks(&self) -> DiskFuture<'_, Vec<Disk>, Self::Error>;

    /// Fetches a disk by name, returning `None` when it does not exist.
    fn get_disk<'a>(&'a self, name: &'a str) -> DiskFuture<'a, Option<Disk>, Self::Error>;

    /// Fetches an instance by name.
    fn get_instance<'a>(&'a self, name: &'a str) -> DiskFuture<'a, InstanceInfo, Self::Error>;

    /// Starts attaching a disk to the named instance.
    fn attach_disk<'a>(
        &'a self,
        instance: &'a str,
        request: &'a AttachRequest,
    ) -> DiskFuture<'a, Operation, Self::Error>;

    /// Starts detaching the device from the named instance.
    fn detach_disk<'a>(
        &'a self,
        instance: &'a str,
        device_name: &'a str,
    ) -> DiskFuture<'a, Operation, Self::Error>;

    /// Starts creating a disk.
    fn create_disk<'a>(&'a self, spec: &'a DiskSpec) -> DiskFuture<'a, Operation, Self::Error>;

    /// Starts deleting a disk.
    fn delete_disk<'a>(&'a self, name: &'a str) -> DiskFuture<'a, Operation, Self::Error>;

    /// Lists every disk type available in the zone, following pagination.
    fn list_disk_types(&self) -> DiskFuture<'_, Vec<DiskType>, Self::Error>;

    /// Re-fetches the current state of an operation.
    fn get_operation<'a>(
        &'a self,
        operation: &'a Operation,
    ) -> DiskFuture<'a, Operation, Self::Error>;

    /// Whether [`DiskService::delete_disk`] is available on this backend.
    fn supports_delete(&self) -> bool {
        true
    }
}
