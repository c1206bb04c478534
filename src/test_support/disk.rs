//! In-memory cloud disk service.

use std::collections::{HashMap, HashSet};
use std::future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

use crate::disk::{
    AttachRequest, AttachedDisk, Disk, DiskFuture, DiskService, DiskSpec, DiskType, InstanceInfo,
    Operation, OperationStatus,
};
use crate::identity::InstanceIdentity;

/// Calls recorded by [`FakeDiskService`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DiskCall {
    /// `list_disks`
    ListDisks,
    /// `get_disk`
    GetDisk,
    /// `get_instance`
    GetInstance,
    /// `attach_disk`
    Attach,
    /// `detach_disk`
    Detach,
    /// `create_disk`
    Create,
    /// `delete_disk`
    Delete,
    /// `list_disk_types`
    ListDiskTypes,
    /// `get_operation`
    GetOperation,
}

impl DiskCall {
    /// Returns `true` for calls that change remote state.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(self, Self::Attach | Self::Detach | Self::Create | Self::Delete)
    }
}

/// Error returned by scripted failures.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FakeDiskError {
    /// The call was scripted to fail.
    #[error("scripted {0:?} failure")]
    Scripted(DiskCall),
    /// A transient status poll failure.
    #[error("transient operation status failure")]
    Transient,
    /// The referenced operation was never issued.
    #[error("unknown operation {0}")]
    UnknownOperation(String),
    /// The referenced disk does not exist.
    #[error("disk {0} not found")]
    MissingDisk(String),
}

#[derive(Debug)]
struct PendingOperation {
    operation: Operation,
    remaining: Option<u32>,
}

#[derive(Debug)]
struct FakeState {
    disks: Vec<Disk>,
    attachments: Vec<AttachedDisk>,
    disk_types: Vec<DiskType>,
    operations: HashMap<String, PendingOperation>,
    next_operation: u32,
    polls_to_complete: Option<u32>,
    operation_error: Option<String>,
    transient_polls: u32,
    poll_delay: Option<Duration>,
    status_polls: u32,
    failures: HashSet<DiskCall>,
    calls: Vec<DiskCall>,
    supports_delete: bool,
    hide_attachments: bool,
}

/// In-memory [`DiskService`] scoped to one instance.
///
/// Attach, detach, create and delete take effect immediately; the returned
/// operation reports `DONE` after a configurable number of polls, or never.
/// Clones share state.
#[derive(Clone, Debug)]
pub struct FakeDiskService {
    identity: InstanceIdentity,
    state: Arc<Mutex<FakeState>>,
}

impl FakeDiskService {
    /// Creates an empty service whose operations finish on the first poll.
    #[must_use]
    pub fn new(identity: InstanceIdentity) -> Self {
        Self {
            identity,
            state: Arc::new(Mutex::new(FakeState {
                disks: Vec::new(),
                attachments: Vec::new(),
                disk_types: Vec::new(),
                operations: HashMap::new(),
                next_operation: 0,
                polls_to_complete: Some(1),
                operation_error: None,
                transient_polls: 0,
                poll_delay: None,
                status_polls: 0,
                failures: HashSet::new(),
                calls: Vec::new(),
                supports_delete: true,
                hide_attachments: false,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resource URI used for the disk `name`.
    #[must_use]
    pub fn disk_link(&self, name: &str) -> String {
        format!(
            "projects/{}/zones/{}/disks/{name}",
            self.identity.project(),
            self.identity.zone()
        )
    }

    /// Adds a detached disk.
    pub fn add_disk(&self, name: &str, size_gb: u64) {
        let disk = Disk {
            name: name.to_owned(),
            self_link: self.disk_link(name),
            size_gb,
            users: Vec::new(),
            disk_type: None,
        };
        self.state().disks.push(disk);
    }

    /// Adds a disk attached to this instance under `device_name`.
    pub fn add_attached_disk(&self, name: &str, device_name: &str) {
        self.add_disk(name, 10);
        let link = self.disk_link(name);
        let mut state = self.state();
        if let Some(disk) = state.disks.iter_mut().find(|disk| disk.name == name) {
            disk.users.push(self.identity.uri().to_owned());
        }
        state.attachments.push(AttachedDisk {
            device_name: device_name.to_owned(),
            source: link,
        });
    }

    /// Adds a disk attached to some other instance.
    pub fn add_foreign_disk(&self, name: &str, user: &str) {
        self.add_disk(name, 10);
        let mut state = self.state();
        if let Some(disk) = state.disks.iter_mut().find(|disk| disk.name == name) {
            disk.users.push(user.to_owned());
        }
    }

    /// Registers a disk type.
    pub fn add_disk_type(&self, name: &str) {
        let self_link = format!(
            "projects/{}/zones/{}/diskTypes/{name}",
            self.identity.project(),
            self.identity.zone()
        );
        self.state().disk_types.push(DiskType {
            name: name.to_owned(),
            self_link,
        });
    }

    /// Sets how many polls an operation needs before reporting `DONE`;
    /// `None` means it never finishes.
    pub fn set_polls_to_complete(&self, polls: Option<u32>) {
        self.state().polls_to_complete = polls;
    }

    /// Makes finished operations carry `message` as their error payload.
    pub fn set_operation_error(&self, message: impl Into<String>) {
        self.state().operation_error = Some(message.into());
    }

    /// Makes the next `count` status polls fail.
    pub fn fail_status_polls(&self, count: u32) {
        self.state().transient_polls = count;
    }

    /// Makes every status poll stall for `delay` before answering.
    pub fn delay_status_polls(&self, delay: Duration) {
        self.state().poll_delay = Some(delay);
    }

    /// Makes every subsequent `call` fail.
    pub fn fail(&self, call: DiskCall) {
        self.state().failures.insert(call);
    }

    /// Clears a failure set with [`FakeDiskService::fail`].
    pub fn recover(&self, call: DiskCall) {
        self.state().failures.remove(&call);
    }

    /// Makes the backend report that deletion is unsupported.
    pub fn disable_delete(&self) {
        self.state().supports_delete = false;
    }

    /// Omits this instance's attachments from `get_instance` responses.
    pub fn hide_attachments(&self) {
        self.state().hide_attachments = true;
    }

    /// Returns every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<DiskCall> {
        self.state().calls.clone()
    }

    /// Counts calls of a given kind.
    #[must_use]
    pub fn count(&self, call: DiskCall) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|made| **made == call)
            .count()
    }

    /// Total number of status polls, including failed ones.
    #[must_use]
    pub fn status_polls(&self) -> u32 {
        self.state().status_polls
    }

    /// Returns the current state of the disk `name`.
    #[must_use]
    pub fn disk(&self, name: &str) -> Option<Disk> {
        self.state()
            .disks
            .iter()
            .find(|disk| disk.name == name)
            .cloned()
    }

    /// Returns `true` when `name` is attached to this instance.
    #[must_use]
    pub fn is_attached(&self, name: &str) -> bool {
        self.disk(name)
            .is_some_and(|disk| self.identity.is_attached(&disk.users))
    }

    fn begin(&self, call: DiskCall) -> Result<MutexGuard<'_, FakeState>, FakeDiskError> {
        let mut state = self.state();
        state.calls.push(call);
        if state.failures.contains(&call) {
            return Err(FakeDiskError::Scripted(call));
        }
        Ok(state)
    }

    fn issue(state: &mut FakeState, kind: &str, target_link: String) -> Operation {
        state.next_operation += 1;
        let operation = Operation {
            name: format!("operation-{kind}-{}", state.next_operation),
            target_link,
            status: OperationStatus::Pending,
            error: None,
        };
        state.operations.insert(
            operation.name.clone(),
            PendingOperation {
                operation: operation.clone(),
                remaining: state.polls_to_complete,
            },
        );
        operation
    }

    fn attach(&self, request: &AttachRequest) -> Result<Operation, FakeDiskError> {
        let mut state = self.begin(DiskCall::Attach)?;
        let uri = self.identity.uri().to_owned();
        let disk = state
            .disks
            .iter_mut()
            .find(|disk| disk.self_link == request.source)
            .ok_or_else(|| FakeDiskError::MissingDisk(request.source.clone()))?;
        if !disk.users.contains(&uri) {
            disk.users.push(uri);
        }
        state.attachments.push(AttachedDisk {
            device_name: request.device_name.clone(),
            source: request.source.clone(),
        });
        Ok(Self::issue(&mut state, "attach", request.source.clone()))
    }

    fn detach(&self, device_name: &str) -> Result<Operation, FakeDiskError> {
        let mut state = self.begin(DiskCall::Detach)?;
        let position = state
            .attachments
            .iter()
            .position(|attached| attached.device_name == device_name)
            .ok_or_else(|| FakeDiskError::MissingDisk(device_name.to_owned()))?;
        let attached = state.attachments.remove(position);
        let uri = self.identity.uri();
        if let Some(disk) = state
            .disks
            .iter_mut()
            .find(|disk| disk.self_link == attached.source)
        {
            disk.users.retain(|user| user != uri);
        }
        Ok(Self::issue(&mut state, "detach", attached.source))
    }

    fn create(&self, spec: &DiskSpec) -> Result<Operation, FakeDiskError> {
        let self_link = self.disk_link(&spec.name);
        let mut state = self.begin(DiskCall::Create)?;
        state.disks.push(Disk {
            name: spec.name.clone(),
            self_link: self_link.clone(),
            size_gb: spec.size_gb,
            users: Vec::new(),
            disk_type: spec.disk_type.clone(),
        });
        Ok(Self::issue(&mut state, "insert", self_link))
    }

    fn delete(&self, name: &str) -> Result<Operation, FakeDiskError> {
        let mut state = self.begin(DiskCall::Delete)?;
        let position = state
            .disks
            .iter()
            .position(|disk| disk.name == name)
            .ok_or_else(|| FakeDiskError::MissingDisk(name.to_owned()))?;
        let disk = state.disks.remove(position);
        Ok(Self::issue(&mut state, "delete", disk.self_link))
    }

    fn poll(&self, operation: &Operation) -> Result<Operation, FakeDiskError> {
        let mut state = self.begin(DiskCall::GetOperation)?;
        state.status_polls += 1;
        if state.transient_polls > 0 {
            state.transient_polls -= 1;
            return Err(FakeDiskError::Transient);
        }
        let error = state.operation_error.clone();
        let pending = state
            .operations
            .get_mut(&operation.name)
            .ok_or_else(|| FakeDiskError::UnknownOperation(operation.name.clone()))?;
        match pending.remaining.as_mut() {
            None => pending.operation.status = OperationStatus::Running,
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    pending.operation.status = OperationStatus::Done;
                    pending.operation.error = error;
                } else {
                    pending.operation.status = OperationStatus::Running;
                }
            }
        }
        Ok(pending.operation.clone())
    }
}

impl DiskService for FakeDiskService {
    type Error = FakeDiskError;

    fn list_disks(&self) -> DiskFuture<'_, Vec<Disk>, Self::Error> {
        let result = self
            .begin(DiskCall::ListDisks)
            .map(|state| state.disks.clone());
        Box::pin(future::ready(result))
    }

    fn get_disk<'a>(&'a self, name: &'a str) -> DiskFuture<'a, Option<Disk>, Self::Error> {
        let result = self
            .begin(DiskCall::GetDisk)
            .map(|state| state.disks.iter().find(|disk| disk.name == name).cloned());
        Box::pin(future::ready(result))
    }

    fn get_instance<'a>(&'a self, name: &'a str) -> DiskFuture<'a, InstanceInfo, Self::Error> {
        let result = self.begin(DiskCall::GetInstance).map(|state| InstanceInfo {
            name: name.to_owned(),
            self_link: self.identity.uri().to_owned(),
            disks: if state.hide_attachments {
                Vec::new()
            } else {
                state.attachments.clone()
            },
        });
        Box::pin(future::ready(result))
    }

    fn attach_disk<'a>(
        &'a self,
        _instance: &'a str,
        request: &'a AttachRequest,
    ) -> DiskFuture<'a, Operation, Self::Error> {
        Box::pin(future::ready(self.attach(request)))
    }

    fn detach_disk<'a>(
        &'a self,
        _instance: &'a str,
        device_name: &'a str,
    ) -> DiskFuture<'a, Operation, Self::Error> {
        Box::pin(future::ready(self.detach(device_name)))
    }

    fn create_disk<'a>(&'a self, spec: &'a DiskSpec) -> DiskFuture<'a, Operation, Self::Error> {
        Box::pin(future::ready(self.create(spec)))
    }

    fn delete_disk<'a>(&'a self, name: &'a str) -> DiskFuture<'a, Operation, Self::Error> {
        Box::pin(future::ready(self.delete(name)))
    }

    fn list_disk_types(&self) -> DiskFuture<'_, Vec<DiskType>, Self::Error> {
        let result = self
            .begin(DiskCall::ListDiskTypes)
            .map(|state| state.disk_types.clone());
        Box::pin(future::ready(result))
    }

    fn get_operation<'a>(
        &'a self,
        operation: &'a Operation,
    ) -> DiskFuture<'a, Operation, Self::Error> {
        let delay = self.state().poll_delay;
        Box::pin(async move {
            if let Some(stall) = delay {
                tokio::time::sleep(stall).await;
            }
            self.poll(operation)
        })
    }

    fn supports_delete(&self) -> bool {
        self.state().supports_delete
    }
}
