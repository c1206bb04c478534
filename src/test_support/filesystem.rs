//! In-memory filesystem double.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};

use crate::fs::{Filesystem, FsError};

/// Operations that can be scripted to fail on [`MemoryFilesystem`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FsFailure {
    /// `create_dir`
    CreateDir,
    /// `remove_dir`
    RemoveDir,
    /// `mount`
    Mount,
    /// `unmount`
    Unmount,
    /// `format`
    Format,
    /// `mount_point`
    DeviceLookup,
}

/// Calls recorded by [`MemoryFilesystem`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FsCall {
    /// `dir_exists`
    DirExists(Utf8PathBuf),
    /// `create_dir`
    CreateDir(Utf8PathBuf),
    /// `remove_dir`
    RemoveDir(Utf8PathBuf),
    /// `mount`
    Mount {
        /// Mounted device.
        device: Utf8PathBuf,
        /// Mount point.
        target: Utf8PathBuf,
    },
    /// `unmount`
    Unmount(Utf8PathBuf),
    /// `format`
    Format(Utf8PathBuf),
    /// `mount_point`
    MountPoint(Utf8PathBuf),
}

impl FsCall {
    /// Returns `true` for calls that change local state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        !matches!(self, Self::DirExists(_) | Self::MountPoint(_))
    }
}

#[derive(Debug, Default)]
struct FsState {
    dirs: BTreeSet<Utf8PathBuf>,
    mounts: BTreeMap<Utf8PathBuf, Utf8PathBuf>,
    formatted: BTreeSet<Utf8PathBuf>,
    failures: HashSet<FsFailure>,
    calls: Vec<FsCall>,
}

/// Filesystem double keeping directories and mounts in memory.
///
/// Clones share state.
#[derive(Clone, Debug, Default)]
pub struct MemoryFilesystem {
    state: Arc<Mutex<FsState>>,
}

fn scripted(path: &Utf8Path, operation: &str) -> FsError {
    FsError::Execution {
        command: format!("{operation} {path}"),
        output: String::from("simulated failure"),
    }
}

impl MemoryFilesystem {
    /// Creates an empty filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every subsequent call of `failure` fail.
    pub fn fail(&self, failure: FsFailure) {
        self.state().failures.insert(failure);
    }

    /// Clears a failure set with [`MemoryFilesystem::fail`].
    pub fn recover(&self, failure: FsFailure) {
        self.state().failures.remove(&failure);
    }

    /// Records `device` as mounted on `target`, creating the directory.
    pub fn seed_mount(&self, device: &str, target: &str) {
        let mut state = self.state();
        state.dirs.insert(Utf8PathBuf::from(target));
        state
            .mounts
            .insert(Utf8PathBuf::from(device), Utf8PathBuf::from(target));
    }

    /// Returns every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<FsCall> {
        self.state().calls.clone()
    }

    /// Returns the calls that changed state.
    #[must_use]
    pub fn mutations(&self) -> Vec<FsCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    /// Returns where `device` is mounted.
    #[must_use]
    pub fn mounted_on(&self, device: &str) -> Option<Utf8PathBuf> {
        self.state().mounts.get(Utf8Path::new(device)).cloned()
    }

    /// Returns `true` when `dir` exists.
    #[must_use]
    pub fn has_dir(&self, dir: &str) -> bool {
        self.state().dirs.contains(Utf8Path::new(dir))
    }

    /// Returns `true` when `device` was formatted.
    #[must_use]
    pub fn is_formatted(&self, device: &str) -> bool {
        self.state().formatted.contains(Utf8Path::new(device))
    }

    /// Records `call`; returns `None` when `failure` is scripted.
    fn begin(&self, call: FsCall, failure: Option<FsFailure>) -> Option<MutexGuard<'_, FsState>> {
        let mut state = self.state();
        state.calls.push(call);
        match failure {
            Some(kind) if state.failures.contains(&kind) => None,
            _ => Some(state),
        }
    }
}

impl Filesystem for MemoryFilesystem {
    fn dir_exists(&self, dir: &Utf8Path) -> Result<bool, FsError> {
        let state = self
            .begin(FsCall::DirExists(dir.to_path_buf()), None)
            .ok_or_else(|| scripted(dir, "stat"))?;
        Ok(state.dirs.contains(dir))
    }

    fn create_dir(&self, dir: &Utf8Path, recursive: bool, _mode: u32) -> Result<(), FsError> {
        let mut state = self
            .begin(FsCall::CreateDir(dir.to_path_buf()), Some(FsFailure::CreateDir))
            .ok_or_else(|| scripted(dir, "mkdir"))?;
        if !state.dirs.insert(dir.to_path_buf()) && !recursive {
            return Err(FsError::Io {
                path: dir.to_path_buf(),
                message: String::from("file exists"),
            });
        }
        Ok(())
    }

    fn remove_dir(&self, dir: &Utf8Path, _recursive: bool) -> Result<(), FsError> {
        let mut state = self
            .begin(FsCall::RemoveDir(dir.to_path_buf()), Some(FsFailure::RemoveDir))
            .ok_or_else(|| scripted(dir, "rmdir"))?;
        state.dirs.remove(dir);
        Ok(())
    }

    fn mount(&self, device: &Utf8Path, target: &Utf8Path) -> Result<(), FsError> {
        let call = FsCall::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
        };
        let mut state = self
            .begin(call, Some(FsFailure::Mount))
            .ok_or_else(|| scripted(target, "mount"))?;
        if !state.dirs.contains(target) {
            return Err(FsError::Execution {
                command: format!("mount {device} {target}"),
                output: format!("mount point {target} does not exist"),
            });
        }
        state
            .mounts
            .insert(device.to_path_buf(), target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), FsError> {
        let mut state = self
            .begin(FsCall::Unmount(target.to_path_buf()), Some(FsFailure::Unmount))
            .ok_or_else(|| scripted(target, "umount"))?;
        let before = state.mounts.len();
        state.mounts.retain(|_, mounted| mounted.as_path() != target);
        if state.mounts.len() == before {
            return Err(FsError::Execution {
                command: format!("umount {target}"),
                output: format!("{target}: not mounted"),
            });
        }
        Ok(())
    }

    fn format(&self, device: &Utf8Path) -> Result<(), FsError> {
        let mut state = self
            .begin(FsCall::Format(device.to_path_buf()), Some(FsFailure::Format))
            .ok_or_else(|| scripted(device, "mkfs.ext4"))?;
        state.formatted.insert(device.to_path_buf());
        Ok(())
    }

    fn mount_point(&self, device: &Utf8Path) -> Result<Option<Utf8PathBuf>, FsError> {
        let state = self
            .begin(
                FsCall::MountPoint(device.to_path_buf()),
                Some(FsFailure::DeviceLookup),
            )
            .ok_or_else(|| FsError::Io {
                path: device.to_path_buf(),
                message: String::from("no such file or directory"),
            })?;
        Ok(state.mounts.get(device).cloned())
    }
}
