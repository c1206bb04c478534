//! Production filesystem adapter.

use std::ffi::OsString;
use std::io;
use std::os::unix::fs::PermissionsExt;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::Permissions;
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::debug;

use super::command::{CommandRunner, ProcessCommandRunner, render_command};
use super::mounts::{find_mount_point, parse_mount_table};
use super::{Filesystem, FsError};

/// Mount namespace of the host init process, relative to the host root.
pub const HOST_MOUNT_NAMESPACE: &str = "proc/1/ns/mnt";

/// Options passed to every `mount` invocation.
pub const MOUNT_OPTIONS: &str = "defaults,discard";

const LOCAL_MOUNT_TABLE: &str = "/proc/self/mounts";
const HOST_MOUNT_TABLE: &str = "proc/1/mounts";

/// Filesystem adapter for the machine the process runs on.
///
/// With a root set the process is assumed to run in a container that sees
/// the host filesystem under that root: directory operations are resolved
/// beneath it and commands run through `nsenter` in the host mount
/// namespace, receiving host paths.
#[derive(Clone, Debug, Default)]
pub struct HostFilesystem<R = ProcessCommandRunner> {
    root: Option<Utf8PathBuf>,
    runner: R,
}

impl HostFilesystem<ProcessCommandRunner> {
    /// Creates an adapter operating directly on `/`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_runner(None, ProcessCommandRunner)
    }

    /// Creates an adapter that reaches the host through `root`.
    #[must_use]
    pub fn rooted(root: impl Into<Utf8PathBuf>) -> Self {
        Self::with_runner(Some(root.into()), ProcessCommandRunner)
    }
}

impl<R: CommandRunner> HostFilesystem<R> {
    /// Creates an adapter with an explicit command runner.
    ///
    /// A root of `/` or an empty root is treated as no root.
    #[must_use]
    pub fn with_runner(root: Option<Utf8PathBuf>, runner: R) -> Self {
        let normalised = root
            .map(|path| Utf8PathBuf::from(path.as_str().trim_end_matches('/')))
            .filter(|path| !path.as_str().is_empty());
        Self {
            root: normalised,
            runner,
        }
    }

    /// Host root, when operations are re-scoped.
    #[must_use]
    pub fn root(&self) -> Option<&Utf8Path> {
        self.root.as_deref()
    }

    /// Returns the command runner.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        match &self.root {
            Some(root) => root.join(path.as_str().trim_start_matches('/')),
            None => path.to_path_buf(),
        }
    }

    fn to_host_path(&self, path: Utf8PathBuf) -> Utf8PathBuf {
        let Some(root) = &self.root else {
            return path;
        };
        let relative = path
            .strip_prefix(root)
            .ok()
            .map(|rel| Utf8Path::new("/").join(rel));
        relative.unwrap_or(path)
    }

    fn mount_table_path(&self) -> Utf8PathBuf {
        match &self.root {
            Some(root) => root.join(HOST_MOUNT_TABLE),
            None => Utf8PathBuf::from(LOCAL_MOUNT_TABLE),
        }
    }

    fn exec(&self, program: &str, args: &[&str]) -> Result<(), FsError> {
        let mut argv: Vec<OsString> = Vec::with_capacity(args.len() + 3);
        let command = match &self.root {
            Some(root) => {
                argv.push(OsString::from(format!(
                    "--mount={}",
                    root.join(HOST_MOUNT_NAMESPACE)
                )));
                argv.push(OsString::from("--"));
                argv.push(OsString::from(program));
                "nsenter"
            }
            None => program,
        };
        argv.extend(args.iter().map(OsString::from));

        let rendered = render_command(command, &argv);
        debug!(command = %rendered, "running filesystem command");
        let output = self.runner.run(command, &argv)?;
        if output.is_success() {
            Ok(())
        } else {
            Err(FsError::Execution {
                command: rendered,
                output: output.combined(),
            })
        }
    }
}

fn split_parent(path: &Utf8Path) -> Result<(&Utf8Path, &str), FsError> {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => Ok((parent, name)),
        _ => Err(FsError::Io {
            path: path.to_path_buf(),
            message: String::from("path has no parent directory"),
        }),
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> FsError {
    FsError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn open_dir(path: &Utf8Path) -> io::Result<Dir> {
    Dir::open_ambient_dir(path, ambient_authority())
}

impl<R: CommandRunner> Filesystem for HostFilesystem<R> {
    fn dir_exists(&self, dir: &Utf8Path) -> Result<bool, FsError> {
        let resolved = self.resolve(dir);
        let (parent, name) = split_parent(&resolved)?;
        match open_dir(parent) {
            Ok(handle) => Ok(handle.is_dir(name)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&resolved, &err)),
        }
    }

    fn create_dir(&self, dir: &Utf8Path, recursive: bool, mode: u32) -> Result<(), FsError> {
        let resolved = self.resolve(dir);
        let (parent, name) = split_parent(&resolved)?;
        if recursive {
            Dir::create_ambient_dir_all(parent, ambient_authority())
                .map_err(|err| io_error(parent, &err))?;
        }
        let handle = open_dir(parent).map_err(|err| io_error(parent, &err))?;
        if recursive && handle.is_dir(name) {
            return Ok(());
        }
        match handle.create_dir(name) {
            Ok(()) => {}
            Err(err) if recursive && err.kind() == io::ErrorKind::AlreadyExists => return Ok(()),
            Err(err) => return Err(io_error(&resolved, &err)),
        }
        let permissions = Permissions::from_std(std::fs::Permissions::from_mode(mode));
        handle
            .set_permissions(name, permissions)
            .map_err(|err| io_error(&resolved, &err))
    }

    fn remove_dir(&self, dir: &Utf8Path, recursive: bool) -> Result<(), FsError> {
        let resolved = self.resolve(dir);
        let (parent, name) = split_parent(&resolved)?;
        let handle = match open_dir(parent) {
            Ok(handle) => handle,
            Err(err) if recursive && err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(io_error(&resolved, &err)),
        };
        let result = if recursive {
            handle.remove_dir_all(name)
        } else {
            handle.remove_dir(name)
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if recursive && err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&resolved, &err)),
        }
    }

    fn mount(&self, device: &Utf8Path, target: &Utf8Path) -> Result<(), FsError> {
        self.exec(
            "mount",
            &["-o", MOUNT_OPTIONS, device.as_str(), target.as_str()],
        )
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), FsError> {
        self.exec("umount", &[target.as_str()])
    }

    fn format(&self, device: &Utf8Path) -> Result<(), FsError> {
        self.exec("mkfs.ext4", &[device.as_str()])
    }

    fn mount_point(&self, device: &Utf8Path) -> Result<Option<Utf8PathBuf>, FsError> {
        let resolved = self.resolve(device);
        let canonical = resolved
            .canonicalize_utf8()
            .map_err(|err| io_error(&resolved, &err))?;
        let host_device = self.to_host_path(canonical);

        let table_path = self.mount_table_path();
        let (table_dir, table_name) = split_parent(&table_path)?;
        let content = open_dir(table_dir)
            .and_then(|handle| handle.read_to_string(table_name))
            .map_err(|err| io_error(&table_path, &err))?;
        let entries = parse_mount_table(&content)?;
        Ok(find_mount_point(&entries, &[device, host_device.as_path()]))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::symlink;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;
    use crate::test_support::ScriptedRunner;

    struct RootedHost {
        _tmp: TempDir,
        root: Utf8PathBuf,
        runner: ScriptedRunner,
        fs: HostFilesystem<ScriptedRunner>,
    }

    #[fixture]
    fn host() -> RootedHost {
        let tmp = TempDir::new().expect("temp dir");
        let canonical = tmp.path().canonicalize().expect("canonical temp dir");
        let root = Utf8PathBuf::from_path_buf(canonical).expect("utf8 path");
        let runner = ScriptedRunner::new();
        let fs = HostFilesystem::with_runner(Some(root.clone()), runner.clone());
        RootedHost {
            _tmp: tmp,
            root,
            runner,
            fs,
        }
    }

    #[rstest]
    fn recursive_create_applies_mode_and_tolerates_existing(host: RootedHost) {
        let dir = Utf8Path::new("/mnt/nested/data");
        host.fs.create_dir(dir, true, 0o700).expect("create dir");
        host.fs.create_dir(dir, true, 0o700).expect("create dir again");

        let meta = fs::metadata(host.root.join("mnt/nested/data")).expect("metadata");
        assert_eq!(meta.permissions().mode() & 0o777, 0o700);
        assert!(host.fs.dir_exists(dir).expect("dir exists"));
    }

    #[rstest]
    fn plain_create_rejects_existing_directory(host: RootedHost) {
        let dir = Utf8Path::new("/data");
        host.fs.create_dir(dir, false, 0o755).expect("create dir");
        let err = host.fs.create_dir(dir, false, 0o755).expect_err("second create fails");
        assert!(matches!(err, FsError::Io { .. }));
    }

    #[rstest]
    fn dir_exists_is_false_for_missing_parent(host: RootedHost) {
        assert!(!host.fs.dir_exists(Utf8Path::new("/missing/child")).expect("lookup"));
    }

    #[rstest]
    fn plain_remove_refuses_non_empty_directory(host: RootedHost) {
        fs::create_dir_all(host.root.join("mnt/data/lost+found")).expect("seed dirs");
        let err = host
            .fs
            .remove_dir(Utf8Path::new("/mnt/data"), false)
            .expect_err("non-empty directory kept");
        assert!(matches!(err, FsError::Io { .. }));
        assert!(host.root.join("mnt/data/lost+found").exists());
    }

    #[rstest]
    fn recursive_remove_tolerates_missing_directory(host: RootedHost) {
        host.fs
            .remove_dir(Utf8Path::new("/mnt/gone"), true)
            .expect("missing dir is fine");
    }

    #[rstest]
    fn mount_runs_in_host_namespace_with_host_paths(host: RootedHost) {
        host.runner.push_success();
        host.fs
            .mount(
                Utf8Path::new("/dev/disk/by-id/google-data"),
                Utf8Path::new("/mnt/data"),
            )
            .expect("mount succeeds");

        let calls = host.runner.invocations();
        let call = calls.first().expect("one invocation");
        assert_eq!(call.program, "nsenter");
        assert_eq!(
            call.command_string(),
            format!(
                "nsenter --mount={}/proc/1/ns/mnt -- mount -o defaults,discard /dev/disk/by-id/google-data /mnt/data",
                host.root
            )
        );
    }

    #[test]
    fn unrooted_commands_run_directly() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let fs = HostFilesystem::with_runner(Some(Utf8PathBuf::from("/")), runner.clone());
        assert!(fs.root().is_none());
        fs.unmount(Utf8Path::new("/mnt/data")).expect("umount succeeds");
        let calls = runner.invocations();
        assert_eq!(
            calls.first().map(|call| call.command_string()),
            Some(String::from("umount /mnt/data"))
        );
    }

    #[rstest]
    fn failed_format_reports_command_and_output(host: RootedHost) {
        host.runner.push_output(Some(1), "", "mkfs.ext4: device busy\n");
        let err = host
            .fs
            .format(Utf8Path::new("/dev/disk/by-id/google-data"))
            .expect_err("format fails");
        let FsError::Execution { command, output } = err else {
            panic!("expected execution error, got {err:?}");
        };
        assert!(command.contains("mkfs.ext4 /dev/disk/by-id/google-data"));
        assert_eq!(output, "mkfs.ext4: device busy\n");
    }

    #[rstest]
    fn mount_point_follows_device_symlink(host: RootedHost) {
        fs::create_dir_all(host.root.join("dev/disk/by-id")).expect("dev dirs");
        fs::write(host.root.join("dev/sdb"), b"").expect("device node");
        fs::write(host.root.join("dev/sdc"), b"").expect("device node");
        symlink("../../sdb", host.root.join("dev/disk/by-id/google-data")).expect("symlink");
        symlink("../../sdc", host.root.join("dev/disk/by-id/google-idle")).expect("symlink");
        fs::create_dir_all(host.root.join("proc/1")).expect("proc dir");
        fs::write(
            host.root.join("proc/1/mounts"),
            "/dev/sda1 / ext4 rw 0 0\n/dev/sdb /mnt/data ext4 rw,discard 0 0\n",
        )
        .expect("mount table");

        let mounted = host
            .fs
            .mount_point(Utf8Path::new("/dev/disk/by-id/google-data"))
            .expect("lookup succeeds");
        assert_eq!(mounted, Some(Utf8PathBuf::from("/mnt/data")));

        let idle = host
            .fs
            .mount_point(Utf8Path::new("/dev/disk/by-id/google-idle"))
            .expect("lookup succeeds");
        assert_eq!(idle, None);
    }

    #[rstest]
    fn mount_point_fails_for_unknown_device(host: RootedHost) {
        let err = host
            .fs
            .mount_point(Utf8Path::new("/dev/disk/by-id/google-absent"))
            .expect_err("unknown device");
        assert!(matches!(err, FsError::Io { .. }));
    }
}
