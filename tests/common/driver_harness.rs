//! Shared reconciler harness for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing the harness under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/driver_harness.rs"]
//! mod driver_harness;
//! ```

use cloudvol::VolumeDriver;
use cloudvol::identity::InstanceIdentity;
use cloudvol::test_support::{FakeDiskService, MemoryFilesystem};

/// Directory under which test volumes are mounted.
pub const MOUNT_ROOT: &str = "/mnt";

/// Project of the fake local instance.
pub const PROJECT: &str = "proj";

/// Zone of the fake local instance.
pub const ZONE: &str = "europe-west1-b";

/// Name of the fake local instance.
pub const INSTANCE: &str = "node-1";

/// Driver wired to in-memory doubles, with handles on the doubles.
pub struct Harness {
    /// Fake disk service shared with the driver.
    pub service: FakeDiskService,
    /// Fake filesystem shared with the driver.
    pub fs: MemoryFilesystem,
    /// Driver under test.
    pub driver: VolumeDriver<FakeDiskService, MemoryFilesystem>,
}

/// Builds a fresh harness with no disks.
pub fn harness() -> Harness {
    let identity = InstanceIdentity::new(PROJECT, ZONE, INSTANCE);
    let service = FakeDiskService::new(identity.clone());
    let fs = MemoryFilesystem::new();
    let driver = VolumeDriver::new(service.clone(), fs.clone(), identity, MOUNT_ROOT);
    Harness {
        service,
        fs,
        driver,
    }
}

/// Device path for an attachment named `device_name`.
pub fn device(device_name: &str) -> String {
    format!("/dev/disk/by-id/google-{device_name}")
}

/// Mount point of `name` under [`MOUNT_ROOT`].
pub fn mount_point(name: &str) -> String {
    format!("{MOUNT_ROOT}/{name}")
}
