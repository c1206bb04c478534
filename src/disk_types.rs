//! Self-invalidating cache of zone disk types.
//!
//! The mapping is either absent or fully populated. A lookup that misses
//! drops the whole mapping, reloads it with one listing, and treats a second
//! miss as definitive. The lock is never held across the remote listing, so
//! concurrent misses can at worst trigger redundant reloads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::debug;

use crate::disk::{DiskService, DiskType};

/// Errors raised while resolving a disk type.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DiskTypeError {
    /// Raised when the type does not exist after a fresh reload.
    #[error("disk type '{name}' not found")]
    NotFound {
        /// Requested type name.
        name: String,
    },
    /// Raised when listing disk types fails.
    #[error("failed to list disk types: {message}")]
    Listing {
        /// Provider error.
        message: String,
    },
}

type DiskTypeMap = HashMap<String, DiskType>;

/// Name to descriptor mapping, rebuilt whole on a miss.
#[derive(Debug, Default)]
pub struct DiskTypeCache {
    entries: Mutex<Option<Arc<DiskTypeMap>>>,
}

impl DiskTypeCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Option<Arc<DiskTypeMap>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` when a mapping is populated.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.entries().is_some()
    }

    /// Drops the current mapping.
    pub fn invalidate(&self) {
        self.entries().take();
    }

    fn lookup(&self, name: &str) -> Option<DiskType> {
        self.entries()
            .as_ref()
            .and_then(|map| map.get(name).cloned())
    }

    /// Resolves `name`, reloading at most once.
    ///
    /// # Errors
    ///
    /// Returns [`DiskTypeError::NotFound`] when the type is absent from a
    /// fresh listing and [`DiskTypeError::Listing`] when listing fails.
    pub async fn resolve<S>(&self, service: &S, name: &str) -> Result<DiskType, DiskTypeError>
    where
        S: DiskService + ?Sized,
    {
        if let Some(found) = self.lookup(name) {
            return Ok(found);
        }

        self.invalidate();
        debug!(disk_type = %name, "reloading disk types");
        let listed = service
            .list_disk_types()
            .await
            .map_err(|err| DiskTypeError::Listing {
                message: err.to_string(),
            })?;
        let map: DiskTypeMap = listed
            .into_iter()
            .map(|disk_type| (disk_type.name.clone(), disk_type))
            .collect();
        let found = map.get(name).cloned();
        debug!(count = map.len(), "disk types loaded");
        *self.entries() = Some(Arc::new(map));

        found.ok_or_else(|| DiskTypeError::NotFound {
            name: name.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::identity::InstanceIdentity;
    use crate::test_support::{DiskCall, FakeDiskService};

    #[fixture]
    fn service() -> FakeDiskService {
        let service = FakeDiskService::new(InstanceIdentity::new("proj", "zone-a", "node-1"));
        service.add_disk_type("pd-standard");
        service.add_disk_type("pd-ssd");
        service
    }

    #[rstest]
    #[tokio::test]
    async fn first_lookup_loads_and_later_hits_are_local(service: FakeDiskService) {
        let cache = DiskTypeCache::new();
        assert!(!cache.is_loaded());

        let ssd = cache.resolve(&service, "pd-ssd").await.expect("ssd resolves");
        assert_eq!(ssd.self_link, "projects/proj/zones/zone-a/diskTypes/pd-ssd");
        cache
            .resolve(&service, "pd-standard")
            .await
            .expect("standard resolves");

        assert!(cache.is_loaded());
        assert_eq!(service.count(DiskCall::ListDiskTypes), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn miss_reloads_once_then_reports_not_found(service: FakeDiskService) {
        let cache = DiskTypeCache::new();
        cache.resolve(&service, "pd-ssd").await.expect("warm cache");

        let err = cache
            .resolve(&service, "pd-extreme")
            .await
            .expect_err("unknown type");

        assert_eq!(
            err,
            DiskTypeError::NotFound {
                name: String::from("pd-extreme")
            }
        );
        assert_eq!(service.count(DiskCall::ListDiskTypes), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn miss_picks_up_types_added_since_last_load(service: FakeDiskService) {
        let cache = DiskTypeCache::new();
        cache.resolve(&service, "pd-ssd").await.expect("warm cache");
        service.add_disk_type("pd-balanced");

        let balanced = cache
            .resolve(&service, "pd-balanced")
            .await
            .expect("new type visible after reload");

        assert_eq!(balanced.name, "pd-balanced");
    }

    #[rstest]
    #[tokio::test]
    async fn listing_failure_leaves_cache_empty(service: FakeDiskService) {
        service.fail(DiskCall::ListDiskTypes);
        let cache = DiskTypeCache::new();

        let err = cache
            .resolve(&service, "pd-ssd")
            .await
            .expect_err("listing fails");

        assert!(matches!(err, DiskTypeError::Listing { .. }));
        assert!(!cache.is_loaded());
    }
}
