//! Per-volume mutual exclusion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async mutex per volume name.
///
/// Entries nobody holds or waits on are pruned whenever a new lock is
/// requested, so the table stays proportional to in-flight operations.
#[derive(Debug, Default)]
pub struct VolumeLocks {
    table: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl VolumeLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `name`.
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.retain(|_, entry| Arc::strong_count(entry) > 1);
            Arc::clone(table.entry(name.to_owned()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of names currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
