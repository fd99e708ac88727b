//! Per-source locks shared by every task of one orchestrator.
//!
//! The Docker path stages images through the host's local tag for the source
//! reference. A pull followed by a tag must not interleave with another
//! task's pull of the same reference, and the local source image may only be
//! removed by the last task still using it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

#[derive(Default)]
pub struct SourceLeases {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

struct Entry {
    lock: Arc<AsyncMutex<()>>,
    holders: usize,
}

impl SourceLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the caller as a user of `source` until the lease is dropped.
    pub fn acquire(&self, source: &str) -> SourceLease {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(source.to_string()).or_insert_with(|| Entry {
            lock: Arc::new(AsyncMutex::new(())),
            holders: 0,
        });
        entry.holders += 1;
        SourceLease {
            source: source.to_string(),
            lock: entry.lock.clone(),
            entries: self.entries.clone(),
        }
    }

    /// Number of live leases on `source`.
    pub fn holders(&self, source: &str) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .map_or(0, |e| e.holders)
    }
}

/// One task's claim on a source reference. Released on drop, including when
/// the task is aborted.
pub struct SourceLease {
    source: String,
    lock: Arc<AsyncMutex<()>>,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl SourceLease {
    /// Exclusive use of the local source tag among all leases on it.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Whether no other live lease exists on this source.
    pub fn is_sole_holder(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.source)
            .map_or(true, |e| e.holders <= 1)
    }
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(&self.source) {
            entry.holders = entry.holders.saturating_sub(1);
            if entry.holders == 0 {
                entries.remove(&self.source);
            }
        }
    }
}
