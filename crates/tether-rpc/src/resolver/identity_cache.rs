//! Identity cache for object resolution.
//!
//! Maps an object identity (uuid) to a weak pointer to the live object, or
//! to the fact that the identity resolved to nothing. Positive entries never
//! keep an object alive: an entry whose object has been dropped is detected
//! on access and evicted, and the lookup falls through to a fresh scan.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tether_core::object::{ObjectHandle, WeakObjectHandle};

/// Cache of resolved object identities.
///
/// Every read-modify-write happens under one lock; a miss resolves while
/// holding it, so concurrent resolutions of the same identity scan once.
///
/// # Example
///
/// ```ignore
/// let cache = IdentityCache::new();
/// let object = cache.get_or_resolve("0b0f..", || scan_documents("0b0f.."));
/// assert_eq!(cache.stats().misses, 1);
/// ```
#[derive(Debug, Default)]
pub struct IdentityCache {
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    /// `None` records a resolution that found nothing.
    entries: HashMap<String, Option<WeakObjectHandle>>,
    stats: IdentityCacheStats,
}

/// Counters describing cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityCacheStats {
    /// Lookups answered from the cache, including negative entries.
    pub hits: u64,
    /// Lookups that had to resolve.
    pub misses: u64,
    /// Positive entries found pointing at a dropped object.
    pub stale_evictions: u64,
    /// Entries removed through invalidation.
    pub invalidations: u64,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached resolution of `uuid`, or the result of `resolve` which is then
    /// cached (found or not).
    pub fn get_or_resolve<F>(&self, uuid: &str, resolve: F) -> Option<ObjectHandle>
    where
        F: FnOnce() -> Option<ObjectHandle>,
    {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        match inner.entries.get(uuid) {
            Some(None) => {
                inner.stats.hits += 1;
                return None;
            }
            Some(Some(weak)) => match weak.upgrade() {
                Some(object) => {
                    inner.stats.hits += 1;
                    return Some(object);
                }
                None => {
                    inner.entries.remove(uuid);
                    inner.stats.stale_evictions += 1;
                }
            },
            None => {}
        }

        inner.stats.misses += 1;
        let resolved = resolve();
        inner
            .entries
            .insert(uuid.to_string(), resolved.as_ref().map(ObjectHandle::downgrade));
        resolved
    }

    /// Cached entry for `uuid` without resolving.
    ///
    /// Returns `None` when there is no entry, `Some(None)` for a negative
    /// entry.
    pub fn peek(&self, uuid: &str) -> Option<Option<ObjectHandle>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .entries
            .get(uuid)
            .map(|entry| entry.as_ref().and_then(WeakObjectHandle::upgrade))
    }

    /// Remove the entry for `uuid`.
    pub fn invalidate(&self, uuid: &str) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = inner.entries.remove(uuid).is_some();
        if removed {
            inner.stats.invalidations += 1;
        }
        removed
    }

    /// Remove the entries of `root` and all of its descendants.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn invalidate_subtree(&self, root: &ObjectHandle) -> usize {
        let uuids: Vec<String> = root
            .descendants_and_self()
            .iter()
            .map(|o| o.uuid().to_string())
            .collect();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0;
        for uuid in uuids {
            if inner.entries.remove(&uuid).is_some() {
                count += 1;
            }
        }
        inner.stats.invalidations += count as u64;
        count
    }

    /// Drop every "resolved to none" entry.
    pub fn clear_negative(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_some());
        let count = before - inner.entries.len();
        inner.stats.invalidations += count as u64;
        count
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> IdentityCacheStats {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).stats
    }
}
