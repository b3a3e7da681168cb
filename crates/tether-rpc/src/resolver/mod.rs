//! Resolution of object references into live objects.
//!
//! A reference names an object by class keyword and identity. On a cache
//! miss the resolver scans every document (and, in a client role, the
//! locally materialized objects) for objects whose class or ancestor class
//! matches, and takes the first one with the requested identity.

mod identity_cache;

pub use identity_cache::{IdentityCache, IdentityCacheStats};

use crate::directory::DocumentDirectory;
use crate::types::{RpcResult, Status};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tether_core::object::ObjectHandle;
use tether_core::snapshot::ObjectReference;
use tracing::{debug, trace};

/// Objects materialized outside any served document.
pub trait LocalObjects: Send + Sync {
    /// Local objects whose class or ancestor class is `class_keyword`.
    fn objects_of_class(&self, class_keyword: &str) -> Vec<ObjectHandle>;
}

/// Maps object references to live objects.
pub struct ObjectResolver {
    directory: Arc<DocumentDirectory>,
    cache: Arc<IdentityCache>,
    local: Option<Arc<dyn LocalObjects>>,
    scans: AtomicU64,
}

impl ObjectResolver {
    /// Resolver over `directory` with a fresh identity cache.
    pub fn new(directory: Arc<DocumentDirectory>) -> Self {
        Self::with_cache(directory, Arc::new(IdentityCache::new()))
    }

    pub fn with_cache(directory: Arc<DocumentDirectory>, cache: Arc<IdentityCache>) -> Self {
        Self {
            directory,
            cache,
            local: None,
            scans: AtomicU64::new(0),
        }
    }

    /// Also consider locally materialized objects (client role).
    pub fn with_local_objects(mut self, local: Arc<dyn LocalObjects>) -> Self {
        self.local = Some(local);
        self
    }

    /// The live object named by `reference`, if any.
    pub fn resolve(&self, reference: &ObjectReference) -> Option<ObjectHandle> {
        self.cache
            .get_or_resolve(&reference.uuid, || self.scan(reference))
    }

    /// Like [`resolve`](Self::resolve), reporting a miss as `NotFound`.
    pub fn resolve_or_not_found(&self, reference: &ObjectReference) -> RpcResult<ObjectHandle> {
        self.resolve(reference).ok_or_else(|| {
            Status::not_found(format!(
                "Could not find object {} with uuid {}",
                reference.class_keyword, reference.uuid
            ))
        })
    }

    /// Forget the identities of removed objects and their descendants.
    pub fn objects_removed(&self, removed: &[ObjectHandle]) {
        let count: usize = removed
            .iter()
            .map(|object| self.cache.invalidate_subtree(object))
            .sum();
        debug!("Invalidated {} cached identities", count);
    }

    /// New objects entered the tree; identities that used to resolve to
    /// nothing may resolve now.
    pub fn objects_inserted(&self) {
        let count = self.cache.clear_negative();
        debug!("Cleared {} negative identity entries", count);
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    /// Number of tree scans performed so far.
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    fn scan(&self, reference: &ObjectReference) -> Option<ObjectHandle> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        trace!(
            "Scanning for {} with uuid {}",
            reference.class_keyword,
            reference.uuid
        );

        let local = self
            .local
            .iter()
            .flat_map(|local| local.objects_of_class(&reference.class_keyword));
        let documents = self.directory.documents();
        let served = documents
            .iter()
            .flat_map(|document| document.objects_of_class(&reference.class_keyword));

        local.chain(served).find(|object| object.uuid() == reference.uuid)
    }
}
