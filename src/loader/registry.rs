//! In-memory lookup tables shared by the loader and the tier resolvers

use crate::hash::ArchiveId;
use crate::pointer::{ContentId, Pointer};
use dashmap::DashMap;
use std::path::PathBuf;

/// What the current process knows about archives and content.
///
/// The loader fills it while resolving pointers; tier resolvers consult it
/// on a miss (where to download an archive, how to expand content).
#[derive(Debug, Default)]
pub struct Registry {
    urls: DashMap<ArchiveId, String>,
    pointers: DashMap<ContentId, Pointer>,
    prefetched: DashMap<ArchiveId, PathBuf>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a URL that serves `id`; the first URL registered wins
    pub fn register_url(&self, id: ArchiveId, url: impl Into<String>) {
        self.urls.entry(id).or_insert_with(|| url.into());
    }

    pub fn url(&self, id: &ArchiveId) -> Option<String> {
        self.urls.get(id).map(|url| url.value().clone())
    }

    /// Remember the pointer describing how `id` is expanded
    pub fn register_pointer(&self, id: ContentId, pointer: Pointer) {
        self.pointers.entry(id).or_insert(pointer);
    }

    pub fn pointer(&self, id: &ContentId) -> Option<Pointer> {
        self.pointers.get(id).map(|pointer| pointer.value().clone())
    }

    /// Record an archive that was downloaded before its hash was known
    pub fn add_prefetched(&self, id: ArchiveId, path: PathBuf) {
        self.prefetched.insert(id, path);
    }

    /// Path of a prefetched archive that has not been published yet
    pub fn prefetched(&self, id: &ArchiveId) -> Option<PathBuf> {
        self.prefetched
            .get(id)
            .map(|path| path.value().clone())
            .filter(|path| path.exists())
    }

    pub fn remove_prefetched(&self, id: &ArchiveId) -> Option<PathBuf> {
        self.prefetched.remove(id).map(|(_, path)| path)
    }
}
