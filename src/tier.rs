//! Cache tier chain
//!
//! Three kinds of keys are in play: URLs, archive ids (hash of the
//! downloaded bytes) and content ids (one expansion of an archive). The
//! chain composes self-loading directories from cheapest to most expensive:
//!
//! 1. content tier, keyed by content id, expands archives on a miss
//! 2. archive ("bus") tier, keyed by archive id, consults the next tier and
//!    then downloads
//! 3. optional read-only ("lan") archive tier, populated out of band
//!
//! Archive tiers are kept in a flat list with an explicit `next` index.

use crate::error::{LfxError, LfxResult};
use crate::hash::ArchiveId;
use crate::loader::download::Fetcher;
use crate::loader::expand::{self, ExpandOptions};
use crate::loader::registry::Registry;
use crate::pointer::{ContentId, ExpansionKind};
use crate::progress::Progress;
use crate::store::{fsutil, ImmutableDirectory, LoadingDirectory, LockPolicy, Resolver, SyncResolver};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Store directory names under the configured cache directories
pub const CONTENT_DIR: &str = "content";
pub const ARCHIVE_DIR: &str = "archives";

/// How far archive bytes travel to reach the content tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Distance {
    /// Same machine, different partition
    Bus,
    /// Read-only network mirror
    Lan,
    /// Download from the URL
    Wan,
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus => write!(f, "bus"),
            Self::Lan => write!(f, "lan"),
            Self::Wan => write!(f, "wan"),
        }
    }
}

/// Work needed to materialize content once the archive is local
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoadOp {
    /// Content already materialized
    Cached,
    /// Hard link from the archive tier
    None,
    /// Physical copy of a file
    Copy,
    /// Decompression or executable extraction
    Expand,
}

impl fmt::Display for LoadOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached => write!(f, "cached"),
            Self::None => write!(f, "none"),
            Self::Copy => write!(f, "copy"),
            Self::Expand => write!(f, "expand"),
        }
    }
}

/// Classification of what a fetch would have to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadAction {
    pub op: LoadOp,
    /// `None` when the archive is already on the content tier's partition
    pub distance: Option<Distance>,
}

impl LoadAction {
    /// Content already materialized
    pub const CACHED: Self = Self {
        op: LoadOp::Cached,
        distance: None,
    };

    pub fn is_cached(&self) -> bool {
        *self == Self::CACHED
    }
}

impl fmt::Display for LoadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.distance {
            Some(distance) => write!(f, "{}+{}", self.op, distance),
            None => write!(f, "{}", self.op),
        }
    }
}

/// Directories backing the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierDirs {
    /// Expanded content and side indexes
    pub cache_dir: PathBuf,
    /// Writable archive cache
    pub bus_cache_dir: PathBuf,
    /// Optional read-only archive mirror
    pub lan_cache_dir: Option<PathBuf>,
}

/// Tuning for the chain
#[derive(Debug, Clone, Default)]
pub struct TierOptions {
    pub lock_policy: LockPolicy,
    pub expand: ExpandOptions,
}

/// One archive tier in the chain
pub struct TierSlot {
    pub directory: Arc<LoadingDirectory>,
    pub distance: Distance,
    pub next: Option<usize>,
}

/// Content tier plus archive tiers
pub struct TierChain {
    content: Arc<LoadingDirectory>,
    archives: Vec<TierSlot>,
}

impl TierChain {
    /// Build the chain and wire each tier's resolvers.
    ///
    /// A read-only directory equal to the writable archive directory is a
    /// configuration error.
    pub fn build(
        dirs: &TierDirs,
        registry: Arc<Registry>,
        fetcher: Arc<dyn Fetcher>,
        options: &TierOptions,
        progress: Progress,
    ) -> LfxResult<Self> {
        if let Some(lan) = &dirs.lan_cache_dir {
            if same_dir(lan, &dirs.bus_cache_dir) {
                return Err(LfxError::ConfigInvalid {
                    path: lan.clone(),
                    reason: "read-only archive cache must differ from the writable archive cache"
                        .to_string(),
                });
            }
        }

        let content_store = ImmutableDirectory::open(dirs.cache_dir.join(CONTENT_DIR))?
            .with_partition(|key| Ok(ContentId::from_key(key)?.relative_path()))
            .with_lock_policy(options.lock_policy)
            .with_progress(progress.clone());
        let content = LoadingDirectory::new("content", content_store);

        let bus_store = ImmutableDirectory::open(dirs.bus_cache_dir.join(ARCHIVE_DIR))?
            .with_lock_policy(options.lock_policy)
            .with_progress(progress.clone());
        let bus = LoadingDirectory::new("bus", bus_store);
        // Reported as no distance at all when on the content partition
        let mut archives = vec![TierSlot {
            directory: bus.clone(),
            distance: Distance::Bus,
            next: None,
        }];

        if let Some(lan_dir) = &dirs.lan_cache_dir {
            let lan_store = ImmutableDirectory::open_read_only(lan_dir.join(ARCHIVE_DIR))
                .with_progress(progress.clone());
            archives.push(TierSlot {
                directory: LoadingDirectory::new("lan", lan_store),
                distance: Distance::Lan,
                next: None,
            });
            archives[0].next = Some(1);
        }

        // Archive tier: in-memory prefetches, then the next tier, then download
        bus.subscribe_sync(Arc::new(PrefetchResolver {
            registry: registry.clone(),
        }));
        if let Some(next) = archives[0].next {
            bus.subscribe(Arc::new(ParentResolver {
                parent: archives[next].directory.clone(),
            }));
        }
        bus.subscribe(Arc::new(DownloadResolver {
            registry: registry.clone(),
            fetcher,
            progress: progress.clone(),
        }));

        // Content tier: fetch the archive through the chain and expand it
        content.subscribe(Arc::new(ExpandResolver {
            registry,
            archives: bus,
            options: options.expand.clone(),
            progress,
        }));

        info!(
            "Cache tiers: content={} bus={} lan={}",
            dirs.cache_dir.display(),
            dirs.bus_cache_dir.display(),
            dirs.lan_cache_dir
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        );

        Ok(Self { content, archives })
    }

    /// Expanded-content tier
    pub fn content(&self) -> &Arc<LoadingDirectory> {
        &self.content
    }

    /// Writable archive tier (head of the archive chain)
    pub fn archive(&self) -> &Arc<LoadingDirectory> {
        &self.archives[0].directory
    }

    /// All archive tiers, head first
    pub fn archive_tiers(&self) -> &[TierSlot] {
        &self.archives
    }

    /// Every directory in the chain, content first
    pub fn directories(&self) -> impl Iterator<Item = &Arc<LoadingDirectory>> {
        std::iter::once(&self.content).chain(self.archives.iter().map(|slot| &slot.directory))
    }

    /// Path of already-expanded content
    pub fn try_get_content(&self, id: &ContentId) -> LfxResult<Option<PathBuf>> {
        self.content.try_get_path(&id.key())
    }

    /// Expanded content, loading through the chain on a miss
    pub async fn get_or_load_content(&self, id: &ContentId) -> LfxResult<Option<PathBuf>> {
        self.content.try_get_or_load(&id.key()).await
    }

    /// Where the archive bytes for `id` currently are, without loading
    pub fn archive_distance(&self, id: &ArchiveId) -> LfxResult<Option<Distance>> {
        let key = id.to_hex();
        let mut index = Some(0);
        while let Some(i) = index {
            let slot = &self.archives[i];
            if slot.directory.try_get_path(&key)?.is_some() {
                if i == 0 && self.bus_is_local() {
                    return Ok(None);
                }
                return Ok(Some(slot.distance));
            }
            index = slot.next;
        }
        Ok(Some(Distance::Wan))
    }

    /// Classify the work needed to materialize `kind` content whose archive
    /// is `archive` (unknown archive means a download).
    pub fn load_action(
        &self,
        kind: ExpansionKind,
        archive: Option<&ContentId>,
    ) -> LfxResult<LoadAction> {
        let Some(id) = archive else {
            return Ok(LoadAction {
                op: self.op_for(kind),
                distance: Some(Distance::Wan),
            });
        };
        if self.try_get_content(id)?.is_some() {
            return Ok(LoadAction::CACHED);
        }
        Ok(LoadAction {
            op: self.op_for(kind),
            distance: self.archive_distance(&id.archive)?,
        })
    }

    fn op_for(&self, kind: ExpansionKind) -> LoadOp {
        if kind.is_expanded() {
            LoadOp::Expand
        } else if self.bus_is_local() {
            LoadOp::None
        } else {
            LoadOp::Copy
        }
    }

    /// Whether content and archive tiers share a partition (files alias)
    fn bus_is_local(&self) -> bool {
        fsutil::same_partition(self.content.store().root(), self.archive().store().root())
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Serves archives the loader already downloaded to learn their hash
struct PrefetchResolver {
    registry: Arc<Registry>,
}

impl SyncResolver for PrefetchResolver {
    fn resolve(&self, key: &str) -> LfxResult<Option<PathBuf>> {
        let Ok(id) = key.parse::<ArchiveId>() else {
            return Ok(None);
        };
        Ok(self.registry.prefetched(&id))
    }
}

/// Delegates to the next tier in the chain
struct ParentResolver {
    parent: Arc<LoadingDirectory>,
}

#[async_trait]
impl Resolver for ParentResolver {
    async fn resolve(&self, key: &str, _staging: &Path) -> LfxResult<Option<PathBuf>> {
        let found = self.parent.try_get_or_load(key).await?;
        if found.is_some() {
            debug!("Archive {} found in {} tier", key, self.parent.name());
        }
        Ok(found)
    }
}

/// Downloads an archive from its registered URL and verifies its hash
struct DownloadResolver {
    registry: Arc<Registry>,
    fetcher: Arc<dyn Fetcher>,
    progress: Progress,
}

#[async_trait]
impl Resolver for DownloadResolver {
    async fn resolve(&self, key: &str, staging: &Path) -> LfxResult<Option<PathBuf>> {
        let expected: ArchiveId = key.parse()?;
        let Some(url) = self.registry.url(&expected) else {
            debug!("No url registered for archive {}", key);
            return Ok(None);
        };

        let target = staging.join(key);
        let downloaded = self.fetcher.fetch(&url, &target, &self.progress).await?;
        if downloaded.hash != expected {
            return Err(LfxError::HashMismatch {
                source_id: url,
                expected: expected.to_hex(),
                actual: downloaded.hash.to_hex(),
            });
        }
        Ok(Some(target))
    }
}

/// Produces expanded content from the archive tier
struct ExpandResolver {
    registry: Arc<Registry>,
    archives: Arc<LoadingDirectory>,
    options: ExpandOptions,
    progress: Progress,
}

#[async_trait]
impl Resolver for ExpandResolver {
    async fn resolve(&self, key: &str, staging: &Path) -> LfxResult<Option<PathBuf>> {
        let id = ContentId::from_key(key)?;
        let Some(archive) = self.archives.try_get_or_load(&id.archive.to_hex()).await? else {
            return Ok(None);
        };

        if id.kind == ExpansionKind::File {
            // Published by the directory as an alias of the archive
            return Ok(Some(archive));
        }

        let pointer = self.registry.pointer(&id);
        let target = staging.join("content");
        expand::expand(
            id.kind,
            &archive,
            &target,
            pointer.as_ref(),
            &self.options,
            &self.progress,
        )
        .await?;
        Ok(Some(target))
    }
}
