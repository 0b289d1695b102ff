//! Loader: the entry point for fetching content
//!
//! Callers hand in pointers (URL plus expansion kind) or infos (pointer
//! plus known hash). The loader maps URLs to archive ids, drives the tier
//! chain, and records what it learns in two persistent side-indexes so the
//! next run skips the network.

pub mod download;
pub mod expand;
pub mod index;
pub mod registry;

use crate::error::{LfxError, LfxResult};
use crate::hash::ArchiveId;
use crate::pointer::{Content, ContentId, Info, Metadata, Pointer};
use crate::progress::Progress;
use crate::store::{fsutil, ImmutableDirectory, LockPolicy};
use crate::tier::{LoadAction, TierChain, TierDirs, TierOptions};
use download::{Downloaded, Fetcher, HttpFetcher};
use expand::ExpandOptions;
use index::{InfoIndex, UrlIndex, UrlRecord};
use registry::Registry;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Everything needed to build a [`Loader`]
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub dirs: TierDirs,
    pub lock_policy: LockPolicy,
    pub download_timeout: Duration,
    pub expand: ExpandOptions,
}

impl LoaderOptions {
    /// Default timeouts and lock policy over `dirs`
    pub fn new(dirs: TierDirs) -> Self {
        Self {
            dirs,
            lock_policy: LockPolicy::default(),
            download_timeout: Duration::from_secs(crate::config::DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            expand: ExpandOptions::default(),
        }
    }
}

/// Count and byte total of one category of work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EffortBucket {
    pub count: usize,
    pub bytes: u64,
}

impl EffortBucket {
    fn add(&mut self, bytes: u64) {
        self.count += 1;
        self.bytes += bytes;
    }
}

/// Pre-flight estimate of the work needed to materialize a set of infos
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadEffort {
    /// Distinct content ids by the action that would produce them
    pub by_action: BTreeMap<LoadAction, EffortBucket>,
    /// Distinct URLs whose archive id is not known yet
    pub unknown_urls: EffortBucket,
    /// Inputs without resolvable metadata
    pub unresolved: Vec<Info>,
}

impl LoadEffort {
    /// Work that is not already cached
    pub fn pending(&self) -> EffortBucket {
        self.by_action
            .iter()
            .filter(|(action, _)| !action.is_cached())
            .fold(self.unknown_urls, |mut total, (_, bucket)| {
                total.count += bucket.count;
                total.bytes += bucket.bytes;
                total
            })
    }
}

/// Size summary of one store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub name: String,
    pub root: PathBuf,
    pub read_only: bool,
    pub entries: usize,
    pub bytes: u64,
}

/// Snapshot of every store the loader manages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheDump {
    pub stores: Vec<StoreSummary>,
    pub infos: Vec<Info>,
}

/// Content loader over a tier chain
pub struct Loader {
    tiers: TierChain,
    registry: Arc<Registry>,
    fetcher: Arc<dyn Fetcher>,
    urls: UrlIndex,
    infos: InfoIndex,
    progress: Progress,
}

impl Loader {
    /// Loader downloading over HTTP(S) and `file://`
    pub fn new(options: &LoaderOptions) -> LfxResult<Self> {
        Self::with_fetcher(options, Arc::new(HttpFetcher::new(options.download_timeout)))
    }

    /// Loader with a custom fetcher
    pub fn with_fetcher(options: &LoaderOptions, fetcher: Arc<dyn Fetcher>) -> LfxResult<Self> {
        let progress = Progress::new();
        let registry = Arc::new(Registry::new());
        let tier_options = TierOptions {
            lock_policy: options.lock_policy,
            expand: options.expand.clone(),
        };
        let tiers = TierChain::build(
            &options.dirs,
            registry.clone(),
            fetcher.clone(),
            &tier_options,
            progress.clone(),
        )?;
        Ok(Self {
            tiers,
            registry,
            fetcher,
            urls: UrlIndex::open(&options.dirs.cache_dir, options.lock_policy)?,
            infos: InfoIndex::open(&options.dirs.cache_dir, options.lock_policy)?,
            progress,
        })
    }

    /// Hub receiving download, copy and expand events
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn tiers(&self) -> &TierChain {
        &self.tiers
    }

    /// Materialize the content behind `pointer`.
    ///
    /// An unseen URL is downloaded first to learn its hash; those bytes are
    /// then handed to the archive tier instead of being fetched again.
    pub async fn get_or_load(&self, pointer: &Pointer) -> LfxResult<Content> {
        let url = pointer.require_url()?;

        if let Some(record) = self.urls.get(url).await? {
            debug!("{} is archive {}", url, record.archive_id);
            return self
                .resolve(pointer, record.archive_id, record.size)
                .await;
        }

        let staging = self.tiers.archive().store().stage()?;
        let target = staging.path().join("download");
        let downloaded = self.fetcher.fetch(url, &target, &self.progress).await?;
        self.registry.add_prefetched(downloaded.hash, target);

        let result = self.resolve(pointer, downloaded.hash, downloaded.size).await;
        self.registry.remove_prefetched(&downloaded.hash);
        let content = result?;

        self.urls
            .put(&UrlRecord::new(url, downloaded.hash, downloaded.size))
            .await?;
        Ok(content)
    }

    /// Materialize the content behind `info`, verifying the recorded hash
    /// if the archive has to be downloaded.
    pub async fn get_or_load_info(&self, info: &Info) -> LfxResult<Content> {
        match info.metadata {
            Some(metadata) => {
                self.resolve(&info.pointer, metadata.archive_id, metadata.compressed_size)
                    .await
            }
            None => self.get_or_load(&info.pointer).await,
        }
    }

    async fn resolve(&self, pointer: &Pointer, archive_id: ArchiveId, size: u64) -> LfxResult<Content> {
        let id = pointer.content_id(archive_id);
        self.registry.register_pointer(id, pointer.clone());
        if let Some(url) = &pointer.url {
            self.registry.register_url(archive_id, url.clone());
        }

        let path = self
            .tiers
            .get_or_load_content(&id)
            .await?
            .ok_or_else(|| LfxError::not_found(id.key()))?;

        let mut metadata = Metadata::new(archive_id, size);
        if id.kind.is_expanded() {
            metadata.expanded_size = Some(self.expanded_size(&id, &path).await?);
        }
        let content = Content::new(Info::resolved(pointer.clone(), metadata), &path)?;
        if !content.path.exists() {
            return Err(LfxError::PathNotFound(content.path));
        }
        self.infos.put(&id, &content.info).await?;

        info!("Loaded {} at {}", id, content.path.display());
        Ok(content)
    }

    async fn expanded_size(&self, id: &ContentId, path: &Path) -> LfxResult<u64> {
        let recorded = self
            .infos
            .get(id)
            .await?
            .and_then(|i| i.metadata)
            .and_then(|m| m.expanded_size);
        if let Some(size) = recorded {
            return Ok(size);
        }
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            fsutil::tree_size(&path).map_err(|e| LfxError::io(format!("sizing {}", path.display()), e))
        })
        .await
        .map_err(|e| LfxError::Internal(format!("size task failed: {}", e)))?
    }

    /// Archive id and size for `info` from its metadata or the URL index
    async fn known_archive(&self, info: &Info) -> LfxResult<Option<(ArchiveId, u64)>> {
        if let Some(metadata) = info.metadata {
            return Ok(Some((metadata.archive_id, metadata.compressed_size)));
        }
        let Some(url) = &info.pointer.url else {
            return Ok(None);
        };
        Ok(self.urls.get(url).await?.map(|r| (r.archive_id, r.size)))
    }

    /// Cached content for `info`, without downloading or expanding
    pub async fn try_get_content(&self, info: &Info) -> LfxResult<Option<Content>> {
        let Some((archive_id, size)) = self.known_archive(info).await? else {
            return Ok(None);
        };
        let id = info.pointer.content_id(archive_id);
        let Some(path) = self.tiers.try_get_content(&id)? else {
            return Ok(None);
        };

        let metadata = match self.infos.get(&id).await? {
            Some(Info {
                metadata: Some(metadata),
                ..
            }) => metadata,
            _ => info.metadata.unwrap_or_else(|| Metadata::new(archive_id, size)),
        };
        let content = Content::new(Info::resolved(info.pointer.clone(), metadata), &path)?;
        Ok(content.path.exists().then_some(content))
    }

    /// What fetching `info` would have to do
    pub async fn load_action(&self, info: &Info) -> LfxResult<LoadAction> {
        let id = self
            .known_archive(info)
            .await?
            .map(|(archive_id, _)| info.pointer.content_id(archive_id));
        self.tiers.load_action(info.pointer.kind, id.as_ref())
    }

    /// Aggregate load actions over many infos, counting each content id
    /// and each unknown URL once.
    pub async fn load_effort(&self, infos: &[Info]) -> LfxResult<LoadEffort> {
        let mut effort = LoadEffort::default();
        let mut seen_content = HashSet::new();
        let mut seen_urls = HashSet::new();

        for info in infos {
            let Some((archive_id, size)) = self.known_archive(info).await? else {
                effort.unresolved.push(info.clone());
                if let Some(url) = &info.pointer.url {
                    if seen_urls.insert(url.clone()) {
                        effort.unknown_urls.add(0);
                    }
                }
                continue;
            };

            let id = info.pointer.content_id(archive_id);
            if !seen_content.insert(id) {
                continue;
            }
            let action = self.tiers.load_action(info.pointer.kind, Some(&id))?;
            let bytes = match self.infos.get(&id).await? {
                Some(Info {
                    metadata: Some(metadata),
                    ..
                }) => metadata.content_size(),
                _ => size,
            };
            effort.by_action.entry(action).or_default().add(bytes);
        }
        Ok(effort)
    }

    /// Download `url` into the archive tier and record it in the URL index
    pub async fn download(&self, url: &str) -> LfxResult<Downloaded> {
        if let Some(record) = self.urls.get(url).await? {
            if self.tiers.archive().try_get_path(&record.archive_id.to_hex())?.is_some() {
                return Ok(Downloaded {
                    hash: record.archive_id,
                    size: record.size,
                });
            }
        }

        let store = self.tiers.archive().store();
        let staging = store.stage()?;
        let target = staging.path().join("download");
        let downloaded = self.fetcher.fetch(url, &target, &self.progress).await?;
        store.move_in(&target, &downloaded.hash.to_hex()).await?;

        self.registry.register_url(downloaded.hash, url);
        self.urls
            .put(&UrlRecord::new(url, downloaded.hash, downloaded.size))
            .await?;
        Ok(downloaded)
    }

    fn stores(&self) -> impl Iterator<Item = &ImmutableDirectory> {
        self.tiers
            .directories()
            .map(|d| d.store())
            .chain([self.urls.store(), self.infos.store()])
    }

    /// Remove staging directories orphaned by crashed runs
    pub async fn clean(&self) -> LfxResult<usize> {
        let mut removed = 0;
        for store in self.stores() {
            removed += store.clean().await?;
        }
        Ok(removed)
    }

    /// Delete everything in the writable stores
    pub async fn clear(&self) -> LfxResult<()> {
        for store in self.stores().filter(|s| !s.is_read_only()) {
            info!("Clearing {}", store.root().display());
            store.clear().await?;
        }
        Ok(())
    }

    /// Summaries of every store plus all recorded infos
    pub async fn dump(&self) -> LfxResult<CacheDump> {
        let names = self
            .tiers
            .directories()
            .map(|d| d.name().to_string())
            .chain([index::URL_INDEX_DIR.to_string(), index::INFO_INDEX_DIR.to_string()]);

        let mut stores = Vec::new();
        for (name, store) in names.zip(self.stores()) {
            let entries = store.entries()?;
            let bytes = entries
                .iter()
                .filter_map(|p| std::fs::symlink_metadata(p).ok())
                .map(|m| m.len())
                .sum();
            stores.push(StoreSummary {
                name,
                root: store.root().to_path_buf(),
                read_only: store.is_read_only(),
                entries: entries.len(),
                bytes,
            });
        }
        Ok(CacheDump {
            stores,
            infos: self.infos.all().await?,
        })
    }
}
