//! Self-loading directory
//!
//! Wraps an [`ImmutableDirectory`] with an ordered chain of resolvers that
//! run on a miss. Concurrent misses on the same key share one spawned load,
//! so the chain runs at most once per key at a time. Failed loads are not
//! remembered; the next call starts over.

use crate::error::{ErrorKind, LfxError, LfxResult};
use crate::progress::Progress;
use crate::store::ImmutableDirectory;
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// Cheap, in-memory resolver tried before any [`Resolver`]
pub trait SyncResolver: Send + Sync {
    /// Return a local path holding the content of `key`, if known
    fn resolve(&self, key: &str) -> LfxResult<Option<PathBuf>>;
}

/// Expensive resolver (download, expansion, another tier)
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Produce the content of `key`, returning its local path.
    ///
    /// `staging` is an empty directory on the store's partition, removed
    /// after the load; content written there is published by move.
    async fn resolve(&self, key: &str, staging: &Path) -> LfxResult<Option<PathBuf>>;
}

type LoadResult = Result<Option<PathBuf>, Arc<LfxError>>;
type PendingLoad = Shared<BoxFuture<'static, LoadResult>>;

/// Immutable directory that loads missing keys through a resolver chain
pub struct LoadingDirectory {
    name: String,
    store: ImmutableDirectory,
    sync_resolvers: RwLock<Vec<Arc<dyn SyncResolver>>>,
    resolvers: RwLock<Vec<Arc<dyn Resolver>>>,
    in_flight: Mutex<HashMap<String, PendingLoad>>,
}

impl LoadingDirectory {
    pub fn new(name: impl Into<String>, store: ImmutableDirectory) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            store,
            sync_resolvers: RwLock::new(Vec::new()),
            resolvers: RwLock::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &ImmutableDirectory {
        &self.store
    }

    /// Progress of copies into this directory
    pub fn progress(&self) -> &Progress {
        self.store.progress()
    }

    /// Append a synchronous resolver
    pub fn subscribe_sync(&self, resolver: Arc<dyn SyncResolver>) {
        write_lock(&self.sync_resolvers).push(resolver);
    }

    /// Append an asynchronous resolver
    pub fn subscribe(&self, resolver: Arc<dyn Resolver>) {
        write_lock(&self.resolvers).push(resolver);
    }

    /// Path of `key` if already published; never loads
    pub fn try_get_path(&self, key: &str) -> LfxResult<Option<PathBuf>> {
        self.store.try_get_path(key)
    }

    /// Path of `key`, loading it through the resolver chain on a miss.
    ///
    /// `Ok(None)` means no resolver could produce the key.
    pub async fn try_get_or_load(self: &Arc<Self>, key: &str) -> LfxResult<Option<PathBuf>> {
        if let Some(path) = self.store.try_get_path(key)? {
            return Ok(Some(path));
        }

        let pending = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            // A load may have finished between the fast path and the lock
            if let Some(path) = self.store.try_get_path(key)? {
                return Ok(Some(path));
            }
            in_flight
                .entry(key.to_string())
                .or_insert_with(|| self.start_load(key.to_string()))
                .clone()
        };

        pending.await.map_err(LfxError::Shared)
    }

    /// Like [`try_get_or_load`](Self::try_get_or_load) but a miss is an error
    pub async fn get_or_load(self: &Arc<Self>, key: &str) -> LfxResult<PathBuf> {
        self.try_get_or_load(key)
            .await?
            .ok_or_else(|| LfxError::not_found(format!("{}:{}", self.name, key)))
    }

    fn start_load(self: &Arc<Self>, key: String) -> PendingLoad {
        debug!("[{}] loading {}", self.name, key);
        let this = Arc::clone(self);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = this.load(&task_key).await.map_err(Arc::new);
            this.in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&task_key);
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(LfxError::Internal(format!(
                    "load of {} panicked: {}",
                    key, e
                )))),
            }
        }
        .boxed()
        .shared()
    }

    async fn load(&self, key: &str) -> LfxResult<Option<PathBuf>> {
        let sync_resolvers = read_lock(&self.sync_resolvers).clone();
        for resolver in &sync_resolvers {
            if let Some(path) = resolver.resolve(key)? {
                return self.publish(key, &path).await.map(Some);
            }
        }

        let resolvers = read_lock(&self.resolvers).clone();
        if resolvers.is_empty() {
            return Ok(None);
        }

        let staging = self.store.stage()?;
        let mut last_failure = None;
        for resolver in &resolvers {
            match resolver.resolve(key, staging.path()).await {
                Ok(Some(path)) => return self.publish(key, &path).await.map(Some),
                Ok(None) => {}
                Err(e) if e.kind() == ErrorKind::Resolution => {
                    warn!("[{}] resolver failed for {}: {}", self.name, key, e);
                    last_failure = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        match last_failure {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    async fn publish(&self, key: &str, path: &Path) -> LfxResult<PathBuf> {
        if self.store.is_staged(path) {
            self.store.move_in(path, key).await
        } else {
            self.store.copy(path, key, true).await
        }
    }
}

fn read_lock<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(|e| e.into_inner()).clone()
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Writes `key` as content after a short delay, counting invocations
    struct Counting {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl Resolver for Counting {
        async fn resolve(&self, key: &str, staging: &Path) -> LfxResult<Option<PathBuf>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail_first && call == 0 {
                return Err(LfxError::download("test://flaky", "connection reset"));
            }
            let path = staging.join("out");
            fs::write(&path, key).unwrap();
            Ok(Some(path))
        }
    }

    struct Nothing;

    #[async_trait]
    impl Resolver for Nothing {
        async fn resolve(&self, _key: &str, _staging: &Path) -> LfxResult<Option<PathBuf>> {
            Ok(None)
        }
    }

    struct Known(PathBuf);

    impl SyncResolver for Known {
        fn resolve(&self, _key: &str) -> LfxResult<Option<PathBuf>> {
            Ok(Some(self.0.clone()))
        }
    }

    fn directory(dir: &TempDir) -> Arc<LoadingDirectory> {
        let store = ImmutableDirectory::open(dir.path().join("store")).unwrap();
        LoadingDirectory::new("test", store)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_load_once() {
        let dir = TempDir::new().unwrap();
        let directory = directory(&dir);
        let counting = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_first: false,
        });
        directory.subscribe(counting.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let directory = directory.clone();
            handles.push(tokio::spawn(async move {
                directory.try_get_or_load("abcd0001").await
            }));
        }
        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap().unwrap());
        }

        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        paths.dedup();
        assert_eq!(paths.len(), 1);
        assert_eq!(fs::read_to_string(&paths[0]).unwrap(), "abcd0001");
    }

    #[tokio::test]
    async fn all_resolvers_empty_is_not_found() {
        let dir = TempDir::new().unwrap();
        let directory = directory(&dir);
        directory.subscribe(Arc::new(Nothing));

        assert_eq!(directory.try_get_or_load("abcd0001").await.unwrap(), None);
        let err = directory.get_or_load("abcd0001").await.unwrap_err();
        assert!(matches!(err, LfxError::NotFound { .. }));
    }

    #[tokio::test]
    async fn failures_are_not_memoized() {
        let dir = TempDir::new().unwrap();
        let directory = directory(&dir);
        let counting = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_first: true,
        });
        directory.subscribe(counting.clone());

        let err = directory.try_get_or_load("abcd0001").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resolution);

        let path = directory.try_get_or_load("abcd0001").await.unwrap();
        assert!(path.is_some());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sync_resolvers_run_first_and_copy_external_paths() {
        let dir = TempDir::new().unwrap();
        let directory = directory(&dir);
        let external = dir.path().join("external.bin");
        fs::write(&external, b"known").unwrap();

        let counting = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_first: false,
        });
        directory.subscribe(counting.clone());
        directory.subscribe_sync(Arc::new(Known(external.clone())));

        let path = directory.get_or_load("abcd0001").await.unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"known");
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
        assert!(external.exists());
    }

    #[tokio::test]
    async fn published_keys_skip_resolvers() {
        let dir = TempDir::new().unwrap();
        let directory = directory(&dir);
        let counting = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_first: false,
        });
        directory.subscribe(counting.clone());

        directory.get_or_load("abcd0001").await.unwrap();
        directory.get_or_load("abcd0001").await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }
}
