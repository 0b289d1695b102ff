//! Atomic, partitioned key → path store
//!
//! An [`ImmutableDirectory`] maps a key (usually a hash) to a path under its
//! root. Content is staged in a private temp directory on the same
//! partition and then published by rename under a store-wide lock, so once
//! a key is visible its content is complete and never changes.
//!
//! # Layout
//!
//! ```text
//! <root>/<k0k1>/<k2k3>/<key>     published entries (default partition)
//! <root>/.temp/<session>/...     staging, removed by clean()
//! <root>/.lock                   publish lock
//! ```

pub mod fsutil;
pub mod loading;
pub mod lock;

pub use loading::{LoadingDirectory, Resolver, SyncResolver};
pub use lock::{LockPolicy, StoreLock};

use crate::error::{LfxError, LfxResult};
use crate::progress::Progress;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Name of the staging directory under a store root
pub const TEMP_DIR: &str = ".temp";
/// Name of the lock file under a store root
pub const LOCK_FILE: &str = ".lock";

/// Maps a key to a path relative to the store root
pub type PartitionFn = Arc<dyn Fn(&str) -> LfxResult<PathBuf> + Send + Sync>;

/// Default partition: `key[0:2]/key[2:4]/key`
pub fn default_partition(key: &str) -> LfxResult<PathBuf> {
    if key.len() < 4 || !key.is_ascii() {
        return Err(LfxError::InvalidKey {
            key: key.to_string(),
            reason: "partitioned keys need at least 4 ASCII characters".to_string(),
        });
    }
    Ok(PathBuf::from(&key[0..2]).join(&key[2..4]).join(key))
}

/// Temp directory that is deleted when dropped
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if fsutil::entry_exists(&self.path) {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!("Failed to remove staging dir {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Outcome of a publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub path: PathBuf,
    /// False if another writer published the key first
    pub fresh: bool,
}

/// Partitioned directory whose entries are immutable once published
pub struct ImmutableDirectory {
    root: PathBuf,
    temp_root: PathBuf,
    session_dir: PathBuf,
    lock_path: PathBuf,
    partition: PartitionFn,
    lock_policy: LockPolicy,
    progress: Progress,
    read_only: bool,
}

impl ImmutableDirectory {
    /// Open (creating if needed) a writable store at `root`
    pub fn open(root: impl Into<PathBuf>) -> LfxResult<Self> {
        let mut store = Self::layout(root.into(), false);
        store.ensure_dirs()?;
        Ok(store)
    }

    /// Open a store that is never written to; nothing is created on disk
    pub fn open_read_only(root: impl Into<PathBuf>) -> Self {
        Self::layout(root.into(), true)
    }

    fn layout(root: PathBuf, read_only: bool) -> Self {
        let temp_root = root.join(TEMP_DIR);
        Self {
            session_dir: temp_root.join(Uuid::new_v4().simple().to_string()),
            lock_path: root.join(LOCK_FILE),
            temp_root,
            root,
            partition: Arc::new(default_partition),
            lock_policy: LockPolicy::default(),
            progress: Progress::new(),
            read_only,
        }
    }

    fn ensure_dirs(&mut self) -> LfxResult<()> {
        std::fs::create_dir_all(&self.session_dir).map_err(|e| {
            LfxError::io(format!("creating store {}", self.root.display()), e)
        })?;
        // Canonical root so prefix checks agree with canonicalized sources
        if let Ok(root) = self.root.canonicalize() {
            let session = self.session_dir.file_name().map(PathBuf::from);
            self.temp_root = root.join(TEMP_DIR);
            self.lock_path = root.join(LOCK_FILE);
            if let Some(session) = session {
                self.session_dir = self.temp_root.join(session);
            }
            self.root = root;
        }
        Ok(())
    }

    /// Use a custom partition function
    pub fn with_partition(
        mut self,
        partition: impl Fn(&str) -> LfxResult<PathBuf> + Send + Sync + 'static,
    ) -> Self {
        self.partition = Arc::new(partition);
        self
    }

    /// Use a custom lock backoff policy
    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    /// Report copy progress to `progress`
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Deterministic path for `key`; must stay under the root
    pub fn key_to_path(&self, key: &str) -> LfxResult<PathBuf> {
        let relative = (self.partition)(key)?;
        let escapes = relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        let path = self.root.join(&relative);
        if escapes || !path.starts_with(&self.root) {
            return Err(LfxError::PathEscape {
                path,
                root: self.root.clone(),
            });
        }
        Ok(path)
    }

    /// Path of `key` if it has been published
    pub fn try_get_path(&self, key: &str) -> LfxResult<Option<PathBuf>> {
        let path = self.key_to_path(key)?;
        Ok(path.exists().then_some(path))
    }

    /// Whether `path` lies in this store's staging area
    pub fn is_staged(&self, path: &Path) -> bool {
        path.starts_with(&self.temp_root)
    }

    /// Create a fresh staging directory on the store's partition
    pub fn stage(&self) -> LfxResult<StagingDir> {
        self.ensure_writable()?;
        let path = self.session_dir.join(Uuid::new_v4().simple().to_string());
        std::fs::create_dir_all(&path)
            .map_err(|e| LfxError::io(format!("creating staging dir {}", path.display()), e))?;
        Ok(StagingDir { path })
    }

    /// Publish a copy of `source` under `key`.
    ///
    /// With `prefer_alias`, a source on the same partition is hard-linked
    /// (files) or symlinked (directories) instead of copied.
    pub async fn copy(&self, source: &Path, key: &str, prefer_alias: bool) -> LfxResult<PathBuf> {
        let dest = self.key_to_path(key)?;
        if !fsutil::entry_exists(source) {
            return Err(LfxError::PathNotFound(source.to_path_buf()));
        }
        if dest.exists() {
            return Ok(dest);
        }

        let staging = self.stage()?;
        let staged = staging.path().join("entry");
        let alias = prefer_alias && fsutil::same_partition(source, &self.root);
        let progress = self.progress.clone();
        let (src, tgt) = (source.to_path_buf(), staged.clone());

        tokio::task::spawn_blocking(move || {
            if alias {
                match fsutil::alias(&src, &tgt) {
                    Ok(()) => return Ok(()),
                    Err(e) => debug!("Alias of {} failed ({}), copying", src.display(), e),
                }
            }
            fsutil::copy_tree(&src, &tgt, &progress).map(|_| ())
        })
        .await
        .map_err(|e| LfxError::Internal(format!("copy task failed: {}", e)))?
        .map_err(|e| LfxError::io(format!("staging {}", source.display()), e))?;

        Ok(self.publish(&staged, &dest).await?.path)
    }

    /// Publish `source` under `key` by moving it.
    ///
    /// If the key is already published the source is discarded.
    pub async fn move_in(&self, source: &Path, key: &str) -> LfxResult<PathBuf> {
        let dest = self.key_to_path(key)?;
        if !fsutil::entry_exists(source) {
            return Err(LfxError::PathNotFound(source.to_path_buf()));
        }

        let path = if fsutil::same_partition(source, &self.root) {
            self.publish(source, &dest).await?.path
        } else {
            self.copy(source, key, false).await?
        };

        // Still present if another writer won, or after a cross-partition copy
        if fsutil::entry_exists(source) {
            discard(source);
        }
        Ok(path)
    }

    /// Publish `text` as the content of `key`
    pub async fn echo_text(&self, key: &str, text: &str) -> LfxResult<PathBuf> {
        let dest = self.key_to_path(key)?;
        if dest.exists() {
            return Ok(dest);
        }
        let staging = self.stage()?;
        let staged = staging.path().join("entry");
        tokio::fs::write(&staged, text)
            .await
            .map_err(|e| LfxError::io(format!("writing {}", staged.display()), e))?;
        Ok(self.publish(&staged, &dest).await?.path)
    }

    /// Read the text published under `key`
    pub async fn read_text(&self, key: &str) -> LfxResult<Option<String>> {
        let Some(path) = self.try_get_path(key)? else {
            return Ok(None);
        };
        tokio::fs::read_to_string(&path)
            .await
            .map(Some)
            .map_err(|e| LfxError::io(format!("reading {}", path.display()), e))
    }

    /// Rename `staged` to `dest` under the store lock, unless `dest` won the
    /// race in the meantime.
    async fn publish(&self, staged: &Path, dest: &Path) -> LfxResult<Published> {
        self.ensure_writable()?;
        let _lock = StoreLock::acquire(&self.lock_path, &self.lock_policy).await?;

        if fsutil::entry_exists(dest) {
            debug!("{} already published", dest.display());
            return Ok(Published {
                path: dest.to_path_buf(),
                fresh: false,
            });
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LfxError::io(format!("creating {}", parent.display()), e))?;
        }
        tokio::fs::rename(staged, dest).await.map_err(|e| {
            LfxError::io(
                format!("publishing {} to {}", staged.display(), dest.display()),
                e,
            )
        })?;
        debug!("Published {}", dest.display());
        Ok(Published {
            path: dest.to_path_buf(),
            fresh: true,
        })
    }

    /// Delete staging directories left behind by other (crashed) sessions.
    /// Returns how many were removed.
    pub async fn clean(&self) -> LfxResult<usize> {
        if self.read_only {
            return Ok(0);
        }
        let mut entries = match tokio::fs::read_dir(&self.temp_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(LfxError::io(
                    format!("listing {}", self.temp_root.display()),
                    e,
                ))
            }
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LfxError::io(format!("listing {}", self.temp_root.display()), e))?
        {
            let path = entry.path();
            if path == self.session_dir {
                continue;
            }
            match tokio::task::spawn_blocking({
                let path = path.clone();
                move || fsutil::remove_path(&path)
            })
            .await
            {
                Ok(Ok(())) => removed += 1,
                Ok(Err(e)) => warn!("Failed to clean {}: {}", path.display(), e),
                Err(e) => warn!("Clean task for {} failed: {}", path.display(), e),
            }
        }
        debug!("Cleaned {} orphaned staging dirs in {}", removed, self.root.display());
        Ok(removed)
    }

    /// Delete every entry and recreate the store empty
    pub async fn clear(&self) -> LfxResult<()> {
        self.ensure_writable()?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || match std::fs::remove_dir_all(&root) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        })
        .await
        .map_err(|e| LfxError::Internal(format!("clear task failed: {}", e)))?
        .map_err(|e| LfxError::io(format!("clearing {}", self.root.display()), e))?;

        tokio::fs::create_dir_all(&self.session_dir)
            .await
            .map_err(|e| LfxError::io(format!("recreating {}", self.root.display()), e))
    }

    /// All leaf entries under the root, sorted, excluding housekeeping files
    pub fn entries(&self) -> LfxResult<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root).into_iter().filter_entry(|e| {
            !(e.depth() == 1 && (e.file_name() == TEMP_DIR || e.file_name() == LOCK_FILE))
        });
        for entry in walker {
            let entry = entry.map_err(|e| {
                LfxError::io(
                    format!("walking {}", self.root.display()),
                    std::io::Error::other(e),
                )
            })?;
            if !entry.file_type().is_dir() {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn ensure_writable(&self) -> LfxResult<()> {
        if self.read_only {
            return Err(LfxError::Internal(format!(
                "store {} is read-only",
                self.root.display()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ImmutableDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImmutableDirectory")
            .field("root", &self.root)
            .field("read_only", &self.read_only)
            .finish()
    }
}

fn discard(path: &Path) {
    if let Err(e) = fsutil::remove_path(path) {
        debug!("Failed to discard {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ImmutableDirectory {
        ImmutableDirectory::open(dir.path().join("store")).unwrap()
    }

    #[test]
    fn default_partition_splits_key() {
        assert_eq!(
            default_partition("abcdef").unwrap(),
            PathBuf::from("ab").join("cd").join("abcdef")
        );
        assert!(matches!(
            default_partition("abc"),
            Err(LfxError::InvalidKey { .. })
        ));
    }

    #[test]
    fn key_to_path_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(matches!(
            store.key_to_path("../../etc"),
            Err(LfxError::PathEscape { .. })
        ));

        let custom = ImmutableDirectory::open(dir.path().join("custom"))
            .unwrap()
            .with_partition(|key| Ok(PathBuf::from("..").join(key)));
        assert!(matches!(
            custom.key_to_path("abcd"),
            Err(LfxError::PathEscape { .. })
        ));
    }

    #[tokio::test]
    async fn copy_publishes_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let src = dir.path().join("src.bin");
        fs::write(&src, b"payload").unwrap();

        assert!(store.try_get_path("abcd1234").unwrap().is_none());
        let path = store.copy(&src, "abcd1234", false).await.unwrap();

        assert_eq!(path, store.key_to_path("abcd1234").unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"payload");
        assert_eq!(store.try_get_path("abcd1234").unwrap(), Some(path));
        assert!(src.exists());
    }

    #[tokio::test]
    async fn copy_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let src = dir.path().join("src.bin");
        fs::write(&src, b"payload").unwrap();

        let first = store.copy(&src, "abcd1234", true).await.unwrap();
        let second = store.copy(&src, "abcd1234", false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.entries().unwrap(), vec![first]);
    }

    #[tokio::test]
    async fn copy_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store
            .copy(&dir.path().join("missing"), "abcd1234", false)
            .await
            .unwrap_err();
        assert!(matches!(err, LfxError::PathNotFound(_)));
    }

    #[tokio::test]
    async fn move_in_consumes_staged_source() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let staging = store.stage().unwrap();
        let staged = staging.path().join("blob");
        fs::write(&staged, b"moved").unwrap();
        assert!(store.is_staged(&staged));

        let path = store.move_in(&staged, "ffee0011").await.unwrap();
        assert!(!staged.exists());
        assert_eq!(fs::read(&path).unwrap(), b"moved");

        // A second move of equivalent content is discarded
        let again = staging.path().join("blob2");
        fs::write(&again, b"moved").unwrap();
        assert_eq!(store.move_in(&again, "ffee0011").await.unwrap(), path);
        assert!(!again.exists());
    }

    #[tokio::test]
    async fn copy_directory_with_alias() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let src = dir.path().join("tree");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/file.txt"), b"leaf").unwrap();

        let path = store.copy(&src, "0123abcd", true).await.unwrap();
        assert_eq!(fs::read(path.join("sub/file.txt")).unwrap(), b"leaf");
    }

    #[tokio::test]
    async fn echo_and_read_text() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.echo_text("beef0000", "hello").await.unwrap();
        assert_eq!(
            store.read_text("beef0000").await.unwrap().as_deref(),
            Some("hello")
        );
        assert_eq!(store.read_text("beef0001").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_copies_agree() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store(&dir));
        let src = dir.path().join("src.bin");
        fs::write(&src, b"race").unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let src = src.clone();
            handles.push(tokio::spawn(async move {
                store.copy(&src, "aaaa0000", false).await
            }));
        }
        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap());
        }
        paths.dedup();
        assert_eq!(paths.len(), 1);
        assert_eq!(fs::read(&paths[0]).unwrap(), b"race");
    }

    #[tokio::test]
    async fn clean_removes_only_orphans() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let orphan = store.temp_root().join("crashed-session");
        fs::create_dir_all(orphan.join("x")).unwrap();
        let active = store.stage().unwrap();

        assert_eq!(store.clean().await.unwrap(), 1);
        assert!(!orphan.exists());
        assert!(active.path().exists());
    }

    #[tokio::test]
    async fn clear_empties_store() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.echo_text("beef0000", "hello").await.unwrap();

        store.clear().await.unwrap();
        assert!(store.entries().unwrap().is_empty());
        assert!(store.stage().is_ok());
    }

    #[tokio::test]
    async fn entries_are_sorted_and_skip_housekeeping() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.echo_text("ffff0000", "b").await.unwrap();
        store.echo_text("0000ffff", "a").await.unwrap();
        let _staging = store.stage().unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0] < entries[1]);
        assert!(entries.iter().all(|p| !p.starts_with(store.temp_root())));
    }

    #[tokio::test]
    async fn publish_times_out_when_lock_held() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).with_lock_policy(LockPolicy::with_timeout(Duration::from_millis(50)));
        let _held = StoreLock::acquire(&store.root().join(LOCK_FILE), &LockPolicy::default())
            .await
            .unwrap();

        let err = store.echo_text("beef0000", "x").await.unwrap_err();
        assert!(matches!(err, LfxError::LockTimeout { .. }));
        assert!(store.try_get_path("beef0000").unwrap().is_none());
    }

    #[test]
    fn read_only_store_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("lan");
        let store = ImmutableDirectory::open_read_only(&root);
        assert!(!root.exists());
        assert!(store.stage().is_err());
        assert!(store.entries().unwrap().is_empty());
    }
}
