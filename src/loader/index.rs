//! Persistent side-indexes
//!
//! Both indexes are immutable directories holding small JSON documents, so
//! they inherit atomic publish and first-writer-wins from the store.

use crate::error::LfxResult;
use crate::hash::{ArchiveId, Hash};
use crate::pointer::{ContentId, Info};
use crate::store::{ImmutableDirectory, LockPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub const URL_INDEX_DIR: &str = "urls";
pub const INFO_INDEX_DIR: &str = "infos";

/// What a URL resolved to the first time it was downloaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub archive_id: ArchiveId,
    pub size: u64,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

impl UrlRecord {
    pub fn new(url: impl Into<String>, archive_id: ArchiveId, size: u64) -> Self {
        Self {
            url: url.into(),
            archive_id,
            size,
            recorded_at: Utc::now(),
        }
    }
}

/// URL → archive id, keyed by the SHA-256 of the URL text
pub struct UrlIndex {
    store: ImmutableDirectory,
}

impl UrlIndex {
    pub fn open(cache_dir: &Path, lock_policy: LockPolicy) -> LfxResult<Self> {
        let store =
            ImmutableDirectory::open(cache_dir.join(URL_INDEX_DIR))?.with_lock_policy(lock_policy);
        Ok(Self { store })
    }

    fn key(url: &str) -> String {
        Hash::of(url.as_bytes()).to_hex()
    }

    /// Recorded archive for `url`; unreadable records count as missing
    pub async fn get(&self, url: &str) -> LfxResult<Option<UrlRecord>> {
        let Some(text) = self.store.read_text(&Self::key(url)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<UrlRecord>(&text) {
            Ok(record) if record.url == url => Ok(Some(record)),
            Ok(record) => {
                warn!("URL index collision: {} vs {}", record.url, url);
                Ok(None)
            }
            Err(e) => {
                warn!("Ignoring corrupt URL index entry for {}: {}", url, e);
                Ok(None)
            }
        }
    }

    pub async fn put(&self, record: &UrlRecord) -> LfxResult<()> {
        let text = serde_json::to_string_pretty(record)?;
        self.store.echo_text(&Self::key(&record.url), &text).await?;
        Ok(())
    }

    pub fn store(&self) -> &ImmutableDirectory {
        &self.store
    }
}

/// Content id → resolved info
pub struct InfoIndex {
    store: ImmutableDirectory,
}

impl InfoIndex {
    pub fn open(cache_dir: &Path, lock_policy: LockPolicy) -> LfxResult<Self> {
        let store = ImmutableDirectory::open(cache_dir.join(INFO_INDEX_DIR))?
            .with_partition(|key| Ok(ContentId::from_key(key)?.relative_path()))
            .with_lock_policy(lock_policy);
        Ok(Self { store })
    }

    pub async fn get(&self, id: &ContentId) -> LfxResult<Option<Info>> {
        let Some(text) = self.store.read_text(&id.key()).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&text) {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                warn!("Ignoring corrupt info index entry {}: {}", id, e);
                Ok(None)
            }
        }
    }

    pub async fn put(&self, id: &ContentId, info: &Info) -> LfxResult<()> {
        let text = serde_json::to_string_pretty(info)?;
        self.store.echo_text(&id.key(), &text).await?;
        Ok(())
    }

    /// Every recorded info, in store order
    pub async fn all(&self) -> LfxResult<Vec<Info>> {
        let mut infos = Vec::new();
        for path in self.store.entries()? {
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("Skipping unreadable {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str(&text) {
                Ok(info) => infos.push(info),
                Err(e) => warn!("Skipping corrupt {}: {}", path.display(), e),
            }
        }
        Ok(infos)
    }

    pub fn store(&self) -> &ImmutableDirectory {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::{Metadata, Pointer};
    use tempfile::TempDir;

    #[tokio::test]
    async fn url_index_round_trip() {
        let dir = TempDir::new().unwrap();
        let index = UrlIndex::open(dir.path(), LockPolicy::default()).unwrap();
        let record = UrlRecord::new("https://host/a.zip", Hash::of(b"a"), 1);

        assert_eq!(index.get(&record.url).await.unwrap(), None);
        index.put(&record).await.unwrap();
        assert_eq!(index.get(&record.url).await.unwrap(), Some(record));
        assert_eq!(index.get("https://host/b.zip").await.unwrap(), None);
    }

    #[tokio::test]
    async fn url_record_without_timestamp_still_parses() {
        let dir = TempDir::new().unwrap();
        let index = UrlIndex::open(dir.path(), LockPolicy::default()).unwrap();
        let url = "https://host/old.bin";
        let legacy = format!(
            r#"{{"url":"{}","archive_id":"{}","size":3}}"#,
            url,
            Hash::of(b"abc")
        );
        index.store().echo_text(&UrlIndex::key(url), &legacy).await.unwrap();

        let record = index.get(url).await.unwrap().unwrap();
        assert_eq!(record.archive_id, Hash::of(b"abc"));
        assert_eq!(record.size, 3);
    }

    #[tokio::test]
    async fn info_index_lists_entries() {
        let dir = TempDir::new().unwrap();
        let index = InfoIndex::open(dir.path(), LockPolicy::default()).unwrap();
        let pointer = Pointer::zip("https://host/a.zip");
        let info = Info::resolved(pointer.clone(), Metadata::new(Hash::of(b"a"), 1));
        let id = info.content_id().unwrap();

        index.put(&id, &info).await.unwrap();
        assert_eq!(index.get(&id).await.unwrap(), Some(info.clone()));
        assert_eq!(index.all().await.unwrap(), vec![info]);
        assert!(index
            .store()
            .try_get_path(&id.key())
            .unwrap()
            .unwrap()
            .starts_with(index.store().root().join("zip")));
    }
}
