//! Archive downloads
//!
//! Bytes are streamed to disk and hashed in the same pass. `http(s)://`
//! goes through a shared ureq agent; `file://` URLs are read from the local
//! filesystem (mirrors, tests).

use crate::error::{LfxError, LfxResult};
use crate::hash::{Hash, Hasher};
use crate::progress::{Phase, Progress};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const BUFFER_SIZE: usize = 64 * 1024;
const USER_AGENT: &str = concat!("lfx/", env!("CARGO_PKG_VERSION"));

/// Result of a completed download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downloaded {
    pub hash: Hash,
    pub size: u64,
}

/// Fetches the bytes behind a URL into a local file
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Write the body of `url` to `target`, reporting [`Phase::Download`]
    async fn fetch(&self, url: &str, target: &Path, progress: &Progress) -> LfxResult<Downloaded>;
}

/// Default fetcher backed by ureq
pub struct HttpFetcher {
    agent: ureq::Agent,
    timeout: Duration,
}

impl HttpFetcher {
    /// Fetcher whose requests fail after `timeout`
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .user_agent(USER_AGENT)
            .build()
            .into();
        Self { agent, timeout }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::config::DEFAULT_DOWNLOAD_TIMEOUT_SECS))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, target: &Path, progress: &Progress) -> LfxResult<Downloaded> {
        let agent = self.agent.clone();
        let timeout = self.timeout;
        let (url, target, progress) = (url.to_string(), target.to_path_buf(), progress.clone());

        info!("Downloading {}", url);
        let task_url = url.clone();
        let downloaded = tokio::task::spawn_blocking(move || {
            download_blocking(&agent, timeout, &task_url, &target, &progress)
        })
        .await
        .map_err(|e| LfxError::Internal(format!("download task for {} failed: {}", url, e)))??;

        debug!(
            "Downloaded {} ({} bytes, sha256 {})",
            url, downloaded.size, downloaded.hash
        );
        Ok(downloaded)
    }
}

fn download_blocking(
    agent: &ureq::Agent,
    timeout: Duration,
    url: &str,
    target: &Path,
    progress: &Progress,
) -> LfxResult<Downloaded> {
    if let Some(path) = file_url_path(url) {
        let file = File::open(&path).map_err(|e| LfxError::download(url, e))?;
        return stream_to(file, url, target, progress);
    }

    let mut response = agent.get(url).call().map_err(|e| match e {
        ureq::Error::Timeout(_) => LfxError::Timeout {
            operation: format!("download {}", url),
            secs: timeout.as_secs(),
        },
        other => LfxError::download(url, other),
    })?;
    let reader = response.body_mut().as_reader();
    stream_to(reader, url, target, progress)
}

/// Copy `reader` to `target`, hashing as it goes
fn stream_to(
    mut reader: impl Read,
    url: &str,
    target: &Path,
    progress: &Progress,
) -> LfxResult<Downloaded> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| LfxError::io(format!("creating {}", parent.display()), e))?;
    }
    let file = File::create(target)
        .map_err(|e| LfxError::io(format!("creating {}", target.display()), e))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Hasher::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| LfxError::download(url, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        writer
            .write_all(&buffer[..read])
            .map_err(|e| LfxError::io(format!("writing {}", target.display()), e))?;
        size += read as u64;
        progress.report(Phase::Download, url, target, size);
    }
    writer
        .flush()
        .map_err(|e| LfxError::io(format!("writing {}", target.display()), e))?;
    progress.complete(Phase::Download, url, target);

    Ok(Downloaded {
        hash: hasher.finish(),
        size,
    })
}

/// Local path of a `file://` URL
pub fn file_url_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("file://")?;
    // file:///C:/x on Windows
    let rest = match rest.strip_prefix('/') {
        Some(stripped) if cfg!(windows) && stripped.as_bytes().get(1) == Some(&b':') => stripped,
        _ => rest,
    };
    Some(PathBuf::from(rest))
}

/// `file://` URL for a local path
pub fn file_url(path: &Path) -> String {
    let display = path.display().to_string().replace('\\', "/");
    if display.starts_with('/') {
        format!("file://{}", display)
    } else {
        format!("file:///{}", display)
    }
}
