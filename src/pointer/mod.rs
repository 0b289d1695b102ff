//! Pointer and content value types
//!
//! A [`Pointer`] describes *what* to fetch (URL plus how to expand it),
//! [`Metadata`] describes *what was fetched* (hash and sizes). Together they
//! form an [`Info`]; an `Info` plus the local path of the materialized
//! content is a [`Content`]. All of these are immutable values created per
//! call.

pub mod text;

use crate::error::{LfxError, LfxResult};
use crate::hash::{ArchiveId, Hash};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

pub use text::{parse_pointer, read_pointer_file, SPEC_URI_BASE};

/// Expansion format version written by this build.
///
/// Bumping it gives every archive a fresh content-tier key, so expansions
/// made by an older layout are never reused.
pub const FORMAT_VERSION: u32 = 1;

/// How downloaded bytes become usable content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpansionKind {
    /// Used as-is
    File,
    /// Zip archive, extracted into a directory
    Zip,
    /// Executable that extracts itself into a directory
    #[serde(rename = "exe")]
    SelfExtractingExe,
    /// Nuget package (zip plus shim files)
    Nuget,
}

impl ExpansionKind {
    /// Short name used in store paths and pointer text
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Zip => "zip",
            Self::SelfExtractingExe => "exe",
            Self::Nuget => "nuget",
        }
    }

    /// Whether the content is a directory produced from the archive
    pub fn is_expanded(&self) -> bool {
        !matches!(self, Self::File)
    }

    /// All kinds, in store layout order
    pub fn all() -> &'static [Self] {
        &[Self::File, Self::Zip, Self::SelfExtractingExe, Self::Nuget]
    }
}

impl fmt::Display for ExpansionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpansionKind {
    type Err = LfxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "zip" => Ok(Self::Zip),
            "exe" => Ok(Self::SelfExtractingExe),
            "nuget" => Ok(Self::Nuget),
            other => Err(LfxError::Internal(format!("unknown expansion kind '{}'", other))),
        }
    }
}

/// Intent to fetch: where the bytes live and how to expand them
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pointer {
    /// Expansion applied to the downloaded bytes
    pub kind: ExpansionKind,

    /// Download location; `None` for plain LFS pointers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Expansion format version
    pub version: u32,

    /// Self-extracting exe arguments; `{0}` is replaced with the target dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,

    /// Path of the referenced file inside the expanded archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Pointer {
    fn new(kind: ExpansionKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: Some(url.into()),
            version: FORMAT_VERSION,
            args: None,
            hint: None,
        }
    }

    /// A file used as downloaded
    pub fn file(url: impl Into<String>) -> Self {
        Self::new(ExpansionKind::File, url)
    }

    /// A zip archive expanded into a directory
    pub fn zip(url: impl Into<String>) -> Self {
        Self::new(ExpansionKind::Zip, url)
    }

    /// A nuget package expanded into a directory
    pub fn nuget(url: impl Into<String>) -> Self {
        Self::new(ExpansionKind::Nuget, url)
    }

    /// A self-extracting executable run with `args`
    pub fn exe(url: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            args: Some(args.into()),
            ..Self::new(ExpansionKind::SelfExtractingExe, url)
        }
    }

    /// A single file inside a zip archive
    pub fn archive(url: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            hint: Some(hint.into()),
            ..Self::new(ExpansionKind::Zip, url)
        }
    }

    /// A plain LFS pointer with no download location
    pub fn simple() -> Self {
        Self {
            kind: ExpansionKind::File,
            url: None,
            version: FORMAT_VERSION,
            args: None,
            hint: None,
        }
    }

    /// Override the expansion format version
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Whether this is a plain LFS pointer
    pub fn is_simple(&self) -> bool {
        self.url.is_none()
    }

    /// Download location, or `NotFound` for plain LFS pointers
    pub fn require_url(&self) -> LfxResult<&str> {
        self.url
            .as_deref()
            .ok_or_else(|| LfxError::not_found("pointer has no url"))
    }

    /// Content key of this pointer's expansion of `archive`
    pub fn content_id(&self, archive: ArchiveId) -> ContentId {
        ContentId {
            kind: self.kind,
            version: self.version,
            archive,
        }
    }
}

/// What was fetched: the archive hash and sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metadata {
    /// Hash of the downloaded bytes
    pub archive_id: ArchiveId,

    /// Size of the downloaded bytes
    pub compressed_size: u64,

    /// Total size of the expanded content (non-File kinds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded_size: Option<u64>,
}

impl Metadata {
    pub fn new(archive_id: ArchiveId, compressed_size: u64) -> Self {
        Self {
            archive_id,
            compressed_size,
            expanded_size: None,
        }
    }

    /// Size of the content once materialized
    pub fn content_size(&self) -> u64 {
        self.expanded_size.unwrap_or(self.compressed_size)
    }
}

/// A pointer plus, once resolved, its metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Info {
    pub pointer: Pointer,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Info {
    /// An info with only a URL known
    pub fn unresolved(pointer: Pointer) -> Self {
        Self {
            pointer,
            metadata: None,
        }
    }

    /// An info whose content has been materialized at least once
    pub fn resolved(pointer: Pointer, metadata: Metadata) -> Self {
        Self {
            pointer,
            metadata: Some(metadata),
        }
    }

    /// Archive hash, if known
    pub fn archive_id(&self) -> Option<ArchiveId> {
        self.metadata.map(|m| m.archive_id)
    }

    /// Content key, if the archive hash is known
    pub fn content_id(&self) -> Option<ContentId> {
        self.archive_id().map(|id| self.pointer.content_id(id))
    }

    /// Size of the downloaded bytes, if known
    pub fn size(&self) -> Option<u64> {
        self.metadata.map(|m| m.compressed_size)
    }

    /// Serialize in pointer text format
    pub fn to_pointer_text(&self) -> String {
        text::serialize_pointer(self)
    }
}

impl FromStr for Info {
    type Err = LfxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_pointer(s)
    }
}

/// Whether `hint` names a path strictly inside the content root
pub fn is_relative_hint(hint: &str) -> bool {
    let mut components = Path::new(hint).components().peekable();
    components.peek().is_some() && components.all(|c| matches!(c, Component::Normal(_)))
}

/// A resolved info plus the local path of its materialized content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub info: Info,
    pub path: PathBuf,
}

impl Content {
    /// Build the handle for content materialized at `root`, applying the
    /// pointer's inner-path hint. A hint that would leave `root` is a
    /// `PathEscape`.
    pub fn new(info: Info, root: &Path) -> LfxResult<Self> {
        let path = match &info.pointer.hint {
            Some(hint) if !is_relative_hint(hint) => {
                return Err(LfxError::PathEscape {
                    path: PathBuf::from(hint),
                    root: root.to_path_buf(),
                });
            }
            Some(hint) => root.join(hint),
            None => root.to_path_buf(),
        };
        Ok(Self { info, path })
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.info.metadata.as_ref()
    }
}

/// Key of one particular expansion of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId {
    pub kind: ExpansionKind,
    pub version: u32,
    pub archive: Hash,
}

impl ContentId {
    /// Store key: `<kind>/v<version>/<hash>`
    pub fn key(&self) -> String {
        format!("{}/v{}/{}", self.kind, self.version, self.archive)
    }

    /// Parse a store key produced by [`ContentId::key`]
    pub fn from_key(key: &str) -> LfxResult<Self> {
        let invalid = |reason: &str| LfxError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let mut parts = key.split('/');
        let (Some(kind), Some(version), Some(hash), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected <kind>/v<version>/<hash>"));
        };
        let kind = kind.parse().map_err(|_| invalid("unknown expansion kind"))?;
        let version = version
            .strip_prefix('v')
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| invalid("bad version segment"))?;
        Ok(Self {
            kind,
            version,
            archive: hash.parse()?,
        })
    }

    /// Relative store path: `<kind>/v<version>/<h0h1>/<h2h3>/<hash>`
    pub fn relative_path(&self) -> PathBuf {
        let hex = self.archive.to_hex();
        PathBuf::from(self.kind.as_str())
            .join(format!("v{}", self.version))
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(&hex)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
