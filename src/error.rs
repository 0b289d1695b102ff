//! Error types for lfx
//!
//! All modules use `LfxResult<T>` as their return type.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for lfx operations
pub type LfxResult<T> = Result<T, LfxError>;

/// Broad classification of an error, used by callers deciding whether to
/// retry, report or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Content does not match what was promised (hash, pointer text, archive)
    Integrity,
    /// Nothing in the tier chain could produce the requested key
    Resolution,
    /// A lock or operation ran out of time
    Contention,
    /// Invalid configuration
    Configuration,
    /// Everything else (IO, serialization, internal)
    Other,
}

/// All errors that can occur in lfx
#[derive(Error, Debug)]
pub enum LfxError {
    // Integrity errors
    #[error("Hash mismatch for {source_id}: expected {expected}, got {actual}")]
    HashMismatch {
        source_id: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid hash '{value}': {reason}")]
    InvalidHash { value: String, reason: String },

    #[error("Malformed pointer at line {line}: {reason}")]
    PointerParse { line: usize, reason: String },

    #[error("Archive entry '{entry}' escapes extraction root {root}")]
    ZipSlip { entry: String, root: PathBuf },

    // Resolution errors
    #[error("Not found: {key}")]
    NotFound { key: String },

    #[error("Download failed: {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Contention errors
    #[error("Timed out after {waited_ms}ms waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited_ms: u128 },

    #[error("Timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Store errors
    #[error("Invalid cache key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Path {path} escapes store root {root}")]
    PathEscape { path: PathBuf, root: PathBuf },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Serialization errors
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// A failure observed by every caller awaiting the same in-flight load
    #[error(transparent)]
    Shared(Arc<LfxError>),
}

impl LfxError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a download error
    pub fn download(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Download {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a not-found error for a cache key
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::HashMismatch { .. }
            | Self::InvalidHash { .. }
            | Self::PointerParse { .. }
            | Self::ZipSlip { .. } => ErrorKind::Integrity,
            Self::NotFound { .. } | Self::Download { .. } | Self::CommandExecution { .. } => {
                ErrorKind::Resolution
            }
            Self::LockTimeout { .. } | Self::Timeout { .. } => ErrorKind::Contention,
            Self::ConfigInvalid { .. } | Self::ConfigNotFound(_) | Self::ConfigDirCreate { .. } => {
                ErrorKind::Configuration
            }
            Self::Shared(inner) => inner.kind(),
            _ => ErrorKind::Other,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Contention | ErrorKind::Resolution
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::LockTimeout { .. } => {
                Some("Another lfx process may be stuck; retry, or run: lfx cache clean")
            }
            Self::HashMismatch { .. } => {
                Some("The server returned different bytes than the pointer records")
            }
            Self::ConfigInvalid { .. } => Some("Inspect the configuration with: lfx config show"),
            Self::Shared(inner) => inner.hint(),
            _ => None,
        }
    }
}

impl From<Arc<LfxError>> for LfxError {
    fn from(shared: Arc<LfxError>) -> Self {
        Self::Shared(shared)
    }
}
