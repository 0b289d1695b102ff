//! Configuration schema for lfx
//!
//! Configuration is stored at `~/.config/lfx/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Cache directories
    pub cache: CacheConfig,

    /// Download settings
    pub download: DownloadConfig,

    /// Expansion settings
    pub expand: ExpandConfig,

    /// Store lock settings
    pub lock: LockConfig,
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Cache directories; unset entries fall back to platform defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Expanded content and side-indexes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Writable archive cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus_cache_dir: Option<PathBuf>,

    /// Read-only archive mirror, usually a network share
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lan_cache_dir: Option<PathBuf>,
}

/// Download configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Overall timeout for one download
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: super::DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

/// Expansion configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpandConfig {
    /// Timeout for running a self-extracting executable
    pub timeout_secs: u64,
}

impl Default for ExpandConfig {
    fn default() -> Self {
        Self {
            timeout_secs: super::DEFAULT_EXPAND_TIMEOUT_SECS,
        }
    }
}

/// Publish lock configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Total time to wait for a store lock
    pub timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[download]"));
        assert!(!toml.contains("cache_dir"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.download.timeout_secs, 600);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [cache]
            lan_cache_dir = "/mnt/mirror/lfx"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.cache.lan_cache_dir,
            Some(PathBuf::from("/mnt/mirror/lfx"))
        );
        assert_eq!(config.cache.cache_dir, None);
        assert_eq!(config.lock.timeout_ms, 5000); // default preserved
    }
}
