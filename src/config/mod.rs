//! Configuration management for lfx

pub mod schema;

pub use schema::Config;

use crate::error::{LfxError, LfxResult};
use crate::loader::expand::ExpandOptions;
use crate::loader::LoaderOptions;
use crate::store::{fsutil, LockPolicy};
use crate::tier::TierDirs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

/// Default overall download timeout
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 600;
/// Default timeout for self-extracting executables
pub const DEFAULT_EXPAND_TIMEOUT_SECS: u64 = 600;

/// Environment overrides for the cache directories
pub const ENV_CACHE_DIR: &str = "LFX_CACHE_DIR";
pub const ENV_BUS_CACHE_DIR: &str = "LFX_BUS_CACHE_DIR";
pub const ENV_LAN_CACHE_DIR: &str = "LFX_LAN_CACHE_DIR";

/// Name of the cache directory placed at a partition root
const PARTITION_CACHE_DIR: &str = ".lfx";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lfx")
            .join("config.toml")
    }

    /// Per-user cache directory
    pub fn user_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".").join(PARTITION_CACHE_DIR))
            .join("lfx")
    }

    /// Load configuration, falling back to defaults if the file is missing,
    /// then apply environment overrides.
    pub async fn load(&self) -> LfxResult<Config> {
        let mut config = if self.config_path.exists() {
            self.load_from_file(&self.config_path).await?
        } else {
            debug!("Config file not found, using defaults");
            Config::default()
        };
        apply_env(&mut config);
        validate(&config, &self.config_path)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> LfxResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| LfxError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| LfxError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> LfxResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            LfxError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> LfxResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| LfxError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_env(config: &mut Config) {
    let from_env = |name: &str| {
        std::env::var_os(name)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    };
    if let Some(dir) = from_env(ENV_CACHE_DIR) {
        config.cache.cache_dir = Some(dir);
    }
    if let Some(dir) = from_env(ENV_BUS_CACHE_DIR) {
        config.cache.bus_cache_dir = Some(dir);
    }
    if let Some(dir) = from_env(ENV_LAN_CACHE_DIR) {
        config.cache.lan_cache_dir = Some(dir);
    }
}

fn validate(config: &Config, path: &Path) -> LfxResult<()> {
    let invalid = |reason: &str| LfxError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    if config.download.timeout_secs == 0 {
        return Err(invalid("download.timeout_secs must be positive"));
    }
    if config.expand.timeout_secs == 0 {
        return Err(invalid("expand.timeout_secs must be positive"));
    }
    if config.lock.timeout_ms == 0 {
        return Err(invalid("lock.timeout_ms must be positive"));
    }
    Ok(())
}

/// Topmost ancestor of `path` on the same partition (its mount point)
fn partition_root(path: &Path) -> PathBuf {
    let mut root = path.to_path_buf();
    for ancestor in path.ancestors().skip(1) {
        if !fsutil::same_partition(ancestor, path) {
            break;
        }
        root = ancestor.to_path_buf();
    }
    root
}

impl Config {
    /// Cache directories for a process running in `cwd`.
    ///
    /// Unset directories default to the per-user cache when `cwd` shares
    /// its partition; otherwise content goes to `.lfx` at the root of the
    /// working directory's partition so files can still be hard-linked.
    pub fn tier_dirs(&self, cwd: &Path) -> TierDirs {
        let user_cache = ConfigManager::user_cache_dir();
        let default_cache = if fsutil::same_partition(cwd, &user_cache) {
            user_cache.clone()
        } else {
            partition_root(cwd).join(PARTITION_CACHE_DIR)
        };
        TierDirs {
            cache_dir: self.cache.cache_dir.clone().unwrap_or(default_cache),
            bus_cache_dir: self.cache.bus_cache_dir.clone().unwrap_or(user_cache),
            lan_cache_dir: self.cache.lan_cache_dir.clone(),
        }
    }

    /// Loader settings for a process running in `cwd`
    pub fn loader_options(&self, cwd: &Path) -> LoaderOptions {
        LoaderOptions {
            dirs: self.tier_dirs(cwd),
            lock_policy: LockPolicy::with_timeout(Duration::from_millis(self.lock.timeout_ms)),
            download_timeout: Duration::from_secs(self.download.timeout_secs),
            expand: ExpandOptions {
                timeout: Duration::from_secs(self.expand.timeout_secs),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[tokio::test]
    #[serial]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.download.timeout_secs, DEFAULT_DOWNLOAD_TIMEOUT_SECS);
    }

    #[tokio::test]
    #[serial]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.cache.lan_cache_dir = Some(PathBuf::from("/mnt/mirror"));

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.cache.lan_cache_dir, Some(PathBuf::from("/mnt/mirror")));
    }

    #[tokio::test]
    #[serial]
    async fn invalid_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[download]\ntimeout_secs = \"soon\"\n").unwrap();

        let err = ConfigManager::with_path(path).load().await.unwrap_err();
        assert!(matches!(err, LfxError::ConfigInvalid { .. }));

        let zero = temp.path().join("zero.toml");
        std::fs::write(&zero, "[lock]\ntimeout_ms = 0\n").unwrap();
        let err = ConfigManager::with_path(zero).load().await.unwrap_err();
        assert!(matches!(err, LfxError::ConfigInvalid { .. }));
    }

    #[tokio::test]
    #[serial]
    async fn env_overrides_directories() {
        let temp = TempDir::new().unwrap();
        std::env::set_var(ENV_CACHE_DIR, temp.path().join("c"));
        std::env::set_var(ENV_LAN_CACHE_DIR, temp.path().join("lan"));

        let config = ConfigManager::with_path(temp.path().join("none.toml"))
            .load()
            .await
            .unwrap();
        std::env::remove_var(ENV_CACHE_DIR);
        std::env::remove_var(ENV_LAN_CACHE_DIR);

        let dirs = config.tier_dirs(temp.path());
        assert_eq!(dirs.cache_dir, temp.path().join("c"));
        assert_eq!(dirs.lan_cache_dir, Some(temp.path().join("lan")));
        assert_eq!(dirs.bus_cache_dir, ConfigManager::user_cache_dir());
    }

    #[test]
    fn partition_root_stays_on_partition() {
        let temp = TempDir::new().unwrap();
        let root = partition_root(temp.path());
        assert!(temp.path().starts_with(&root));
        assert!(fsutil::same_partition(&root, temp.path()));
    }

    #[test]
    fn loader_options_follow_config() {
        let mut config = Config::default();
        config.lock.timeout_ms = 250;
        config.cache.cache_dir = Some(PathBuf::from("/c"));
        config.cache.bus_cache_dir = Some(PathBuf::from("/b"));

        let options = config.loader_options(Path::new("/"));
        assert_eq!(options.lock_policy.timeout, Duration::from_millis(250));
        assert_eq!(options.dirs.cache_dir, PathBuf::from("/c"));
        assert_eq!(options.download_timeout, Duration::from_secs(600));
    }
}
