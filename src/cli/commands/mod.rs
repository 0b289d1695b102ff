//! CLI command implementations

pub mod cache;
pub mod config;
pub mod effort;
pub mod fetch;
pub mod pointer;

pub use cache::execute as cache;
pub use config::execute as config;
pub use effort::execute as effort;
pub use fetch::execute as fetch;
pub use pointer::execute as pointer;

use crate::config::Config;
use crate::error::{LfxError, LfxResult};
use crate::loader::Loader;
use crate::pointer::{read_pointer_file, Info};
use std::path::{Path, PathBuf};

pub(crate) fn current_dir() -> LfxResult<PathBuf> {
    std::env::current_dir().map_err(|e| LfxError::io("getting current directory", e))
}

/// Loader over the cache directories configured for the working directory
pub(crate) fn open_loader(config: &Config) -> LfxResult<Loader> {
    let cwd = current_dir()?;
    Loader::new(&config.loader_options(&cwd))
}

/// Parse every pointer file, failing on the first malformed one
pub(crate) async fn read_pointer_files(files: &[PathBuf]) -> LfxResult<Vec<Info>> {
    let mut infos = Vec::with_capacity(files.len());
    for file in files {
        infos.push(read_pointer_file(file).await?);
    }
    Ok(infos)
}

pub(crate) fn display(path: &Path) -> String {
    path.display().to_string()
}
