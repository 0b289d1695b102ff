//! Blocking filesystem helpers used by the store
//!
//! Everything here is synchronous and is expected to run inside
//! `tokio::task::spawn_blocking`.

use crate::progress::{Phase, Progress};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const COPY_BUFFER: usize = 256 * 1024;

/// Walk up to the closest existing ancestor so partition checks work for
/// paths that are about to be created.
fn existing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut current = Some(path);
    while let Some(p) = current {
        if p.exists() {
            return Some(p.to_path_buf());
        }
        current = p.parent();
    }
    None
}

/// Whether two paths live on the same filesystem partition
#[cfg(unix)]
pub fn same_partition(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let (Some(a), Some(b)) = (existing_ancestor(a), existing_ancestor(b)) else {
        return false;
    };
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev(),
        _ => false,
    }
}

/// Whether two paths live on the same filesystem partition
#[cfg(windows)]
pub fn same_partition(a: &Path, b: &Path) -> bool {
    use std::path::Component;

    let prefix = |p: &Path| {
        let p = existing_ancestor(p).and_then(|p| p.canonicalize().ok())?;
        match p.components().next() {
            Some(Component::Prefix(prefix)) => Some(prefix.as_os_str().to_ascii_lowercase()),
            _ => None,
        }
    };
    matches!((prefix(a), prefix(b)), (Some(a), Some(b)) if a == b)
}

/// Alias `source` at `target` without copying data: a hard link for files,
/// a directory symlink (junction equivalent) for directories.
pub fn alias(source: &Path, target: &Path) -> io::Result<()> {
    let source = source.canonicalize()?;
    if source.is_dir() {
        #[cfg(unix)]
        return std::os::unix::fs::symlink(&source, target);
        #[cfg(windows)]
        return std::os::windows::fs::symlink_dir(&source, target);
        #[cfg(not(any(unix, windows)))]
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "directory aliases are not supported on this platform",
        ));
    }
    fs::hard_link(&source, target)
}

/// Copy a file or directory tree, reporting cumulative bytes as
/// [`Phase::Copy`]. Returns the number of bytes copied.
pub fn copy_tree(source: &Path, target: &Path, progress: &Progress) -> io::Result<u64> {
    let label = source.display().to_string();
    let mut copied = 0u64;

    if source.is_dir() {
        for entry in WalkDir::new(source).follow_links(true) {
            let entry = entry.map_err(io::Error::other)?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(io::Error::other)?;
            let dest = target.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest)?;
            } else {
                copy_file(entry.path(), &dest, &mut copied, &label, target, progress)?;
            }
        }
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        copy_file(source, target, &mut copied, &label, target, progress)?;
    }

    progress.complete(Phase::Copy, &label, target);
    Ok(copied)
}

fn copy_file(
    source: &Path,
    dest: &Path,
    copied: &mut u64,
    label: &str,
    target: &Path,
    progress: &Progress,
) -> io::Result<()> {
    let mut reader = File::open(source)?;
    let mut writer = File::create(dest)?;
    let mut buf = vec![0u8; COPY_BUFFER];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        writer.write_all(&buf[..read])?;
        *copied += read as u64;
        progress.report(Phase::Copy, label, target, *copied);
    }
    writer.flush()?;

    #[cfg(unix)]
    {
        let perms = fs::metadata(source)?.permissions();
        fs::set_permissions(dest, perms)?;
    }
    Ok(())
}

/// Total size in bytes of a file or all files under a directory
pub fn tree_size(path: &Path) -> io::Result<u64> {
    if !path.is_dir() {
        return Ok(fs::metadata(path)?.len());
    }
    let mut total = 0u64;
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(io::Error::other)?.len();
        }
    }
    Ok(total)
}

/// Remove a file, symlink or directory tree
pub fn remove_path(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Whether `path` exists, without following a final symlink
pub fn entry_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}
