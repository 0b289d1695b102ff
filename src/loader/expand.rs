//! Expansion strategies: archive bytes → content
//!
//! Zip and nuget archives are extracted in-process; self-extracting
//! executables are run with their pointer's argument template.

use crate::error::{LfxError, LfxResult};
use crate::pointer::{ExpansionKind, Pointer};
use crate::progress::{Phase, Progress};
use crate::store::fsutil;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};
use zip::ZipArchive;

/// Placeholder in exe arguments replaced by the target directory
pub const TARGET_PLACEHOLDER: &str = "{0}";

/// Files injected into extracted nuget packages when absent
pub const NUGET_CONTENT_TYPES: &str = "[Content_Types].xml";
pub const NUGET_MARKER: &str = ".lfx-nuget";

const CONTENT_TYPES_SHIM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="nuspec" ContentType="application/octet" />
  <Default Extension="dll" ContentType="application/octet" />
  <Default Extension="xml" ContentType="application/octet" />
</Types>
"#;

/// Tuning for expansions
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    /// Upper bound for running a self-extracting executable
    pub timeout: Duration,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::config::DEFAULT_EXPAND_TIMEOUT_SECS),
        }
    }
}

/// Materialize `archive` as `kind` content at `target`.
///
/// `target` must not exist yet. Exe expansion needs the pointer for its
/// argument template.
pub async fn expand(
    kind: ExpansionKind,
    archive: &Path,
    target: &Path,
    pointer: Option<&Pointer>,
    options: &ExpandOptions,
    progress: &Progress,
) -> LfxResult<()> {
    debug!("Expanding {} as {} into {}", archive.display(), kind, target.display());
    match kind {
        ExpansionKind::File => {
            let (src, dst, progress) = (archive.to_path_buf(), target.to_path_buf(), progress.clone());
            blocking(move || {
                fsutil::copy_tree(&src, &dst, &progress)
                    .map(|_| ())
                    .map_err(|e| LfxError::io(format!("copying {}", src.display()), e))
            })
            .await
        }
        ExpansionKind::Zip => extract(archive, target, progress).await,
        ExpansionKind::Nuget => {
            extract(archive, target, progress).await?;
            inject_nuget_shims(target).await
        }
        ExpansionKind::SelfExtractingExe => {
            let args = pointer.and_then(|p| p.args.as_deref()).unwrap_or(TARGET_PLACEHOLDER);
            run_exe(archive, args, target, options.timeout, progress).await
        }
    }
}

async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> LfxResult<T> + Send + 'static,
) -> LfxResult<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LfxError::Internal(format!("expansion task failed: {}", e)))?
}

async fn extract(archive: &Path, target: &Path, progress: &Progress) -> LfxResult<()> {
    let (src, dst, progress) = (archive.to_path_buf(), target.to_path_buf(), progress.clone());
    blocking(move || extract_zip(&src, &dst, &progress).map(|_| ())).await
}

/// Extract a zip archive, rejecting it outright if any entry would land
/// outside `target`. Returns the number of bytes written.
pub fn extract_zip(archive: &Path, target: &Path, progress: &Progress) -> LfxResult<u64> {
    let file = File::open(archive)
        .map_err(|e| LfxError::io(format!("opening {}", archive.display()), e))?;
    let mut zip = ZipArchive::new(file)?;

    // Validate every entry before writing anything
    let mut entries = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(LfxError::ZipSlip {
                entry: entry.name().to_string(),
                root: target.to_path_buf(),
            });
        };
        entries.push((i, relative));
    }

    fs::create_dir_all(target)
        .map_err(|e| LfxError::io(format!("creating {}", target.display()), e))?;

    let label = archive.display().to_string();
    let mut written = 0u64;
    for (i, relative) in entries {
        let mut entry = zip.by_index(i)?;
        let dest = target.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&dest)
                .map_err(|e| LfxError::io(format!("creating {}", dest.display()), e))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| LfxError::io(format!("creating {}", parent.display()), e))?;
        }
        let mut out = File::create(&dest)
            .map_err(|e| LfxError::io(format!("creating {}", dest.display()), e))?;
        written += copy_reporting(&mut entry, &mut out, written, &label, target, progress)
            .map_err(|e| LfxError::io(format!("extracting {}", dest.display()), e))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dest, fs::Permissions::from_mode(mode))
                .map_err(|e| LfxError::io(format!("chmod {}", dest.display()), e))?;
        }
    }
    progress.complete(Phase::Expand, &label, target);
    Ok(written)
}

fn copy_reporting(
    reader: &mut impl Read,
    writer: &mut impl Write,
    base: u64,
    label: &str,
    target: &Path,
    progress: &Progress,
) -> io::Result<u64> {
    let mut buffer = [0u8; 64 * 1024];
    let mut copied = 0u64;
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            return Ok(copied);
        }
        writer.write_all(&buffer[..read])?;
        copied += read as u64;
        progress.report(Phase::Expand, label, target, base + copied);
    }
}

async fn inject_nuget_shims(target: &Path) -> LfxResult<()> {
    let marker = format!(
        "expanded-by: lfx {}\n",
        env!("CARGO_PKG_VERSION")
    );
    for (name, text) in [
        (NUGET_CONTENT_TYPES, CONTENT_TYPES_SHIM.to_string()),
        (NUGET_MARKER, marker),
    ] {
        let path = target.join(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            continue;
        }
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| LfxError::io(format!("writing {}", path.display()), e))?;
    }
    Ok(())
}

/// Expand `args` into argv, replacing the target placeholder
pub fn exe_arguments(args: &str, target: &Path) -> LfxResult<Vec<String>> {
    let words = shell_words::split(args).map_err(|e| {
        LfxError::command_exec(args, format!("cannot split arguments: {}", e))
    })?;
    let target = target.display().to_string();
    Ok(words
        .into_iter()
        .map(|word| word.replace(TARGET_PLACEHOLDER, &target))
        .collect())
}

async fn run_exe(
    archive: &Path,
    args: &str,
    target: &Path,
    timeout: Duration,
    progress: &Progress,
) -> LfxResult<()> {
    let work_dir = target
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let exe = work_dir.join(exe_name(archive));
    tokio::fs::copy(archive, &exe)
        .await
        .map_err(|e| LfxError::io(format!("copying {}", archive.display()), e))?;
    make_executable(&exe).await?;
    tokio::fs::create_dir_all(target)
        .await
        .map_err(|e| LfxError::io(format!("creating {}", target.display()), e))?;

    let argv = exe_arguments(args, target)?;
    let command_line = format!("{} {}", exe.display(), argv.join(" "));
    info!("Running {}", command_line);

    let run = Command::new(&exe)
        .args(&argv)
        .current_dir(&work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| LfxError::Timeout {
            operation: command_line.clone(),
            secs: timeout.as_secs(),
        })?
        .map_err(|e| LfxError::command_exec(command_line.clone(), e.to_string()))?;

    debug!("{} stdout: {}", exe.display(), String::from_utf8_lossy(&output.stdout).trim());
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        return Err(LfxError::command_exec(
            command_line,
            format!("{} (exit {:?})\n{}", stderr.trim(), output.status.code(), stdout.trim()),
        ));
    }

    let _ = tokio::fs::remove_file(&exe).await;
    let label = archive.display().to_string();
    let produced = fsutil::tree_size(target)
        .map_err(|e| LfxError::io(format!("sizing {}", target.display()), e))?;
    progress.report(Phase::Expand, &label, target, produced);
    progress.complete(Phase::Expand, &label, target);
    Ok(())
}

fn exe_name(archive: &Path) -> String {
    let stem = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    if cfg!(windows) && !stem.to_ascii_lowercase().ends_with(".exe") {
        format!("{}.exe", stem)
    } else {
        stem
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> LfxResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| LfxError::io(format!("chmod {}", path.display()), e))
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> LfxResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, body) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn extracts_zip_entries() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("top.txt", b"top"), ("nested/deep.txt", b"deep")]);

        let target = dir.path().join("out");
        expand(
            ExpansionKind::Zip,
            &archive,
            &target,
            None,
            &ExpandOptions::default(),
            &Progress::new(),
        )
        .await
        .unwrap();

        assert_eq!(fs::read(target.join("top.txt")).unwrap(), b"top");
        assert_eq!(fs::read(target.join("nested/deep.txt")).unwrap(), b"deep");
    }

    #[test]
    fn zip_slip_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("ok.txt", b"fine"), ("../escape.txt", b"evil")]);

        let target = dir.path().join("root/out");
        let err = extract_zip(&archive, &target, &Progress::new()).unwrap_err();

        assert!(matches!(err, LfxError::ZipSlip { .. }));
        assert!(!target.exists());
        assert!(!dir.path().join("root/escape.txt").exists());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn nuget_shims_only_when_absent() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pkg.nupkg");
        write_zip(
            &archive,
            &[("pkg.nuspec", b"<package/>"), (NUGET_CONTENT_TYPES, b"original")],
        );

        let target = dir.path().join("out");
        expand(
            ExpansionKind::Nuget,
            &archive,
            &target,
            None,
            &ExpandOptions::default(),
            &Progress::new(),
        )
        .await
        .unwrap();

        assert_eq!(fs::read(target.join(NUGET_CONTENT_TYPES)).unwrap(), b"original");
        assert!(target.join(NUGET_MARKER).exists());
    }

    #[test]
    fn exe_arguments_substitute_target() {
        let argv = exe_arguments("-y \"-o{0}\" --quiet", Path::new("/t/dir")).unwrap();
        assert_eq!(argv, vec!["-y", "-o/t/dir", "--quiet"]);
        assert!(exe_arguments("\"unterminated", Path::new("/t")).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_self_extracting_exe() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("setup");
        fs::write(&archive, "#!/bin/sh\necho extracted > \"$1/payload.txt\"\n").unwrap();
        let pointer = Pointer::exe("https://host/setup", "{0}");

        let target = dir.path().join("stage/content");
        fs::create_dir_all(dir.path().join("stage")).unwrap();
        let progress = Progress::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        progress.subscribe(move |event| sink.lock().unwrap().push(event.bytes));
        expand(
            ExpansionKind::SelfExtractingExe,
            &archive,
            &target,
            Some(&pointer),
            &ExpandOptions::default(),
            &progress,
        )
        .await
        .unwrap();

        assert_eq!(
            fs::read_to_string(target.join("payload.txt")).unwrap().trim(),
            "extracted"
        );
        // One byte count for the produced tree, then completion
        assert_eq!(*events.lock().unwrap(), vec![Some(10), None]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_exe_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken");
        fs::write(&archive, "#!/bin/sh\necho boom >&2\nexit 3\n").unwrap();
        fs::create_dir_all(dir.path().join("stage")).unwrap();

        let err = expand(
            ExpansionKind::SelfExtractingExe,
            &archive,
            &dir.path().join("stage/content"),
            Some(&Pointer::exe("https://host/broken", "{0}")),
            &ExpandOptions::default(),
            &Progress::new(),
        )
        .await
        .unwrap_err();

        match err {
            LfxError::CommandExecution { stderr, .. } => assert!(stderr.contains("boom")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_exe_times_out() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("slow");
        fs::write(&archive, "#!/bin/sh\nsleep 5\n").unwrap();
        fs::create_dir_all(dir.path().join("stage")).unwrap();

        let options = ExpandOptions {
            timeout: Duration::from_millis(100),
        };
        let err = expand(
            ExpansionKind::SelfExtractingExe,
            &archive,
            &dir.path().join("stage/content"),
            Some(&Pointer::exe("https://host/slow", "{0}")),
            &options,
            &Progress::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LfxError::Timeout { .. }));
    }
}
