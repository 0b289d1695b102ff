//! Progress events
//!
//! Every slow operation (download, copy, expansion) reports
//! `(phase, source, target, bytes)` tuples to a shared [`Progress`] hub.
//! `bytes == None` marks the phase as complete.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// The kind of work being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Download,
    Copy,
    Expand,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Copy => write!(f, "copy"),
            Self::Expand => write!(f, "expand"),
        }
    }
}

/// One progress notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// URL or path being read
    pub source: String,
    /// Path being written
    pub target: PathBuf,
    /// Bytes processed so far, `None` once the phase completes
    pub bytes: Option<u64>,
}

impl ProgressEvent {
    pub fn is_complete(&self) -> bool {
        self.bytes.is_none()
    }
}

type Listener = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Multicast hub for progress events
///
/// Cloning shares the listener list, so a hub handed to a store and to the
/// directory wrapping it forwards to the same subscribers.
#[derive(Clone, Default)]
pub struct Progress {
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for every future event
    pub fn subscribe(&self, listener: impl Fn(&ProgressEvent) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(Arc::new(listener));
        }
    }

    /// Deliver an event to all listeners
    pub fn emit(&self, event: ProgressEvent) {
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };
        for listener in &listeners {
            listener(&event);
        }
    }

    /// Report `bytes` processed for `phase`
    pub fn report(&self, phase: Phase, source: &str, target: &std::path::Path, bytes: u64) {
        self.emit(ProgressEvent {
            phase,
            source: source.to_string(),
            target: target.to_path_buf(),
            bytes: Some(bytes),
        });
    }

    /// Report that `phase` finished
    pub fn complete(&self, phase: Phase, source: &str, target: &std::path::Path) {
        self.emit(ProgressEvent {
            phase,
            source: source.to_string(),
            target: target.to_path_buf(),
            bytes: None,
        });
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.listeners.read().map(|l| l.len()).unwrap_or(0);
        f.debug_struct("Progress").field("listeners", &count).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    #[test]
    fn clones_share_listeners() {
        let progress = Progress::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        progress.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        let clone = progress.clone();
        clone.report(Phase::Copy, "/src", Path::new("/dst"), 10);
        clone.complete(Phase::Copy, "/src", Path::new("/dst"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].bytes, Some(10));
        assert!(seen[1].is_complete());
    }

    #[test]
    fn phase_display() {
        assert_eq!(Phase::Download.to_string(), "download");
        assert_eq!(Phase::Expand.to_string(), "expand");
    }
}
