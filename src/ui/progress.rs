//! Transfer bars fed from loader progress events

use super::context::UiContext;
use super::output::format_bytes;
use crate::progress::{Phase, Progress, ProgressEvent};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type BarKey = (Phase, PathBuf);

/// Renders download, copy and expand events.
///
/// One spinner per in-flight transfer in interactive mode; a single line
/// per completed transfer on stderr otherwise.
pub struct TransferProgress {
    bars: Arc<Mutex<HashMap<BarKey, ProgressBar>>>,
}

impl TransferProgress {
    /// Subscribe to `progress` and start rendering
    pub fn attach(ctx: &UiContext, progress: &Progress) -> Self {
        let bars = Arc::new(Mutex::new(HashMap::new()));
        let multi = ctx.use_fancy_output().then(MultiProgress::new);
        let sink = bars.clone();
        progress.subscribe(move |event| render(multi.as_ref(), &sink, event));
        Self { bars }
    }

    /// Clear any bar still on screen
    pub fn finish(&self) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        for (_, bar) in bars.drain() {
            bar.finish_and_clear();
        }
    }
}

impl Drop for TransferProgress {
    fn drop(&mut self) {
        self.finish();
    }
}

fn render(
    multi: Option<&MultiProgress>,
    bars: &Mutex<HashMap<BarKey, ProgressBar>>,
    event: &ProgressEvent,
) {
    let key = (event.phase, event.target.clone());
    let mut bars = bars.lock().unwrap_or_else(|e| e.into_inner());

    match (multi, event.bytes) {
        (Some(multi), Some(bytes)) => {
            let bar = bars.entry(key).or_insert_with(|| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(bar_style());
                bar.set_prefix(event.phase.to_string());
                bar.set_message(short_name(&event.source));
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            });
            bar.set_position(bytes);
        }
        (Some(_), None) => {
            if let Some(bar) = bars.remove(&key) {
                bar.finish_and_clear();
            }
        }
        (None, Some(bytes)) => {
            // Hidden bar only tracks the byte count for the summary line
            bars.entry(key)
                .or_insert_with(ProgressBar::hidden)
                .set_position(bytes);
        }
        (None, None) => {
            let bytes = bars.remove(&key).map(|bar| bar.position());
            eprintln!(
                "  {} {} {}",
                style(format!("[{}]", event.phase)).dim(),
                short_name(&event.source),
                bytes.map(format_bytes).unwrap_or_default()
            );
        }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("  {spinner:.cyan} {prefix:>8} {bytes:>10} {msg:.dim}  {elapsed:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
}

/// Last path segment of a URL or path
fn short_name(source: &str) -> String {
    source
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(source)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names() {
        assert_eq!(short_name("https://host/dir/tool.zip"), "tool.zip");
        assert_eq!(short_name("/cache/archives/ab/cd/abcd/"), "abcd");
        assert_eq!(short_name("plain"), "plain");
    }

    #[test]
    fn non_interactive_events_do_not_panic() {
        let progress = Progress::new();
        let transfer = TransferProgress::attach(&UiContext::non_interactive(), &progress);
        let target = PathBuf::from("/tmp/out");
        progress.report(Phase::Download, "https://host/a.bin", &target, 10);
        progress.report(Phase::Download, "https://host/a.bin", &target, 20);
        progress.complete(Phase::Download, "https://host/a.bin", &target);
        transfer.finish();
    }
}
