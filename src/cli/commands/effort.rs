//! Effort command - estimate the work behind a fetch

use super::{open_loader, read_pointer_files};
use crate::cli::args::{EffortArgs, OutputFormat};
use crate::config::Config;
use crate::error::LfxResult;
use crate::loader::LoadEffort;
use crate::ui::format_bytes;
use serde_json::json;

/// Execute the effort command
pub async fn execute(args: EffortArgs, config: &Config) -> LfxResult<()> {
    let loader = open_loader(config)?;
    let infos = read_pointer_files(&args.files).await?;
    let effort = loader.load_effort(&infos).await?;

    match args.format {
        OutputFormat::Table => print_effort_table(&effort),
        OutputFormat::Json => print_effort_json(&effort)?,
    }
    Ok(())
}

fn print_effort_table(effort: &LoadEffort) {
    println!("{:<16} {:>8} {:>12}", "ACTION", "COUNT", "SIZE");
    println!("{}", "-".repeat(38));

    for (action, bucket) in &effort.by_action {
        println!(
            "{:<16} {:>8} {:>12}",
            action.to_string(),
            bucket.count,
            format_bytes(bucket.bytes)
        );
    }
    if effort.unknown_urls.count > 0 {
        println!(
            "{:<16} {:>8} {:>12}",
            "unknown url", effort.unknown_urls.count, "?"
        );
    }

    let pending = effort.pending();
    println!();
    println!(
        "Pending: {} item(s), {}",
        pending.count,
        format_bytes(pending.bytes)
    );
}

fn print_effort_json(effort: &LoadEffort) -> LfxResult<()> {
    let by_action: serde_json::Map<_, _> = effort
        .by_action
        .iter()
        .map(|(action, bucket)| (action.to_string(), json!(bucket)))
        .collect();
    let report = json!({
        "by_action": by_action,
        "unknown_urls": effort.unknown_urls,
        "pending": effort.pending(),
        "unresolved": effort.unresolved,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
