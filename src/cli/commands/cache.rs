//! Cache command - inspect and maintain the cache directories

use super::{display, open_loader};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::LfxResult;
use crate::loader::CacheDump;
use crate::ui::{self, format_bytes, UiContext};
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> LfxResult<()> {
    let loader = open_loader(config)?;
    let ctx = UiContext::detect();

    match args.action {
        CacheAction::Dump { format } => {
            let dump = loader.dump().await?;
            match format {
                OutputFormat::Table => print_dump_table(&dump),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&dump)?),
            }
        }
        CacheAction::Clean => {
            match loader.clean().await? {
                0 => ui::remark(&ctx, "No orphaned staging directories"),
                removed => ui::step_ok(&ctx, &format!("Removed {} staging director(ies)", removed)),
            }
        }
        CacheAction::Clear { yes } => {
            let ctx = ctx.with_auto_yes(yes);
            if !ui::confirm(&ctx, "Delete all cached archives and content?", false).await? {
                ui::step_warn_hint(&ctx, "Nothing cleared", "Use --yes to skip confirmation");
                return Ok(());
            }
            loader.clear().await?;
            ui::step_ok(&ctx, "Cache cleared");
        }
    }
    Ok(())
}

fn print_dump_table(dump: &CacheDump) {
    println!(
        "{:<10} {:>8} {:>12}  {}",
        "STORE", "ENTRIES", "SIZE", "ROOT"
    );
    println!("{}", "-".repeat(72));

    for store in &dump.stores {
        let root = if store.read_only {
            format!("{} {}", display(&store.root), style("(read-only)").dim())
        } else {
            display(&store.root)
        };
        println!(
            "{:<10} {:>8} {:>12}  {}",
            store.name,
            store.entries,
            format_bytes(store.bytes),
            root
        );
    }

    if dump.infos.is_empty() {
        return;
    }
    println!();
    println!("{:<8} {:>12}  {}", "TYPE", "SIZE", "URL");
    for info in &dump.infos {
        let size = info
            .metadata
            .map(|m| format_bytes(m.content_size()))
            .unwrap_or_default();
        println!(
            "{:<8} {:>12}  {}",
            info.pointer.kind.as_str(),
            size,
            info.pointer.url.as_deref().unwrap_or("-")
        );
    }
}
