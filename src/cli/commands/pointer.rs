//! Pointer command - inspect and create pointer files

use super::{display, open_loader};
use crate::cli::args::{build_pointer, OutputFormat, PointerAction, PointerArgs, PointerKind};
use crate::config::Config;
use crate::error::{LfxError, LfxResult};
use crate::pointer::{read_pointer_file, Info, Metadata};
use crate::ui::{self, format_bytes, TransferProgress, UiContext};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Execute the pointer command
pub async fn execute(args: PointerArgs, config: &Config) -> LfxResult<()> {
    match args.action {
        PointerAction::Show { file, format } => show_pointer(&file, format).await,
        PointerAction::Create {
            url,
            kind,
            args,
            hint,
            output,
        } => {
            create_pointer(
                config,
                &url,
                kind,
                args.as_deref(),
                hint.as_deref(),
                output,
            )
            .await
        }
    }
}

async fn show_pointer(file: &Path, format: OutputFormat) -> LfxResult<()> {
    let info = read_pointer_file(file).await?;
    match format {
        OutputFormat::Table => print_info(&UiContext::detect(), &info),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
    }
    Ok(())
}

fn print_info(ctx: &UiContext, info: &Info) {
    let pointer = &info.pointer;
    ui::key_value(ctx, "type", pointer.kind.as_str());
    ui::key_value(ctx, "version", &pointer.version.to_string());
    ui::key_value(ctx, "url", pointer.url.as_deref().unwrap_or("-"));
    if let Some(args) = &pointer.args {
        ui::key_value(ctx, "args", args);
    }
    if let Some(hint) = &pointer.hint {
        ui::key_value(ctx, "hint", hint);
    }
    match &info.metadata {
        Some(metadata) => {
            ui::key_value(ctx, "oid", &metadata.archive_id.to_hex());
            ui::key_value(ctx, "size", &format_bytes(metadata.compressed_size));
        }
        None => ui::key_value(ctx, "oid", "unresolved"),
    }
}

async fn create_pointer(
    config: &Config,
    url: &str,
    kind: PointerKind,
    args: Option<&str>,
    hint: Option<&str>,
    output: Option<PathBuf>,
) -> LfxResult<()> {
    let ctx = UiContext::detect();
    let loader = open_loader(config)?;

    let transfers = TransferProgress::attach(&ctx, loader.progress());
    let downloaded = loader.download(url).await?;
    transfers.finish();

    let pointer = build_pointer(url, kind, args, hint);
    let info = Info::resolved(pointer, Metadata::new(downloaded.hash, downloaded.size));
    let text = info.to_pointer_text();

    match output {
        Some(path) => {
            ui::step_info(
                &ctx,
                &format!("{} is {} ({})", url, downloaded.hash, format_bytes(downloaded.size)),
            );
            fs::write(&path, &text)
                .await
                .map_err(|e| LfxError::io(format!("writing {}", path.display()), e))?;
            ui::step_ok_detail(&ctx, "Pointer written", &display(&path));
        }
        None => print!("{}", text),
    }
    Ok(())
}
