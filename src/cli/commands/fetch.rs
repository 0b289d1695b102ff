//! Fetch command - materialize the content behind pointer files

use super::{display, open_loader, read_pointer_files};
use crate::cli::args::{build_pointer, FetchArgs};
use crate::config::Config;
use crate::error::LfxResult;
use crate::pointer::Info;
use crate::ui::{self, TransferProgress, UiContext};
use futures_util::future::join_all;
use tracing::debug;

/// Execute the fetch command
pub async fn execute(args: FetchArgs, config: &Config) -> LfxResult<()> {
    let ctx = UiContext::detect();
    let loader = open_loader(config)?;

    let (labels, infos): (Vec<String>, Vec<Info>) = match &args.url {
        Some(url) => {
            let pointer = build_pointer(url, args.kind, args.args.as_deref(), args.hint.as_deref());
            (vec![url.clone()], vec![Info::unresolved(pointer)])
        }
        None => (
            args.files.iter().map(|f| display(f)).collect(),
            read_pointer_files(&args.files).await?,
        ),
    };
    debug!("Fetching {} pointer(s)", infos.len());
    if !args.print_path {
        ui::intro(&ctx, "lfx fetch");
    }

    let transfers = (!args.print_path).then(|| TransferProgress::attach(&ctx, loader.progress()));
    let results = join_all(infos.iter().map(|info| loader.get_or_load_info(info))).await;
    if let Some(transfers) = transfers {
        transfers.finish();
    }

    let mut first_error = None;
    for (label, result) in labels.iter().zip(results) {
        match result {
            Ok(content) if args.print_path => println!("{}", display(&content.path)),
            Ok(content) => ui::step_ok_detail(&ctx, label, &display(&content.path)),
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(e) => ui::step_warn(&ctx, &format!("{}: {}", label, e)),
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            if !args.print_path {
                ui::outro_success(&ctx, &format!("Fetched {} item(s)", labels.len()));
            }
            Ok(())
        }
    }
}
