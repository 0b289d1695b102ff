//! Config command - show or initialize configuration

use super::current_dir;
use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::LfxResult;
use crate::ui::{self, UiContext};
use std::path::Path;

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> LfxResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
    }
    Ok(())
}

fn show_config(config: &Config) -> LfxResult<()> {
    println!("{}", toml::to_string_pretty(config)?);

    let ctx = UiContext::detect();
    let dirs = config.tier_dirs(&current_dir()?);
    let show = |key: &str, path: &Path| ui::key_value(&ctx, key, &path.display().to_string());
    ui::section(&ctx, "Effective directories");
    show("cache_dir", &dirs.cache_dir);
    show("bus_cache_dir", &dirs.bus_cache_dir);
    if let Some(lan) = &dirs.lan_cache_dir {
        show("lan_cache_dir", lan);
    }
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> LfxResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());
    Ok(())
}
