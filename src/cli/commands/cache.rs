//! Cache command - inspect or reset the persisted conversion cache

use crate::cache::{CacheOptions, ConversionCache};
use crate::cli::args::{CacheAction, CacheArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{DroidpackError, DroidpackResult};
use crate::ui::{self, UiContext};
use std::path::PathBuf;
use tokio::fs;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> DroidpackResult<()> {
    let path = cache_file(config);

    match args.action {
        CacheAction::Stats => show_stats(path).await,
        CacheAction::Clear => clear_cache(path).await,
        CacheAction::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn cache_file(config: &Config) -> PathBuf {
    config
        .cache
        .file
        .clone()
        .unwrap_or_else(ConfigManager::default_cache_file)
}

async fn show_stats(path: PathBuf) -> DroidpackResult<()> {
    let ctx = UiContext::detect();

    if !path.exists() {
        println!("No conversion cache at {}", path.display());
        return Ok(());
    }

    let cache = ConversionCache::open(&path, CacheOptions::default());
    cache.load().await;
    let stats = cache.stats().await;

    ui::section(&ctx, "Conversion cache");
    ui::key_value(&ctx, "file", &path.display().to_string());
    ui::key_value(&ctx, "entries", &stats.persisted.to_string());
    Ok(())
}

async fn clear_cache(path: PathBuf) -> DroidpackResult<()> {
    let ctx = UiContext::detect();

    match fs::remove_file(&path).await {
        Ok(()) => {
            ui::step_ok_detail(&ctx, "Conversion cache cleared", &path.display().to_string());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            ui::step_info(&ctx, "Conversion cache is already empty");
            Ok(())
        }
        Err(e) => Err(DroidpackError::io(format!("removing {}", path.display()), e)),
    }
}
