//! Predex command - convert libraries through the conversion cache

use crate::cache::{output_path_for, CacheOptions, CacheOutcome, ConversionCache, KeyVariant};
use crate::cli::args::PredexArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{DroidpackError, DroidpackResult};
use crate::tasks::TaskGroup;
use crate::toolchain::{list_dex_files, Converter, DexOptions, DxTool, JackTool};
use crate::ui::{self, TaskProgress, UiContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};

/// Execute the predex command
pub async fn execute(args: PredexArgs, config: &Config) -> DroidpackResult<()> {
    let ctx = UiContext::detect();
    let converter = build_converter(&args, config);
    let extension = output_extension(&converter.variant());

    fs::create_dir_all(&args.out)
        .await
        .map_err(|e| DroidpackError::io(format!("creating directory {}", args.out.display()), e))?;

    let options = CacheOptions {
        wait_timeout: config.cache.wait_timeout(),
    };
    let persist = config.cache.enabled && !args.no_cache;
    let cache = Arc::new(if persist {
        let path = config
            .cache
            .file
            .clone()
            .unwrap_or_else(ConfigManager::default_cache_file);
        ConversionCache::open(path, options)
    } else {
        debug!("Conversion cache disabled, converting every library");
        ConversionCache::in_memory(options)
    });
    cache.load().await;

    let jobs = args.jobs.unwrap_or(config.cache.jobs);
    let mut group = TaskGroup::with_jobs(jobs);
    let progress = TaskProgress::new(&ctx, "Pre-dexing", args.libraries.len() as u64);

    for library in &args.libraries {
        let library = library.clone();
        let output = output_path_for(&library, &args.out, extension);
        let cache = Arc::clone(&cache);
        let converter = Arc::clone(&converter);
        let progress = progress.clone();

        group.spawn(async move {
            let name = display_name(&library);
            match cache.convert_library(&library, &output, converter.as_ref()).await {
                Ok(outcome) => {
                    let detail = if outcome.is_hit() { "cached" } else { "converted" };
                    progress.task_done(&name, detail);
                    Ok(outcome)
                }
                Err(e) => {
                    progress.task_failed(&name);
                    Err(e)
                }
            }
        });
    }

    let result = if args.keep_going {
        group.wait_all_checked().await
    } else {
        group.wait_fail_fast().await
    };
    progress.finish();

    if let Err(e) = &result {
        if e.is_recoverable() {
            warn!("A shared conversion did not complete; the next build will convert it again");
        }
    }

    cache.log_usage().await;
    if persist {
        if let Err(e) = cache.save().await {
            if result.is_ok() {
                return Err(e);
            }
            warn!("Unable to save conversion cache: {}", e);
        }
    }

    let outcomes = result?;
    let stats = cache.stats().await;
    let produced = collect_outputs(&outcomes).await?;
    ui::step_ok_detail(
        &ctx,
        &format!("Pre-dexed {} librar{}", outcomes.len(), if outcomes.len() == 1 { "y" } else { "ies" }),
        &format!("{} cached, {} converted", stats.hits, stats.misses),
    );
    for path in produced {
        println!("{}", path.display());
    }
    Ok(())
}

fn build_converter(args: &PredexArgs, config: &Config) -> Arc<dyn Converter> {
    let revision = args
        .revision
        .clone()
        .unwrap_or_else(|| config.dex.revision.clone());

    if let Some(jack) = &args.jack {
        return Arc::new(JackTool::new(jack.clone(), revision));
    }

    let program = args.dx.clone().unwrap_or_else(|| config.dex.tool.clone());
    let options = DexOptions {
        jumbo_mode: args.jumbo || config.dex.jumbo_mode,
        multi_dex: args.multi_dex || config.dex.multi_dex,
        extra_args: config.dex.extra_args.clone(),
    };
    Arc::new(DxTool::new(program, revision, options))
}

/// Extension of a converted library; multi-dex output is a directory
fn output_extension(variant: &KeyVariant) -> &'static str {
    match variant {
        KeyVariant::Jack => "jack",
        KeyVariant::PreDex { multi_dex: true, .. } => "dexdir",
        KeyVariant::PreDex { .. } => "dex",
    }
}

/// Every file the outcomes left in the output directory, in library order
async fn collect_outputs(outcomes: &[CacheOutcome]) -> DroidpackResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for outcome in outcomes {
        match outcome {
            CacheOutcome::Converted { outputs } => files.extend(outputs.iter().cloned()),
            CacheOutcome::Hit { output } if output.is_dir() => files.extend(list_dex_files(output).await?),
            CacheOutcome::Hit { output } => files.push(output.clone()),
        }
    }
    Ok(files)
}

fn display_name(library: &Path) -> String {
    library
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| library.display().to_string())
}
