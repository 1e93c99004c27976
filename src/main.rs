//! `chromafeed` command line entry point
//!
//! Reads one URL per line from `--source`, writes `<url> #rrggbb ...` lines
//! to `--results`.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

use chromafeed::utils::MIB;
use chromafeed::{MemorySourceKind, Pipeline, PipelineConfig};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Reports the dominant colors of remote images", long_about = None)]
struct Args {
    /// File with one image URL per line
    #[arg(long)]
    source: PathBuf,

    /// File to write results to (truncated)
    #[arg(long)]
    results: PathBuf,

    /// Directory for spill files [default: ./cache]
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Memory ceiling in MiB [default: 512]
    #[arg(long)]
    memory: Option<u64>,

    /// JSON config used as the base; flags given on the command line win
    #[arg(long)]
    config: Option<PathBuf>,

    /// Items kept in memory before spilling to disk
    #[arg(long)]
    hot: Option<usize>,

    /// Items allowed on disk before fetching pauses
    #[arg(long)]
    cold: Option<usize>,

    /// Concurrent fetches
    #[arg(long)]
    fetches: Option<usize>,

    /// Concurrent analyses
    #[arg(long)]
    analyses: Option<usize>,

    /// Identities remembered for duplicate detection
    #[arg(long)]
    history_size: Option<usize>,

    /// Fetch every line, even repeated ones
    #[arg(long)]
    no_history: bool,

    /// Gate on the process resident set size instead of tracked reservations
    #[arg(long)]
    process_memory: bool,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let base = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            PipelineConfig::from_json(&json)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    let mut builder = base.into_builder();
    if let Some(cache) = &args.cache {
        builder = builder.cache_dir(cache);
    }
    if let Some(memory) = args.memory {
        builder = builder.memory_ceiling_bytes(memory.saturating_mul(MIB));
    }
    if let Some(hot) = args.hot {
        builder = builder.hot_capacity(hot);
    }
    if let Some(cold) = args.cold {
        builder = builder.cold_capacity(cold);
    }
    if let Some(fetches) = args.fetches {
        builder = builder.max_concurrent_fetches(fetches);
    }
    if let Some(analyses) = args.analyses {
        builder = builder.max_concurrent_analyses(analyses);
    }
    if let Some(size) = args.history_size {
        builder = builder.history_size(size);
    }
    if args.no_history {
        builder = builder.history_enabled(false);
    }
    if args.process_memory {
        builder = builder.memory_source(MemorySourceKind::Process);
    }
    builder.build()
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let pipeline = Pipeline::with_http(config)?;
    let summary = pipeline.run_files(&args.source, &args.results).await?;
    info!(
        "{} analyzed, {} skipped, {} spilled to disk",
        summary.analysis.analyzed, summary.analysis.skipped, summary.feeder.admitted_cold
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Args::parse()).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
