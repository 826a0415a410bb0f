use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sampleflow::ingest::ReadSource;
use sampleflow::{Pipeline, PipelineConfig, SeriesStore};

#[derive(Parser)]
#[command(name = "sampleflow")]
#[command(about = "Decode a recorded byte stream into block-stored series")]
struct Cli {
    /// Pipeline configuration (JSON: ingest, schema, store, decode_workers)
    #[arg(long)]
    config: PathBuf,

    /// Byte stream to replay; reads stdin when omitted
    #[arg(long)]
    input: Option<PathBuf>,

    /// Override the block storage root
    #[arg(long)]
    root: Option<PathBuf>,

    /// Override the flush lag in blocks
    #[arg(long)]
    flush_lag: Option<u64>,

    /// Override the number of parallel field decoders
    #[arg(long)]
    decode_workers: Option<usize>,

    /// Read size per chunk in bytes
    #[arg(long, default_value_t = 4096)]
    chunk: usize,

    /// Seconds to wait for outstanding flushes before exiting
    #[arg(long, default_value_t = 30)]
    flush_timeout_secs: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    std::panic::set_hook(Box::new(|info| {
        log::error!("panic: {info}");
    }));

    let cli = Cli::parse();
    let mut config = PipelineConfig::from_json_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(root) = cli.root {
        config.store.root = root;
    }
    if let Some(lag) = cli.flush_lag {
        config.store.flush_lag = lag;
    }
    if let Some(workers) = cli.decode_workers {
        config.decode_workers = workers;
    }
    config.validate()?;

    log::info!("==== sampleflow session start ====");
    let store = SeriesStore::open(config.store.clone())
        .with_context(|| format!("opening store at {}", config.store.root.display()))?;

    let pipeline = match &cli.input {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            Pipeline::start(&config, ReadSource::with_chunk(file, cli.chunk), &store)?
        }
        None => Pipeline::start(&config, ReadSource::with_chunk(io::stdin(), cli.chunk), &store)?,
    };
    let stats = pipeline.wait()?;

    if !store.flush_all(Duration::from_secs(cli.flush_timeout_secs))? {
        log::warn!("flushes still running after {}s", cli.flush_timeout_secs);
    }

    println!(
        "frames={} skipped_bytes={} checksum_failures={} malformed_lines={} substitutions={} overflows={}",
        stats.frames_stored,
        stats.decode.skipped_bytes,
        stats.decode.checksum_failures,
        stats.decode.malformed_lines,
        stats.decode.substitutions,
        stats.ingest.overflows
    );
    for (name, series) in store.stats()? {
        println!(
            "{name}: samples={} blocks={} on_disk={} degraded={}",
            series.samples, series.blocks, series.on_disk_blocks, series.degraded
        );
    }

    store.close()?;
    log::info!("==== sampleflow session stop ====");
    Ok(())
}
