//! `git-bin status`: what is cached locally and where chunks go.

use anyhow::Result;
use clap::Args;
use console::style;
use serde::Serialize;

use gitbin_cas::{CacheStats, ChunkStore, REMOTE_INDEX_FILENAME};
use gitbin_config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print machine-readable JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    cache_directory: String,
    chunk_size: usize,
    remote: Option<String>,
    remote_index_present: bool,
    cache: CacheStats,
}

pub fn run(config: &Config, args: StatusArgs) -> Result<()> {
    let cache_dir = config.cache_directory();
    let store = ChunkStore::new(&cache_dir)?;

    let report = StatusReport {
        cache_directory: cache_dir.display().to_string(),
        chunk_size: config.cache.chunk_size,
        remote: config.remote.path.as_ref().map(|p| p.display().to_string()),
        remote_index_present: cache_dir.join(REMOTE_INDEX_FILENAME).is_file(),
        cache: store.stats()?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", style("git-bin status").bold().cyan());
    println!("  Cache:        {}", report.cache_directory);
    println!(
        "  Chunks:       {} ({} bytes, avg {} bytes)",
        report.cache.chunk_count,
        report.cache.total_bytes,
        report.cache.avg_chunk_size()
    );
    println!("  Chunk size:   {} bytes", report.chunk_size);
    match &report.remote {
        Some(remote) => println!("  Remote:       {}", remote),
        None => println!("  Remote:       {}", style("not configured").yellow()),
    }
    println!(
        "  Remote index: {}",
        if report.remote_index_present {
            style("present").green()
        } else {
            style("not yet seeded").dim()
        }
    );
    Ok(())
}
