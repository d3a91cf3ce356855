//! # git-bin CLI
//!
//! Git clean/smudge filter that stores large binary files as chunk manifests.
//!
//! ```text
//! git config filter.bin.clean  "git-bin clean %f"
//! git config filter.bin.smudge "git-bin smudge"
//! echo "*.tga filter=bin binary" >> .gitattributes
//! ```

use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;

use gitbin_cas::{ChunkStore, DirRemote, Remote, RemoteError, RemoteFile, TransferEngine};
use gitbin_config::logging::{init_logging, LogLevel};
use gitbin_config::{log_cache_info, log_cli_debug, log_cli_error, Config};
use gitbin_filter::{CleanFilter, CleanOutcome, PushOrchestrator, PushOutcome, SmudgeFilter};

mod progress;
mod status;

use progress::BarProgress;

/// git-bin - chunked binary storage for git
#[derive(Parser)]
#[command(name = "git-bin")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Chunk cache directory (overrides git-bin.cacheDirectory)
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Chunk size, e.g. 1048576 or 1m (overrides git-bin.chunkSize)
    #[arg(long, global = true, value_name = "SIZE")]
    chunk_size: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read file content on stdin, cache its chunks, write the manifest to stdout
    Clean {
        /// Path of the file being checked in, as passed by git (%f)
        #[arg(value_name = "FILENAME")]
        filename: String,
    },

    /// Read a manifest on stdin, write the restored file to stdout
    Smudge,

    /// Upload cached chunks the remote does not have yet
    Push,

    /// Delete every chunk from the local cache
    ClearCache,

    /// Show cache statistics
    Status(status::StatusArgs),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file locations
    Path,
}

fn main() -> ExitCode {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    init_logging(LogLevel::Warn);

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_cli_error!("command failed", error = format!("{:#}", e));
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    log_cli_debug!(
        "configuration loaded",
        cache = config.cache_directory().display().to_string(),
        chunk_size = config.cache.chunk_size,
    );

    match cli.command {
        Commands::Clean { filename } => cmd_clean(&config, &filename),
        Commands::Smudge => cmd_smudge(&config),
        Commands::Push => cmd_push(&config),
        Commands::ClearCache => cmd_clear_cache(&config),
        Commands::Status(args) => status::run(&config, args),
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
            ConfigCommands::Path => {
                match Config::global_config_path() {
                    Some(path) => println!("Global: {}", path.display()),
                    None => println!("Global: (no home directory)"),
                }
                println!("Cache:  {}", config.cache_directory().display());
                Ok(())
            }
        },
    }
}

/// Config from files, git and environment, then command-line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(dir) = &cli.cache_dir {
        config.cache.directory = Some(dir.clone());
    }
    if let Some(size) = &cli.chunk_size {
        config.cache.chunk_size = gitbin_config::parse_size("--chunk-size", size)?;
    }
    config.validate()?;
    Ok(config)
}

fn open_store(config: &Config) -> Result<ChunkStore> {
    let root = config.cache_directory();
    ChunkStore::new(&root).with_context(|| format!("Failed to open cache at {}", root.display()))
}

fn open_remote(config: &Config) -> Result<DirRemote> {
    let path = config
        .remote
        .path
        .as_ref()
        .context("No remote configured: set git-bin.remotePath or GITBIN_REMOTE_PATH")?;
    DirRemote::new(path).with_context(|| format!("Failed to open remote at {}", path.display()))
}

fn transfer_engine(config: &Config, progress: &Arc<BarProgress>) -> TransferEngine {
    TransferEngine::new(progress.clone()).with_concurrency(config.transfer.concurrency)
}

/// Status line on stderr; stdout is reserved for filter data.
fn say(msg: &str) {
    eprintln!("{} {}", style("[git-bin]").dim(), msg);
}

fn cmd_clean(config: &Config, filename: &str) -> Result<()> {
    let store = open_store(config)?;
    let stdout = BufWriter::new(io::stdout().lock());

    let outcome = CleanFilter::new(&store, config.cache.chunk_size)
        .run(filename, io::stdin().lock(), stdout)
        .with_context(|| format!("Failed to clean {}", filename))?;

    match outcome {
        CleanOutcome::Manifest(manifest) => say(&format!(
            "Cleaned {}: {} chunks",
            filename,
            manifest.len()
        )),
        CleanOutcome::PassThrough { .. } => {
            say(&format!("{} is already a manifest, left unchanged", filename))
        }
    }
    Ok(())
}

fn cmd_smudge(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    // A warm cache needs no remote, so a missing one only fails on download
    let remote: Box<dyn Remote> = match open_remote(config) {
        Ok(remote) => Box::new(remote),
        Err(e) => Box::new(Unconfigured(e.to_string())),
    };

    let progress = Arc::new(BarProgress::new("Downloading"));
    let stdout = BufWriter::new(io::stdout().lock());

    let result = SmudgeFilter::new(&store, remote.as_ref(), transfer_engine(config, &progress))
        .with_max_passes(config.transfer.max_integrity_passes)
        .run(io::stdin().lock(), stdout);
    progress.finish();

    result.context("Failed to smudge")?;
    Ok(())
}

fn cmd_push(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let remote = open_remote(config)?;
    let progress = Arc::new(BarProgress::new("Uploading"));

    let result =
        PushOrchestrator::new(&store, &remote, transfer_engine(config, &progress)).run();
    progress.finish();

    match result.context("Push failed")? {
        PushOutcome::NothingToPush => say("All chunks already present on remote"),
        PushOutcome::Uploaded(1) => say(&format!("{} 1 chunk", style("Uploaded").green())),
        PushOutcome::Uploaded(n) => say(&format!("{} {} chunks", style("Uploaded").green(), n)),
    }
    Ok(())
}

fn cmd_clear_cache(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let removed = store.clear()?;
    log_cache_info!(
        "cache cleared",
        removed = removed,
        root = store.root().display().to_string(),
    );
    say(&format!(
        "Removed {} chunks from {}",
        removed,
        store.root().display()
    ));
    Ok(())
}

/// Stand-in remote when none is configured. Every call fails with the
/// configuration error.
struct Unconfigured(String);

impl Unconfigured {
    fn error(&self, name: &str) -> RemoteError {
        RemoteError::Transfer {
            name: name.to_string(),
            reason: self.0.clone(),
        }
    }
}

impl Remote for Unconfigured {
    fn list_files(&self) -> Result<Vec<RemoteFile>, RemoteError> {
        Err(self.error("<listing>"))
    }

    fn upload_file(&self, _local_path: &Path, name: &str) -> Result<(), RemoteError> {
        Err(self.error(name))
    }

    fn download_file(&self, _local_path: &Path, name: &str) -> Result<(), RemoteError> {
        Err(self.error(name))
    }

    fn name(&self) -> &'static str {
        "unconfigured"
    }
}
