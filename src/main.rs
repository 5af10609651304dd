//! ltk-harvest main entry point
//!
//! This is the command-line interface for the resumable post and media
//! harvester.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ltk_harvest::config::{load_config_with_hash, validate, Config, FetcherKind};
use ltk_harvest::crawler::{Coordinator, ProfileDiscovery};
use ltk_harvest::media::{MediaCoordinator, MediaRun};
use ltk_harvest::model::{MediaFilter, MediaKind};
use ltk_harvest::output::{load_statistics, print_statistics};
use ltk_harvest::storage::open_storage;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// ltk-harvest: a resumable post and media harvester
///
/// Posts are crawled into a SQLite frontier that survives interruption;
/// rerunning a command picks up where the last run stopped.
#[derive(Parser, Debug)]
#[command(name = "ltk-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resumable post and media harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    /// Database path (overrides the config file)
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<String>,

    /// Proxy for every request (overrides the config file)
    #[arg(long, value_name = "URL", global = true)]
    proxy: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch pending posts until the frontier is drained
    Crawl {
        /// Share URL of a post to add to the frontier (repeatable)
        #[arg(long = "seed", value_name = "URL")]
        seeds: Vec<String>,

        #[arg(long)]
        workers: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long, value_enum)]
        fetcher: Option<FetcherKind>,
    },

    /// Find new posts of the profiles already in the database and fetch them
    Profiles {
        /// Recent posts requested per profile
        #[arg(long)]
        max_per_profile: Option<usize>,
    },

    /// Download images that have no stored row yet
    Media {
        #[arg(long, value_enum, default_value = "product")]
        kind: MediaKind,

        #[arg(long)]
        workers: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Only products with a known price
        #[arg(long)]
        only_with_price: bool,

        /// Newest posts first
        #[arg(long)]
        most_recent_first: bool,

        /// Clear recorded media errors so those ids are fetched again
        #[arg(long)]
        retry_errors: bool,
    },

    /// Show statistics from the database and exit
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let mut config = load_configuration(cli.config.as_ref())?;
    apply_overrides(&mut config, &cli);
    validate(&config).context("invalid configuration")?;

    match cli.command {
        Command::Crawl { seeds, .. } => handle_crawl(config, &seeds).await,
        Command::Profiles { .. } => handle_profiles(config).await,
        Command::Media {
            kind,
            only_with_price,
            most_recent_first,
            retry_errors,
            ..
        } => {
            let filter = MediaFilter {
                only_with_price: only_with_price || config.media.only_with_price,
                most_recent_first: most_recent_first || config.media.most_recent_first,
            };
            let run = MediaRun {
                kind,
                filter,
                retry_errors,
            };
            handle_media(config, run).await
        }
        Command::Stats => handle_stats(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ltk_harvest=info,warn"),
            1 => EnvFilter::new("ltk_harvest=debug,info"),
            2 => EnvFilter::new("ltk_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn load_configuration(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            Ok(config)
        }
        None => {
            tracing::debug!("No configuration file given, using defaults");
            Ok(Config::default())
        }
    }
}

/// Layers command-line flags over the loaded configuration
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(db) = &cli.db {
        config.storage.database_path = db.clone();
    }
    if let Some(proxy) = &cli.proxy {
        config.network.proxy = Some(proxy.clone());
    }

    match &cli.command {
        Command::Crawl {
            workers,
            batch_size,
            fetcher,
            ..
        } => {
            if let Some(workers) = workers {
                config.crawler.workers = *workers;
            }
            if let Some(batch_size) = batch_size {
                config.crawler.batch_size = *batch_size;
            }
            if let Some(fetcher) = fetcher {
                config.crawler.fetcher = *fetcher;
            }
        }
        Command::Profiles { max_per_profile } => {
            if let Some(limit) = max_per_profile {
                config.crawler.profile_search_limit = *limit;
            }
        }
        Command::Media {
            workers,
            batch_size,
            ..
        } => {
            if let Some(workers) = workers {
                config.media.workers = *workers;
            }
            if let Some(batch_size) = batch_size {
                config.media.batch_size = *batch_size;
            }
        }
        Command::Stats => {}
    }
}

/// Cancels the returned token on Ctrl-C
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping workers");
            trigger.cancel();
        }
    });

    cancel
}

/// Handles the crawl command
async fn handle_crawl(config: Config, seeds: &[String]) -> anyhow::Result<()> {
    tracing::info!(
        "Crawling with {} workers ({:?} fetcher), database {}",
        config.crawler.workers,
        config.crawler.fetcher,
        config.storage.database_path
    );

    let coordinator = Coordinator::new(config)?;
    if !seeds.is_empty() {
        coordinator.seed(seeds).await?;
    }

    match coordinator.run(&interrupt_token()).await {
        Ok(report) => {
            tracing::info!(
                "Crawl completed successfully: {} posts, {} errors",
                report.persisted,
                report.errors
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handles the profiles command
async fn handle_profiles(config: Config) -> anyhow::Result<()> {
    let discovery = ProfileDiscovery::new(config)?;

    match discovery.run(&interrupt_token()).await {
        Ok(report) => {
            tracing::info!(
                "Discovery completed: {} new posts from {} profiles, {} fetched, {} errors",
                report.discovered,
                report.profiles,
                report.fetched,
                report.errors
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Discovery failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handles the media command
async fn handle_media(config: Config, run: MediaRun) -> anyhow::Result<()> {
    let coordinator = MediaCoordinator::new(config)?;

    match coordinator.run(run, &interrupt_token()).await {
        Ok(report) => {
            tracing::info!(
                "Media pass completed: {} {} items, {} errors",
                report.persisted,
                run.kind,
                report.errors
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Media pass failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handles the stats command
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_storage(&config.storage)?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}
