//! Tidepool main entry point
//!
//! This is the command-line interface for the Tidepool research-data harvester.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tidepool::config::load_config_with_hash;
use tidepool::crawler::{Harvester, Job, RunOptions};
use tracing_subscriber::EnvFilter;

/// Tidepool: a resumable, rate-limited research-data harvester
///
/// Tidepool scans Hacker News item ranges for keyword matches, expands the
/// matches into reply trees, and walks GitHub repository history month by
/// month. Every job checkpoints its progress and resumes where it stopped.
#[derive(Parser, Debug)]
#[command(name = "tidepool")]
#[command(version)]
#[command(about = "A resumable, rate-limited research-data harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Job to run
    #[arg(value_enum, value_name = "JOB")]
    job: JobArg,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output and progress bars
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Move the job's checkpoint aside and start over
    #[arg(long)]
    fresh: bool,

    /// Replace a corrupt checkpoint instead of aborting
    #[arg(long)]
    discard_corrupt: bool,

    /// Validate config and show what the job would do without running it
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show the job's stored checkpoint and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JobArg {
    /// Scan an item id range for keyword matches
    Scan,
    /// Expand scanned items into reply trees
    Expand,
    /// Walk monthly repository metrics
    Walk,
}

impl From<JobArg> for Job {
    fn from(arg: JobArg) -> Self {
        match arg {
            JobArg::Scan => Job::Scan,
            JobArg::Expand => Job::Expand,
            JobArg::Walk => Job::Walk,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let job = Job::from(cli.job);
    let options = RunOptions {
        fresh: cli.fresh,
        discard_corrupt: cli.discard_corrupt,
        quiet: cli.quiet,
    };
    let mut harvester =
        Harvester::new(config, config_hash, options).context("Failed to open checkpoint store")?;

    if cli.dry_run {
        println!("=== Tidepool Dry Run ===\n");
        println!("{}", harvester.plan(job)?);
        println!("\n✓ Configuration is valid");
        return Ok(());
    }

    if cli.stats {
        match harvester.stats(job)? {
            Some(summary) => println!("{}", summary),
            None => println!("No checkpoint for job '{}'", job),
        }
        return Ok(());
    }

    tokio::select! {
        result = harvester.run(job) => {
            let report = result.with_context(|| format!("{} job failed", job))?;
            if !cli.quiet {
                println!("{}", report);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            // The last saved checkpoint is the resume point
            tracing::warn!("Interrupted; re-run the same command to resume");
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("tidepool=info,warn"),
            1 => EnvFilter::new("tidepool=debug,info"),
            2 => EnvFilter::new("tidepool=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}
