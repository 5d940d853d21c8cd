//! Claims CLI - settle recovery claims and publish the merkle distribution
//!
//! Reads a TOML run configuration, settles the balance snapshot into per-account
//! claims with per-stage checkpoints, audits the result and builds the merkle
//! distribution list, root and proofs.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod audit;
mod checkpoint;
mod config;
mod files;
mod merkle;
mod settle;

use config::SettleConfig;

#[derive(Parser)]
#[command(name = "claims")]
#[command(about = "Recovery claims settlement and merkle distribution", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the run configuration
    #[arg(short, long, default_value = "claims.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Settle the snapshot into claims
    Settle {
        /// Continue from the most advanced checkpoint
        #[arg(long)]
        resume: bool,
    },

    /// Run consistency checks on the settled ledger
    Audit,

    /// Build the merkle distribution list from the settled ledger
    Distribution,

    /// Print the merkle root of the distribution
    Root,

    /// Print the inclusion proof of a claim
    Proof {
        /// Claim index
        #[arg(short, long)]
        index: u64,
    },

    /// Verify a claim against the distribution root
    Verify {
        /// Claim index
        #[arg(short, long)]
        index: u64,

        /// Published root to check against (defaults to the recomputed root)
        #[arg(long)]
        root: Option<String>,
    },

    /// Show per-token totals of the distribution
    Summary,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let config = SettleConfig::load(&cli.config)?;

    if cli.verbose {
        println!("{} {}", "Config:".bright_cyan(), cli.config.display());
        println!("{} {}", "Output:".bright_cyan(), config.output_dir()?.display());
    }

    match cli.command {
        Commands::Settle { resume } => {
            settle::run(&config, resume)?;
        }
        Commands::Audit => {
            audit::run(&config)?;
        }
        Commands::Distribution => {
            merkle::distribution(&config)?;
        }
        Commands::Root => {
            merkle::root(&config)?;
        }
        Commands::Proof { index } => {
            merkle::proof(&config, index)?;
        }
        Commands::Verify { index, root } => {
            merkle::verify(&config, index, root.as_deref())?;
        }
        Commands::Summary => {
            merkle::summary(&config)?;
        }
    }

    Ok(())
}
