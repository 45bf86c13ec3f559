//! CLI command definitions and argument parsing

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use keel_updater::{UpdateOutcome, Updater};
use tracing::{debug, info};

use crate::config::{CliOverrides, Config};
use crate::ExitCode;

/// keel - runs the keel helper, keeping it verified and up to date
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(version, about = "Runs the keel helper, keeping it verified and up to date")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug mode (every request and decision is logged)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true, env = "KEEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Major-version channel to track
    #[arg(long, global = true)]
    pub channel: Option<String>,

    /// Release base URL (replaces the bucket URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Make sure the helper is installed and current
    Ensure,
    /// Print the installed helper's version
    Version,
    /// Run the helper with the given arguments
    Run {
        /// Arguments passed through to the helper
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Show resolved paths and URLs
    Paths,
    /// Forget the cached manifest so the next run checks again
    ClearCache,
}

impl Cli {
    /// Overrides carried by the global flags
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            channel: self.channel.clone(),
            base_url: self.base_url.clone(),
            verbose: self.verbose.then_some(true),
            debug: self.debug.then_some(true),
        }
    }

    /// Execute the CLI command with a pre-loaded configuration
    pub async fn execute_with_config(self, config: Config) -> anyhow::Result<std::process::ExitCode> {
        let updater = Updater::from_config(&config.updater).context("invalid updater configuration")?;

        match self.command {
            Commands::Ensure => {
                ensure(&updater).await?;
            }
            Commands::Version => {
                ensure(&updater).await?;
                let version = updater.local_version().await?;
                println!("{}", version);
            }
            Commands::Run { args } => {
                ensure(&updater).await?;
                return run_helper(&updater, &args).await;
            }
            Commands::Paths => print_paths(&updater),
            Commands::ClearCache => {
                updater.clear_cache()?;
                info!("Cache cleared");
            }
        }

        Ok(ExitCode::Success.to_exit_code())
    }
}

async fn ensure(updater: &Updater) -> anyhow::Result<()> {
    let outcome = updater
        .ensure_up_to_date()
        .await
        .context("no usable helper binary is available")?;
    match &outcome {
        UpdateOutcome::Installed { from, to } => {
            info!(from = from.as_deref().unwrap_or("none"), to = %to, "Helper updated");
        }
        other => debug!(outcome = ?other, "Helper check finished"),
    }
    Ok(())
}

async fn run_helper(updater: &Updater, args: &[String]) -> anyhow::Result<std::process::ExitCode> {
    let binary = updater.descriptor().binary_path();
    debug!(binary = %binary.display(), ?args, "Running helper");

    let status = tokio::process::Command::new(&binary)
        .args(args)
        .status()
        .await
        .with_context(|| format!("failed to run {}", binary.display()))?;

    let code = status
        .code()
        .and_then(|c| u8::try_from(c).ok())
        .unwrap_or(ExitCode::GeneralError as u8);
    Ok(std::process::ExitCode::from(code))
}

fn print_paths(updater: &Updater) {
    let d = updater.descriptor();
    println!("os:        {}", d.os());
    println!("channel:   {}", d.channel());
    println!("binary:    {}", d.binary_path().display());
    println!("cache:     {}", d.cache_dir().display());
    println!("key:       {}", d.public_key_path().display());
    println!("manifest:  {}", d.manifest_url());
    println!("signature: {}", d.signature_url());
}
