//! keel CLI entry point

use clap::Parser;
use keel_cli::{Cli, Config, ExitCode};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let config = match Config::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::InvalidInput.to_exit_code();
        }
    };
    let config = config.with_overrides(&cli.overrides());

    // Flags win over RUST_LOG, which wins over the config file.
    // Logs go to stderr; stdout carries command output only.
    let filter = if cli.debug || cli.verbose {
        EnvFilter::new(&config.logging.level)
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.logging.level))
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.execute_with_config(config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from_error(&e).to_exit_code()
        }
    }
}
