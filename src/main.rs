//! Request admission gateway.
//!
//! ```text
//! Client
//!   → proxy trust → body parsing → /uploads → CORS → security headers
//!   → sanitizer → rate limit (/api/) → session → routes
//!
//! SessionStore / CounterStore: memory:// (single instance) or redis://
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use admission_gateway::config::load_config;
use admission_gateway::lifecycle::startup;
use admission_gateway::observability::logging;

#[derive(Parser)]
#[command(name = "admission-gateway")]
#[command(about = "HTTP request admission pipeline", long_about = None)]
struct Cli {
    /// TOML configuration file. Environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("admission-gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        println!("Configuration OK");
        return ExitCode::SUCCESS;
    }

    logging::init_tracing(&config.observability);
    tracing::info!("admission-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    let result = match startup::start(config).await {
        Ok(started) => started.run().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}
