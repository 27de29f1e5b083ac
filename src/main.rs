//! Claude Relay - Supervised, retrying bridge from HTTP to the Claude Code CLI.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_relay::config::{ConfigLoader, RelayConfig};
use claude_relay::relay::RelayError;
use claude_relay::server::RelayServer;

#[derive(Parser)]
#[command(
    name = "claude-relay",
    about = "Relay prompts to Claude Code with supervision and retries",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP relay.
    Serve {
        /// Config file (defaults to the search path).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Address to bind, overriding the config.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, overriding the config and PORT.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Relay a single prompt and print the completion.
    Ask {
        /// The prompt text.
        text: String,
        /// Config file (defaults to the search path).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Option<RelayConfig> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    match loader.load() {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            eprintln!("Error: {e}");
            None
        }
    }
}

/// Cancel `token` on the first ctrl-c.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received ctrl-c, shutting down");
            token.cancel();
        }
    });
}

async fn serve(config: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> ExitCode {
    let Some(mut config) = load_config(config) else {
        return ExitCode::FAILURE;
    };
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let server = match RelayServer::from_config(&config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        address = %server.address(),
        binary = %config.cli.binary.display(),
        max_retries = config.retry.max_retries,
        "Claude relay configured"
    );
    cancel_on_ctrl_c(server.shutdown_token());

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server error");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn ask(text: &str, config: Option<PathBuf>) -> ExitCode {
    if text.is_empty() {
        eprintln!("Error: prompt text is empty");
        return ExitCode::FAILURE;
    }
    let Some(config) = load_config(config) else {
        return ExitCode::FAILURE;
    };
    let coordinator = match config.coordinator() {
        Ok(coordinator) => coordinator,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    match coordinator.relay(text, &cancel).await {
        Ok(completion) => {
            println!("{completion}");
            ExitCode::SUCCESS
        }
        Err(e @ RelayError::ServiceOverloaded { .. }) => {
            eprintln!("Error: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve { config, host, port } => serve(config, host, port).await,
        Commands::Ask { text, config } => ask(&text, config).await,
    }
}
