mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Types
// ============================================================================

/// chatwire - multi-session messaging gateway
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check configuration and storage
    Doctor {
        /// Path to configuration file
        #[arg(short, long, default_value = "chatwire.yaml")]
        config: String,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// List sessions with stored credentials
    Sessions {
        /// Path to configuration file
        #[arg(short, long, default_value = "chatwire.yaml")]
        config: String,
    },

    /// Delete the stored credentials of a session
    Purge {
        /// Session whose credentials are deleted
        #[arg(value_name = "SESSION_ID")]
        session_id: String,

        /// Path to configuration file
        #[arg(short, long, default_value = "chatwire.yaml")]
        config: String,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Doctor { config, format } => commands::doctor::run(&config, &format).await,
        Commands::Sessions { config } => commands::sessions::list(&config).await,
        Commands::Purge { session_id, config } => {
            commands::sessions::purge(&session_id, &config).await
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
