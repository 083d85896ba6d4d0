//! netpolctl - Netpol operator tooling
//!
//! Offline helpers for working with policy files:
//! - classify a policy's rules by derivation requirement
//! - synthesize the derivative of a policy against a static group map
//! - print the side-channel key a node writes its status under

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{classify, derive, status_key};
use config::AgentConfig;

/// Netpol CLI
#[derive(Parser)]
#[command(name = "netpolctl")]
#[command(about = "Netpol - derivative policy and status tooling", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "NETPOL_CONFIG", global = true)]
    config: Option<String>,

    /// Log level, overriding the configuration
    #[arg(long, env = "NETPOL_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Print each rule's derivation class
    Classify(classify::ClassifyArgs),

    /// Synthesize the derivative of a policy
    Derive(derive::DeriveArgs),

    /// Print the side-channel status key of a policy
    StatusKey(status_key::StatusKeyArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AgentConfig::load(cli.config.as_deref())?;

    // Initialize tracing. Logs go to stderr, command output to stdout.
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    if cli.json_logs || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Commands::Classify(args) => classify::execute(args),
        Commands::Derive(args) => derive::execute(args).await,
        Commands::StatusKey(args) => status_key::execute(args, &config),
    }
}
