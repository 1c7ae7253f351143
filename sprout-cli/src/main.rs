//! Sprout CLI: terminal front end for the specialist router.
//!
//! Routes one question per invocation and exposes the routing decision,
//! the registry, and the effective configuration for inspection.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Sprout: route parenting questions to the right specialist
#[derive(Parser, Debug)]
#[command(name = "sprout", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (reads `.sprout/config.toml` from here)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (replaces the user and workspace files)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Route a question and print the answer
    Ask {
        /// The question to route
        query: String,

        /// Comma-separated specialist ids to consult
        #[arg(short, long, value_delimiter = ',')]
        specialists: Vec<String>,

        /// Never fan out to multiple specialists
        #[arg(long, conflicts_with = "specialists")]
        single: bool,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the routing decision for a question without invoking anyone
    Classify {
        /// The question to classify
        query: String,

        /// Comma-separated specialist ids, as for `ask`
        #[arg(short, long, value_delimiter = ',')]
        specialists: Vec<String>,
    },
    /// Inspect specialist registries
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum RegistryAction {
    /// Validate a registry file (defaults to the configured registry)
    Check {
        /// Registry TOML file
        path: Option<PathBuf>,
    },
    /// List the specialists of the configured registry
    List,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default workspace configuration file
    Init,
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer keeps the full routing trace regardless of verbosity
    let log_dir = directories::ProjectDirs::from("dev", "sprout", "sprout")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "sprout.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}
