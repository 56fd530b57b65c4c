//! origintrace CLI: trace rendered characters back to where they came from.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// origintrace: character-level provenance for rendered HTML
#[derive(Parser, Debug)]
#[command(name = "origintrace", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Print origin paths as JSON
    #[arg(long, global = true)]
    json: bool,

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
    /// Assign markup to an element's innerHTML and trace one rendered character
    Html {
        /// Markup to assign
        #[arg(long)]
        html: String,
        /// Character offset into the element's outerHTML
        #[arg(long)]
        offset: usize,
        /// Tag name of the element receiving the markup
        #[arg(long, default_value = "div")]
        container: String,
        /// Write the recorded operation log to this file as a JSON snapshot
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Load an HTML file as the initial page and trace one character of it
    Page {
        /// HTML file to load
        file: PathBuf,
        /// Character offset into the serialized page body
        #[arg(long)]
        offset: usize,
        /// Write the recorded operation log to this file as a JSON snapshot
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Walk a persisted operation log from one entry
    Inspect {
        /// Log file (JSON snapshot or JSON lines)
        log: PathBuf,
        /// Entry index to start from
        #[arg(long)]
        entry: usize,
        /// Character offset into the entry's value
        #[arg(long)]
        offset: usize,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
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

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "origintrace", "origintrace")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "origintrace.log");
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

    let output = if cli.json {
        commands::Output::Json
    } else {
        commands::Output::Text
    };
    commands::handle_command(cli.command, &workspace, output).await
}
