//! reclog CLI - Main Entry Point
//!
//! Lists, uploads, views and removes locally captured recordings.

use clap::{Parser, Subcommand};
use reclog_common::Config;
use std::path::PathBuf;

mod client;
mod commands;
mod output;

use commands::{list, metadata, remove, upload, view, Context};

/// reclog - manage local recordings
#[derive(Parser)]
#[command(name = "reclog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding recordings and the event log
    #[arg(long, env = "RECORD_REPLAY_DIRECTORY", global = true)]
    directory: Option<PathBuf>,

    /// Recording service address
    #[arg(long, env = "RECORD_REPLAY_SERVER", global = true)]
    server: Option<String>,

    /// API key for the recording service
    #[arg(long, env = "RECORD_REPLAY_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL recordings are viewed at
    #[arg(long, env = "RECORD_REPLAY_VIEW_HOST", global = true)]
    view_server: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List recordings
    Ls(list::ListArgs),

    /// Upload a recording
    Upload(upload::UploadArgs),

    /// Upload every matching recording
    UploadAll(upload::UploadAllArgs),

    /// Upload a recording and open it in the browser
    View(view::ViewArgs),

    /// Remove a recording and the files only it uses
    Rm(remove::RemoveArgs),

    /// Remove every recording
    RmAll,

    /// Add metadata to a recording
    Metadata(metadata::MetadataArgs),

    /// Show version information
    Version,
}

impl Cli {
    /// Configuration file values, overridden by flags and environment.
    fn resolve_config(&self) -> anyhow::Result<Config> {
        let path = self.config.clone().unwrap_or_else(Config::default_path);
        let mut config = Config::load(&path)?;

        if let Some(directory) = &self.directory {
            config.recordings_dir = directory.clone();
        }
        if let Some(server) = &self.server {
            config.server = server.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = Some(api_key.clone());
        }
        if let Some(view_server) = &self.view_server {
            config.view_server = view_server.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context::new(cli.resolve_config()?);
    tracing::debug!("Using event log {:?}", ctx.config.log_path());

    let result = match cli.command {
        Commands::Ls(args) => list::execute(args, &ctx, cli.format).await,
        Commands::Upload(args) => upload::execute(args, &ctx, cli.format).await,
        Commands::UploadAll(args) => upload::execute_all(args, &ctx, cli.format).await,
        Commands::View(args) => view::execute(args, &ctx).await,
        Commands::Rm(args) => remove::execute(args, &ctx).await,
        Commands::RmAll => remove::execute_all(&ctx).await,
        Commands::Metadata(args) => metadata::execute(args, &ctx).await,
        Commands::Version => {
            println!("reclog v{}", reclog_common::VERSION);
            Ok(())
        }
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
