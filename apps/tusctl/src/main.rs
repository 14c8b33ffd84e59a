//! tusctl: command-line client for tus resumable uploads.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tusctl", version, about = "Resumable uploads over the tus protocol")]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Creation endpoint; overrides the configuration file.
    #[arg(short, long, global = true)]
    pub endpoint: Option<String>,

    /// Bytes per PATCH request.
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Concurrent partial uploads.
    #[arg(long, global = true)]
    pub parallel: Option<u32>,

    /// Do not send `Upload-Checksum`.
    #[arg(long, global = true)]
    pub no_checksum: bool,

    /// More logging (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show what the server supports.
    Info,
    /// Create an upload resource without sending data.
    Create {
        /// Declared length; omit to defer it.
        length: Option<u64>,
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },
    /// Upload a file, resuming `--location` or `--partials` if given.
    Upload {
        file: PathBuf,
        /// Existing upload to resume.
        #[arg(long)]
        location: Option<String>,
        /// Partial uploads of a stopped parallel upload, in order.
        #[arg(long, value_delimiter = ',', conflicts_with = "location")]
        partials: Vec<String>,
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },
    /// Show the server's offset for an upload.
    Status { location: String },
    /// Fetch a finished upload.
    Download { location: String, dest: PathBuf },
    /// Terminate an upload.
    Delete { location: String },
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        None if !raw.is_empty() => Ok((raw.to_string(), String::new())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(parallel) = cli.parallel {
        config.parallel = parallel;
    }
    if cli.no_checksum {
        config.checksum = false;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(commands::run(cli.command, config))
}
