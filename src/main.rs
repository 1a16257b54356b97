mod cli;
mod commands;
mod config;
mod downloader;
mod error;
mod merger;
mod monitor;
mod planner;
mod state;
mod transport;
mod utils;
mod worker;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::cli::ProgressMode;
use crate::config::{JobConfig, DEFAULT_PART_COUNT};

#[derive(Parser, Debug)]
#[command(author, version, about = "Download a file over several concurrent byte-range requests", long_about = None)]
struct Args {
    /// URL of the file to download (http or https)
    #[arg(index = 1)]
    url: String,

    /// Where to write the downloaded file
    #[arg(index = 2)]
    output: PathBuf,

    /// Number of parts to split the download into
    #[arg(index = 3, default_value_t = DEFAULT_PART_COUNT)]
    part_count: u32,

    /// Seconds to wait for a connection before a part fails
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Seconds without data before a part fails
    #[arg(long, default_value_t = 30)]
    stall_timeout: u64,

    /// Milliseconds between progress redraws
    #[arg(long, default_value_t = 100)]
    refresh_ms: u64,

    /// Progress bars: auto (only on a terminal), always, never
    #[arg(long, value_enum, default_value = "auto")]
    progress: ProgressMode,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("downloader={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = JobConfig::new(&args.url, args.output, args.part_count)?
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_stall_timeout(Duration::from_secs(args.stall_timeout))
        .with_refresh_interval(Duration::from_millis(args.refresh_ms.max(1)));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(crate::commands::run_single_download(config, args.progress))
}
