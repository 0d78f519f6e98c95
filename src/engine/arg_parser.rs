use clap::Parser;
use std::path::PathBuf;

use crate::types::FilterId;

/// Submit an image filtering job to a running imgfilterd and save the result.
#[derive(Clone, Parser)]
#[command(name = "imgfilter")]
#[command(about = "Submit a BMP filter job to the dispatcher and wait for the result.")]
pub struct ClientCli {
    /// Source image (uncompressed 24-bit BMP). Passed to the worker as given.
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Filter: 1/grayscale, 2/negative, 3/brightness.
    #[arg(value_name = "FILTER")]
    pub filter: FilterId,

    /// Numeric parameters (up to 5), carried with the request.
    #[arg(value_name = "PARAM", allow_negative_numbers = true, num_args = 0..=5)]
    pub params: Vec<i32>,

    /// Output file. Default: result.bmp.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Seconds to wait for the result.
    #[arg(long, short = 't', value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Directory resolved into the request segment key. Must match the dispatcher's.
    #[arg(long)]
    pub ipc_dir: Option<PathBuf>,

    /// Prefix for semaphore and FIFO names. Must match the dispatcher's.
    #[arg(long)]
    pub namespace: Option<String>,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

/// Image filtering dispatcher: owns the request queue and forks one worker per job.
#[derive(Clone, Parser)]
#[command(name = "imgfilterd")]
#[command(about = "Run the filter dispatcher until interrupted.")]
pub struct DispatcherCli {
    /// Stay attached to the terminal instead of daemonizing.
    #[arg(long, short = 'f', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub foreground: Option<bool>,

    /// Threads (row bands) per worker.
    #[arg(long, short = 'j', value_parser = clap::value_parser!(u64).range(1..=64))]
    pub threads: Option<u64>,

    /// Directory resolved into the request segment key.
    #[arg(long)]
    pub ipc_dir: Option<PathBuf>,

    /// Prefix for semaphore and FIFO names.
    #[arg(long)]
    pub namespace: Option<String>,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}
