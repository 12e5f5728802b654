use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use voxlift_protocol::{Priority, UploadStatus};

#[derive(Parser, Debug)]
#[command(name = "voxlift")]
#[command(about = "Queue recorded audio for resilient chunked upload")]
#[command(after_help = "Run '<command> --help' for detailed options on each command.")]
pub struct Cli {
    /// Directory holding the job store (default: $XDG_DATA_HOME/voxlift)
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,
    /// Queue configuration file (default: <data-dir>/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Queue a recording for upload
    Enqueue(EnqueueArgs),
    /// Run the queue until it drains (or Ctrl-C)
    Run(RunArgs),
    /// Show one job as JSON
    Status(JobArgs),
    /// List jobs in scheduling order
    List(ListArgs),
    /// Show queue-wide metrics
    Metrics,
    /// Pause a job
    Pause(JobArgs),
    /// Resume a paused job
    Resume(JobArgs),
    /// Re-queue a failed job with a fresh retry budget
    Retry(JobArgs),
    /// Cancel a job and discard its progress
    Cancel(CancelArgs),
    /// Delete completed jobs older than the retention window
    Sweep,
    /// Write the effective configuration to the config file
    InitConfig,
}

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Recorded audio file
    pub file: PathBuf,
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub subject: String,
    #[arg(long, default_value = "")]
    pub author: String,
    /// Recording length in seconds
    #[arg(long, default_value_t = 0.0)]
    pub duration: f64,
    /// urgent, high, normal or low
    #[arg(long, default_value = "normal")]
    pub priority: Priority,
    /// Override the configured retry budget
    #[arg(long)]
    pub max_retries: Option<u32>,
    /// Chunk size used when the server recommends none
    #[arg(long, value_name = "BYTES")]
    pub chunk_size: Option<u64>,
    /// Gzip the payload before upload
    #[arg(long)]
    pub compress: bool,
    /// Skip server-side checksum validation
    #[arg(long)]
    pub no_validate: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Keep running after the queue drains
    #[arg(long)]
    pub follow: bool,
    /// Start in offline mode (jobs wait until connectivity returns)
    #[arg(long)]
    pub offline: bool,
}

#[derive(Args, Debug)]
pub struct JobArgs {
    pub id: String,
}

#[derive(Args, Debug)]
pub struct CancelArgs {
    pub id: String,
    /// Also delete the cancelled job record
    #[arg(long)]
    pub purge: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<UploadStatus>,
    #[arg(long)]
    pub limit: Option<usize>,
}
