//! voxlift command-line entry point.

mod cli;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voxlift_job_store::FileJobStore;
use voxlift_upload_queue::{
    EnqueueOptions, GzipCompressor, HttpTransport, QueueConfig, QueueEvent, RecordingInfo,
    UploadQueue,
};

use cli::{CancelArgs, Cli, Commands, EnqueueArgs, ListArgs, RunArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries JSON output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => resolve_data_dir(
            std::env::var_os("XDG_DATA_HOME"),
            std::env::var_os("HOME"),
        )?,
    };
    let config_path = cli.config.unwrap_or_else(|| data_dir.join("config.json"));
    let config = QueueConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    if let Commands::InitConfig = cli.command {
        config.save(&config_path)?;
        println!("{}", config_path.display());
        return Ok(());
    }

    let queue = open_queue(&data_dir, config)?;
    match cli.command {
        Commands::Enqueue(args) => {
            let id = enqueue(&queue, args)?;
            println!("{id}");
        }
        Commands::Run(args) => run(&queue, args).await?,
        Commands::Status(args) => print_json(&queue.get_status(&args.id)?)?,
        Commands::List(ListArgs { status, limit }) => print_json(&queue.list(status, limit)?)?,
        Commands::Metrics => print_json(&queue.get_metrics()?)?,
        Commands::Pause(args) => print_json(&queue.pause(&args.id)?)?,
        Commands::Resume(args) => print_json(&queue.resume(&args.id)?)?,
        Commands::Retry(args) => print_json(&queue.retry(&args.id)?)?,
        Commands::Cancel(CancelArgs { id, purge }) => {
            let job = queue.cancel(&id)?;
            if purge {
                queue.acknowledge_cancellation(&id)?;
            }
            print_json(&job)?;
        }
        Commands::Sweep => {
            let removed = queue.sweep_retention()?;
            println!("{removed}");
        }
        Commands::InitConfig => {}
    }
    Ok(())
}

/// `$XDG_DATA_HOME/voxlift`, else `$HOME/.local/share/voxlift`.
fn resolve_data_dir(xdg_data_home: Option<OsString>, home: Option<OsString>) -> Result<PathBuf> {
    if let Some(xdg) = xdg_data_home.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(xdg).join("voxlift"));
    }
    match home.filter(|v| !v.is_empty()) {
        Some(home) => Ok(PathBuf::from(home).join(".local/share/voxlift")),
        None => bail!("cannot determine data directory; pass --data-dir"),
    }
}

fn open_queue(data_dir: &Path, config: QueueConfig) -> Result<UploadQueue> {
    let store = FileJobStore::open(data_dir.join("store"))
        .with_context(|| format!("failed to open job store in {}", data_dir.display()))?;
    let http_client = reqwest::Client::builder()
        .timeout(config.chunk_timeout())
        .build()
        .context("failed to build HTTP client")?;
    let transport = HttpTransport::new(http_client, config.endpoint.clone());

    let queue = UploadQueue::new(config, Arc::new(store), Arc::new(transport));
    queue.set_compressor(Arc::new(GzipCompressor::default()));
    Ok(queue)
}

fn enqueue(queue: &UploadQueue, args: EnqueueArgs) -> Result<String> {
    let payload = std::fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let info = RecordingInfo {
        subject: args.subject,
        title: args.title,
        author: args.author,
        duration_secs: args.duration,
    };
    let options = EnqueueOptions {
        priority: args.priority,
        max_retries: args.max_retries,
        chunk_size_bytes: args.chunk_size,
        compression_enabled: args.compress,
        validation_enabled: !args.no_validate,
    };
    Ok(queue.enqueue(payload, info, options)?)
}

/// Drives the queue, printing every event as a JSON line.
async fn run(queue: &UploadQueue, args: RunArgs) -> Result<()> {
    if args.offline {
        queue.set_online(false);
    }
    let mut events = queue.subscribe(&[]);
    queue.init()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping queue");
                break;
            }
            event = events.receiver.recv() => {
                let Some(event) = event else {
                    warn!("event stream closed");
                    break;
                };
                println!("{}", serde_json::to_string(&event)?);
                if event == QueueEvent::QueueEmpty && !args.follow {
                    break;
                }
            }
        }
    }

    queue.unsubscribe(events.id);
    queue.shutdown().await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
