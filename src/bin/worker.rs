use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pdf_rag::{
    components::Pipeline,
    config::{self, Config, VectorStoreProvider},
    logging,
    processing::{DocumentFormat, sanitize::sanitize_filename},
    queue::{FileJobQueue, IngestionJob, JobId, QueueOptions},
};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "pdf-rag-worker",
    about = "Ingestion worker and queue maintenance for pdf-rag"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume the ingestion queue until Ctrl-C.
    Run {
        /// Override QUEUE_MAX_IN_FLIGHT for this consumer.
        #[arg(long)]
        max_in_flight: Option<usize>,
    },
    /// Enqueue local documents; directories are walked recursively.
    Enqueue {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Print a job's queue status as JSON.
    Status { job_id: JobId },
    /// Move every dead-lettered job back to pending.
    RequeueDead,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing("pdf-rag-worker");
    let cli = Cli::parse();
    let mut config = config::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Run { max_in_flight } => {
            if let Some(limit) = max_in_flight {
                config.queue_max_in_flight = limit;
            }
            run(config).await
        }
        Command::Enqueue { paths } => enqueue(&config, &paths).await,
        Command::Status { job_id } => {
            let queue = open_queue(&config).await?;
            match queue.status(job_id).await? {
                Some(status) => {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                    Ok(())
                }
                None => bail!("Unknown job {job_id}"),
            }
        }
        Command::RequeueDead => {
            let queue = open_queue(&config).await?;
            let moved = queue.requeue_dead().await?;
            println!("Requeued {moved} dead-lettered job(s)");
            Ok(())
        }
    }
}

async fn run(config: Config) -> Result<()> {
    if config.vector_store_provider == VectorStoreProvider::Memory {
        bail!("VECTOR_STORE_PROVIDER=memory is process-local; run the worker embedded in the HTTP service instead");
    }
    let pipeline = Pipeline::connect(config)
        .await
        .context("Failed to initialize pipeline components")?;
    let worker = Arc::new(pipeline.worker()?);
    worker
        .run_until(pipeline.queue(), async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(%error, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}

async fn open_queue(config: &Config) -> Result<FileJobQueue> {
    FileJobQueue::open(&config.queue_dir, QueueOptions::from_config(config))
        .await
        .with_context(|| format!("Failed to open queue at {}", config.queue_dir.display()))
}

async fn enqueue(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let queue = open_queue(config).await?;
    let mut enqueued = 0usize;
    for path in paths {
        for file in collect_documents(path)? {
            let source = file
                .canonicalize()
                .with_context(|| format!("Failed to resolve {}", file.display()))?;
            let raw_name = source
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            let Some(filename) = sanitize_filename(raw_name) else {
                tracing::warn!(path = %source.display(), "Skipping file with unusable name");
                continue;
            };
            let job_id = queue.enqueue(IngestionJob::new(filename, source.clone())).await?;
            println!("{job_id}\t{}", source.display());
            enqueued += 1;
        }
    }
    tracing::info!(enqueued, "Enqueue finished");
    Ok(())
}

fn collect_documents(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        if DocumentFormat::from_path(path).is_none() {
            bail!("Unsupported document type: {}", path.display());
        }
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("No such file or directory: {}", path.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|file| DocumentFormat::from_path(file).is_some())
        .collect();
    files.sort();
    Ok(files)
}
