//! dvbulk entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dvbulk_engine::{
    DataverseRepository, RunConfig, RunSummary, TransferOutcome, UploadEvent, Uploader,
};
use dvbulk_resource::ChecksumAlgorithm;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dvbulk", version, about = "Bulk file upload for Dataverse datasets")]
struct Cli {
    /// Files and directories to upload.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Dataverse server base URL.
    #[arg(short = 's', long = "server", env = "DVBULK_SERVER_URL")]
    server: String,

    /// API token.
    #[arg(short = 'k', long = "key", env = "DVBULK_API_KEY", hide_env_values = true)]
    key: String,

    /// Persistent identifier of the target dataset (e.g. doi:10.70122/FK2/ABCDEF).
    #[arg(short = 'd', long = "dataset", env = "DVBULK_DATASET_PID")]
    dataset: String,

    /// Recurse into subdirectories.
    #[arg(short = 'r', long)]
    recurse: bool,

    /// Resolve duplicates and show what would be uploaded, without transferring.
    #[arg(short = 'l', long = "list-only")]
    list_only: bool,

    /// Compare content checksums when deciding duplicates.
    #[arg(long)]
    verify: bool,

    /// Always upload through the API server, even if the store offers direct upload.
    #[arg(long = "no-direct")]
    no_direct: bool,

    /// Upload even when a matching entry already exists.
    #[arg(long = "force-new")]
    force_new: bool,

    /// Checksum algorithm (md5, sha-1, sha-256, sha-512).
    #[arg(long, default_value = "md5")]
    algorithm: ChecksumAlgorithm,

    /// Retry attempts per file beyond the first.
    #[arg(long = "max-retries", default_value_t = 3)]
    max_retries: u32,

    /// Maximum seconds to wait for a dataset lock to clear.
    #[arg(long = "lock-wait", default_value_t = 60)]
    lock_wait: u64,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 1200)]
    timeout: u64,

    /// HTTP connection and multipart part concurrency.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Candidates to pass over before uploading starts.
    #[arg(long, default_value_t = 0)]
    skip: usize,

    /// Stop after this many files have been uploaded.
    #[arg(long = "max-files")]
    max_files: Option<usize>,

    /// Verbose logging (repeat for more detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            server_url: self.server.clone(),
            api_key: self.key.clone(),
            dataset_pid: self.dataset.clone(),
            algorithm: self.algorithm,
            recurse: self.recurse,
            direct_upload: !self.no_direct,
            verify_checksums: self.verify,
            list_only: self.list_only,
            force_new: self.force_new,
            max_retries: self.max_retries,
            max_lock_wait: Duration::from_secs(self.lock_wait),
            request_timeout: Duration::from_secs(self.timeout),
            http_concurrency: self.concurrency,
            part_concurrency: self.concurrency,
            skip_files: self.skip,
            max_files: self.max_files,
            ..RunConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(summary) if summary.has_failures() => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<RunSummary> {
    let config = cli.run_config();
    let repo = DataverseRepository::new(&config).context("cannot build API client")?;
    let mut uploader = Uploader::new(config, Arc::new(repo))?;

    let events = uploader.subscribe();
    let printer = tokio::spawn(print_events(events, cli.list_only));

    let cancel = uploader.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupted, finishing in-flight transfers");
            cancel.cancel();
        }
    });

    let summary = uploader.run(&cli.paths).await?;
    drop(uploader);
    let _ = printer.await;

    print_summary(&summary);
    Ok(summary)
}

async fn print_events(
    mut events: tokio::sync::mpsc::Receiver<UploadEvent>,
    list_only: bool,
) {
    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::Started { path, size } => {
                if list_only {
                    println!("candidate {path} ({size} bytes)");
                }
            }
            UploadEvent::Outcome { path, outcome, .. } => match outcome {
                TransferOutcome::Uploaded { id, bytes } => {
                    println!("uploaded  {path} ({bytes} bytes, id {id})");
                }
                TransferOutcome::SkippedDuplicate { matched_label, .. } => {
                    println!("skipped   {path} (already present as {matched_label})");
                }
                TransferOutcome::Failed { reason } => {
                    println!("failed    {path}: {reason}");
                }
                TransferOutcome::DeferredRetry => {}
            },
            UploadEvent::RetryScheduled {
                path,
                attempt,
                delay,
            } => {
                println!("retrying  {path} (attempt {attempt} in {}s)", delay.as_secs());
            }
            UploadEvent::WaitingForLock { path } => {
                println!("waiting   dataset is locked ({path})");
            }
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "uploaded {} file(s) / {} bytes, skipped {} duplicate(s)",
        summary.uploaded, summary.uploaded_bytes, summary.skipped
    );
    if !summary.failures.is_empty() {
        println!("failed {} file(s):", summary.failed);
        for (path, reason) in &summary.failures {
            println!("  {path}: {reason}");
        }
    }
}
