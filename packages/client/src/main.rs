use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use console::{Term, style};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use client::config::ClientConfig;
use client::hasher::hash_file;
use client::{HttpTransport, Transport, UploadOutcome, UploadSnapshot, UploadStatus, Uploader};
use common::total_chunks;

#[derive(Parser, Debug)]
#[command(name = "chunkup", version, about = "Resumable chunked file uploads", long_about = None)]
struct Cli {
    /// Upload server base URL (overrides config)
    #[arg(long, global = true, env = "CHUNKUP_SERVER")]
    server: Option<String>,

    /// Bytes per chunk (overrides config)
    #[arg(long, global = true)]
    chunk_size: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file, resuming from chunks the server already holds
    Upload {
        file: PathBuf,
        /// Chunk uploads in flight at once (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Show how many chunks of a file the server already holds
    Status { file: PathBuf },
    /// Print the fingerprint of a file
    Hash { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::load().context("Failed to load configuration")?;
    if let Some(server) = cli.server {
        config.client.server_url = server;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.transfer.chunk_size = chunk_size;
    }
    if config.transfer.chunk_size == 0 {
        bail!("chunk size must be greater than zero");
    }

    match cli.command {
        Command::Hash { file } => {
            let fingerprint = hash(&file, config.transfer.chunk_size).await?;
            println!("{fingerprint}  {}", file.display());
            Ok(())
        }
        Command::Status { file } => status(&config, &file).await,
        Command::Upload { file, concurrency } => {
            if let Some(concurrency) = concurrency {
                config.transfer.concurrency = concurrency;
            }
            upload(&config, file).await
        }
    }
}

fn transport(config: &ClientConfig) -> Result<Arc<HttpTransport>> {
    let transport = HttpTransport::new(&config.client.server_url, config.client.timeout())
        .context("Failed to build HTTP client")?;
    Ok(Arc::new(transport))
}

async fn hash(file: &Path, chunk_size: u64) -> Result<common::Fingerprint> {
    let read_size = usize::try_from(chunk_size).unwrap_or(usize::MAX);
    hash_file(file, read_size, |_| {}, &CancellationToken::new())
        .await
        .with_context(|| format!("Failed to hash {}", file.display()))
}

async fn status(config: &ClientConfig, file: &Path) -> Result<()> {
    let size = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("Failed to stat {}", file.display()))?
        .len();
    let fingerprint = hash(file, config.transfer.chunk_size).await?;
    let total = total_chunks(size, config.transfer.chunk_size)?;

    let uploaded = transport(config)?
        .uploaded_chunks(&fingerprint)
        .await
        .with_context(|| format!("Failed to query {}", config.client.server_url))?;

    println!("{} {}", style("Fingerprint:").bold(), fingerprint);
    println!(
        "{} {} of {} chunks on server",
        style("Progress:").bold(),
        uploaded.len(),
        total
    );
    Ok(())
}

fn render(snapshot: &UploadSnapshot) -> String {
    let percent = |label: console::StyledObject<&str>, value: u8| format!("{label} {value:>3}%");
    match snapshot.status {
        UploadStatus::Idle => String::new(),
        UploadStatus::Hashing => percent(style("Hashing").cyan(), snapshot.hash_progress),
        UploadStatus::Checking => style("Checking server").cyan().to_string(),
        UploadStatus::Uploading => percent(style("Uploading").cyan(), snapshot.percentage),
        UploadStatus::Paused => percent(style("Paused").yellow(), snapshot.percentage),
        UploadStatus::Success => percent(style("Done").green(), snapshot.percentage),
        UploadStatus::Error => format!(
            "{} {}",
            style("Failed").red(),
            snapshot.error_message.as_deref().unwrap_or("")
        ),
    }
}

async fn show_progress(mut rx: watch::Receiver<UploadSnapshot>, term: Term) {
    loop {
        let line = render(&rx.borrow_and_update());
        let _ = term.clear_line();
        let _ = term.write_str(&line);
        if rx.changed().await.is_err() {
            break;
        }
    }
}

async fn wait_for_enter() -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    lines.next_line().await.context("Failed to read stdin")?;
    Ok(())
}

async fn upload(config: &ClientConfig, file: PathBuf) -> Result<()> {
    let uploader = Arc::new(Uploader::new(
        transport(config)?,
        config.transfer.clone().into(),
    ));
    let term = Term::stdout();
    let progress = tokio::spawn(show_progress(uploader.subscribe(), term.clone()));

    let mut running = {
        let uploader = uploader.clone();
        tokio::spawn(async move { uploader.upload(&file).await })
    };

    let result = loop {
        let outcome = tokio::select! {
            joined = &mut running => joined?,
            _ = tokio::signal::ctrl_c() => {
                if !uploader.pause() && !uploader.cancel() {
                    progress.abort();
                    term.write_line("")?;
                    bail!("interrupted");
                }
                continue;
            }
        };

        match outcome {
            Ok(UploadOutcome::Paused) => {
                term.write_line("")?;
                term.write_line(&format!(
                    "{}",
                    style("Press Enter to resume, Ctrl-C to quit").dim()
                ))?;
                tokio::select! {
                    read = wait_for_enter() => read?,
                    _ = tokio::signal::ctrl_c() => {
                        break Ok(None);
                    }
                }
                let uploader = uploader.clone();
                running = tokio::spawn(async move { uploader.resume().await });
            }
            Ok(UploadOutcome::Completed { file_path }) => break Ok(Some(file_path)),
            Err(err) => break Err(err),
        }
    };

    progress.abort();
    term.write_line("")?;
    match result {
        Ok(Some(file_path)) => {
            println!("{} {}", style("Uploaded to").green().bold(), file_path);
            Ok(())
        }
        Ok(None) => {
            println!("Upload left paused; run the same command again to resume.");
            Ok(())
        }
        Err(err) => Err(err).context("Upload failed"),
    }
}
