use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use pagerag_core::config::{Config, Settings};
use pagerag_core::error::Error;
use pagerag_core::event::ProgressEvent;
use pagerag_core::rasterizer::PdfiumRasterizer;
use pagerag_core::traits::{CompletionService, Embedder};
use pagerag_core::types::Outcome;
use pagerag_embed::get_default_embedder;
use pagerag_rag::{AzureOpenAiClient, Gateways, PageRagService};
use pagerag_vector::open_store;

#[derive(Parser)]
#[command(name = "pagerag", about = "Index PDF pages as images and ask questions about them")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a PDF, streaming progress events to stdout
    Index {
        pdf: PathBuf,
        /// Draw a progress bar on stderr instead of printing events
        #[arg(long)]
        bar: bool,
    },
    /// Rank indexed pages for a query
    Query {
        text: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Answer a question from the best matching pages
    Chat {
        text: String,
        #[arg(short, long)]
        limit: Option<usize>,
        /// Skip page transcription and ask the model directly
        #[arg(long)]
        no_context: bool,
    },
    /// Model and collection status
    Status,
    /// PDFs in the data directory
    List { dir: Option<PathBuf> },
    /// Render (or reuse) a first-page preview
    Preview { pdf: PathBuf },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn build_service(settings: Settings) -> anyhow::Result<PageRagService> {
    let embedder: Arc<dyn Embedder> = Arc::from(get_default_embedder(&settings.embed)?);
    if embedder.dim() != settings.vector.dim {
        bail!(Error::InvalidConfig(format!(
            "embedder produces {}-dim vectors but vector.dim is {}",
            embedder.dim(),
            settings.vector.dim
        )));
    }
    let store = open_store(&settings.vector).await?;
    let completion = Arc::new(AzureOpenAiClient::new(settings.completion.clone())?);
    if let Err(e) = completion.initialize().await {
        warn!(error = %e, "completion service unavailable, chat will fail");
    }
    let gateways = Gateways {
        rasterizer: Arc::new(PdfiumRasterizer::new(settings.dpi)),
        embedder,
        store,
        completion,
    };
    Ok(PageRagService::new(settings, gateways))
}

/// Print the outcome as JSON; `true` when it was a success.
fn report<T: Serialize>(outcome: &Outcome<T>) -> anyhow::Result<bool> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(outcome.is_success())
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

async fn run_index(service: &PageRagService, pdf: PathBuf, bar: bool) -> anyhow::Result<bool> {
    let mut stream = match service.index_stream(pdf, None) {
        Outcome::Success(stream) => stream,
        Outcome::Failure(f) => return report(&Outcome::<()>::Failure(f)),
    };
    let pb = bar.then(progress_bar);
    let mut stdout = std::io::stdout();
    let mut succeeded = false;

    while let Some(event) = stream.next_event().await {
        match &pb {
            Some(pb) => {
                if let Some(p) = event.page_progress() {
                    pb.set_length(p.total_pages as u64);
                    pb.set_position(p.current_page as u64);
                    pb.set_message(p.message.clone());
                }
            }
            None => {
                write!(stdout, "{}", event.to_sse())?;
                stdout.flush()?;
            }
        }
        match event {
            ProgressEvent::Done { result } => {
                succeeded = result.success;
                if let Some(pb) = &pb {
                    pb.finish_with_message(format!("{} ({}/{} pages)", result.message, result.indexed_pages, result.total_pages));
                }
            }
            ProgressEvent::Failed { message } => {
                if let Some(pb) = &pb {
                    pb.abandon_with_message(message);
                }
            }
            _ => {}
        }
    }
    Ok(succeeded)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let service = build_service(config.settings()?).await?;

    let ok = match cli.command {
        Command::Index { pdf, bar } => run_index(&service, pdf, bar).await?,
        Command::Query { text, limit } => report(&service.query(&text, limit).await)?,
        Command::Chat { text, limit, no_context } => report(&service.chat(&text, limit, !no_context).await)?,
        Command::Status => report(&service.status().await)?,
        Command::List { dir } => report(&service.list_documents(dir.as_deref()))?,
        Command::Preview { pdf } => report(&service.preview(&pdf, None))?,
    };
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
