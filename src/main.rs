//! # Archive RAG
//!
//! Batch pipeline that moves news articles from a daily archive website
//! into a RAGFlow dataset.
//!
//! ## Commands
//!
//! - `crawl`: scrape one archive day (or a range of days) into
//!   checkpointed `scraped_<date>.json` files
//! - `convert`: render scraped articles as narrative text files
//! - `upload`: push the text files to a dataset in batches and wait for
//!   them to be parsed
//!
//! ## Usage
//!
//! ```sh
//! archive_rag crawl --date 2025-06-01
//! archive_rag convert --year 2025 -o txt_data
//! RAGFLOW_API_KEY=... archive_rag upload --yes
//! ```
//!
//! Every command resumes from its checkpoint files, so an interrupted run
//! can simply be started again.

use chrono::Local;
use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod checkpoint;
mod cli;
mod config;
mod crawl;
mod models;
mod outputs;
mod scrapers;
mod upload;
mod utils;

use api::RagflowClient;
use cli::{Cli, Command, ConvertArgs, CrawlArgs};
use config::{Config, UploadConfig, load_config};
use scrapers::archive::archive_url_for;
use scrapers::article::HtmlArticleExtractor;
use scrapers::build_client;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");
    let mut config = load_config(args.config.as_deref())?;

    match &args.command {
        Command::Crawl(crawl_args) => {
            crawl_args.apply(&mut config);
            run_crawl(&config, crawl_args).await?;
        }
        Command::Convert(convert_args) => {
            convert_args.apply(&mut config);
            run_convert(&config, convert_args).await?;
        }
        Command::Upload(upload_args) => {
            upload_args.apply(&mut config);
            run_upload(&config.upload, upload_args.yes).await?;
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

async fn run_crawl(config: &Config, args: &CrawlArgs) -> Result<(), Box<dyn Error>> {
    let client = build_client(&config.scrape)?;
    let extractor = HtmlArticleExtractor::new(client.clone());

    if let (Some(from), Some(to)) = (args.from, args.to) {
        if from > to {
            return Err(format!("--from {from} is after --to {to}").into());
        }
        let days = crawl::crawl_range(&config.scrape, &client, &extractor, from, to).await;
        info!(%from, %to, days, "Range crawl finished");
        return Ok(());
    }

    let archive_url = match (&args.archive_url, args.date) {
        (Some(url), _) => url.clone(),
        (None, Some(date)) => archive_url_for(&config.scrape.archive_base_url, date),
        (None, None) => archive_url_for(&config.scrape.archive_base_url, Local::now().date_naive()),
    };
    if let Err(e) = crawl::crawl_day(&config.scrape, &client, &extractor, &archive_url).await {
        error!(%archive_url, error = %e, "Crawl failed");
        return Err(e);
    }
    Ok(())
}

async fn run_convert(config: &Config, args: &ConvertArgs) -> Result<(), Box<dyn Error>> {
    let input = match (&args.input, args.year) {
        (Some(path), _) => path.clone(),
        (None, Some(year)) => config.convert.data_dir.join(year.to_string()),
        (None, None) => config.convert.data_dir.clone(),
    };
    let summary = outputs::convert::convert(&input, &config.convert.output_dir).await?;
    if summary.written == 0 {
        error!(input = %input.display(), "No narrative files were written");
    }
    Ok(())
}

async fn run_upload(config: &UploadConfig, assume_yes: bool) -> Result<(), Box<dyn Error>> {
    let files = upload::list_text_files(&config.txt_dir);
    info!(count = files.len(), txt_dir = %config.txt_dir.display(), "Found text files");

    let (progress, remaining) = upload::load_progress(config, &files).await?;
    if remaining.is_empty() {
        return Ok(());
    }
    if !assume_yes && !upload::confirm_upload(config, remaining.len())? {
        info!("Upload cancelled");
        return Ok(());
    }

    let client = RagflowClient::connect(config).await?;
    upload::upload_remaining(&client, config, progress, &remaining).await?;
    Ok(())
}
