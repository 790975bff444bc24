//! Command-line interface definitions.
//!
//! Every flag is optional and overrides the matching field of the loaded
//! [`Config`]; anything left unset keeps the value from the YAML file or
//! the built-in default.

use crate::config::Config;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the archive pipeline.
///
/// # Examples
///
/// ```sh
/// # Scrape one day
/// archive_rag crawl --date 2025-06-01
///
/// # Scrape a whole month, then render and upload it
/// archive_rag crawl --from 2025-06-01 --to 2025-06-30
/// archive_rag convert --year 2025
/// archive_rag upload --yes
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a config.yaml file
    #[arg(short, long, global = true, env = "ARCHIVE_RAG_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scrape daily archive pages into checkpointed JSON
    Crawl(CrawlArgs),
    /// Render scraped JSON into narrative text files
    Convert(ConvertArgs),
    /// Upload narrative text files to a RAGFlow dataset
    Upload(UploadArgs),
}

#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// Archive page URL to scrape
    #[arg(long, conflicts_with_all = ["date", "from"])]
    pub archive_url: Option<String>,

    /// Archive day to scrape (YYYY-MM-DD)
    #[arg(long, conflicts_with = "from")]
    pub date: Option<NaiveDate>,

    /// First day of an inclusive range (YYYY-MM-DD)
    #[arg(long, requires = "to")]
    pub from: Option<NaiveDate>,

    /// Last day of an inclusive range (YYYY-MM-DD)
    #[arg(long, requires = "from")]
    pub to: Option<NaiveDate>,

    /// Root directory for scraped and progress files
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Articles per checkpoint
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Concurrent article fetches
    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Convert every scraped file of this year (reads `<data-dir>/<year>`)
    #[arg(long, conflicts_with = "input")]
    pub year: Option<i32>,

    /// A single scraped_<date>.json file or a directory of them
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Root directory of scraped files
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Directory for the narrative text files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// RAGFlow base URL
    #[arg(long, env = "RAGFLOW_API_URL")]
    pub api_url: Option<String>,

    /// RAGFlow API key
    #[arg(long, env = "RAGFLOW_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Target dataset name
    #[arg(long)]
    pub dataset: Option<String>,

    /// Directory searched recursively for .txt files
    #[arg(short, long)]
    pub txt_dir: Option<PathBuf>,

    /// Files per upload batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Checkpoint file path
    #[arg(long)]
    pub progress_file: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

impl CrawlArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.data_dir {
            config.scrape.data_dir = dir.clone();
        }
        if let Some(n) = self.chunk_size {
            config.scrape.chunk_size = n;
        }
        if let Some(n) = self.workers {
            config.scrape.max_workers = n;
        }
    }
}

impl ConvertArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.data_dir {
            config.convert.data_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.convert.output_dir = dir.clone();
        }
    }
}

impl UploadArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.api_url {
            config.upload.api_url = url.clone();
        }
        if let Some(key) = &self.api_key {
            config.upload.api_key = Some(key.clone());
        }
        if let Some(name) = &self.dataset {
            config.upload.dataset_name = name.clone();
        }
        if let Some(dir) = &self.txt_dir {
            config.upload.txt_dir = dir.clone();
        }
        if let Some(n) = self.batch_size {
            config.upload.batch_size = n;
        }
        if let Some(path) = &self.progress_file {
            config.upload.progress_file = path.clone();
        }
    }
}
