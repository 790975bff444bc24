//! Runtime configuration.
//!
//! A [`Config`] is assembled once in `main`: defaults, then an optional
//! YAML file, then command-line flags and environment variables. Each
//! pipeline receives only its own section.
//!
//! ```yaml
//! scrape:
//!   chunk_size: 20
//!   max_workers: 5
//! upload:
//!   api_url: http://127.0.0.1:9380
//!   dataset_name: News-rag-chatbot
//!   batch_size: 50
//! ```

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

/// Desktop browser user agent sent with every page request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scrape: ScrapeConfig,
    pub convert: ConvertConfig,
    pub upload: UploadConfig,
}

/// Settings for the archive crawler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub user_agent: String,
    /// Articles per checkpoint.
    pub chunk_size: usize,
    /// Concurrent article fetches within a chunk.
    pub max_workers: usize,
    /// Prefix of the daily archive URLs; `YYYYMMDD.html` is appended.
    pub archive_base_url: String,
    /// Root for `scraped_*.json` and `progress_*.json`, one subdirectory per year.
    pub data_dir: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            chunk_size: 20,
            max_workers: 5,
            archive_base_url: "https://www.antiwar.com/past/".to_string(),
            data_dir: PathBuf::from("data"),
            request_timeout_secs: 30,
        }
    }
}

impl ScrapeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings for the JSON to narrative converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("txt_data"),
        }
    }
}

/// Settings for the RAGFlow uploader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub dataset_name: String,
    /// Directory searched recursively for `*.txt` files.
    pub txt_dir: PathBuf,
    pub batch_size: usize,
    pub progress_file: PathBuf,
    /// Hard deadline for a batch's parse to finish.
    pub parse_timeout_secs: u64,
    pub poll_initial_ms: u64,
    pub poll_max_ms: u64,
    /// Upper bound of the random jitter added to each poll delay.
    pub poll_jitter_ms: u64,
    /// Pause between batches.
    pub batch_pause_secs: u64,
    pub list_page_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:9380".to_string(),
            api_key: None,
            dataset_name: "News-rag-chatbot".to_string(),
            txt_dir: PathBuf::from("txt_data"),
            batch_size: 50,
            progress_file: PathBuf::from("ragflow_upload_progress.json"),
            parse_timeout_secs: 600,
            poll_initial_ms: 2_000,
            poll_max_ms: 30_000,
            poll_jitter_ms: 250,
            batch_pause_secs: 25,
            list_page_size: 100,
        }
    }
}

impl UploadConfig {
    pub fn parse_timeout(&self) -> Duration {
        Duration::from_secs(self.parse_timeout_secs)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_secs(self.batch_pause_secs)
    }
}

/// Load a YAML config file, or defaults when `path` is `None`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid YAML for
/// [`Config`].
#[instrument(level = "info")]
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn Error>> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let raw = std::fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&raw)?;
    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}
