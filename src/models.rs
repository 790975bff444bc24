//! Data models shared by the crawl, convert and upload pipelines.
//!
//! This module defines the records written to and read from disk:
//! - [`ArticleRecord`]: One scraped article, as stored in a results file
//! - [`ScrapedDay`]: The results file for one archive day
//! - [`ScrapeProgress`]: Per-day crawl checkpoint
//! - [`UploadProgress`]: Uploader checkpoint
//!
//! Field names are snake_case on disk so files written by earlier runs of
//! the scraper scripts load unchanged.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current version of the checkpoint schema written by this crate.
///
/// Files without a `schema_version` field deserialize as version 0 and
/// are upgraded the next time they are saved.
pub const SCHEMA_VERSION: u32 = 1;

/// Outcome of scraping a single article.
///
/// On disk this is a plain string: `"success"` or `"failed: <reason>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScrapeStatus {
    Success,
    Failed(String),
}

impl ScrapeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ScrapeStatus::Success)
    }
}

impl From<String> for ScrapeStatus {
    fn from(s: String) -> Self {
        if s == "success" {
            ScrapeStatus::Success
        } else {
            let reason = s.strip_prefix("failed:").map(str::trim).unwrap_or(&s);
            ScrapeStatus::Failed(reason.to_string())
        }
    }
}

impl From<ScrapeStatus> for String {
    fn from(status: ScrapeStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeStatus::Success => f.write_str("success"),
            ScrapeStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// A single article as produced by the crawler.
///
/// Records are created once per URL and never modified after they have
/// been appended to a [`ScrapedDay`] file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// The article URL as linked from the archive page.
    pub url: String,
    /// Headline, if the extractor found one.
    pub title: Option<String>,
    /// Author names in page order.
    #[serde(default)]
    pub authors: Vec<String>,
    /// Cleaned body text.
    pub content: Option<String>,
    /// Whether the scrape succeeded, and why not if it didn't.
    pub scrape_status: ScrapeStatus,
    /// Archive section labels attached to this URL.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Position of the URL in the run that scraped it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_index: Option<usize>,
}

impl ArticleRecord {
    /// Build a failed record for `url` carrying `reason`.
    pub fn failed(url: &str, reason: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            title: None,
            authors: Vec::new(),
            content: None,
            scrape_status: ScrapeStatus::Failed(reason.into()),
            categories: Vec::new(),
            progress_index: None,
        }
    }

    /// True when the scrape succeeded and produced non-blank content.
    pub fn has_content(&self) -> bool {
        self.scrape_status.is_success()
            && self
                .content
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty())
    }
}

/// The results file for one archive day (`scraped_<date>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedDay {
    pub archive_url: String,
    pub date: String,
    #[serde(default)]
    pub articles: Vec<ArticleRecord>,
}

impl ScrapedDay {
    pub fn new(archive_url: &str, date: &str) -> Self {
        Self {
            archive_url: archive_url.to_string(),
            date: date.to_string(),
            articles: Vec::new(),
        }
    }
}

/// Crawl checkpoint for one archive day (`progress_<date>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeProgress {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub archive_url: String,
    pub date: String,
    pub total_articles: usize,
    pub completed_articles: usize,
    pub failed_articles: usize,
    pub chunks_completed: usize,
}

impl ScrapeProgress {
    pub fn new(archive_url: &str, date: &str, total_articles: usize) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            archive_url: archive_url.to_string(),
            date: date.to_string(),
            total_articles,
            completed_articles: 0,
            failed_articles: 0,
            chunks_completed: 0,
        }
    }

    /// Fold one committed chunk into the counters.
    pub fn record_chunk(&mut self, articles: &[ArticleRecord]) {
        for article in articles {
            if article.scrape_status.is_success() {
                self.completed_articles += 1;
            } else {
                self.failed_articles += 1;
            }
        }
        self.chunks_completed += 1;
        self.schema_version = SCHEMA_VERSION;
    }
}

/// Uploader checkpoint (`ragflow_upload_progress.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    #[serde(default)]
    pub schema_version: u32,
    pub total_files: usize,
    pub completed_batches: usize,
    pub uploaded_files: usize,
    pub parsed_files: usize,
    /// Uploaded files whose parse was still running when the deadline hit.
    #[serde(default)]
    pub unconfirmed_files: usize,
    pub failed_files: usize,
    /// Every path that has been through a batch, whatever its outcome.
    #[serde(default)]
    pub processed_files: Vec<String>,
    pub last_batch_completed: Option<usize>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl UploadProgress {
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            total_files: 0,
            completed_batches: 0,
            uploaded_files: 0,
            parsed_files: 0,
            unconfirmed_files: 0,
            failed_files: 0,
            processed_files: Vec::new(),
            last_batch_completed: None,
            started_at: Some(Local::now().to_rfc3339()),
            last_updated: None,
        }
    }

    /// Stamp the record before it is written.
    pub fn touch(&mut self) {
        self.schema_version = SCHEMA_VERSION;
        self.last_updated = Some(Local::now().to_rfc3339());
    }
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self::new()
    }
}
