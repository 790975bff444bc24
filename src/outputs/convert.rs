//! Scraped JSON to narrative text conversion.
//!
//! Reads `scraped_<date>.json` files and writes one narrative text file per
//! usable article:
//!
//! ```text
//! output_dir/
//! ├── article_001_2025-06-01.txt
//! ├── article_002_2025-06-01.txt
//! └── article_001_2025-06-02.txt
//! ```
//!
//! Failed scrapes and articles without content are skipped. Numbering is
//! per day and only counts files that were actually written.

use crate::checkpoint::read_json;
use crate::models::ScrapedDay;
use crate::outputs::narrative::render_narrative;
use crate::utils::{ensure_writable_dir, truncate_for_log};
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

/// Totals for one conversion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConvertSummary {
    /// Scraped files read successfully.
    pub files: usize,
    pub written: usize,
    pub skipped: usize,
}

/// File name for the `n`th narrative of `date`.
pub fn narrative_file_name(n: usize, date: &str) -> String {
    format!("article_{n:03}_{date}.txt")
}

/// List the scraped files to convert.
///
/// The crawler writes one subdirectory per year, so directories are
/// searched recursively.
///
/// # Arguments
///
/// * `input` - A single scraped file, or a directory such as `data` or
///   `data/2025`
///
/// # Returns
///
/// `input` itself when it is a file; otherwise every `scraped_*.json`
/// below it, sorted by path (and therefore by year, then date).
///
/// # Errors
///
/// Returns an error if `input` does not exist.
pub async fn scraped_files(input: &Path) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let meta = fs::metadata(input).await?;
    if meta.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.starts_with("scraped_") && name.ends_with(".json")
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    Ok(files)
}

/// Convert every scraped file under `input` into `output_dir`.
///
/// Unreadable files are logged and skipped.
///
/// # Arguments
///
/// * `input` - A scraped file or a directory searched by [`scraped_files`]
/// * `output_dir` - Where the narratives are written; created if missing
///
/// # Returns
///
/// How many files were read and how many narratives were written or
/// skipped.
///
/// # Errors
///
/// Returns an error if `input` cannot be listed or `output_dir` is not
/// writable.
#[instrument(level = "info", skip_all, fields(input = %input.display(), output = %output_dir.display()))]
pub async fn convert(input: &Path, output_dir: &Path) -> Result<ConvertSummary, Box<dyn Error>> {
    let files = scraped_files(input).await?;
    if files.is_empty() {
        warn!("No scraped JSON files found");
        return Ok(ConvertSummary::default());
    }
    ensure_writable_dir(output_dir).await?;
    info!(count = files.len(), "Found scraped files");

    let mut summary = ConvertSummary::default();
    for path in &files {
        let day: ScrapedDay = match read_json(path).await {
            Ok(Some(day)) => day,
            Ok(None) => continue,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read scraped file");
                continue;
            }
        };
        let (written, skipped) = convert_day(&day, output_dir).await;
        info!(
            path = %path.display(),
            date = %day.date,
            written,
            skipped,
            "Converted day"
        );
        summary.files += 1;
        summary.written += written;
        summary.skipped += skipped;
    }

    info!(
        files = summary.files,
        written = summary.written,
        skipped = summary.skipped,
        "Conversion complete"
    );
    Ok(summary)
}

/// Write the narratives for one day, returning `(written, skipped)`.
pub async fn convert_day(day: &ScrapedDay, output_dir: &Path) -> (usize, usize) {
    let mut written = 0usize;
    let mut skipped = 0usize;

    for (i, article) in day.articles.iter().enumerate() {
        if !article.has_content() {
            debug!(index = i, status = %article.scrape_status, "Skipping article");
            skipped += 1;
            continue;
        }

        let name = narrative_file_name(written + 1, &day.date);
        let path = output_dir.join(&name);
        match fs::write(&path, render_narrative(article, &day.date)).await {
            Ok(()) => {
                written += 1;
                debug!(
                    file = %name,
                    title = %truncate_for_log(article.title.as_deref().unwrap_or("Untitled"), 50),
                    "Wrote narrative"
                );
            }
            Err(e) => {
                error!(file = %name, error = %e, "Failed to write narrative");
                skipped += 1;
            }
        }
    }
    (written, skipped)
}
