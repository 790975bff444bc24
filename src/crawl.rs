//! Archive crawler pipeline.
//!
//! For one archive day the crawler:
//! 1. Fetches and indexes the archive page ([`scrapers::archive`])
//! 2. Loads any results and progress left by an earlier run
//! 3. Scrapes only the URLs not yet in the results file, a chunk at a
//!    time, `max_workers` articles concurrently within a chunk
//! 4. After each chunk, appends the records to `scraped_<date>.json` and
//!    folds the counts into `progress_<date>.json`
//!
//! Files live under `<data_dir>/<year>/`.

use crate::checkpoint::{self, ChunkWorker, filter_remaining, read_json, write_json};
use crate::config::ScrapeConfig;
use crate::models::{ArticleRecord, ScrapeProgress, ScrapedDay};
use crate::scrapers::ArticleExtractor;
use crate::scrapers::archive::{self, ArchiveIndex};
use chrono::{Datelike, NaiveDate};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// Checkpoint file locations for one archive day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayFiles {
    pub results: PathBuf,
    pub progress: PathBuf,
}

impl DayFiles {
    pub fn new(data_dir: &Path, date: NaiveDate) -> Self {
        let dir = data_dir.join(date.year().to_string());
        Self {
            results: dir.join(format!("scraped_{date}.json")),
            progress: dir.join(format!("progress_{date}.json")),
        }
    }
}

/// Summary statistics for the articles scraped in one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetrics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate_percent: f64,
    pub elapsed: Duration,
    pub avg_secs_per_article: f64,
    /// Characters of title, authors and content across successful articles.
    pub total_chars: usize,
    pub avg_chars: f64,
}

impl RunMetrics {
    pub fn from_articles(articles: &[ArticleRecord], elapsed: Duration) -> Self {
        let successful: Vec<&ArticleRecord> = articles
            .iter()
            .filter(|a| a.scrape_status.is_success())
            .collect();
        let total_chars: usize = successful
            .iter()
            .map(|a| {
                a.content.as_deref().map_or(0, |c| c.chars().count())
                    + a.title.as_deref().map_or(0, |t| t.chars().count())
                    + a.authors.iter().map(|n| n.chars().count()).sum::<usize>()
            })
            .sum();

        let total = articles.len();
        let ok = successful.len();
        let ratio = |num: f64, den: usize| if den == 0 { 0.0 } else { num / den as f64 };
        Self {
            total,
            successful: ok,
            failed: total - ok,
            success_rate_percent: ratio(ok as f64 * 100.0, total),
            elapsed,
            avg_secs_per_article: ratio(elapsed.as_secs_f64(), total),
            total_chars,
            avg_chars: ratio(total_chars as f64, ok),
        }
    }

    pub fn log(&self) {
        info!(
            total = self.total,
            successful = self.successful,
            failed = self.failed,
            success_rate = %format!("{:.2}%", self.success_rate_percent),
            elapsed_secs = %format!("{:.2}", self.elapsed.as_secs_f64()),
            avg_secs_per_article = %format!("{:.2}", self.avg_secs_per_article),
            total_mb = %format!("{:.3}", self.total_chars as f64 / (1024.0 * 1024.0)),
            avg_chars = self.avg_chars.round(),
            "Scrape metrics"
        );
    }
}

/// Scrapes one chunk of URLs and commits it to the day's files.
struct CrawlWorker<'a, E> {
    extractor: &'a E,
    max_workers: usize,
    sections: &'a HashMap<String, Vec<String>>,
    files: &'a DayFiles,
    results: ScrapedDay,
    progress: ScrapeProgress,
    next_index: usize,
    new_articles: Vec<ArticleRecord>,
}

impl<E: ArticleExtractor> ChunkWorker for CrawlWorker<'_, E> {
    type Output = ArticleRecord;

    async fn process_chunk(&mut self, _index: usize, items: &[String]) -> Vec<ArticleRecord> {
        let extractor = self.extractor;
        let mut articles: Vec<ArticleRecord> = stream::iter(items)
            .map(|url| extractor.extract(url))
            .buffered(self.max_workers.max(1))
            .collect()
            .await;

        for article in &mut articles {
            article.progress_index = Some(self.next_index);
            self.next_index += 1;
            article.categories = self
                .sections
                .get(&article.url)
                .cloned()
                .unwrap_or_else(|| vec!["Unknown".to_string()]);
        }
        articles
    }

    async fn commit(
        &mut self,
        index: usize,
        outputs: Vec<ArticleRecord>,
    ) -> Result<(), Box<dyn Error>> {
        self.results.articles.extend(outputs.iter().cloned());
        write_json(&self.files.results, &self.results).await?;

        self.progress.record_chunk(&outputs);
        write_json(&self.files.progress, &self.progress).await?;

        let successful = outputs.iter().filter(|a| a.scrape_status.is_success()).count();
        info!(
            chunk = index,
            successful,
            failed = outputs.len() - successful,
            completed = self.progress.completed_articles,
            total = self.progress.total_articles,
            "Chunk committed"
        );
        self.new_articles.extend(outputs);
        Ok(())
    }
}

/// Resolve the day an archive URL belongs to.
///
/// # Errors
///
/// Returns an error if the URL does not end in a valid `YYYYMMDD.html`.
pub fn archive_date(archive_url: &str) -> Result<NaiveDate, Box<dyn Error>> {
    archive::date_from_archive_url(archive_url)
        .ok_or_else(|| format!("could not extract a date from archive URL {archive_url}").into())
}

/// Fetch, index and scrape one archive page.
///
/// # Arguments
///
/// * `config` - Scrape settings (data directory, chunk size, worker count)
/// * `client` - HTTP client used for the archive page
/// * `extractor` - Fetches and parses each linked article
/// * `archive_url` - A day page such as `.../past/20250601.html`
///
/// # Returns
///
/// Every article scraped for the day so far, including those from earlier
/// runs.
///
/// # Errors
///
/// Fails if the URL carries no date, the archive page cannot be fetched,
/// it lists no articles, or a checkpoint file cannot be read or written.
#[instrument(level = "info", skip(config, client, extractor))]
pub async fn crawl_day<E: ArticleExtractor>(
    config: &ScrapeConfig,
    client: &Client,
    extractor: &E,
    archive_url: &str,
) -> Result<ScrapedDay, Box<dyn Error>> {
    let date = archive_date(archive_url)?;
    let html = archive::fetch_archive(client, archive_url).await?;
    let index = archive::index_archive(&html);
    scrape_index(config, extractor, archive_url, date, &index).await
}

/// Scrape the URLs of an already indexed archive page, resuming from the
/// day's checkpoint files.
///
/// When every URL is already in the results file the stored results are
/// returned as-is and no article is fetched.
///
/// # Arguments
///
/// * `config` - Scrape settings; `data_dir` decides where the day's files live
/// * `extractor` - Fetches and parses each article
/// * `archive_url` - Recorded in the results file
/// * `date` - The archive day, used for file names
/// * `index` - Article URLs and their section labels
///
/// # Returns
///
/// The day's results in archive order. Each new article carries its
/// section labels and a `progress_index` counting on from the stored
/// results.
///
/// # Errors
///
/// Fails if the index is empty or a checkpoint file cannot be read or
/// written.
pub async fn scrape_index<E: ArticleExtractor>(
    config: &ScrapeConfig,
    extractor: &E,
    archive_url: &str,
    date: NaiveDate,
    index: &ArchiveIndex,
) -> Result<ScrapedDay, Box<dyn Error>> {
    let start = Instant::now();
    if index.urls.is_empty() {
        return Err(format!("no article URLs found on {archive_url}").into());
    }
    info!(count = index.urls.len(), %date, "Indexed archive page");
    for (section, count) in index.section_counts() {
        info!(%section, count, "Section distribution");
    }

    let files = DayFiles::new(&config.data_dir, date);
    let results: Option<ScrapedDay> = read_json(&files.results).await?;
    let progress: Option<ScrapeProgress> = read_json(&files.progress).await?;
    if let Some(p) = &progress {
        info!(
            completed = p.completed_articles,
            failed = p.failed_articles,
            chunks = p.chunks_completed,
            "Found existing progress"
        );
    }

    let date_str = date.to_string();
    let results = results.unwrap_or_else(|| ScrapedDay::new(archive_url, &date_str));
    let completed: HashSet<String> = results.articles.iter().map(|a| a.url.clone()).collect();
    let remaining = filter_remaining(&index.urls, &completed);

    if remaining.is_empty() {
        info!(
            articles = results.articles.len(),
            "All articles already completed; returning existing results"
        );
        return Ok(results);
    }

    let mut progress =
        progress.unwrap_or_else(|| ScrapeProgress::new(archive_url, &date_str, index.urls.len()));
    progress.total_articles = progress.total_articles.max(index.urls.len());

    let mut worker = CrawlWorker {
        extractor,
        max_workers: config.max_workers,
        sections: &index.sections,
        files: &files,
        results,
        progress,
        next_index: 0,
        new_articles: Vec::new(),
    };
    info!(
        remaining = remaining.len(),
        chunk_size = config.chunk_size,
        workers = config.max_workers,
        "Scraping remaining articles"
    );
    checkpoint::run_chunks(&remaining, config.chunk_size, Duration::ZERO, &mut worker).await?;

    RunMetrics::from_articles(&worker.new_articles, start.elapsed()).log();
    log_failures(&worker.new_articles);
    info!(
        total = worker.results.articles.len(),
        path = %files.results.display(),
        "Archive day complete"
    );
    Ok(worker.results)
}

/// Crawl every day from `from` to `to` inclusive.
///
/// A day that fails is logged and skipped.
///
/// # Returns
///
/// The number of days that completed.
#[instrument(level = "info", skip(config, client, extractor))]
pub async fn crawl_range<E: ArticleExtractor>(
    config: &ScrapeConfig,
    client: &Client,
    extractor: &E,
    from: NaiveDate,
    to: NaiveDate,
) -> usize {
    let mut ok = 0usize;
    for date in from.iter_days().take_while(|d| *d <= to) {
        let url = archive::archive_url_for(&config.archive_base_url, date);
        match crawl_day(config, client, extractor, &url).await {
            Ok(day) => {
                ok += 1;
                info!(%date, articles = day.articles.len(), "Day complete");
            }
            Err(e) => error!(%date, %url, error = %e, "Day failed"),
        }
    }
    ok
}

fn log_failures(articles: &[ArticleRecord]) {
    let failed: Vec<&ArticleRecord> = articles
        .iter()
        .filter(|a| !a.scrape_status.is_success())
        .collect();
    if failed.is_empty() {
        info!("All articles scraped successfully");
        return;
    }
    for article in failed {
        warn!(url = %article.url, status = %article.scrape_status, "Failed article");
    }
}
