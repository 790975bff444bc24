//! Page fetching and parsing for the archive crawler.
//!
//! Scraping happens in two phases:
//!
//! 1. **Indexing** ([`archive`]): fetch one daily archive page and pull out
//!    the article URLs plus the section each one was listed under.
//! 2. **Fetching** ([`article`]): download each article and extract its
//!    title, authors and body text.
//!
//! Both phases share one [`reqwest::Client`] built by [`build_client`],
//! which sends a fixed desktop browser user agent.

use crate::config::ScrapeConfig;
use crate::models::ArticleRecord;

pub mod archive;
pub mod article;

/// Turns an article URL into an [`ArticleRecord`].
///
/// Implementations never fail: network and parse problems are reported
/// through [`crate::models::ScrapeStatus::Failed`] on the returned record.
pub trait ArticleExtractor {
    async fn extract(&self, url: &str) -> ArticleRecord;
}

/// Build the HTTP client used for archive and article requests.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn build_client(config: &ScrapeConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.request_timeout())
        .build()
}
