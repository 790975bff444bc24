//! Single-article extraction.
//!
//! Archive pages link out to many different publishers, so extraction
//! relies on markup most news sites share: Open Graph and `<title>` for the
//! headline, JSON-LD and `meta[name=author]` for bylines, and paragraph
//! text (preferring anything inside `<article>`) for the body.

use crate::models::{ArticleRecord, ScrapeStatus};
use crate::scrapers::ArticleExtractor;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::Value;
use std::error::Error;
use tracing::{debug, instrument, warn};

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static OG_TITLE: Lazy<Selector> = Lazy::new(|| selector("meta[property='og:title']"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));
static H1: Lazy<Selector> = Lazy::new(|| selector("h1"));
static JSON_LD: Lazy<Selector> = Lazy::new(|| selector("script[type='application/ld+json']"));
static META_AUTHOR: Lazy<Selector> = Lazy::new(|| selector("meta[name='author']"));
static ARTICLE_P: Lazy<Selector> = Lazy::new(|| selector("article p"));
static P: Lazy<Selector> = Lazy::new(|| selector("p"));

/// Boilerplate lead-ins; the first one found is cut out along with the rest
/// of its sentence.
const EDITOR_NOTES: &[&str] = &[
    "Editor's note:",
    "Editorial note:",
    "Note to readers:",
    "Disclaimer:",
    "This story was updated",
    "This article was updated",
    "Updated at",
    "Last updated",
];

static EDITOR_NOTE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    EDITOR_NOTES
        .iter()
        .map(|note| Regex::new(&format!("(?i){}", regex::escape(note))).expect("editor note pattern"))
        .collect()
});

/// Fetches articles over HTTP and extracts them from their HTML.
#[derive(Debug, Clone)]
pub struct HtmlArticleExtractor {
    client: Client,
}

impl HtmlArticleExtractor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, url: &str) -> Result<String, Box<dyn Error>> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }
}

impl ArticleExtractor for HtmlArticleExtractor {
    #[instrument(level = "debug", skip(self))]
    async fn extract(&self, url: &str) -> ArticleRecord {
        match self.fetch(url).await {
            Ok(body) => {
                let record = parse_article(url, &body);
                debug!(
                    chars = record.content.as_deref().map_or(0, str::len),
                    authors = record.authors.len(),
                    "Parsed article"
                );
                record
            }
            Err(e) => {
                warn!(%url, error = %e, "Article fetch failed");
                ArticleRecord::failed(url, e.to_string())
            }
        }
    }
}

/// Extract title, authors and cleaned body text from an article page.
pub fn parse_article(url: &str, html: &str) -> ArticleRecord {
    let document = Html::parse_document(html);

    let title = first_meta_content(&document, &OG_TITLE)
        .or_else(|| first_text(&document, &TITLE))
        .or_else(|| first_text(&document, &H1));

    let authors = json_ld_authors(&document)
        .into_iter()
        .chain(meta_authors(&document))
        .filter(|a| !a.is_empty())
        .unique()
        .collect();

    let mut paragraphs: Vec<String> = document
        .select(&ARTICLE_P)
        .map(|p| p.text().collect::<String>())
        .collect();
    if paragraphs.is_empty() {
        paragraphs = document
            .select(&P)
            .map(|p| p.text().collect::<String>())
            .collect();
    }
    let content = clean_content(&paragraphs.join(" "));

    ArticleRecord {
        url: url.to_string(),
        title,
        authors,
        content,
        scrape_status: ScrapeStatus::Success,
        categories: Vec::new(),
        progress_index: None,
    }
}

/// Collapse whitespace and drop the first editor-note sentence.
///
/// Returns `None` when nothing is left.
pub fn clean_content(raw: &str) -> Option<String> {
    let mut content = raw.split_whitespace().join(" ");

    let found = EDITOR_NOTE_PATTERNS
        .iter()
        .find_map(|re| re.find(&content).map(|m| m.start()));
    if let Some(start) = found {
        let end = content[start..]
            .find(". ")
            .map_or(content.len(), |i| start + i + 1);
        content = format!("{}{}", &content[..start], content[end..].trim());
    }

    let content = content.trim();
    (!content.is_empty()).then(|| content.to_string())
}

fn first_meta_content(document: &Html, sel: &Selector) -> Option<String> {
    document
        .select(sel)
        .filter_map(|m| m.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

fn first_text(document: &Html, sel: &Selector) -> Option<String> {
    document
        .select(sel)
        .map(|e| e.text().collect::<Vec<_>>().join(" ").split_whitespace().join(" "))
        .find(|t| !t.is_empty())
}

fn meta_authors(document: &Html) -> Vec<String> {
    document
        .select(&META_AUTHOR)
        .filter_map(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .collect()
}

/// Author names from every JSON-LD block, including `@graph` members.
fn json_ld_authors(document: &Html) -> Vec<String> {
    let mut authors = Vec::new();
    for script in document.select(&JSON_LD) {
        let raw = script.text().collect::<String>();
        let Ok(json) = serde_json::from_str::<Value>(raw.trim()) else {
            continue;
        };
        collect_ld_authors(&json, &mut authors);
    }
    authors
}

fn collect_ld_authors(json: &Value, out: &mut Vec<String>) {
    match json {
        Value::Array(items) => items.iter().for_each(|item| collect_ld_authors(item, out)),
        Value::Object(obj) => {
            if let Some(graph) = obj.get("@graph") {
                collect_ld_authors(graph, out);
            }
            match obj.get("author") {
                Some(Value::Array(arr)) => {
                    for author in arr {
                        push_author(author, out);
                    }
                }
                Some(author) => push_author(author, out),
                None => {}
            }
        }
        _ => {}
    }
}

fn push_author(author: &Value, out: &mut Vec<String>) {
    match author {
        Value::String(s) => out.push(s.trim().to_string()),
        Value::Object(obj) => {
            if let Some(name) = obj.get("name").and_then(Value::as_str) {
                out.push(name.trim().to_string());
            }
        }
        _ => {}
    }
}
