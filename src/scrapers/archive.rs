//! Daily archive page indexing.
//!
//! An archive page (`https://www.antiwar.com/past/20250601.html`) is a
//! table-based layout: section header cells (`td.hotspot`) sit in their own
//! rows, followed by rows of links to that day's articles. Alongside the
//! article links the page carries navigation, social and ad links, which a
//! deny-list filters out.

use chrono::NaiveDate;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::error::Error;
use tracing::{debug, info, instrument};

static ARCHIVE_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d{8})\.html").expect("archive date pattern"));
static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("link selector"));
static SECTION_HEADER: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td.hotspot").expect("section header selector"));

/// Substrings that mark a link as something other than an article.
const SKIP_PATTERNS: &[&str] = &[
    // site navigation
    "antiwar.com/who.php",
    "antiwar.com/search",
    "antiwar.com/contact",
    "antiwar.com/donate",
    "antiwar.com/latest.php",
    "antiwar.com/viewpoints.php",
    "antiwar.com/regions",
    "antiwar.com/shops.php",
    "antiwar.com/privacy.php",
    "antiwar.com/casualties/",
    "antiwar.com/syndication.php",
    "antiwar.com/submissions.php",
    "antiwar.com/reprint.php",
    "antiwar.com/doverimages/",
    "antiwar.com/newsletter/",
    // author pages
    "/author/",
    "/columnists/",
    "scotthorton.org",
    // archive mirrors
    "archive.ph/",
    "archive.is/",
    // social and technical
    "javascript:",
    "mailto:",
    "#",
    "twitter.com",
    "youtube.com",
    "facebook.com",
    "instagram.com",
    "linkedin.com",
    "telegram.org",
    // ads and trackers
    "amazon-adsystem.com",
    "googletagservices.com",
    "google.com/ads",
    "randolphbourne.org",
];

/// Site front pages, compared with any trailing `/` removed.
const HOME_PAGES: &[&str] = &[
    "https://www.antiwar.com",
    "https://antiwar.com",
    "https://original.antiwar.com",
    "https://news.antiwar.com",
    "https://www.antiwar.com/blog",
    "https://antiwar.com/blog",
];

/// Labels for URLs listed outside any section, first match wins.
const FALLBACK_SECTIONS: &[(&str, &str)] = &[
    ("original.antiwar.com", "Viewpoints"),
    ("news.antiwar.com", "News"),
    ("antiwar.com/blog", "Blog"),
];

const DEFAULT_SECTION: &str = "Mixed News";

/// The indexed contents of one archive page.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveIndex {
    /// Article URLs in first-seen page order, without duplicates.
    pub urls: Vec<String>,
    /// Section labels for every URL in `urls`.
    pub sections: HashMap<String, Vec<String>>,
}

impl ArchiveIndex {
    /// Number of URLs per section label, sorted by label.
    pub fn section_counts(&self) -> Vec<(String, usize)> {
        self.sections
            .values()
            .flatten()
            .counts()
            .into_iter()
            .map(|(label, n)| (label.clone(), n))
            .sorted()
            .collect()
    }
}

/// Extract the archive day from a URL like `.../past/20250601.html`.
pub fn date_from_archive_url(url: &str) -> Option<NaiveDate> {
    let digits = ARCHIVE_DATE.captures(url)?.get(1)?.as_str();
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

/// Build the archive page URL for `date` under `base`.
pub fn archive_url_for(base: &str, date: NaiveDate) -> String {
    let sep = if base.ends_with('/') { "" } else { "/" };
    format!("{}{}{}.html", base, sep, date.format("%Y%m%d"))
}

/// True if `href` looks like a link to an article.
pub fn is_article_link(href: &str) -> bool {
    if !href.starts_with("http") {
        return false;
    }
    if HOME_PAGES.contains(&href.trim_end_matches('/')) {
        return false;
    }
    !SKIP_PATTERNS.iter().any(|skip| href.contains(skip))
}

/// Section label for a URL that the page did not place under a header.
pub fn fallback_section(url: &str) -> &'static str {
    FALLBACK_SECTIONS
        .iter()
        .find(|&&(pattern, _)| url.contains(pattern))
        .map_or(DEFAULT_SECTION, |&(_, label)| label)
}

/// Collect every article link on the page.
pub fn extract_article_urls(document: &Html) -> Vec<String> {
    document
        .select(&LINK)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| is_article_link(href))
        .unique()
        .map(str::to_string)
        .collect()
}

/// Map each URL in `urls` to its section labels.
///
/// Labels come from the nearest preceding `td.hotspot` header row; URLs
/// not found under any header get a label derived from the URL itself.
pub fn extract_sections(document: &Html, urls: &[String]) -> HashMap<String, Vec<String>> {
    let wanted: HashSet<&str> = urls.iter().map(String::as_str).collect();
    let mut explicit: HashMap<&str, BTreeSet<String>> = HashMap::new();

    for header in document.select(&SECTION_HEADER) {
        let name = header.text().map(str::trim).collect::<String>();
        if name.is_empty() {
            continue;
        }
        let Some(row) = header
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == "tr")
        else {
            continue;
        };

        let mut found = 0usize;
        let rows = row
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|e| e.value().name() == "tr");
        for sibling in rows {
            if sibling.select(&SECTION_HEADER).next().is_some() {
                break;
            }
            for href in sibling.select(&LINK).filter_map(|a| a.value().attr("href")) {
                if let Some(url) = wanted.get(href) {
                    explicit.entry(*url).or_default().insert(name.clone());
                    found += 1;
                }
            }
        }
        debug!(section = %name, articles = found, "Mapped section");
    }

    let sectioned = explicit.len();
    let mapping: HashMap<String, Vec<String>> = urls
        .iter()
        .map(|url| {
            let labels = match explicit.get(url.as_str()) {
                Some(set) => set.iter().cloned().collect(),
                None => vec![fallback_section(url).to_string()],
            };
            (url.clone(), labels)
        })
        .collect();

    info!(
        explicit = sectioned,
        total = urls.len(),
        "Section mapping complete"
    );
    mapping
}

/// Parse an archive page into URLs and sections.
///
/// # Arguments
///
/// * `html` - The raw archive page
///
/// # Returns
///
/// The deduplicated article URLs in page order, each mapped to one or more
/// section labels.
pub fn index_archive(html: &str) -> ArchiveIndex {
    let document = Html::parse_document(html);
    let urls = extract_article_urls(&document);
    let sections = extract_sections(&document, &urls);
    ArchiveIndex { urls, sections }
}

/// Download the archive page at `url`.
///
/// # Errors
///
/// Returns an error on transport failure or a non-success status.
#[instrument(level = "info", skip(client))]
pub async fn fetch_archive(client: &Client, url: &str) -> Result<String, Box<dyn Error>> {
    let html = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    info!(bytes = html.len(), "Fetched archive page");
    Ok(html)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
    <html><body>
      <a href="https://www.antiwar.com/">Home</a>
      <a href="https://www.antiwar.com/donate">Donate</a>
      <a href="/relative/link">Relative</a>
      <table>
        <tr><td class="hotspot">Iran</td></tr>
        <tr><td>
          <a href="https://www.reuters.com/world/iran-talks">Talks</a>
          <a href="https://news.antiwar.com/2025/06/01/strikes/">Strikes</a>
        </td></tr>
        <tr><td><a href="https://apnews.com/article/abc">AP</a></td></tr>
        <tr><td class="hotspot">Ukraine</td></tr>
        <tr><td>
          <a href="https://www.reuters.com/world/iran-talks">Talks again</a>
          <a href="https://www.aljazeera.com/news/kyiv">Kyiv</a>
        </td></tr>
      </table>
      <a href="https://original.antiwar.com/author/someone/">Author</a>
      <a href="https://original.antiwar.com/2025/06/01/essay/">Essay</a>
      <a href="https://www.antiwar.com/blog/2025/06/01/post/">Post</a>
      <a href="https://my-cool-blog.net/story">Blog</a>
      <a href="https://twitter.com/antiwarcom">Twitter</a>
    </body></html>
    "#;

    #[test]
    fn test_date_from_archive_url() {
        assert_eq!(
            date_from_archive_url("https://www.antiwar.com/past/20250601.html"),
            NaiveDate::from_ymd_opt(2025, 6, 1)
        );
        assert_eq!(date_from_archive_url("https://www.antiwar.com/past/20251301.html"), None);
        assert_eq!(date_from_archive_url("https://www.antiwar.com/past/latest.html"), None);
    }

    #[test]
    fn test_archive_url_for() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(
            archive_url_for("https://www.antiwar.com/past/", date),
            "https://www.antiwar.com/past/20250601.html"
        );
        assert_eq!(
            archive_url_for("https://www.antiwar.com/past", date),
            "https://www.antiwar.com/past/20250601.html"
        );
    }

    #[test]
    fn test_is_article_link() {
        assert!(is_article_link("https://www.reuters.com/world/x"));
        assert!(!is_article_link("/past/20250601.html"));
        assert!(!is_article_link("https://antiwar.com/"));
        assert!(!is_article_link("https://www.antiwar.com/blog/"));
        assert!(!is_article_link("https://www.antiwar.com/search?q=x"));
        assert!(!is_article_link("https://www.reuters.com/world/x#comments"));
        assert!(!is_article_link("https://www.youtube.com/watch?v=1"));
    }

    #[test]
    fn test_extract_article_urls_dedupes_in_order() {
        let index = index_archive(PAGE);
        assert_eq!(
            index.urls,
            vec![
                "https://www.reuters.com/world/iran-talks",
                "https://news.antiwar.com/2025/06/01/strikes/",
                "https://apnews.com/article/abc",
                "https://www.aljazeera.com/news/kyiv",
                "https://original.antiwar.com/2025/06/01/essay/",
                "https://www.antiwar.com/blog/2025/06/01/post/",
                "https://my-cool-blog.net/story",
            ]
        );
    }

    #[test]
    fn test_extract_sections_explicit_and_fallback() {
        let index = index_archive(PAGE);
        let s = &index.sections;

        assert_eq!(s["https://www.reuters.com/world/iran-talks"], vec!["Iran", "Ukraine"]);
        assert_eq!(s["https://news.antiwar.com/2025/06/01/strikes/"], vec!["Iran"]);
        assert_eq!(s["https://apnews.com/article/abc"], vec!["Iran"]);
        assert_eq!(s["https://www.aljazeera.com/news/kyiv"], vec!["Ukraine"]);
        assert_eq!(s["https://original.antiwar.com/2025/06/01/essay/"], vec!["Viewpoints"]);
        assert_eq!(s["https://www.antiwar.com/blog/2025/06/01/post/"], vec!["Blog"]);
        assert_eq!(s["https://my-cool-blog.net/story"], vec!["Mixed News"]);
        assert_eq!(s.len(), index.urls.len());
    }

    #[test]
    fn test_fallback_section() {
        assert_eq!(fallback_section("https://news.antiwar.com/x"), "News");
        assert_eq!(fallback_section("https://example.org/x"), "Mixed News");
    }

    #[test]
    fn test_section_counts() {
        let index = index_archive(PAGE);
        let counts = index.section_counts();
        assert_eq!(counts[0], ("Blog".to_string(), 1));
        assert!(counts.contains(&("Iran".to_string(), 3)));
        assert!(counts.contains(&("Ukraine".to_string(), 2)));
    }

    #[test]
    fn test_empty_page() {
        let index = index_archive("<html><body><p>nothing</p></body></html>");
        assert!(index.urls.is_empty());
        assert!(index.sections.is_empty());
    }
}
