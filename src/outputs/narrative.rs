//! Narrative rendering of scraped articles.
//!
//! Each article becomes one plain-text document: a generated sentence
//! naming the title, publisher, date and authors, then the article body.
//!
//! ```text
//! The following is an article titled 'T' from Reuters from 2025-06-01 written by A. The text of the article follows.
//!
//! <content>
//! ```

use crate::models::ArticleRecord;
use crate::utils::title_case;
use url::Url;

/// A reason to reject an extracted author name.
///
/// Article extraction on WordPress sites often picks up CSS class names
/// and inline styles as "authors"; these rules drop them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorRule {
    /// Reject names containing this substring (case-sensitive).
    Contains(&'static str),
    /// Reject names with more than this many characters.
    LongerThan(usize),
}

impl AuthorRule {
    pub fn rejects(&self, name: &str) -> bool {
        match *self {
            AuthorRule::Contains(marker) => name.contains(marker),
            AuthorRule::LongerThan(max) => name.chars().count() > max,
        }
    }
}

pub const AUTHOR_RULES: &[AuthorRule] = &[
    AuthorRule::Contains("Wp-Block-"),
    AuthorRule::Contains("Class"),
    AuthorRule::Contains("Display"),
    AuthorRule::Contains("Height"),
    AuthorRule::Contains("Width"),
    AuthorRule::Contains("Vertical-Align"),
    AuthorRule::Contains("Where Img"),
    AuthorRule::Contains("Auto Max-Width"),
    AuthorRule::Contains("Author"),
    AuthorRule::Contains("View"),
    AuthorRule::LongerThan(50),
];

/// Publisher names for domains that don't title-case well.
const SOURCE_NAMES: &[(&str, &str)] = &[
    ("original.antiwar.com", "Antiwar.com"),
    ("news.antiwar.com", "Antiwar.com"),
    ("antiwar.com", "Antiwar.com"),
    ("aljazeera.com", "Al Jazeera"),
    ("cbsnews.com", "CBS News"),
    ("apnews.com", "Associated Press"),
    ("reuters.com", "Reuters"),
    ("middleeasteye.net", "Middle East Eye"),
    ("newarab.com", "The New Arab"),
    ("atlantanewsfirst.com", "Atlanta News First"),
    ("taskandpurpose.com", "Task & Purpose"),
];

const UNKNOWN_SOURCE: &str = "an unknown source";
const UNTITLED: &str = "Untitled Article";

/// Drop author entries matched by any of [`AUTHOR_RULES`].
pub fn clean_author_names(authors: &[String]) -> Vec<String> {
    authors
        .iter()
        .filter(|name| !AUTHOR_RULES.iter().any(|rule| rule.rejects(name)))
        .cloned()
        .collect()
}

/// Human-readable publisher name for an article URL.
///
/// Known domains use [`SOURCE_NAMES`]; anything else is derived from the
/// host.
///
/// # Arguments
///
/// * `url` - The article URL
///
/// # Returns
///
/// The publisher name, or `an unknown source` when `url` has no host.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(extract_source_name("https://www.reuters.com/world/x"), "Reuters");
/// assert_eq!(extract_source_name("https://my-cool-blog.net/x"), "My Cool Blog");
/// ```
pub fn extract_source_name(url: &str) -> String {
    let Some(host) = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
    else {
        return UNKNOWN_SOURCE.to_string();
    };
    let domain = host.strip_prefix("www.").unwrap_or(&host);

    if let Some((_, name)) = SOURCE_NAMES.iter().find(|(d, _)| *d == domain) {
        return name.to_string();
    }

    let stem = [".com", ".net", ".org"]
        .iter()
        .find_map(|tld| domain.strip_suffix(*tld))
        .unwrap_or(domain);
    title_case(&stem.replace(['-', '_'], " "))
}

/// Join author names for the narrative header.
///
/// - `[]` → `an unknown author`
/// - `[A]` → `A`
/// - `[A, B]` → `A and B`
/// - `[A, B, C]` → `A, B, and C`
pub fn format_authors(authors: &[String]) -> String {
    match authors {
        [] => "an unknown author".to_string(),
        [one] => one.clone(),
        [a, b] => format!("{a} and {b}"),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

/// The introductory sentence placed before an article body.
pub fn narrative_header(article: &ArticleRecord, date: &str) -> String {
    let title = article.title.as_deref().unwrap_or(UNTITLED);
    let source = extract_source_name(&article.url);
    let authors = format_authors(&clean_author_names(&article.authors));
    format!(
        "The following is an article titled '{title}' from {source} from {date} written by {authors}. The text of the article follows.\n\n"
    )
}

/// Render the full narrative document for `article`.
///
/// # Arguments
///
/// * `article` - A scraped article; its content may be missing
/// * `date` - The archive day as `YYYY-MM-DD`
///
/// # Returns
///
/// The [`narrative_header`] followed by the article body.
pub fn render_narrative(article: &ArticleRecord, date: &str) -> String {
    let mut doc = narrative_header(article, date);
    doc.push_str(article.content.as_deref().unwrap_or_default());
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScrapeStatus;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn article(title: Option<&str>, authors: &[&str], url: &str, content: &str) -> ArticleRecord {
        ArticleRecord {
            url: url.to_string(),
            title: title.map(str::to_string),
            authors: names(authors),
            content: Some(content.to_string()),
            scrape_status: ScrapeStatus::Success,
            categories: vec![],
            progress_index: None,
        }
    }

    #[test]
    fn test_format_authors() {
        assert_eq!(format_authors(&[]), "an unknown author");
        assert_eq!(format_authors(&names(&["A"])), "A");
        assert_eq!(format_authors(&names(&["A", "B"])), "A and B");
        assert_eq!(format_authors(&names(&["A", "B", "C"])), "A, B, and C");
        assert_eq!(format_authors(&names(&["A", "B", "C", "D"])), "A, B, C, and D");
    }

    #[test]
    fn test_extract_source_name_mapped() {
        assert_eq!(extract_source_name("https://www.reuters.com/x"), "Reuters");
        assert_eq!(extract_source_name("https://reuters.com"), "Reuters");
        assert_eq!(extract_source_name("https://news.antiwar.com/2025/06/01/x/"), "Antiwar.com");
        assert_eq!(extract_source_name("https://WWW.AlJazeera.com/news"), "Al Jazeera");
    }

    #[test]
    fn test_extract_source_name_derived() {
        assert_eq!(extract_source_name("https://my-cool-blog.net/x"), "My Cool Blog");
        assert_eq!(extract_source_name("https://www.the_intercept.org/a"), "The Intercept");
        assert_eq!(extract_source_name("https://www.bbc.co.uk/news"), "Bbc.Co.Uk");
        assert_eq!(extract_source_name("not a url"), "an unknown source");
    }

    #[test]
    fn test_clean_author_names() {
        let raw = names(&[
            "Jason Ditz",
            "Wp-Block-Post-Author-Name",
            "Display Block",
            "View All Posts",
            &"x".repeat(51),
            "Kyle Anzalone",
        ]);
        assert_eq!(clean_author_names(&raw), names(&["Jason Ditz", "Kyle Anzalone"]));
    }

    #[test]
    fn test_author_rule_length_boundary() {
        assert!(!AuthorRule::LongerThan(50).rejects(&"x".repeat(50)));
        assert!(AuthorRule::LongerThan(50).rejects(&"x".repeat(51)));
    }

    #[test]
    fn test_render_narrative_header() {
        let a = article(Some("T"), &["A"], "https://reuters.com", "Body text.");
        let doc = render_narrative(&a, "2025-06-01");
        assert!(doc.starts_with(
            "The following is an article titled 'T' from Reuters from 2025-06-01 written by A. The text of the article follows.\n\n"
        ));
        assert!(doc.ends_with("\n\nBody text."));
    }

    #[test]
    fn test_render_narrative_untitled_and_noisy_authors() {
        let a = article(None, &["Author Avatar", "Display Flex"], "https://my-cool-blog.net/x", "B");
        let doc = render_narrative(&a, "2025-06-02");
        assert_eq!(
            doc,
            "The following is an article titled 'Untitled Article' from My Cool Blog from 2025-06-02 written by an unknown author. The text of the article follows.\n\nB"
        );
    }
}
