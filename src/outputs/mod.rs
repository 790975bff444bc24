//! Rendering of scraped articles for the retrieval dataset.
//!
//! - [`narrative`]: one article to one plain-text document
//! - [`convert`]: whole `scraped_<date>.json` files to a directory of
//!   `article_<NNN>_<date>.txt` files

pub mod convert;
pub mod narrative;
