//! Small helpers for logging, text casing and file system checks.

use std::error::Error;
use std::fs as stdfs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a char boundary) with
/// an ellipsis and the number of dropped bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Title-case every alphabetic run: the first letter of a run is
/// uppercased and the rest lowercased.
///
/// ```ignore
/// assert_eq!(title_case("my cool blog"), "My Cool Blog");
/// assert_eq!(title_case("news.example"), "News.Example");
/// ```
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or written to.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}

/// Ask a yes/no question on stdin; only `y`/`yes` counts as consent.
pub fn confirm(prompt: &str) -> io::Result<bool> {
    let mut stdout = io::stdout();
    write!(stdout, "{prompt} (y/N): ")?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(is_yes(&line))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
