//! Bulk uploader for narrative text files.
//!
//! Every `*.txt` under the text directory is pushed to the dataset in
//! batches. For each batch the uploader reads the files, uploads them in
//! one call, takes the new document IDs from the upload response (falling
//! back to a lookup by name), starts parsing and waits for the parse to
//! finish (see [`crate::api::wait_for_parse`]).
//!
//! Progress is committed to the progress file after every batch, so an
//! interrupted run resumes with the first file not yet processed. A file
//! is processed once whatever its outcome; re-running does not retry
//! failures.

use crate::api::{Backoff, DatasetApi, DocumentInfo, NewDocument, ParseRun, wait_for_parse};
use crate::checkpoint::{ChunkWorker, chunk_count, filter_remaining, read_json, run_chunks, write_json};
use crate::config::UploadConfig;
use crate::models::UploadProgress;
use crate::utils::confirm;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Uploaded and parsed.
    Parsed,
    /// Uploaded, but the server failed or cancelled the parse.
    ParseFailed,
    /// Uploaded, but the parse was not confirmed before the deadline.
    Unconfirmed,
    /// Never made it into the dataset.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResult {
    pub path: String,
    pub outcome: FileOutcome,
}

impl FileResult {
    fn new(path: &str, outcome: FileOutcome) -> Self {
        Self {
            path: path.to_string(),
            outcome,
        }
    }
}

/// Every `*.txt` file under `dir`, recursively, sorted by path.
pub fn list_text_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "txt"))
        .map(|entry| entry.path().to_string_lossy().into_owned())
        .collect();
    files.sort();
    files
}

/// Name a file is stored under in the dataset.
pub fn display_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map_or_else(|| path.to_string(), |n| n.to_string_lossy().into_owned())
}

/// Map a final parse state to a file outcome.
pub fn classify(run: Option<&ParseRun>) -> FileOutcome {
    match run {
        Some(ParseRun::Done) => FileOutcome::Parsed,
        Some(ParseRun::Fail | ParseRun::Cancel) => FileOutcome::ParseFailed,
        _ => FileOutcome::Unconfirmed,
    }
}

/// Load the upload checkpoint and work out which of `files` are left.
///
/// A missing progress file starts a fresh run over all of `files`. When
/// nothing is left the final statistics are logged.
///
/// # Arguments
///
/// * `config` - Supplies the progress file path
/// * `files` - Every text file found, in upload order
///
/// # Returns
///
/// The loaded (or fresh) progress and the files not yet processed.
///
/// # Errors
///
/// Returns an error if the progress file exists but cannot be read.
pub async fn load_progress(
    config: &UploadConfig,
    files: &[String],
) -> Result<(UploadProgress, Vec<String>), Box<dyn Error>> {
    let mut progress = match read_json::<UploadProgress>(&config.progress_file).await? {
        Some(progress) => {
            info!(
                processed = progress.processed_files.len(),
                completed_batches = progress.completed_batches,
                "Resuming from upload progress"
            );
            progress
        }
        None => {
            let mut progress = UploadProgress::new();
            progress.total_files = files.len();
            progress
        }
    };

    let processed: HashSet<String> = progress.processed_files.iter().cloned().collect();
    let remaining = filter_remaining(files, &processed);
    if remaining.is_empty() {
        info!("All files already processed");
        log_stats(&progress);
    } else {
        progress.total_files = progress.total_files.max(processed.len() + remaining.len());
    }
    Ok((progress, remaining))
}

/// Ask on stdin whether to upload `count` files.
///
/// # Errors
///
/// Returns an error if stdin or stdout is unavailable.
pub fn confirm_upload(config: &UploadConfig, count: usize) -> std::io::Result<bool> {
    confirm(&format!(
        "Upload {} files in {} batches to dataset '{}'?",
        count,
        chunk_count(count, config.batch_size),
        config.dataset_name
    ))
}

/// Upload `remaining` in batches, committing to `config.progress_file`
/// after each one.
///
/// # Arguments
///
/// * `api` - The dataset to upload into
/// * `config` - Batch size, pause and parse polling settings
/// * `progress` - State returned by [`load_progress`]
/// * `remaining` - Files still to upload
///
/// # Returns
///
/// The progress as last committed.
///
/// # Errors
///
/// Returns an error if the progress file cannot be written.
#[instrument(level = "info", skip_all, fields(remaining = remaining.len(), batch_size = config.batch_size))]
pub async fn upload_remaining<A: DatasetApi>(
    api: &A,
    config: &UploadConfig,
    progress: UploadProgress,
    remaining: &[String],
) -> Result<UploadProgress, Box<dyn Error>> {
    let t0 = Instant::now();
    let mut worker = UploadWorker {
        api,
        config,
        progress_path: config.progress_file.clone(),
        progress,
    };
    run_chunks(remaining, config.batch_size, config.batch_pause(), &mut worker).await?;

    info!(elapsed_secs = t0.elapsed().as_secs(), "Upload complete");
    log_stats(&worker.progress);
    Ok(worker.progress)
}

fn log_stats(progress: &UploadProgress) {
    info!(
        total_files = progress.total_files,
        completed_batches = progress.completed_batches,
        uploaded = progress.uploaded_files,
        parsed = progress.parsed_files,
        unconfirmed = progress.unconfirmed_files,
        failed = progress.failed_files,
        "Upload statistics"
    );
}

/// Uploads one batch and commits it to the progress file.
struct UploadWorker<'a, A> {
    api: &'a A,
    config: &'a UploadConfig,
    progress_path: PathBuf,
    progress: UploadProgress,
}

impl<A: DatasetApi> UploadWorker<'_, A> {
    /// Document ID for each `(path, name)` in `pending`, `None` when it
    /// could not be found.
    ///
    /// The upload response lists the created documents in upload order, so
    /// a complete response is paired by position. The server renames a
    /// document whose name is taken (`a.txt` becomes `a(1).txt`), and
    /// matching by name would pick up the older copy. Names the response
    /// does not account for are looked up with a listing.
    async fn resolve_ids(
        &self,
        index: usize,
        pending: &[(String, String)],
        created: Vec<DocumentInfo>,
    ) -> Vec<Option<String>> {
        let mut ids: Vec<Option<String>> = if created.len() == pending.len() {
            created.into_iter().map(|d| Some(d.id)).collect()
        } else {
            let mut by_name: HashMap<String, String> = created.into_iter().map(|d| (d.name, d.id)).collect();
            pending.iter().map(|(_, name)| by_name.remove(name)).collect()
        };

        let missing: Vec<String> = pending
            .iter()
            .zip(&ids)
            .filter(|(_, id)| id.is_none())
            .map(|((_, name), _)| name.clone())
            .collect();
        if missing.is_empty() {
            return ids;
        }

        debug!(batch = index, missing = missing.len(), "Looking up document IDs by name");
        match self.api.list_documents(&missing).await {
            Ok(docs) => {
                let by_name: HashMap<String, String> = docs.into_iter().map(|d| (d.name, d.id)).collect();
                for ((_, name), id) in pending.iter().zip(ids.iter_mut()) {
                    if id.is_none() {
                        *id = by_name.get(name).cloned();
                    }
                }
            }
            Err(e) => warn!(batch = index, error = %e, "Could not resolve document IDs"),
        }
        ids
    }
}

impl<A: DatasetApi> ChunkWorker for UploadWorker<'_, A> {
    type Output = FileResult;

    async fn process_chunk(&mut self, index: usize, items: &[String]) -> Vec<FileResult> {
        let mut results = Vec::with_capacity(items.len());
        let mut docs = Vec::new();
        let mut pending: Vec<(String, String)> = Vec::new();

        for path in items {
            match fs::read(path).await {
                Ok(blob) => {
                    let name = display_name(path);
                    docs.push(NewDocument {
                        display_name: name.clone(),
                        blob,
                    });
                    pending.push((path.clone(), name));
                }
                Err(e) => {
                    warn!(%path, error = %e, "Could not read file");
                    results.push(FileResult::new(path, FileOutcome::Failed(e.to_string())));
                }
            }
        }
        if pending.is_empty() {
            return results;
        }

        let created = match self.api.upload_documents(docs).await {
            Ok(created) => created,
            Err(e) => {
                error!(batch = index, error = %e, "Batch upload failed");
                let reason = e.to_string();
                results.extend(
                    pending
                        .iter()
                        .map(|(path, _)| FileResult::new(path, FileOutcome::Failed(reason.clone()))),
                );
                return results;
            }
        };
        info!(batch = index, uploaded = pending.len(), created = created.len(), "Batch uploaded");

        let doc_ids = self.resolve_ids(index, &pending, created).await;
        let ids: Vec<String> = doc_ids.iter().flatten().cloned().collect();
        if ids.len() < pending.len() {
            warn!(
                batch = index,
                missing = pending.len() - ids.len(),
                "Some uploaded documents were not found in the dataset"
            );
        }

        let runs = if ids.is_empty() {
            HashMap::new()
        } else {
            match self.api.parse_documents(&ids).await {
                Ok(()) => {
                    wait_for_parse(
                        self.api,
                        &ids,
                        self.config.parse_timeout(),
                        Backoff::from_config(self.config),
                    )
                    .await
                }
                Err(e) => {
                    error!(batch = index, error = %e, "Could not start parsing");
                    ids.iter().map(|id| (id.clone(), ParseRun::Fail)).collect()
                }
            }
        };

        results.extend(pending.iter().zip(&doc_ids).map(|((path, _), id)| {
            let run = id.as_ref().and_then(|id| runs.get(id));
            FileResult::new(path, classify(run))
        }));
        results
    }

    async fn commit(&mut self, index: usize, outputs: Vec<FileResult>) -> Result<(), Box<dyn Error>> {
        let p = &mut self.progress;
        for result in &outputs {
            match &result.outcome {
                FileOutcome::Parsed => {
                    p.uploaded_files += 1;
                    p.parsed_files += 1;
                }
                FileOutcome::ParseFailed => {
                    p.uploaded_files += 1;
                    p.failed_files += 1;
                }
                FileOutcome::Unconfirmed => {
                    p.uploaded_files += 1;
                    p.unconfirmed_files += 1;
                }
                FileOutcome::Failed(_) => p.failed_files += 1,
            }
            p.processed_files.push(result.path.clone());
        }
        p.completed_batches += 1;
        p.last_batch_completed = Some(p.completed_batches);
        p.touch();
        write_json(&self.progress_path, &self.progress).await?;

        info!(
            batch = index,
            files = outputs.len(),
            processed = self.progress.processed_files.len(),
            total = self.progress.total_files,
            "Batch committed"
        );
        Ok(())
    }
}
