//! Chunked, resumable batch processing.
//!
//! Both the crawler and the uploader work through a long ordered list of
//! keys (URLs or file paths) the same way:
//!
//! 1. Drop keys already recorded as done ([`filter_remaining`]).
//! 2. Slice the rest into fixed-size chunks.
//! 3. For each chunk, process it and then commit the results to disk
//!    before starting the next one ([`run_chunks`]).
//!
//! A crash loses at most the chunk in flight. Commits happen only on the
//! calling task, after every item of the chunk has finished, so the
//! checkpoint files never see concurrent writers.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::error::Error;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

/// Number of chunks needed for `n` items, i.e. `ceil(n / size)`.
///
/// A `size` of zero is treated as one.
pub fn chunk_count(n: usize, size: usize) -> usize {
    n.div_ceil(size.max(1))
}

/// Keep every item of `all` that is not in `completed`, in order.
///
/// # Examples
///
/// ```ignore
/// let done = HashSet::from(["b".to_string()]);
/// assert_eq!(filter_remaining(&["a".into(), "b".into(), "c".into()], &done), vec!["a", "c"]);
/// ```
pub fn filter_remaining(all: &[String], completed: &HashSet<String>) -> Vec<String> {
    let remaining: Vec<String> = all
        .iter()
        .filter(|item| !completed.contains(*item))
        .cloned()
        .collect();
    info!(
        total = all.len(),
        already_completed = all.len() - remaining.len(),
        remaining = remaining.len(),
        "Filtered work items against checkpoint"
    );
    remaining
}

/// One unit of chunked work.
///
/// `process_chunk` does the slow part (network calls) and must not fail as
/// a whole: item-level failures belong in the outputs. `commit` persists
/// the outputs; an error there stops the run.
pub trait ChunkWorker {
    type Output;

    async fn process_chunk(&mut self, index: usize, items: &[String]) -> Vec<Self::Output>;

    async fn commit(
        &mut self,
        index: usize,
        outputs: Vec<Self::Output>,
    ) -> Result<(), Box<dyn Error>>;
}

/// What a [`run_chunks`] call got through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkRunSummary {
    pub chunks: usize,
    pub items: usize,
}

/// Drive `worker` over `items` in chunks of `chunk_size`.
///
/// Chunk indexes passed to the worker start at 1. `pause` is slept between
/// chunks, never after the last one.
///
/// # Arguments
///
/// * `items` - Work left to do, in order
/// * `chunk_size` - Items per chunk (zero is treated as one)
/// * `pause` - Sleep between chunks
/// * `worker` - Processes and commits each chunk
///
/// # Returns
///
/// How many chunks and items were processed.
///
/// # Errors
///
/// Returns the first error raised by [`ChunkWorker::commit`].
#[instrument(level = "info", skip_all, fields(items = items.len(), chunk_size = chunk_size))]
pub async fn run_chunks<W: ChunkWorker>(
    items: &[String],
    chunk_size: usize,
    pause: Duration,
    worker: &mut W,
) -> Result<ChunkRunSummary, Box<dyn Error>> {
    let size = chunk_size.max(1);
    let total_chunks = chunk_count(items.len(), size);
    let mut summary = ChunkRunSummary::default();

    for (i, chunk) in items.chunks(size).enumerate() {
        let index = i + 1;
        let first = i * size + 1;
        info!(
            chunk = index,
            total_chunks,
            first,
            last = first + chunk.len() - 1,
            "Processing chunk"
        );

        let outputs = worker.process_chunk(index, chunk).await;
        worker.commit(index, outputs).await?;

        summary.chunks += 1;
        summary.items += chunk.len();

        if index < total_chunks && !pause.is_zero() {
            debug!(?pause, "Pausing before next chunk");
            sleep(pause).await;
        }
    }

    Ok(summary)
}

/// Read a JSON file, returning `None` when it does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, Box<dyn Error>> {
    match fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Box::new(e)),
    }
}

/// Write `value` as pretty JSON, replacing `path` atomically.
///
/// The parent directory is created if needed.
///
/// # Errors
///
/// Returns an error if serialization or any file operation fails.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "Wrote checkpoint file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn keys(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("item-{i}")).collect()
    }

    /// Records every call so tests can check ordering and barriers.
    #[derive(Default)]
    struct Recorder {
        processed: Vec<Vec<String>>,
        committed: Vec<(usize, Vec<String>)>,
        fail_commit_at: Option<usize>,
    }

    impl ChunkWorker for Recorder {
        type Output = String;

        async fn process_chunk(&mut self, _index: usize, items: &[String]) -> Vec<String> {
            self.processed.push(items.to_vec());
            items.iter().map(|i| format!("done:{i}")).collect()
        }

        async fn commit(&mut self, index: usize, outputs: Vec<String>) -> Result<(), Box<dyn Error>> {
            if self.fail_commit_at == Some(index) {
                return Err("disk full".into());
            }
            self.committed.push((index, outputs));
            Ok(())
        }
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 20), 0);
        assert_eq!(chunk_count(1, 20), 1);
        assert_eq!(chunk_count(20, 20), 1);
        assert_eq!(chunk_count(21, 20), 2);
        assert_eq!(chunk_count(105, 50), 3);
        assert_eq!(chunk_count(3, 0), 3);
    }

    #[test]
    fn test_filter_remaining_partitions_input() {
        for n in [0usize, 1, 7, 40] {
            let all = keys(0..n);
            for step in [1usize, 2, 3] {
                let completed: HashSet<String> = all.iter().step_by(step).cloned().collect();
                let remaining = filter_remaining(&all, &completed);

                assert!(remaining.iter().all(|r| !completed.contains(r)));
                for item in &all {
                    assert!(remaining.contains(item) || completed.contains(item));
                }
                let expected: Vec<String> =
                    all.iter().filter(|i| !completed.contains(*i)).cloned().collect();
                assert_eq!(remaining, expected);
            }
        }
    }

    #[test]
    fn test_filter_remaining_ignores_unknown_completed() {
        let all = keys(0..3);
        let completed: HashSet<String> = ["elsewhere".to_string()].into_iter().collect();
        assert_eq!(filter_remaining(&all, &completed), all);
    }

    #[tokio::test]
    async fn test_run_chunks_preserves_order_and_commits_each_chunk() {
        let items = keys(0..45);
        let mut worker = Recorder::default();
        let summary = run_chunks(&items, 20, Duration::ZERO, &mut worker).await.unwrap();

        assert_eq!(summary, ChunkRunSummary { chunks: 3, items: 45 });
        assert_eq!(worker.processed.len(), chunk_count(45, 20));
        assert_eq!(worker.processed.concat(), items);
        assert_eq!(worker.processed[2].len(), 5);

        let indexes: Vec<usize> = worker.committed.iter().map(|(i, _)| *i).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
        assert_eq!(worker.committed[0].1[0], "done:item-0");
    }

    #[tokio::test]
    async fn test_run_chunks_empty_input_makes_no_calls() {
        let mut worker = Recorder::default();
        let summary = run_chunks(&[], 20, Duration::from_secs(60), &mut worker).await.unwrap();
        assert_eq!(summary, ChunkRunSummary::default());
        assert!(worker.processed.is_empty());
        assert!(worker.committed.is_empty());
    }

    #[tokio::test]
    async fn test_run_chunks_stops_on_commit_error() {
        let items = keys(0..10);
        let mut worker = Recorder {
            fail_commit_at: Some(2),
            ..Default::default()
        };
        let res = run_chunks(&items, 3, Duration::ZERO, &mut worker).await;
        assert!(res.is_err());
        assert_eq!(worker.processed.len(), 2);
        assert_eq!(worker.committed.len(), 1);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: usize,
    }

    #[tokio::test]
    async fn test_json_roundtrip_and_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/dir/progress.json");

        let missing: Option<Sample> = read_json(&path).await.unwrap();
        assert!(missing.is_none());

        let value = Sample { name: "x".into(), count: 3 };
        write_json(&path, &value).await.unwrap();
        let loaded: Option<Sample> = read_json(&path).await.unwrap();
        assert_eq!(loaded, Some(value));
        assert!(!tmp.path().join("nested/dir/progress.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_json_rejects_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let res: Result<Option<Sample>, _> = read_json(&path).await;
        assert!(res.is_err());
    }
}
