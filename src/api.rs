//! RAGFlow dataset API client and parse-status polling.
//!
//! The uploader talks to a single dataset through the [`DatasetApi`] trait:
//! - [`DatasetApi::upload_documents`]: one multipart upload per batch,
//!   returning the created documents
//! - [`DatasetApi::list_documents`]: map display names back to document IDs
//!   when the upload response does not
//! - [`DatasetApi::parse_documents`]: start server-side chunking
//! - [`DatasetApi::document_runs`]: read the current parse state
//!
//! [`RagflowClient`] implements it over the HTTP API (`/api/v1`). Listings
//! are read newest first and stop as soon as every wanted document has
//! been seen. [`wait_for_parse`] polls the parse state with exponential
//! backoff until every document is finished or the deadline passes.
//!
//! # Poll Backoff
//!
//! ```text
//! delay = min(initial * 2^(attempt-1), max) + random_jitter(0..=jitter)
//! ```

use crate::config::UploadConfig;
use rand::{Rng, rng};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Errors returned by the dataset API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned code {code}: {message}")]
    Api { code: i64, message: String },
    #[error("dataset '{0}' not found")]
    DatasetNotFound(String),
}

/// Server-side parse state of a document (the `run` field).
///
/// Older servers report the state as a digit string; both forms are
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum ParseRun {
    #[default]
    Unstart,
    Running,
    Cancel,
    Done,
    Fail,
    Unknown(String),
}

impl ParseRun {
    /// True once the server will not change the state on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ParseRun::Done | ParseRun::Fail | ParseRun::Cancel)
    }
}

impl From<String> for ParseRun {
    fn from(s: String) -> Self {
        match s.as_str() {
            "UNSTART" | "0" => ParseRun::Unstart,
            "RUNNING" | "1" => ParseRun::Running,
            "CANCEL" | "2" => ParseRun::Cancel,
            "DONE" | "3" => ParseRun::Done,
            "FAIL" | "4" => ParseRun::Fail,
            _ => ParseRun::Unknown(s),
        }
    }
}

/// A file to upload: its display name in the dataset and its bytes.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub display_name: String,
    pub blob: Vec<u8>,
}

/// A document as listed by the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub run: ParseRun,
}

/// Operations the uploader needs from a dataset.
pub trait DatasetApi {
    /// Upload every document in one call.
    ///
    /// # Returns
    ///
    /// The documents the server created, in upload order. The server may
    /// rename a document whose name is already taken in the dataset, so
    /// callers should pair these with their uploads by position rather
    /// than by name.
    async fn upload_documents(&self, docs: Vec<NewDocument>) -> Result<Vec<DocumentInfo>, ApiError>;

    /// Documents whose name is in `names`, one per name.
    ///
    /// When a name was uploaded more than once, the first listed (newest)
    /// document wins.
    async fn list_documents(&self, names: &[String]) -> Result<Vec<DocumentInfo>, ApiError>;

    /// Start asynchronous parsing of `ids`.
    async fn parse_documents(&self, ids: &[String]) -> Result<(), ApiError>;

    /// Current parse state of each of `ids` the server knows about.
    async fn document_runs(&self, ids: &[String]) -> Result<HashMap<String, ParseRun>, ApiError>;
}

/// `{code, message, data}` wrapper around every API response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<Option<T>, ApiError> {
        if self.code == 0 {
            Ok(self.data)
        } else {
            Err(ApiError::Api {
                code: self.code,
                message: self.message.unwrap_or_default(),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct DatasetInfo {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DocumentPage {
    #[serde(default)]
    docs: Vec<DocumentInfo>,
    #[serde(default)]
    total: Option<usize>,
}

/// HTTP client bound to one RAGFlow dataset.
#[derive(Debug, Clone)]
pub struct RagflowClient {
    http: Client,
    base: String,
    api_key: Option<String>,
    dataset_id: String,
    page_size: usize,
}

impl RagflowClient {
    /// Look up `config.dataset_name` and bind a client to it.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::DatasetNotFound`] when no dataset has that name,
    /// or any transport or API error from the lookup.
    #[instrument(level = "info", skip_all, fields(api_url = %config.api_url, dataset = %config.dataset_name))]
    pub async fn connect(config: &UploadConfig) -> Result<Self, ApiError> {
        let mut client = Self {
            http: Client::builder().timeout(Duration::from_secs(300)).build()?,
            base: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            dataset_id: String::new(),
            page_size: config.list_page_size.max(1),
        };

        let datasets: Vec<DatasetInfo> = client
            .send(
                client
                    .http
                    .get(client.endpoint("datasets"))
                    .query(&[("name", config.dataset_name.as_str())]),
            )
            .await?
            .unwrap_or_default();
        let dataset = datasets
            .into_iter()
            .find(|d| d.name == config.dataset_name)
            .ok_or_else(|| ApiError::DatasetNotFound(config.dataset_name.clone()))?;

        info!(dataset_id = %dataset.id, "Connected to dataset");
        client.dataset_id = dataset.id;
        Ok(client)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base, path)
    }

    fn documents_endpoint(&self) -> String {
        self.endpoint(&format!("datasets/{}/documents", self.dataset_id))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<Option<T>, ApiError> {
        let req = match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        };
        let envelope: Envelope<T> = req.send().await?.error_for_status()?.json().await?;
        envelope.into_data()
    }

    /// Page through the dataset, newest first, until every key in
    /// `wanted` has been seen or the listing ends.
    async fn scan_documents(&self, key: DocKey, wanted: &[String]) -> Result<Vec<DocumentInfo>, ApiError> {
        let mut scan = DocumentScan::new(key, wanted, self.page_size);
        for page in 1usize.. {
            let batch: Option<DocumentPage> = self
                .send(self.http.get(self.documents_endpoint()).query(&[
                    ("page", page.to_string()),
                    ("page_size", self.page_size.to_string()),
                    ("orderby", "create_time".to_string()),
                    ("desc", "true".to_string()),
                ]))
                .await?;
            let Some(batch) = batch else { break };
            debug!(page, n = batch.docs.len(), total = ?batch.total, "Listed documents page");
            if scan.absorb(batch) {
                break;
            }
        }
        Ok(scan.found)
    }
}

/// Which field of a listed document to match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocKey {
    Id,
    Name,
}

impl DocKey {
    fn of(self, doc: &DocumentInfo) -> &str {
        match self {
            DocKey::Id => &doc.id,
            DocKey::Name => &doc.name,
        }
    }
}

/// Collects the wanted documents from a paged listing.
///
/// Keeps the first document seen per key, so with a newest-first listing
/// a re-uploaded name resolves to its newest copy.
#[derive(Debug)]
struct DocumentScan {
    key: DocKey,
    wanted: HashSet<String>,
    page_size: usize,
    listed: usize,
    found: Vec<DocumentInfo>,
}

impl DocumentScan {
    fn new(key: DocKey, wanted: &[String], page_size: usize) -> Self {
        Self {
            key,
            wanted: wanted.iter().cloned().collect(),
            page_size,
            listed: 0,
            found: Vec::new(),
        }
    }

    /// Take in one page; true when no further page is needed.
    fn absorb(&mut self, page: DocumentPage) -> bool {
        let n = page.docs.len();
        self.listed += n;
        for doc in page.docs {
            if self.wanted.remove(self.key.of(&doc)) {
                self.found.push(doc);
            }
        }
        self.wanted.is_empty()
            || n < self.page_size
            || page.total.is_some_and(|t| self.listed >= t)
    }
}

impl DatasetApi for RagflowClient {
    #[instrument(level = "info", skip_all, fields(count = docs.len()))]
    async fn upload_documents(&self, docs: Vec<NewDocument>) -> Result<Vec<DocumentInfo>, ApiError> {
        let form = docs.into_iter().fold(Form::new(), |form, doc| {
            form.part("file", Part::bytes(doc.blob).file_name(doc.display_name))
        });
        let created: Option<Vec<DocumentInfo>> = self
            .send(self.http.post(self.documents_endpoint()).multipart(form))
            .await?;
        Ok(created.unwrap_or_default())
    }

    async fn list_documents(&self, names: &[String]) -> Result<Vec<DocumentInfo>, ApiError> {
        self.scan_documents(DocKey::Name, names).await
    }

    #[instrument(level = "info", skip_all, fields(count = ids.len()))]
    async fn parse_documents(&self, ids: &[String]) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("datasets/{}/chunks", self.dataset_id));
        let body = serde_json::json!({ "document_ids": ids });
        let _: Option<IgnoredAny> = self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }

    async fn document_runs(&self, ids: &[String]) -> Result<HashMap<String, ParseRun>, ApiError> {
        Ok(self
            .scan_documents(DocKey::Id, ids)
            .await?
            .into_iter()
            .map(|d| (d.id, d.run))
            .collect())
    }
}

/// Exponential poll delay with a cap and random jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, jitter_ms: u64) -> Self {
        Self {
            initial,
            max,
            jitter_ms,
            attempt: 0,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(
            Duration::from_millis(config.poll_initial_ms),
            Duration::from_millis(config.poll_max_ms),
            config.poll_jitter_ms,
        )
    }

    /// Delay before the next poll.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let shift = (self.attempt - 1).min(20);
        let delay = self.initial.saturating_mul(1 << shift).min(self.max);
        let jitter_ms = if self.jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=self.jitter_ms)
        };
        delay + Duration::from_millis(jitter_ms)
    }
}

/// Poll `ids` until every parse is terminal or `timeout` has elapsed.
///
/// Poll errors are logged and retried until the deadline.
///
/// # Arguments
///
/// * `api` - The dataset holding the documents
/// * `ids` - Document IDs whose parse was started
/// * `timeout` - Deadline measured from the first poll
/// * `backoff` - Delay schedule between polls
///
/// # Returns
///
/// The last state seen for each ID. IDs the server never reported stay
/// [`ParseRun::Unstart`].
#[instrument(level = "info", skip_all, fields(count = ids.len(), timeout = ?timeout))]
pub async fn wait_for_parse<A: DatasetApi>(
    api: &A,
    ids: &[String],
    timeout: Duration,
    mut backoff: Backoff,
) -> HashMap<String, ParseRun> {
    let t0 = Instant::now();
    let mut runs: HashMap<String, ParseRun> = ids
        .iter()
        .map(|id| (id.clone(), ParseRun::Unstart))
        .collect();
    if ids.is_empty() {
        return runs;
    }

    loop {
        match api.document_runs(ids).await {
            Ok(latest) => {
                for (id, run) in latest {
                    if let Some(slot) = runs.get_mut(&id) {
                        *slot = run;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Parse status poll failed"),
        }

        let pending = runs.values().filter(|r| !r.is_terminal()).count();
        let elapsed = t0.elapsed();
        if pending == 0 {
            info!(elapsed_ms = elapsed.as_millis() as u64, "All parses finished");
            return runs;
        }
        if elapsed >= timeout {
            warn!(
                pending,
                elapsed_ms = elapsed.as_millis() as u64,
                "Parse deadline reached with documents still pending"
            );
            return runs;
        }

        let delay = backoff.next_delay().min(timeout - elapsed);
        debug!(pending, ?delay, "Waiting for parse");
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Reports each ID as RUNNING for `polls_until_done` polls, then its
    /// final state.
    struct ScriptedRuns {
        polls: Mutex<usize>,
        polls_until_done: usize,
        finals: HashMap<String, ParseRun>,
    }

    impl DatasetApi for ScriptedRuns {
        async fn upload_documents(&self, _docs: Vec<NewDocument>) -> Result<Vec<DocumentInfo>, ApiError> {
            Ok(vec![])
        }

        async fn list_documents(&self, _names: &[String]) -> Result<Vec<DocumentInfo>, ApiError> {
            Ok(vec![])
        }

        async fn parse_documents(&self, _ids: &[String]) -> Result<(), ApiError> {
            Ok(())
        }

        async fn document_runs(&self, ids: &[String]) -> Result<HashMap<String, ParseRun>, ApiError> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            let done = *polls > self.polls_until_done;
            Ok(ids
                .iter()
                .filter_map(|id| {
                    let run = if done {
                        self.finals.get(id)?.clone()
                    } else {
                        ParseRun::Running
                    };
                    Some((id.clone(), run))
                })
                .collect())
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn quick_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(4), 0)
    }

    #[test]
    fn test_parse_run_from_wire() {
        let docs: Vec<DocumentInfo> = serde_json::from_str(
            r#"[
                {"id": "a", "name": "a.txt", "run": "DONE"},
                {"id": "b", "name": "b.txt", "run": "4"},
                {"id": "c", "name": "c.txt", "run": "PAUSED"},
                {"id": "d", "name": "d.txt"}
            ]"#,
        )
        .unwrap();
        assert_eq!(docs[0].run, ParseRun::Done);
        assert_eq!(docs[1].run, ParseRun::Fail);
        assert_eq!(docs[2].run, ParseRun::Unknown("PAUSED".to_string()));
        assert_eq!(docs[3].run, ParseRun::Unstart);
    }

    #[test]
    fn test_parse_run_is_terminal() {
        assert!(ParseRun::Done.is_terminal());
        assert!(ParseRun::Fail.is_terminal());
        assert!(ParseRun::Cancel.is_terminal());
        assert!(!ParseRun::Running.is_terminal());
        assert!(!ParseRun::Unstart.is_terminal());
        assert!(!ParseRun::Unknown("x".into()).is_terminal());
    }

    #[test]
    fn test_envelope_error_code() {
        let ok: Envelope<Vec<u32>> = serde_json::from_str(r#"{"code": 0, "data": [1, 2]}"#).unwrap();
        assert_eq!(ok.into_data().unwrap(), Some(vec![1, 2]));

        let err: Envelope<Vec<u32>> =
            serde_json::from_str(r#"{"code": 102, "message": "You don't own the dataset."}"#).unwrap();
        match err.into_data() {
            Err(ApiError::Api { code, message }) => {
                assert_eq!(code, 102);
                assert_eq!(message, "You don't own the dataset.");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[test]
    fn test_document_page_shape() {
        let env: Envelope<DocumentPage> = serde_json::from_str(
            r#"{"code": 0, "data": {"docs": [{"id": "x", "name": "x.txt", "run": "RUNNING", "size": 10}], "total": 41}}"#,
        )
        .unwrap();
        let page = env.into_data().unwrap().unwrap();
        assert_eq!(page.total, Some(41));
        assert_eq!(page.docs[0].run, ParseRun::Running);
    }

    fn page(docs: &[(&str, &str)], total: Option<usize>) -> DocumentPage {
        DocumentPage {
            docs: docs
                .iter()
                .map(|(id, name)| DocumentInfo {
                    id: id.to_string(),
                    name: name.to_string(),
                    run: ParseRun::Running,
                })
                .collect(),
            total,
        }
    }

    #[test]
    fn test_scan_stops_once_everything_is_found() {
        let mut scan = DocumentScan::new(DocKey::Id, &ids(&["d2", "d3"]), 3);
        assert!(!scan.absorb(page(&[("d1", "a.txt"), ("d2", "b.txt"), ("d9", "z.txt")], Some(5000))));
        assert!(scan.absorb(page(&[("d3", "c.txt"), ("d4", "d.txt"), ("d5", "e.txt")], Some(5000))));
        let found: Vec<&str> = scan.found.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(found, vec!["d2", "d3"]);
    }

    #[test]
    fn test_scan_stops_at_end_of_listing() {
        let mut scan = DocumentScan::new(DocKey::Name, &ids(&["a.txt", "missing.txt"]), 2);
        assert!(!scan.absorb(page(&[("d1", "a.txt"), ("d2", "b.txt")], None)));
        assert!(scan.absorb(page(&[("d3", "c.txt")], None)));

        let mut scan = DocumentScan::new(DocKey::Name, &ids(&["missing.txt"]), 2);
        assert!(scan.absorb(page(&[("d1", "a.txt"), ("d2", "b.txt")], Some(2))));
        assert!(scan.found.is_empty());
    }

    #[test]
    fn test_scan_keeps_newest_copy_of_a_name() {
        let mut scan = DocumentScan::new(DocKey::Name, &ids(&["a.txt"]), 10);
        scan.absorb(page(&[("new", "a.txt"), ("old", "a.txt")], None));
        assert_eq!(scan.found.len(), 1);
        assert_eq!(scan.found[0].id, "new");
    }

    #[test]
    fn test_upload_response_shape() {
        let env: Envelope<Vec<DocumentInfo>> = serde_json::from_str(
            r#"{"code": 0, "data": [
                {"id": "d1", "name": "a(1).txt", "run": "UNSTART", "location": "a(1).txt", "size": 12},
                {"id": "d2", "name": "b.txt", "run": "UNSTART"}
            ]}"#,
        )
        .unwrap();
        let docs = env.into_data().unwrap().unwrap();
        assert_eq!(docs[0].name, "a(1).txt");
        assert_eq!(docs[1].id, "d2");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(5), 0);
        let delays: Vec<_> = (0..5).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(100), 50);
        for _ in 0..20 {
            let d = b.next_delay();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_wait_for_parse_until_terminal() {
        let api = ScriptedRuns {
            polls: Mutex::new(0),
            polls_until_done: 2,
            finals: HashMap::from([
                ("a".to_string(), ParseRun::Done),
                ("b".to_string(), ParseRun::Fail),
            ]),
        };
        let runs = wait_for_parse(&api, &ids(&["a", "b"]), Duration::from_secs(5), quick_backoff()).await;
        assert_eq!(runs["a"], ParseRun::Done);
        assert_eq!(runs["b"], ParseRun::Fail);
        assert_eq!(*api.polls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_wait_for_parse_deadline() {
        let api = ScriptedRuns {
            polls: Mutex::new(0),
            polls_until_done: usize::MAX,
            finals: HashMap::new(),
        };
        let runs = wait_for_parse(&api, &ids(&["a"]), Duration::ZERO, quick_backoff()).await;
        assert_eq!(runs["a"], ParseRun::Running);
        assert_eq!(*api.polls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_parse_unreported_ids_stay_unstarted() {
        let api = ScriptedRuns {
            polls: Mutex::new(0),
            polls_until_done: 0,
            finals: HashMap::from([("a".to_string(), ParseRun::Done)]),
        };
        let runs = wait_for_parse(&api, &ids(&["a", "ghost"]), Duration::from_millis(20), quick_backoff()).await;
        assert_eq!(runs["a"], ParseRun::Done);
        assert_eq!(runs["ghost"], ParseRun::Unstart);
    }
}
