//! Test utilities: mock implementations of the collaborator traits.
//!
//! Handwritten mocks for dependency injection in unit tests. All mocks
//! use `Arc<Mutex<_>>` for interior mutability, allowing scripted
//! responses and assertions on recorded calls. Clones share state.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ReconError;
use crate::task::TenderRecord;
use crate::traits::{Analyzer, Extractor, Notifier, PersistOutcome, RecordStore, TaskEvent};

/// Build a minimal tender record for tests.
pub fn tender(id: &str, title: &str) -> TenderRecord {
    TenderRecord {
        id: id.to_string(),
        title: title.to_string(),
        organization: "Ministerio de Obras".to_string(),
        source: "comprar".to_string(),
        url: format!("https://example.test/{id}"),
        deadline: None,
        data: serde_json::Value::Null,
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor with scripted `search`/`fetch_detail` responses.
///
/// Each call pops the next scripted response; when the script is empty,
/// `search` returns an empty page and `fetch_detail` echoes the id.
#[derive(Clone, Default)]
pub struct MockExtractor {
    search_responses: Arc<Mutex<Vec<Result<Vec<TenderRecord>, ReconError>>>>,
    detail_responses: Arc<Mutex<Vec<Result<TenderRecord, ReconError>>>>,
    search_calls: Arc<Mutex<Vec<String>>>,
    detail_calls: Arc<Mutex<Vec<String>>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<TenderRecord>) -> Self {
        let mock = Self::default();
        mock.push_search(Ok(records));
        mock
    }

    pub fn with_search_error(error: ReconError) -> Self {
        let mock = Self::default();
        mock.push_search(Err(error));
        mock
    }

    pub fn push_search(&self, response: Result<Vec<TenderRecord>, ReconError>) {
        self.search_responses.lock().unwrap().push(response);
    }

    pub fn push_detail(&self, response: Result<TenderRecord, ReconError>) {
        self.detail_responses.lock().unwrap().push(response);
    }

    pub fn search_calls(&self) -> Vec<String> {
        self.search_calls.lock().unwrap().clone()
    }

    pub fn detail_calls(&self) -> Vec<String> {
        self.detail_calls.lock().unwrap().clone()
    }
}

impl Extractor for MockExtractor {
    async fn search(
        &self,
        query: &str,
        _filters: &serde_json::Value,
        _max_results: usize,
    ) -> Result<Vec<TenderRecord>, ReconError> {
        self.search_calls.lock().unwrap().push(query.to_string());
        let mut responses = self.search_responses.lock().unwrap();
        if responses.is_empty() {
            Ok(vec![])
        } else {
            responses.remove(0)
        }
    }

    async fn fetch_detail(&self, record_id: &str) -> Result<TenderRecord, ReconError> {
        self.detail_calls.lock().unwrap().push(record_id.to_string());
        let mut responses = self.detail_responses.lock().unwrap();
        if responses.is_empty() {
            Ok(tender(record_id, &format!("detail {record_id}")))
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockAnalyzer
// ---------------------------------------------------------------------------

/// Mock analyzer with scripted per-document responses and an optional
/// artificial delay (for timeout tests).
#[derive(Clone, Default)]
pub struct MockAnalyzer {
    responses: Arc<Mutex<Vec<Result<serde_json::Value, ReconError>>>>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<Result<serde_json::Value, ReconError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

impl Analyzer for MockAnalyzer {
    async fn analyze_document(&self, path: &Path) -> Result<serde_json::Value, ReconError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(path.to_path_buf());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(serde_json::json!({ "document": path.display().to_string() }))
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// Mock store recording persisted records, with scripted outcomes.
/// When the script is empty every persist reports `Inserted`.
#[derive(Clone, Default)]
pub struct MockStore {
    outcomes: Arc<Mutex<Vec<Result<PersistOutcome, ReconError>>>>,
    persisted: Arc<Mutex<Vec<TenderRecord>>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outcome(&self, outcome: Result<PersistOutcome, ReconError>) {
        self.outcomes.lock().unwrap().push(outcome);
    }

    pub fn persisted(&self) -> Vec<TenderRecord> {
        self.persisted.lock().unwrap().clone()
    }
}

impl RecordStore for MockStore {
    async fn persist(&self, record: &TenderRecord) -> Result<PersistOutcome, ReconError> {
        self.persisted.lock().unwrap().push(record.clone());
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            Ok(PersistOutcome::Inserted)
        } else {
            outcomes.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// Notifier that records every event for assertions.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<TaskEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    async fn notify(&self, event: TaskEvent) {
        self.events.lock().unwrap().push(event);
    }
}
