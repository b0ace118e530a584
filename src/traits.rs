use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use crate::error::ReconError;
use crate::task::TenderRecord;

/// Extracts tender listings from one procurement portal.
///
/// Implementations must be idempotent enough that a retried call after
/// circuit-breaker recovery is harmless.
pub trait Extractor: Send + Sync + Clone {
    /// Search the portal. `filters` is portal-specific and opaque.
    fn search(
        &self,
        query: &str,
        filters: &serde_json::Value,
        max_results: usize,
    ) -> impl Future<Output = Result<Vec<TenderRecord>, ReconError>> + Send;

    /// Fetch the full detail record for one search hit.
    fn fetch_detail(
        &self,
        record_id: &str,
    ) -> impl Future<Output = Result<TenderRecord, ReconError>> + Send;
}

/// Extracts structured fields from a local document (OCR, parsing).
pub trait Analyzer: Send + Sync + Clone {
    fn analyze_document(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<serde_json::Value, ReconError>> + Send;
}

/// Result of persisting one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    /// The store already held this record (natural key or content hash).
    Duplicate,
}

/// Persists normalized tender records. Delivery is at-least-once; the
/// store must treat re-persisted records as duplicates.
pub trait RecordStore: Send + Sync + Clone {
    fn persist(
        &self,
        record: &TenderRecord,
    ) -> impl Future<Output = Result<PersistOutcome, ReconError>> + Send;
}

/// A no-op RecordStore for use when persistence is not needed.
#[derive(Debug, Clone)]
pub struct NullStore;

impl RecordStore for NullStore {
    async fn persist(&self, _record: &TenderRecord) -> Result<PersistOutcome, ReconError> {
        Ok(PersistOutcome::Inserted)
    }
}

/// Terminal-state events emitted by the coordinator.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Completed {
        task_id: String,
        batch_id: Option<String>,
        records: usize,
        documents: usize,
    },
    Failed {
        task_id: String,
        batch_id: Option<String>,
        error: String,
    },
}

/// Fire-and-forget notification sink for task completion/failure.
/// The coordinator does not await delivery confirmation.
pub trait Notifier: Send + Sync + Clone {
    fn notify(&self, event: TaskEvent) -> impl Future<Output = ()> + Send;
}

/// A no-op Notifier.
#[derive(Debug, Clone)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    async fn notify(&self, _event: TaskEvent) {}
}

/// Notifier that logs events through the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    async fn notify(&self, event: TaskEvent) {
        match event {
            TaskEvent::Completed {
                task_id,
                records,
                documents,
                ..
            } => {
                tracing::info!(%task_id, %records, %documents, "Task completed");
            }
            TaskEvent::Failed { task_id, error, .. } => {
                tracing::warn!(%task_id, %error, "Task failed");
            }
        }
    }
}

/// Maps source names to extractor implementations.
///
/// Adding a portal is a registration at configuration time, not a code
/// change to the coordinator.
#[derive(Clone)]
pub struct ExtractorRegistry<E> {
    extractors: Arc<HashMap<String, E>>,
}

impl<E: Extractor> ExtractorRegistry<E> {
    pub fn builder() -> ExtractorRegistryBuilder<E> {
        ExtractorRegistryBuilder {
            extractors: HashMap::new(),
        }
    }

    pub fn get(&self, source: &str) -> Option<&E> {
        self.extractors.get(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.extractors.keys().map(String::as_str)
    }
}

pub struct ExtractorRegistryBuilder<E> {
    extractors: HashMap<String, E>,
}

impl<E: Extractor> ExtractorRegistryBuilder<E> {
    pub fn register(mut self, source: impl Into<String>, extractor: E) -> Self {
        self.extractors.insert(source.into(), extractor);
        self
    }

    pub fn build(self) -> ExtractorRegistry<E> {
        ExtractorRegistry {
            extractors: Arc::new(self.extractors),
        }
    }
}
