//! Top-level façade: turns templates into supervised background tasks.
//!
//! The coordinator owns its queue, per-source controls, caches, and
//! metrics, and is handed to the serving layer at startup — no global
//! singletons. `run` drives a fixed pool of workers; each worker runs
//! one task's full phase pipeline (scrape → analyze → persist) to
//! completion before claiming the next.

use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::config::ReconConfig;
use crate::error::ReconError;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::progress::ScrapingProgress;
use crate::queue::TaskQueue;
use crate::source::SourceControlMap;
use crate::task::{
    BatchStatusView, DocumentOutcome, ReconTemplate, SourceQuery, Task, TaskPriority, TaskResult,
    TaskStatusView, TenderRecord,
};
use crate::traits::{
    Analyzer, Extractor, ExtractorRegistry, Notifier, PersistOutcome, RecordStore, TaskEvent,
};

/// Cache key for one scrape: source, query, and a digest of the filter
/// set. Stable only within one process lifetime — the caches are
/// in-memory and nothing is persisted.
fn scrape_cache_key(query: &SourceQuery) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.filters.to_string().as_bytes());
    format!("{}:{}:{:x}", query.source, query.query, hasher.finalize())
}

/// Coordinates template-driven reconnaissance tasks.
///
/// Generic over all external collaborators via traits, enabling
/// dependency injection and testability without real portals, OCR, or
/// a database.
pub struct ReconCoordinator<E, A, S, N>
where
    E: Extractor,
    A: Analyzer,
    S: RecordStore,
    N: Notifier,
{
    config: ReconConfig,
    queue: Arc<TaskQueue>,
    registry: ExtractorRegistry<E>,
    analyzer: A,
    store: S,
    notifier: N,
    controls: Arc<SourceControlMap>,
    scrape_cache: moka::future::Cache<String, Arc<Vec<TenderRecord>>>,
    result_cache: moka::future::Cache<String, TaskStatusView>,
    metrics: Arc<MetricsCollector>,
}

impl<E, A, S, N> Clone for ReconCoordinator<E, A, S, N>
where
    E: Extractor,
    A: Analyzer,
    S: RecordStore,
    N: Notifier,
{
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            queue: Arc::clone(&self.queue),
            registry: self.registry.clone(),
            analyzer: self.analyzer.clone(),
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            controls: Arc::clone(&self.controls),
            scrape_cache: self.scrape_cache.clone(),
            result_cache: self.result_cache.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<E, A, S, N> ReconCoordinator<E, A, S, N>
where
    E: Extractor + 'static,
    A: Analyzer + 'static,
    S: RecordStore + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        config: ReconConfig,
        registry: ExtractorRegistry<E>,
        analyzer: A,
        store: S,
        notifier: N,
    ) -> Self {
        let queue = Arc::new(TaskQueue::new(
            config.max_concurrent_tasks,
            config.batch_size,
        ));
        let controls = Arc::new(SourceControlMap::new(
            config.default_limits.clone(),
            config.source_limits.clone(),
        ));
        let scrape_cache = moka::future::Cache::builder()
            .time_to_live(config.cache_ttl)
            .build();
        let result_cache = moka::future::Cache::builder()
            .time_to_live(config.result_ttl)
            .build();

        Self {
            config,
            queue,
            registry,
            analyzer,
            store,
            notifier,
            controls,
            scrape_cache,
            result_cache,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Admit a template as a background task. Returns the task id
    /// immediately; execution happens on the worker pool.
    pub fn start_task(&self, template: ReconTemplate, priority: TaskPriority) -> String {
        let task_id = self.queue.enqueue(template, priority);
        self.metrics.record_task_start();
        tracing::info!(%task_id, %priority, "Reconnaissance task created");
        task_id
    }

    /// Admit several templates at once. Returns the batch id of the
    /// first enqueued task (templates beyond `batch_size` spill into
    /// follow-up batches).
    pub fn start_batch(
        &self,
        templates: Vec<ReconTemplate>,
        priority: TaskPriority,
    ) -> Result<String, ReconError> {
        let mut first_task = None;
        for template in templates {
            let task_id = self.start_task(template, priority);
            first_task.get_or_insert(task_id);
        }
        let first_task =
            first_task.ok_or_else(|| ReconError::Generic("Empty template batch".into()))?;
        let batch_id = self
            .queue
            .task_status(&first_task)
            .and_then(|view| view.batch_id)
            .ok_or_else(|| ReconError::Generic("Batch assignment missing".into()))?;
        Ok(batch_id)
    }

    /// Run the worker pool and the retention sweeper until cancellation.
    pub async fn run(&self, cancel_token: CancellationToken) {
        let mut handles = Vec::with_capacity(self.config.max_concurrent_tasks + 1);

        for worker in 0..self.config.max_concurrent_tasks {
            let coordinator = self.clone();
            let cancel = cancel_token.clone();
            handles.push(tokio::spawn(async move {
                coordinator.worker_loop(worker, cancel).await;
            }));
        }

        let coordinator = self.clone();
        let cancel = cancel_token.clone();
        handles.push(tokio::spawn(async move {
            coordinator.sweeper_loop(cancel).await;
        }));

        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn worker_loop(&self, worker: usize, cancel_token: CancellationToken) {
        tracing::info!(%worker, "Worker started");
        loop {
            let task = tokio::select! {
                task = self.queue.next_task() => task,
                () = cancel_token.cancelled() => break,
            };
            // A failing task must never take the worker down with it.
            self.process_task(task).await;
        }
        tracing::info!(%worker, "Worker stopped");
    }

    async fn sweeper_loop(&self, cancel_token: CancellationToken) {
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.config.sweep_interval) => {
                    self.queue.sweep_expired(self.config.task_retention);
                }
                () = cancel_token.cancelled() => break,
            }
        }
    }

    async fn process_task(&self, task: Task) {
        let started = Instant::now();
        tracing::info!(task_id = %task.id, template = %task.template.name, "Processing task");

        let mut progress = ScrapingProgress::new(task.total_steps);
        progress.advance_step("Starting reconnaissance");
        self.queue.update_progress(&task.id, progress.clone());

        let mut result = TaskResult::default();
        let outcome = match self.config.task_timeout {
            Some(timeout) => {
                match tokio::time::timeout(
                    timeout,
                    self.run_phases(&task, &mut progress, &mut result),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ReconError::Timeout(timeout.as_secs())),
                }
            }
            None => self.run_phases(&task, &mut progress, &mut result).await,
        };

        if self.queue.is_cancelled(&task.id) {
            tracing::info!(task_id = %task.id, "Task cancelled during execution");
            self.metrics.record_task_cancelled();
            return;
        }

        match outcome {
            Ok(()) => {
                progress.set_status("Completed");
                self.queue.update_progress(&task.id, progress);
                self.queue.complete(&task.id, result.clone());
                self.cache_final_view(&task.id).await;
                self.metrics.record_task_complete(started.elapsed());
                self.notifier
                    .notify(TaskEvent::Completed {
                        task_id: task.id.clone(),
                        batch_id: task.batch_id.clone(),
                        records: result.records.len(),
                        documents: result.documents.len(),
                    })
                    .await;
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(task_id = %task.id, error = %message, "Task failed");
                self.queue.update_progress(&task.id, progress);
                self.queue.fail(&task.id, &message, Some(result));
                self.cache_final_view(&task.id).await;
                self.metrics.record_task_failed(started.elapsed());
                self.notifier
                    .notify(TaskEvent::Failed {
                        task_id: task.id.clone(),
                        batch_id: task.batch_id.clone(),
                        error: message,
                    })
                    .await;
            }
        }
    }

    /// Copy the terminal projection into the completed-results cache so
    /// status queries keep answering after the queue sweeps the task.
    async fn cache_final_view(&self, task_id: &str) {
        if let Some(view) = self.queue.task_status(task_id) {
            self.result_cache.insert(task_id.to_string(), view).await;
        }
    }

    async fn run_phases(
        &self,
        task: &Task,
        progress: &mut ScrapingProgress,
        result: &mut TaskResult,
    ) -> Result<(), ReconError> {
        if let Some(query) = &task.template.source_query {
            self.scrape_phase(task, query, progress, result).await?;
        }

        if self.queue.is_cancelled(&task.id) {
            return Ok(());
        }

        self.analysis_phase(task, progress, result).await;
        Ok(())
    }

    /// Scraping phase: guarded by the source's rate limiter and circuit
    /// breaker, short-circuited by the scrape cache. Records persisted
    /// before a failure stay in `result`.
    async fn scrape_phase(
        &self,
        task: &Task,
        query: &SourceQuery,
        progress: &mut ScrapingProgress,
        result: &mut TaskResult,
    ) -> Result<(), ReconError> {
        progress.advance_step(format!("Scraping {}", query.source));
        self.queue.update_progress(&task.id, progress.clone());

        let Some(extractor) = self.registry.get(&query.source) else {
            return Err(ReconError::Generic(format!(
                "No extractor registered for source '{}'",
                query.source
            )));
        };
        let controls = self.controls.get(&query.source);

        let cache_key = scrape_cache_key(query);
        let records = if let Some(hit) = self.scrape_cache.get(&cache_key).await {
            self.metrics.record_cache_hit();
            tracing::debug!(task_id = %task.id, source = %query.source, "Scrape cache hit");
            progress.set_status("Using cached scrape results");
            hit
        } else {
            self.metrics.record_cache_miss();
            controls.limiter.wait(1.0).await?;
            let found = controls
                .breaker
                .call(|| extractor.search(&query.query, &query.filters, query.max_results))
                .await?;
            let found = Arc::new(found);
            self.scrape_cache.insert(cache_key, Arc::clone(&found)).await;
            found
        };

        progress.record_found(records.len() as u64);
        for listing in records.iter() {
            if self.queue.is_cancelled(&task.id) {
                return Ok(());
            }

            let record = if query.fetch_details {
                controls.limiter.wait(1.0).await?;
                controls
                    .breaker
                    .call(|| extractor.fetch_detail(&listing.id))
                    .await?
            } else {
                listing.clone()
            };

            match self.store.persist(&record).await {
                Ok(PersistOutcome::Inserted) => {
                    progress.record_saved();
                    self.metrics.record_records_saved(1);
                }
                Ok(PersistOutcome::Duplicate) => progress.record_skipped(),
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "Failed to persist record");
                    progress.record_error(e.to_string());
                }
            }
            result.records.push(record);

            progress.set_status(format!(
                "Processed {}/{} records from {}",
                progress.processed(),
                records.len(),
                query.source
            ));
            self.queue.update_progress(&task.id, progress.clone());
        }

        Ok(())
    }

    /// Analysis phase: one analyzer call per document. A failing
    /// document is recorded in the result and never fails the task.
    async fn analysis_phase(
        &self,
        task: &Task,
        progress: &mut ScrapingProgress,
        result: &mut TaskResult,
    ) {
        for document in &task.template.documents {
            if self.queue.is_cancelled(&task.id) {
                return;
            }

            progress.advance_step(format!("Analyzing document: {}", document.display()));
            self.queue.update_progress(&task.id, progress.clone());

            match self.analyzer.analyze_document(document).await {
                Ok(fields) => {
                    self.metrics.record_document_analyzed();
                    result.documents.push(DocumentOutcome {
                        document: document.clone(),
                        fields: Some(fields),
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %task.id,
                        document = %document.display(),
                        error = %e,
                        "Document analysis failed"
                    );
                    result.documents.push(DocumentOutcome {
                        document: document.clone(),
                        fields: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
    }

    /// Cooperative cancellation: flips the task's status; a running
    /// worker aborts at its next check between phases/documents.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        self.queue.cancel(task_id)
    }

    /// Status projection for one task: the live queue first, then the
    /// completed-results cache (`from_cache` set), else `None`.
    pub async fn task_status(&self, task_id: &str) -> Option<TaskStatusView> {
        if let Some(view) = self.queue.task_status(task_id) {
            return Some(view);
        }
        self.result_cache.get(task_id).await.map(|mut view| {
            view.from_cache = true;
            view
        })
    }

    /// Batch status. Unlike single-task lookup this raises on unknown
    /// ids: batches are an explicit client-visible grouping.
    pub fn batch_status(&self, batch_id: &str) -> Result<BatchStatusView, ReconError> {
        self.queue
            .batch_status(batch_id)
            .ok_or_else(|| ReconError::BatchNotFound(batch_id.to_string()))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }
}
