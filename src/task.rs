use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::progress::ProgressSnapshot;

/// Scheduling priority of a task. Higher priorities dequeue first;
/// within one priority band, tasks dequeue in submission order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a task in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// The scraping half of a template: which portal to query and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceQuery {
    /// Source (portal) name, resolved against the extractor registry.
    pub source: String,
    pub query: String,
    /// Opaque filter set (dates, categories, …). Hashed into the
    /// scrape-cache key.
    #[serde(default)]
    pub filters: serde_json::Value,
    pub max_results: usize,
    /// Fetch the full detail record for every search hit.
    #[serde(default)]
    pub fetch_details: bool,
}

impl SourceQuery {
    pub fn new(source: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            query: query.into(),
            filters: serde_json::Value::Null,
            max_results: 100,
            fetch_details: false,
        }
    }

    pub fn with_filters(mut self, filters: serde_json::Value) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    pub fn with_fetch_details(mut self, fetch: bool) -> Self {
        self.fetch_details = fetch;
        self
    }
}

/// A template describes one unit of reconnaissance work: an optional
/// scraping phase against one source, plus zero or more documents to
/// analyze.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub source_query: Option<SourceQuery>,
    #[serde(default)]
    pub documents: Vec<PathBuf>,
}

impl ReconTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_query: None,
            documents: Vec::new(),
        }
    }

    pub fn with_source_query(mut self, query: SourceQuery) -> Self {
        self.source_query = Some(query);
        self
    }

    pub fn with_documents(mut self, docs: Vec<PathBuf>) -> Self {
        self.documents = docs;
        self
    }

    /// Total discrete steps this template will take: one base step,
    /// one for the scraping phase if present, one per document.
    pub fn total_steps(&self) -> u32 {
        let mut steps = 1;
        if self.source_query.is_some() {
            steps += 1;
        }
        steps + self.documents.len() as u32
    }
}

/// A normalized tender listing produced by an extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenderRecord {
    pub id: String,
    pub title: String,
    pub organization: String,
    pub source: String,
    pub url: String,
    pub deadline: Option<DateTime<Utc>>,
    /// Raw portal-specific fields, preserved verbatim.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Outcome of analyzing one document: extracted fields or a
/// per-document error, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub document: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Accumulated result of one task. May be partially populated when the
/// task failed after completing some steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub records: Vec<TenderRecord>,
    pub documents: Vec<DocumentOutcome>,
}

impl TaskResult {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.documents.is_empty()
    }
}

/// One unit of scheduled work: a template run to completion.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub template: ReconTemplate,
    pub total_steps: u32,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
    pub progress: Option<crate::progress::ScrapingProgress>,
    pub batch_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(template: ReconTemplate, priority: TaskPriority) -> Self {
        let total_steps = template.total_steps();
        Self {
            id: Uuid::new_v4().to_string(),
            priority,
            created_at: Utc::now(),
            template,
            total_steps,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            progress: None,
            batch_id: None,
            completed_at: None,
        }
    }
}

/// A client-visible grouping of tasks, capped at `max_size`.
#[derive(Debug, Clone)]
pub struct TaskBatch {
    pub id: String,
    pub max_size: usize,
    pub task_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub completed_count: usize,
}

impl TaskBatch {
    pub fn new(max_size: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            max_size,
            task_ids: Vec::new(),
            created_at: Utc::now(),
            status: TaskStatus::Pending,
            completed_count: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.task_ids.len() >= self.max_size
    }

    /// Append a task id. Returns false when the batch is already full.
    pub fn add_task(&mut self, task_id: &str) -> bool {
        if self.is_full() {
            return false;
        }
        self.task_ids.push(task_id.to_string());
        // Appending reopens a batch that had drained to completion.
        self.status = TaskStatus::Pending;
        true
    }

    /// Record one member reaching a terminal state; flips the batch to
    /// completed when every member is terminal.
    pub fn record_terminal(&mut self) {
        self.completed_count += 1;
        if self.completed_count == self.task_ids.len() {
            self.status = TaskStatus::Completed;
        }
    }
}

/// Read-only projection of a task, returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusView {
    pub task_id: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub progress: Option<ProgressSnapshot>,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
    pub batch_id: Option<String>,
    /// True when the live queue no longer holds the task and the view
    /// was reconstructed from the completed-results cache.
    pub from_cache: bool,
}

impl TaskStatusView {
    pub(crate) fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            priority: task.priority,
            progress: task.progress.as_ref().map(|p| p.snapshot()),
            result: task.result.clone(),
            error: task.error.clone(),
            batch_id: task.batch_id.clone(),
            from_cache: false,
        }
    }
}

/// Read-only projection of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatusView {
    pub batch_id: String,
    pub status: TaskStatus,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub created_at: DateTime<Utc>,
}

impl BatchStatusView {
    pub(crate) fn from_batch(batch: &TaskBatch) -> Self {
        Self {
            batch_id: batch.id.clone(),
            status: batch.status,
            total_tasks: batch.task_ids.len(),
            completed_tasks: batch.completed_count,
            created_at: batch.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let parsed: TaskStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_priority_total_order() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Medium);
        assert!(TaskPriority::Medium > TaskPriority::Low);
    }

    #[test]
    fn test_total_steps() {
        let bare = ReconTemplate::new("t1", "bare");
        assert_eq!(bare.total_steps(), 1);

        let scraping = ReconTemplate::new("t2", "scraping")
            .with_source_query(SourceQuery::new("comprar", "obras"));
        assert_eq!(scraping.total_steps(), 2);

        let full = ReconTemplate::new("t3", "full")
            .with_source_query(SourceQuery::new("comprar", "obras"))
            .with_documents(vec![PathBuf::from("a.pdf"), PathBuf::from("b.pdf")]);
        assert_eq!(full.total_steps(), 4);

        let docs_only =
            ReconTemplate::new("t4", "docs").with_documents(vec![PathBuf::from("a.pdf")]);
        assert_eq!(docs_only.total_steps(), 2);
    }

    #[test]
    fn test_batch_capacity() {
        let mut batch = TaskBatch::new(2);
        assert!(batch.add_task("a"));
        assert!(!batch.is_full());
        assert!(batch.add_task("b"));
        assert!(batch.is_full());
        assert!(!batch.add_task("c"));
        assert_eq!(batch.task_ids.len(), 2);
    }

    #[test]
    fn test_batch_completes_when_all_terminal() {
        let mut batch = TaskBatch::new(3);
        batch.add_task("a");
        batch.add_task("b");

        batch.record_terminal();
        assert_eq!(batch.status, TaskStatus::Pending);
        batch.record_terminal();
        assert_eq!(batch.status, TaskStatus::Completed);
        assert_eq!(batch.completed_count, 2);
    }

    #[test]
    fn test_batch_reopens_on_append() {
        let mut batch = TaskBatch::new(3);
        batch.add_task("a");
        batch.record_terminal();
        assert_eq!(batch.status, TaskStatus::Completed);

        batch.add_task("b");
        assert_eq!(batch.status, TaskStatus::Pending);
    }

    #[test]
    fn test_new_task_shape() {
        let template = ReconTemplate::new("t1", "obras")
            .with_source_query(SourceQuery::new("bac", "salud"));
        let task = Task::new(template, TaskPriority::High);

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.total_steps, 2);
        assert!(task.result.is_none());
        assert!(task.error.is_none());
        assert!(task.batch_id.is_none());
    }
}
