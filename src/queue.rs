//! Priority task queue with bounded dispatch and batch grouping.
//!
//! Pending tasks dequeue strictly by priority, oldest-first within one
//! priority band. Dispatch is capped at `max_concurrent_tasks`: the
//! queue refuses to hand out work beyond the cap, so callers poll or
//! await [`TaskQueue::next_task`], which wakes on enqueue and on slot
//! release instead of sleeping on an interval.
//!
//! Terminal tasks stay in a completed map so status queries keep
//! answering; [`TaskQueue::sweep_expired`] evicts them after a
//! configurable retention age.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use crate::progress::ScrapingProgress;
use crate::task::{
    BatchStatusView, ReconTemplate, Task, TaskBatch, TaskPriority, TaskResult, TaskStatus,
    TaskStatusView,
};

/// Heap entry: priority first, then submission order within a band.
/// Task bodies live in the pending map; entries whose task is gone
/// (cancelled while pending) are discarded lazily on pop.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingEntry {
    priority: TaskPriority,
    seq: u64,
    task_id: String,
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then the lower sequence
        // number (earlier submission).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<PendingEntry>,
    pending: HashMap<String, Task>,
    running: HashMap<String, Task>,
    completed: HashMap<String, Task>,
    batches: HashMap<String, TaskBatch>,
    current_batch: Option<String>,
    next_seq: u64,
}

impl QueueInner {
    /// Count one member of `batch_id` reaching a terminal state.
    fn record_batch_terminal(&mut self, batch_id: Option<&str>) {
        if let Some(id) = batch_id
            && let Some(batch) = self.batches.get_mut(id)
        {
            batch.record_terminal();
            if batch.status == TaskStatus::Completed {
                tracing::debug!(batch_id = %id, "Batch completed");
            }
        }
    }
}

/// Priority queue of tasks with lifecycle bookkeeping.
pub struct TaskQueue {
    max_concurrent_tasks: usize,
    batch_size: usize,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new(max_concurrent_tasks: usize, batch_size: usize) -> Self {
        Self {
            max_concurrent_tasks,
            batch_size,
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned queue mutex");
            poisoned.into_inner()
        })
    }

    /// Admit a new task, assigning it to the current open batch
    /// (creating one when absent or full). Returns the task id.
    ///
    /// Admission is unbounded: a producer faster than the workers can
    /// drain will grow the pending heap without limit.
    pub fn enqueue(&self, template: ReconTemplate, priority: TaskPriority) -> String {
        let mut task = Task::new(template, priority);
        let task_id = task.id.clone();

        let mut inner = self.lock_inner();

        let open_batch = inner
            .current_batch
            .as_deref()
            .filter(|id| inner.batches.get(*id).is_some_and(|b| !b.is_full()))
            .map(str::to_string);
        let batch_id = match open_batch {
            Some(id) => id,
            None => {
                let batch = TaskBatch::new(self.batch_size);
                let id = batch.id.clone();
                inner.batches.insert(id.clone(), batch);
                inner.current_batch = Some(id.clone());
                id
            }
        };
        if let Some(batch) = inner.batches.get_mut(&batch_id) {
            batch.add_task(&task_id);
        }
        task.batch_id = Some(batch_id);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(PendingEntry {
            priority,
            seq,
            task_id: task_id.clone(),
        });
        tracing::debug!(task_id = %task_id, %priority, "Task enqueued");
        inner.pending.insert(task_id.clone(), task);
        drop(inner);

        self.notify.notify_waiters();
        task_id
    }

    /// Claim the highest-priority pending task if a worker slot is
    /// free. Returns `None` on an empty queue or at capacity — an
    /// expected wait condition, not a failure.
    pub fn try_dequeue(&self) -> Option<Task> {
        let mut inner = self.lock_inner();

        if inner.running.len() >= self.max_concurrent_tasks {
            return None;
        }

        while let Some(entry) = inner.heap.pop() {
            // Stale entries point at tasks cancelled while pending.
            let Some(mut task) = inner.pending.remove(&entry.task_id) else {
                continue;
            };
            task.status = TaskStatus::Running;
            inner.running.insert(task.id.clone(), task.clone());
            tracing::debug!(task_id = %task.id, "Task claimed");
            return Some(task);
        }

        None
    }

    /// Await the next claimable task. Wakes on enqueue and on slot
    /// release rather than polling.
    pub async fn next_task(&self) -> Task {
        loop {
            let notified = self.notify.notified();
            if let Some(task) = self.try_dequeue() {
                return task;
            }
            notified.await;
        }
    }

    /// Move a running task to the completed map as COMPLETED.
    ///
    /// A no-op when the task is no longer running (e.g. it was
    /// cancelled while the worker held it).
    pub fn complete(&self, task_id: &str, result: TaskResult) {
        let mut inner = self.lock_inner();
        let Some(mut task) = inner.running.remove(task_id) else {
            return;
        };
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.completed_at = Some(chrono::Utc::now());
        let batch_id = task.batch_id.clone();
        inner.completed.insert(task.id.clone(), task);
        inner.record_batch_terminal(batch_id.as_deref());
        drop(inner);

        self.notify.notify_waiters();
    }

    /// Move a running task to the completed map as FAILED. Any partial
    /// result accumulated before the failure is preserved.
    pub fn fail(&self, task_id: &str, error: impl Into<String>, partial: Option<TaskResult>) {
        let mut inner = self.lock_inner();
        let Some(mut task) = inner.running.remove(task_id) else {
            return;
        };
        task.status = TaskStatus::Failed;
        task.error = Some(error.into());
        task.result = partial.filter(|r| !r.is_empty());
        task.completed_at = Some(chrono::Utc::now());
        let batch_id = task.batch_id.clone();
        inner.completed.insert(task.id.clone(), task);
        inner.record_batch_terminal(batch_id.as_deref());
        drop(inner);

        self.notify.notify_waiters();
    }

    /// Cancel a pending or running task. Returns false when the task is
    /// unknown or already terminal, so a second cancel never succeeds.
    ///
    /// Cancellation is cooperative: a running task's in-flight phase is
    /// not interrupted; the worker observes the flip between phases.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut inner = self.lock_inner();

        let mut task = if let Some(task) = inner.pending.remove(task_id) {
            task
        } else if let Some(task) = inner.running.remove(task_id) {
            task
        } else {
            return false;
        };

        tracing::info!(%task_id, "Task cancelled");
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(chrono::Utc::now());
        let batch_id = task.batch_id.clone();
        inner.completed.insert(task.id.clone(), task);
        inner.record_batch_terminal(batch_id.as_deref());
        drop(inner);

        self.notify.notify_waiters();
        true
    }

    /// Whether the task was cancelled. Checked by workers between
    /// phases and between documents.
    pub fn is_cancelled(&self, task_id: &str) -> bool {
        let inner = self.lock_inner();
        inner
            .completed
            .get(task_id)
            .is_some_and(|t| t.status == TaskStatus::Cancelled)
    }

    /// Attach/replace the progress snapshot on a running (or,
    /// idempotently, completed) task.
    pub fn update_progress(&self, task_id: &str, progress: ScrapingProgress) {
        let mut inner = self.lock_inner();
        if let Some(task) = inner.running.get_mut(task_id) {
            task.progress = Some(progress);
        } else if let Some(task) = inner.completed.get_mut(task_id) {
            task.progress = Some(progress);
        }
    }

    /// Read-only projection of a task, searching running, completed,
    /// then pending. `None` for unknown ids.
    pub fn task_status(&self, task_id: &str) -> Option<TaskStatusView> {
        let inner = self.lock_inner();
        inner
            .running
            .get(task_id)
            .or_else(|| inner.completed.get(task_id))
            .or_else(|| inner.pending.get(task_id))
            .map(TaskStatusView::from_task)
    }

    /// Read-only projection of a batch. `None` for unknown ids.
    pub fn batch_status(&self, batch_id: &str) -> Option<BatchStatusView> {
        let inner = self.lock_inner();
        inner.batches.get(batch_id).map(BatchStatusView::from_batch)
    }

    /// Evict terminal tasks older than `max_age`, and completed batches
    /// whose tasks have all been evicted. Returns how many tasks were
    /// removed.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| chrono::Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return 0;
        };
        let mut inner = self.lock_inner();

        let expired: Vec<String> = inner
            .completed
            .iter()
            .filter(|(_, t)| t.completed_at.is_some_and(|at| at < cutoff))
            .map(|(id, _)| id.clone())
            .collect();
        let removed = expired.len();
        for id in &expired {
            inner.completed.remove(id);
        }

        let current = inner.current_batch.clone();
        let completed_map = std::mem::take(&mut inner.completed);
        inner.batches.retain(|id, batch| {
            if Some(id.as_str()) == current.as_deref() || batch.status != TaskStatus::Completed {
                return true;
            }
            // Keep the batch while any member task is still queryable.
            batch
                .task_ids
                .iter()
                .any(|tid| completed_map.contains_key(tid))
        });
        inner.completed = completed_map;

        if removed > 0 {
            tracing::debug!(%removed, "Swept expired tasks");
        }
        removed
    }

    pub fn pending_len(&self) -> usize {
        self.lock_inner().pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.lock_inner().running.len()
    }

    pub fn completed_len(&self) -> usize {
        self.lock_inner().completed.len()
    }
}
