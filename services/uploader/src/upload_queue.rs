//! Retry queue for pending uploads.
//!
//! Producers (the recorder and the startup scanner) push paths in; the
//! single upload worker pops the earliest-due task out. A side set of queued
//! paths suppresses duplicates, so a file is never represented by more than
//! one task no matter how often it is offered.

use crate::config::UploadConfig;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// A single queued upload
#[derive(Debug, Clone)]
pub struct UploadTask {
    /// Absolute path of the recording on disk
    pub path: PathBuf,
    /// Upload settings snapshot taken at enqueue time
    pub config: UploadConfig,
    /// Earliest time the next attempt may run
    pub next_attempt: Instant,
}

/// Heap entry wrapper ordering tasks earliest-due-first
#[derive(Debug)]
struct QueuedTask(UploadTask);

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.0.next_attempt == other.0.next_attempt
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reversed comparison puts the earliest
        // due time at the top
        other.0.next_attempt.cmp(&self.0.next_attempt)
    }
}

/// Result of offering a task to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Task accepted and queued
    Enqueued,
    /// Path is already queued; the offer was dropped
    Duplicate,
    /// Empty path or empty upload URL; the offer was dropped
    Rejected,
}

/// Result of polling the queue for due work
#[derive(Debug)]
pub enum PopOutcome {
    /// The earliest task was due and has been removed
    Ready(UploadTask),
    /// The earliest task is not due yet; it becomes due after this long
    NotDue(Duration),
    /// No tasks queued
    Empty,
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<QueuedTask>,
    pending: HashSet<PathBuf>,
}

/// Priority queue of pending uploads with duplicate suppression.
///
/// A path is in `pending` iff exactly one task for it sits in the heap. Both
/// structures mutate under one lock so the invariant holds at every point a
/// caller can observe.
#[derive(Debug, Default)]
pub struct RetryQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a file for upload.
    ///
    /// Rejects tasks with an empty path or upload URL, drops duplicates of
    /// already-queued paths, and wakes the worker when a task is accepted.
    pub fn enqueue(
        &self,
        path: PathBuf,
        config: &UploadConfig,
        next_attempt: Instant,
    ) -> EnqueueOutcome {
        if path.as_os_str().is_empty() || config.upload_url.is_empty() {
            debug!(path = %path.display(), "Dropping upload with empty path or URL");
            return EnqueueOutcome::Rejected;
        }

        {
            let mut inner = self.inner.lock();

            if !inner.pending.insert(path.clone()) {
                debug!(path = %path.display(), "Upload already queued");
                return EnqueueOutcome::Duplicate;
            }

            debug!(
                path = %path.display(),
                queue_depth = inner.pending.len(),
                "Upload queued"
            );

            inner.heap.push(QueuedTask(UploadTask {
                path,
                config: config.clone(),
                next_attempt,
            }));
        }

        self.notify.notify_one();
        EnqueueOutcome::Enqueued
    }

    /// Remove and return the earliest task if it is due at `now`.
    ///
    /// The caller supplies `now` so scheduling stays testable with synthetic
    /// instants.
    pub fn pop_due(&self, now: Instant) -> PopOutcome {
        let mut inner = self.inner.lock();

        let next_attempt = match inner.heap.peek() {
            Some(queued) => queued.0.next_attempt,
            None => return PopOutcome::Empty,
        };

        if next_attempt > now {
            return PopOutcome::NotDue(next_attempt - now);
        }

        match inner.heap.pop() {
            Some(queued) => {
                inner.pending.remove(&queued.0.path);
                PopOutcome::Ready(queued.0)
            }
            // peek() succeeded under the same lock, so the heap is not empty
            None => PopOutcome::Empty,
        }
    }

    /// Wait until some producer queues a task.
    ///
    /// A notification sent while nobody is waiting is held as a permit and
    /// observed by the next call, so enqueues are never missed.
    pub async fn wait_for_task(&self) {
        self.notify.notified().await;
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Whether the queue holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    /// Whether a task for this path is currently queued.
    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().pending.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_upload_config() -> UploadConfig {
        UploadConfig {
            upload_url: "https://archive.example.net/upload".to_string(),
            delete_after_upload: false,
            upload_retry_interval: 5,
            suffix: String::new(),
            dated_subdirectories: false,
            upload_pending_on_start: false,
            basedir: PathBuf::from("/var/airlog/recordings"),
        }
    }

    fn pop_ready(queue: &RetryQueue, now: Instant) -> UploadTask {
        match queue.pop_due(now) {
            PopOutcome::Ready(task) => task,
            other => panic!("expected a due task, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_enqueue_and_pop_when_due() {
        let queue = RetryQueue::new();
        let config = create_test_upload_config();
        let now = Instant::now();

        let outcome = queue.enqueue(PathBuf::from("/tmp/a.flac"), &config, now);
        assert_eq!(outcome, EnqueueOutcome::Enqueued);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(Path::new("/tmp/a.flac")));

        let task = pop_ready(&queue, now);
        assert_eq!(task.path, PathBuf::from("/tmp/a.flac"));

        // Popping removes the task from the pending set as well
        assert!(queue.is_empty());
        assert!(!queue.contains(Path::new("/tmp/a.flac")));
    }

    #[tokio::test]
    async fn test_rejects_empty_path() {
        let queue = RetryQueue::new();
        let config = create_test_upload_config();

        let outcome = queue.enqueue(PathBuf::new(), &config, Instant::now());
        assert_eq!(outcome, EnqueueOutcome::Rejected);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_empty_upload_url() {
        let queue = RetryQueue::new();
        let mut config = create_test_upload_config();
        config.upload_url = String::new();

        let outcome = queue.enqueue(PathBuf::from("/tmp/a.flac"), &config, Instant::now());
        assert_eq!(outcome, EnqueueOutcome::Rejected);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_path_is_dropped() {
        let queue = RetryQueue::new();
        let config = create_test_upload_config();
        let now = Instant::now();

        assert_eq!(
            queue.enqueue(PathBuf::from("/tmp/a.flac"), &config, now),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            queue.enqueue(PathBuf::from("/tmp/a.flac"), &config, now),
            EnqueueOutcome::Duplicate
        );
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_pop_in_due_order() {
        let queue = RetryQueue::new();
        let config = create_test_upload_config();
        let base = Instant::now();

        queue.enqueue(
            PathBuf::from("/tmp/third.flac"),
            &config,
            base + Duration::from_secs(30),
        );
        queue.enqueue(
            PathBuf::from("/tmp/first.flac"),
            &config,
            base + Duration::from_secs(10),
        );
        queue.enqueue(
            PathBuf::from("/tmp/second.flac"),
            &config,
            base + Duration::from_secs(20),
        );

        let all_due = base + Duration::from_secs(60);
        assert_eq!(pop_ready(&queue, all_due).path, PathBuf::from("/tmp/first.flac"));
        assert_eq!(pop_ready(&queue, all_due).path, PathBuf::from("/tmp/second.flac"));
        assert_eq!(pop_ready(&queue, all_due).path, PathBuf::from("/tmp/third.flac"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_not_due_reports_remaining_wait() {
        let queue = RetryQueue::new();
        let config = create_test_upload_config();
        let now = Instant::now();

        queue.enqueue(
            PathBuf::from("/tmp/a.flac"),
            &config,
            now + Duration::from_secs(10),
        );

        match queue.pop_due(now) {
            PopOutcome::NotDue(wait) => assert_eq!(wait, Duration::from_secs(10)),
            other => panic!("expected NotDue, got {:?}", other),
        }

        // A not-due task stays queued
        assert!(queue.contains(Path::new("/tmp/a.flac")));
    }

    #[tokio::test]
    async fn test_pop_on_empty_queue() {
        let queue = RetryQueue::new();
        assert!(matches!(queue.pop_due(Instant::now()), PopOutcome::Empty));
    }

    #[tokio::test]
    async fn test_requeue_after_pop_is_not_a_duplicate() {
        let queue = RetryQueue::new();
        let config = create_test_upload_config();
        let now = Instant::now();

        queue.enqueue(PathBuf::from("/tmp/a.flac"), &config, now);
        let task = pop_ready(&queue, now);

        // The retry path re-offers the same file after a failed attempt
        let outcome = queue.enqueue(task.path, &config, now + Duration::from_secs(5));
        assert_eq!(outcome, EnqueueOutcome::Enqueued);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_task_sees_earlier_enqueue() {
        let queue = RetryQueue::new();
        let config = create_test_upload_config();

        // Enqueue before anyone waits; the stored permit must satisfy the
        // next wait instead of being lost
        queue.enqueue(PathBuf::from("/tmp/a.flac"), &config, Instant::now());

        tokio::time::timeout(Duration::from_secs(1), queue.wait_for_task())
            .await
            .expect("wait_for_task should complete after an enqueue");
    }
}
