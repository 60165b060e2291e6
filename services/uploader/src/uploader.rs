//! Upload worker and its lifecycle.
//!
//! One background task drains the retry queue: it sleeps until the earliest
//! task is due, runs a single attempt with no queue lock held, then deletes
//! or marks the file on success and reschedules it on failure. Producers
//! only ever touch the queue, so enqueueing never blocks on network I/O.

use crate::config::UploadConfig;
use crate::upload_client::UploadTransport;
use crate::upload_queue::{EnqueueOutcome, PopOutcome, RetryQueue, UploadTask};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters describing the uploader's work so far
#[derive(Debug, Default, Clone)]
pub struct UploaderStats {
    /// Tasks accepted into the queue
    pub tasks_enqueued: u64,
    /// Offers dropped because the path was already queued
    pub duplicates_ignored: u64,
    /// Offers dropped for an empty path or upload URL
    pub tasks_rejected: u64,
    /// Upload attempts started
    pub uploads_attempted: u64,
    /// Attempts the remote end accepted
    pub uploads_succeeded: u64,
    /// Attempts that failed and were rescheduled
    pub uploads_failed: u64,
    /// Failed tasks put back on the queue for another attempt
    pub retries: u64,
    /// Files removed after a successful upload
    pub files_deleted: u64,
    /// Files renamed with the uploaded marker
    pub files_renamed: u64,
    /// Wall-clock time of the last successful upload
    pub last_success_at: Option<DateTime<Utc>>,
}

struct UploaderInner {
    queue: RetryQueue,
    transport: Arc<dyn UploadTransport>,
    stats: RwLock<UploaderStats>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the upload subsystem.
///
/// Cloning is cheap and every clone shares the same queue and worker.
/// Enqueueing is legal as soon as the handle exists; the queue is only
/// drained after `start`.
#[derive(Clone)]
pub struct Uploader {
    inner: Arc<UploaderInner>,
}

impl Uploader {
    /// Create an uploader that delivers files through `transport`.
    pub fn new(transport: Arc<dyn UploadTransport>) -> Self {
        Self {
            inner: Arc::new(UploaderInner {
                queue: RetryQueue::new(),
                transport,
                stats: RwLock::new(UploaderStats::default()),
                shutdown: CancellationToken::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Spawn the background worker. Calling this twice is a no-op.
    pub fn start(&self) {
        let mut worker = self.inner.worker.lock();
        if worker.is_some() {
            warn!("Upload worker already started");
            return;
        }

        let inner = self.inner.clone();
        *worker = Some(tokio::spawn(async move {
            run_worker(inner).await;
        }));

        info!("Upload worker started");
    }

    /// Queue a freshly written recording for upload.
    ///
    /// Fire and forget: failed attempts are retried by the worker and
    /// nothing is reported back to the producer. The returned outcome only
    /// says what happened to the offer itself.
    pub fn enqueue_upload(&self, path: PathBuf, config: &UploadConfig) -> EnqueueOutcome {
        let outcome = self.inner.queue.enqueue(path, config, Instant::now());

        match outcome {
            EnqueueOutcome::Enqueued => {
                self.inner.stats.write().tasks_enqueued += 1;
                metrics::counter!("uploader.tasks.enqueued").increment(1);
            }
            EnqueueOutcome::Duplicate => {
                self.inner.stats.write().duplicates_ignored += 1;
                metrics::counter!("uploader.tasks.duplicate").increment(1);
            }
            EnqueueOutcome::Rejected => {
                self.inner.stats.write().tasks_rejected += 1;
                metrics::counter!("uploader.tasks.rejected").increment(1);
            }
        }

        outcome
    }

    /// Whether a task for this path is queued right now.
    pub fn is_pending(&self, path: &Path) -> bool {
        self.inner.queue.contains(path)
    }

    /// Number of queued tasks.
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.len()
    }

    /// Get current statistics.
    pub fn stats(&self) -> UploaderStats {
        self.inner.stats.read().clone()
    }

    /// Stop the worker and wait for it to finish.
    ///
    /// A waiting worker exits promptly; an attempt already in flight runs to
    /// completion first. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let worker = self.inner.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                error!(error = %e, "Upload worker task failed");
            }
            info!("Upload worker stopped");
        }
    }
}

/// Worker loop: pop due tasks, attempt them, reschedule failures.
async fn run_worker(inner: Arc<UploaderInner>) {
    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }

        match inner.queue.pop_due(Instant::now()) {
            PopOutcome::Ready(task) => {
                // No queue lock is held during the attempt, so producers
                // keep enqueueing freely while the upload runs
                attempt_upload(&inner, task).await;
            }
            PopOutcome::NotDue(wait) => {
                // Head not due yet: sleep it out, unless a new task arrives
                // in the meantime and might be due earlier
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = inner.queue.wait_for_task() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            PopOutcome::Empty => {
                // Idle until some producer enqueues
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = inner.queue.wait_for_task() => {}
                }
            }
        }
    }

    debug!("Upload worker loop exited");
}

/// Run one upload attempt and handle its outcome.
async fn attempt_upload(inner: &Arc<UploaderInner>, task: UploadTask) {
    inner.stats.write().uploads_attempted += 1;

    let started = Instant::now();
    let result = inner
        .transport
        .upload(&task.path, &task.config.upload_url)
        .await;
    let elapsed = started.elapsed();

    metrics::histogram!("uploader.upload.duration_seconds").record(elapsed.as_secs_f64());

    match result {
        Ok(()) => {
            info!(
                path = %task.path.display(),
                url = %task.config.upload_url,
                duration_ms = elapsed.as_millis() as u64,
                "Recording uploaded"
            );
            metrics::counter!("uploader.uploads.succeeded").increment(1);

            {
                let mut stats = inner.stats.write();
                stats.uploads_succeeded += 1;
                stats.last_success_at = Some(Utc::now());
            }

            finalize_uploaded_file(inner, &task).await;
        }
        Err(e) => {
            error!(
                path = %task.path.display(),
                url = %task.config.upload_url,
                error = %e,
                retry_in_secs = task.config.upload_retry_interval,
                "Upload failed, will retry"
            );
            metrics::counter!("uploader.uploads.failed").increment(1);

            {
                let mut stats = inner.stats.write();
                stats.uploads_failed += 1;
                stats.retries += 1;
            }

            // The retry goes back through the normal enqueue path, so
            // duplicate suppression covers it like any other offer
            let next_attempt = Instant::now() + task.config.retry_interval();
            inner.queue.enqueue(task.path, &task.config, next_attempt);
        }
    }
}

/// Delete or mark the source file after the remote end accepted it.
///
/// A failed delete or rename is logged and not retried; the upload itself
/// already succeeded.
async fn finalize_uploaded_file(inner: &Arc<UploaderInner>, task: &UploadTask) {
    if task.config.delete_after_upload {
        match tokio::fs::remove_file(&task.path).await {
            Ok(()) => {
                inner.stats.write().files_deleted += 1;
                metrics::counter!("uploader.files.deleted").increment(1);
                debug!(path = %task.path.display(), "Uploaded recording deleted");
            }
            Err(e) => {
                warn!(
                    path = %task.path.display(),
                    error = %e,
                    "Failed to delete uploaded recording"
                );
            }
        }
        return;
    }

    let marked = uploaded_marker_path(&task.path);
    match tokio::fs::rename(&task.path, &marked).await {
        Ok(()) => {
            inner.stats.write().files_renamed += 1;
            metrics::counter!("uploader.files.renamed").increment(1);
            debug!(
                path = %task.path.display(),
                renamed = %marked.display(),
                "Uploaded recording marked"
            );
        }
        Err(e) => {
            warn!(
                path = %task.path.display(),
                error = %e,
                "Failed to mark uploaded recording"
            );
        }
    }
}

/// Path a file is renamed to once uploaded: `_uploaded` goes in front of the
/// last extension of the file name, or at its end when there is none.
fn uploaded_marker_path(path: &Path) -> PathBuf {
    let mut marked = match path.file_stem() {
        Some(stem) => stem.to_os_string(),
        None => return path.to_path_buf(),
    };

    marked.push("_uploaded");
    if let Some(ext) = path.extension() {
        marked.push(".");
        marked.push(ext);
    }

    path.with_file_name(marked)
}
