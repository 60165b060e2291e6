//! Airlog Recording Uploader
//!
//! Upload subsystem for the Airlog air-band capture platform. Recordings
//! written by the capture pipeline are queued here and delivered to a remote
//! archive over HTTP multipart POST, with retry on failure and crash
//! recovery on startup.
//!
//! ## Architecture
//!
//! ```text
//! Recorder ──enqueue──▶ ┌─────────────┐            ┌───────────────┐
//!                       │ Retry Queue │──pop due──▶│ Upload Worker │──POST──▶ Archive
//! Scanner ──enqueue──▶  └─────────────┘            └───────┬───────┘
//!   (startup)                  ▲                           │
//!                              └────── retry on failure ───┤
//!                                                          ▼
//!                                           delete / rename *_uploaded
//! ```
//!
//! One background worker drains the queue earliest-due-first, sleeping until
//! the head task is due and waking on every enqueue. A successful upload
//! deletes the recording or renames it with an `_uploaded` marker so the
//! startup scan never offers it again; a failed upload is rescheduled after
//! the output's retry interval, indefinitely.

pub mod config;
pub mod scanner;
pub mod upload_client;
pub mod upload_queue;
pub mod uploader;

pub use config::{Channel, Config, Device, HasFileOutput, Mixer, Output, UploadConfig};
pub use scanner::{scan_directory, scan_pending_uploads};
pub use upload_client::{HttpUploadClient, UploadError, UploadTransport};
pub use upload_queue::{EnqueueOutcome, PopOutcome, RetryQueue, UploadTask};
pub use uploader::{Uploader, UploaderStats};
