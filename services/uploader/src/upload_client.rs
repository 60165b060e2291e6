//! HTTP transport for recording uploads.
//!
//! One attempt is one `multipart/form-data` POST carrying the raw file bytes
//! in a single part named `file`. Anything other than a 2xx response is a
//! failed attempt.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Errors from a single upload attempt.
///
/// Every variant is transient from the queue's point of view; the worker
/// retries them all on the same schedule and only the logs tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed to read source file: {0}")]
    ReadSource(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server rejected upload with status {0}")]
    Status(StatusCode),
}

/// A transport able to deliver one local file to a remote endpoint.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Deliver the file at `path` to `url`.
    ///
    /// `Ok(())` means the remote end accepted the file; only then may the
    /// caller delete or rename it.
    async fn upload(&self, path: &Path, url: &str) -> Result<(), UploadError>;
}

/// Production transport posting recordings over HTTP
pub struct HttpUploadClient {
    client: reqwest::Client,
}

impl HttpUploadClient {
    /// Create an upload client bounding each attempt with `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl UploadTransport for HttpUploadClient {
    async fn upload(&self, path: &Path, url: &str) -> Result<(), UploadError> {
        let data = tokio::fs::read(path).await?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording".to_string());

        debug!(
            path = %path.display(),
            url = %url,
            size_bytes = data.len(),
            "Uploading recording"
        );

        let form = Form::new().part("file", Part::bytes(data).file_name(file_name));

        let response = self.client.post(url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status));
        }

        Ok(())
    }
}
