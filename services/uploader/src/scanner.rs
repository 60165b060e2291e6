//! Crash-recovery scanning of recording directories.
//!
//! Recordings left behind by a previous run have no queue entry, so on
//! startup every file output that opted in gets its base directory walked
//! and any recording without the uploaded marker is offered to the queue.
//! Scanning is pure discovery: it never touches the network and never
//! renames or deletes anything.

use crate::config::{Channel, Device, HasFileOutput, Mixer, UploadConfig};
use crate::upload_queue::EnqueueOutcome;
use crate::uploader::Uploader;
use std::path::Path;
use tracing::{debug, info, warn};

/// Walk `dir` and queue every recording that still needs uploading.
///
/// Entries whose names start with a dot are ignored, as are files already
/// carrying the `_uploaded` marker and files not ending in the configured
/// suffix. Subdirectories are only entered when the output writes dated
/// subdirectories. Returns the number of files queued.
pub async fn scan_directory(uploader: &Uploader, config: &UploadConfig, dir: &Path) -> usize {
    let mut enqueued = 0;
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    dir = %current.display(),
                    error = %e,
                    "Cannot read recording directory"
                );
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        dir = %current.display(),
                        error = %e,
                        "Error while listing recording directory"
                    );
                    break;
                }
            };

            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }

            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot stat directory entry");
                    continue;
                }
            };

            if file_type.is_dir() {
                // Only dated outputs nest recordings in subdirectories
                if config.dated_subdirectories {
                    stack.push(path);
                }
                continue;
            }

            // Symlinks and other special entries are not recordings
            if !file_type.is_file() {
                continue;
            }

            if has_uploaded_marker(&path) {
                continue;
            }

            if !config.suffix.is_empty() && !path.to_string_lossy().ends_with(&config.suffix) {
                continue;
            }

            if uploader.enqueue_upload(path, config) == EnqueueOutcome::Enqueued {
                enqueued += 1;
            }
        }
    }

    enqueued
}

/// Queue leftover recordings for every output that opted into startup
/// recovery.
///
/// Covers the outputs of every device channel and of every enabled mixer.
/// Returns the total number of files queued.
pub async fn scan_pending_uploads(
    uploader: &Uploader,
    devices: &[Device],
    mixers: &[Mixer],
) -> usize {
    let mut total = 0;

    for device in devices {
        for channel in &device.channels {
            total += scan_channel_outputs(uploader, &device.name, channel).await;
        }
    }

    for mixer in mixers {
        if !mixer.enabled {
            debug!(mixer = %mixer.name, "Skipping disabled mixer");
            continue;
        }
        total += scan_channel_outputs(uploader, &mixer.name, &mixer.channel).await;
    }

    if total > 0 {
        info!(files = total, "Queued leftover recordings for upload");
    }

    total
}

/// Scan the file outputs of one channel.
async fn scan_channel_outputs(uploader: &Uploader, owner: &str, channel: &Channel) -> usize {
    let mut enqueued = 0;

    for output in &channel.outputs {
        let upload = match output.upload_config() {
            Some(upload) => upload,
            None => continue,
        };

        if !upload.upload_enabled() || !upload.upload_pending_on_start {
            continue;
        }

        debug!(
            owner = %owner,
            channel = %channel.label,
            dir = %upload.basedir.display(),
            "Scanning for leftover recordings"
        );

        enqueued += scan_directory(uploader, upload, &upload.basedir).await;
    }

    enqueued
}

/// Whether the file name carries the `_uploaded` marker before its extension.
fn has_uploaded_marker(path: &Path) -> bool {
    match path.file_stem() {
        Some(stem) => stem.to_string_lossy().ends_with("_uploaded"),
        None => false,
    }
}
