//! Configuration management for the upload service.
//!
//! The service shares its configuration file with the capture process: the
//! same `devices`/`mixers` tables that drive recording also carry the upload
//! settings of each file output, so discovery walks the exact topology the
//! recorder writes files for.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the upload service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Capture devices whose channel outputs may produce recordings
    #[serde(default)]
    pub devices: Vec<Device>,
    /// Mixers combining several channels into one output stream
    #[serde(default)]
    pub mixers: Vec<Mixer>,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// HTTP request timeout for a single upload attempt in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Interval between periodic stats log lines in seconds
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

/// Upload settings of one file output.
///
/// Every queued task carries its own clone, so edits to the live
/// configuration never affect work already queued.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Endpoint receiving the multipart POST; empty disables uploading
    #[serde(default)]
    pub upload_url: String,
    /// Remove the file after a successful upload instead of renaming it
    #[serde(default)]
    pub delete_after_upload: bool,
    /// Delay before retrying a failed upload, in seconds
    #[serde(default = "default_retry_interval")]
    pub upload_retry_interval: u64,
    /// Only files whose path ends with this suffix are scanned (empty = all)
    #[serde(default)]
    pub suffix: String,
    /// Recordings are written into per-date subdirectories below basedir
    #[serde(default)]
    pub dated_subdirectories: bool,
    /// Scan basedir for leftover recordings on startup
    #[serde(default)]
    pub upload_pending_on_start: bool,
    /// Directory this output writes recordings into
    pub basedir: PathBuf,
}

/// A capture device and the channels tuned on it
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    /// Device label used in logs
    #[serde(default)]
    pub name: String,
    /// Channels demodulated from this device
    #[serde(default)]
    pub channels: Vec<Channel>,
}

/// A mixer feeding one combined channel
#[derive(Debug, Clone, Deserialize)]
pub struct Mixer {
    /// Mixer label used in logs
    #[serde(default)]
    pub name: String,
    /// Disabled mixers produce no recordings and are skipped by discovery
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// The mixed output channel
    pub channel: Channel,
}

/// A single audio channel and the outputs it feeds
#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    /// Channel label (frequency or call sign)
    #[serde(default)]
    pub label: String,
    /// Outputs fed from this channel
    #[serde(default)]
    pub outputs: Vec<Output>,
}

/// One output sink of a channel
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    /// Recordings written to disk, optionally uploaded afterwards
    File(UploadConfig),
    /// Live stream to an Icecast mount; never produces files
    Icecast(IcecastOutput),
}

/// Icecast streaming output settings
#[derive(Debug, Clone, Deserialize)]
pub struct IcecastOutput {
    /// Icecast server hostname
    pub server: String,
    /// Icecast server port
    #[serde(default = "default_icecast_port")]
    pub port: u16,
    /// Mount point on the server
    pub mountpoint: String,
}

/// Access to the upload settings of file-producing outputs.
///
/// Only file outputs carry upload settings; streaming outputs return `None`,
/// so discovery can walk heterogeneous output lists without matching on
/// every variant.
pub trait HasFileOutput {
    fn upload_config(&self) -> Option<&UploadConfig>;
}

impl HasFileOutput for Output {
    fn upload_config(&self) -> Option<&UploadConfig> {
        match self {
            Output::File(config) => Some(config),
            Output::Icecast(_) => None,
        }
    }
}

// Default value functions
fn default_service_name() -> String {
    "airlog-uploader".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_request_timeout() -> u64 {
    60
}

fn default_stats_interval() -> u64 {
    60
}

fn default_retry_interval() -> u64 {
    30
}

fn default_icecast_port() -> u16 {
    8000
}

fn default_true() -> bool {
    true
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: default_metrics_port(),
            request_timeout_secs: default_request_timeout(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl Config {
    /// Load configuration from config files and environment variables.
    ///
    /// Sources are layered (later overrides earlier):
    /// 1. config/uploader.* in the working directory
    /// 2. /etc/airlog/uploader.*
    /// 3. Environment variables (UPLOADER__SERVICE__LOG_LEVEL -> service.log_level)
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/uploader").required(false))
            .add_source(config::File::with_name("/etc/airlog/uploader").required(false))
            .add_source(
                config::Environment::with_prefix("UPLOADER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        for device in &self.devices {
            for channel in &device.channels {
                validate_outputs(&device.name, &channel.outputs)?;
            }
        }
        for mixer in &self.mixers {
            validate_outputs(&mixer.name, &mixer.channel.outputs)?;
        }
        Ok(())
    }
}

/// Validate the upload settings of one channel's outputs.
fn validate_outputs(owner: &str, outputs: &[Output]) -> Result<(), ConfigValidationError> {
    for output in outputs {
        let upload = match output.upload_config() {
            Some(upload) => upload,
            None => continue,
        };

        // An empty URL means uploading is disabled for this output
        if upload.upload_url.is_empty() {
            continue;
        }

        if !upload.upload_url.starts_with("http://") && !upload.upload_url.starts_with("https://") {
            return Err(ConfigValidationError::InvalidValue {
                field: format!("{}: upload_url", owner),
                message: "URL must start with http:// or https://".to_string(),
            });
        }

        if upload.upload_retry_interval == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: format!("{}: upload_retry_interval", owner),
                message: "Retry interval must be at least 1 second".to_string(),
            });
        }

        if upload.basedir.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingField(format!(
                "{}: basedir",
                owner
            )));
        }
    }

    Ok(())
}

impl ServiceConfig {
    /// Get HTTP request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get stats logging interval as Duration.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

impl UploadConfig {
    /// Get retry delay as Duration.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.upload_retry_interval)
    }

    /// Whether this output is configured to upload at all.
    pub fn upload_enabled(&self) -> bool {
        !self.upload_url.is_empty()
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
