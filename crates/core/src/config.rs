//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Smallest page the sweep may request from storage.
pub const MIN_SWEEP_PAGE_SIZE: u32 = 1;

/// Largest page the sweep may request from storage.
pub const MAX_SWEEP_PAGE_SIZE: u32 = 1000;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum populate jobs running in the background at once.
    /// Jobs beyond this are dropped; the next miss for the key retries.
    #[serde(default = "default_background_concurrency")]
    pub background_concurrency: usize,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_background_concurrency() -> usize {
    64
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            background_concurrency: default_background_concurrency(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.background_concurrency == 0 {
            return Err("server.background_concurrency must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the default credential chain if not set.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the default credential chain if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs. Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/images"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a non-empty bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err("filesystem config requires a non-empty path".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Google Drive origin endpoints and credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct GoogleDriveConfig {
    /// OAuth client id.
    #[serde(default)]
    pub client_id: String,
    /// OAuth client secret.
    /// WARNING: Prefer TESSERA_ORIGIN__GOOGLE_DRIVE__CLIENT_SECRET over the config file.
    #[serde(default)]
    pub client_secret: String,
    /// Long-lived refresh token exchanged for bearer tokens.
    #[serde(default)]
    pub refresh_token: String,
    /// Token exchange endpoint.
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Files API base URL; metadata is read from `{api_url}/files/{id}`.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Image content endpoint, queried with `?id=..&sz=w..`.
    #[serde(default = "default_content_url")]
    pub content_url: String,
    /// Width requested for the small size class.
    #[serde(default = "default_small_width")]
    pub small_width: u32,
    /// Width requested for the large size class.
    #[serde(default = "default_large_width")]
    pub large_width: u32,
    /// Timeout applied to every origin request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_api_url() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}

fn default_content_url() -> String {
    "https://drive.google.com/thumbnail".to_string()
}

fn default_small_width() -> u32 {
    400
}

fn default_large_width() -> u32 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            token_url: default_token_url(),
            api_url: default_api_url(),
            content_url: default_content_url(),
            small_width: default_small_width(),
            large_width: default_large_width(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for GoogleDriveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleDriveConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .field("api_url", &self.api_url)
            .field("content_url", &self.content_url)
            .field("small_width", &self.small_width)
            .field("large_width", &self.large_width)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl GoogleDriveConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("token_url", &self.token_url),
            ("api_url", &self.api_url),
            ("content_url", &self.content_url),
        ] {
            if value.trim().is_empty() {
                return Err(format!("origin.google_drive.{name} cannot be empty"));
            }
        }
        if self.small_width == 0 || self.large_width == 0 {
            return Err("origin.google_drive widths must be greater than 0".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("origin.google_drive.request_timeout_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Origin configuration, one section per origin kind.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OriginConfig {
    #[serde(default)]
    pub google_drive: GoogleDriveConfig,
}

impl OriginConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.google_drive.validate()
    }
}

/// Reconciliation sweep configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Run the scheduled sweep and the queue consumer (default: true).
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,
    /// Seconds between scheduled passes (default: 1 hour).
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Objects listed per invocation. Clamped to 1..=1000.
    #[serde(default = "default_sweep_page_size")]
    pub page_size: u32,
    /// Concurrent origin metadata checks per page.
    #[serde(default = "default_max_concurrent_checks")]
    pub max_concurrent_checks: usize,
    /// Only keys under this prefix are swept.
    #[serde(default)]
    pub prefix: String,
    /// Capacity of the in-process continuation queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Messages handed to the consumer per batch. Anything but one is a
    /// contract violation and the batch is dropped.
    #[serde(default = "default_queue_batch_size")]
    pub queue_batch_size: usize,
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    3600 // 1 hour
}

fn default_sweep_page_size() -> u32 {
    100
}

fn default_max_concurrent_checks() -> usize {
    100
}

fn default_queue_capacity() -> usize {
    16
}

fn default_queue_batch_size() -> usize {
    1
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval_secs: default_sweep_interval_secs(),
            page_size: default_sweep_page_size(),
            max_concurrent_checks: default_max_concurrent_checks(),
            prefix: String::new(),
            queue_capacity: default_queue_capacity(),
            queue_batch_size: default_queue_batch_size(),
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Page size clamped to the range every backend accepts.
    pub fn effective_page_size(&self) -> u32 {
        self.page_size
            .clamp(MIN_SWEEP_PAGE_SIZE, MAX_SWEEP_PAGE_SIZE)
    }

    /// Concurrency for metadata checks; never more than a page.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrent_checks
            .min(self.effective_page_size() as usize)
            .max(1)
    }

    /// Validate sweep configuration.
    /// Zero values would panic timers or stall the consumer.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("sweep.interval_secs cannot be 0".to_string());
        }
        if self.max_concurrent_checks == 0 {
            return Err("sweep.max_concurrent_checks cannot be 0".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("sweep.queue_capacity cannot be 0".to_string());
        }
        if self.queue_batch_size == 0 {
            return Err("sweep.queue_batch_size cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl AppConfig {
    /// Create a test configuration.
    ///
    /// **For testing only.** Uses filesystem storage and localhost origins.
    pub fn for_testing() -> Self {
        let origin = OriginConfig {
            google_drive: GoogleDriveConfig {
                client_id: "test-client".to_string(),
                client_secret: "test-secret".to_string(),
                refresh_token: "test-refresh".to_string(),
                token_url: "http://127.0.0.1:1/token".to_string(),
                api_url: "http://127.0.0.1:1/drive/v3".to_string(),
                content_url: "http://127.0.0.1:1/thumbnail".to_string(),
                request_timeout_secs: 5,
                ..GoogleDriveConfig::default()
            },
        };

        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            origin,
            sweep: SweepConfig {
                enabled: false,
                ..SweepConfig::default()
            },
        }
    }

    /// Validate every section, reporting the first failure.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.origin.validate()?;
        self.sweep.validate()?;
        Ok(())
    }
}
