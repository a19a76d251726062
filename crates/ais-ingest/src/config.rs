//! Configuration management
//!
//! Everything is read from the environment once at startup (with `.env` support).
//! Credentials are passed through to the clients untouched.

use ais_common::error::{env_or, env_parse};
use ais_common::{AisError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::locator::{SourceLocator, DEFAULT_SOURCE_BASE_URL, DEFAULT_SOURCE_NAME};
use crate::storage::config::StorageConfig;

// ============================================================================
// Pipeline Defaults
// ============================================================================

/// Default bucket for staged raw files.
pub const DEFAULT_BUCKET: &str = "ais-data-lake";

/// Default object key prefix; keys become `<prefix>/<period>/<file>`.
pub const DEFAULT_KEY_PREFIX: &str = "raw/ais";

/// Default suffix identifying tabular files inside an archive.
pub const DEFAULT_TABULAR_SUFFIX: &str = ".csv";

pub const DEFAULT_FETCH_CONCURRENCY: usize = 2;
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// Attempts per archive, including the first.
pub const DEFAULT_FETCH_MAX_ATTEMPTS: u32 = 3;

/// First retry delay; doubles on every further attempt.
pub const DEFAULT_FETCH_RETRY_BACKOFF_MS: u64 = 2_000;

/// Monthly bundles are multi-GB, so the HTTP timeout is generous.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 3_600;

/// Whole-run timeout (6 hours).
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 21_600;

// ============================================================================
// Warehouse Defaults
// ============================================================================

pub const DEFAULT_PROJECT_ID: &str = "your-gcp-project-id";
pub const DEFAULT_STAGING_DATASET: &str = "ais_staging";
pub const DEFAULT_RAW_TABLE: &str = "stg_ais_raw";
pub const DEFAULT_BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_MAX_POLLS: u32 = 900;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub publish: PublishConfig,
    pub warehouse: WarehouseConfig,
    pub storage: StorageConfig,
    /// Parent directory for run-scoped transient storage
    pub work_dir: PathBuf,
    pub run_timeout_secs: u64,
}

/// Remote archive source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub source_name: String,
    pub tabular_suffix: String,
    pub fetch_concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub http_timeout_secs: u64,
}

/// Object store destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub bucket: String,
    pub key_prefix: String,
    pub upload_concurrency: usize,
}

/// Warehouse staging table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub project_id: String,
    pub dataset: String,
    pub table: String,
    pub location: Option<String>,
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl PipelineConfig {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            source: SourceConfig::from_env()?,
            publish: PublishConfig::from_env()?,
            warehouse: WarehouseConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            work_dir: std::env::var("AIS_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
            run_timeout_secs: env_parse("AIS_RUN_TIMEOUT_SECS", DEFAULT_RUN_TIMEOUT_SECS)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        self.publish.validate()?;
        self.warehouse.validate()?;

        if self.storage.uri_scheme != "gs" {
            return Err(AisError::config(format!(
                "S3_URI_SCHEME must be 'gs': BigQuery loads only read gs:// objects (got '{}')",
                self.storage.uri_scheme
            )));
        }
        if self.run_timeout_secs == 0 {
            return Err(AisError::config("AIS_RUN_TIMEOUT_SECS must be greater than 0"));
        }

        Ok(())
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl SourceConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: env_or("AIS_SOURCE_BASE_URL", DEFAULT_SOURCE_BASE_URL),
            source_name: env_or("AIS_SOURCE_NAME", DEFAULT_SOURCE_NAME),
            tabular_suffix: env_or("AIS_TABULAR_SUFFIX", DEFAULT_TABULAR_SUFFIX),
            fetch_concurrency: env_parse("AIS_FETCH_CONCURRENCY", DEFAULT_FETCH_CONCURRENCY)?,
            max_attempts: env_parse("AIS_FETCH_MAX_ATTEMPTS", DEFAULT_FETCH_MAX_ATTEMPTS)?,
            retry_backoff_ms: env_parse("AIS_FETCH_RETRY_BACKOFF_MS", DEFAULT_FETCH_RETRY_BACKOFF_MS)?,
            http_timeout_secs: env_parse("AIS_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(AisError::config("AIS_SOURCE_BASE_URL cannot be empty"));
        }
        if self.source_name.is_empty() {
            return Err(AisError::config("AIS_SOURCE_NAME cannot be empty"));
        }
        if self.tabular_suffix.is_empty() {
            return Err(AisError::config("AIS_TABULAR_SUFFIX cannot be empty"));
        }
        if self.fetch_concurrency == 0 {
            return Err(AisError::config("AIS_FETCH_CONCURRENCY must be greater than 0"));
        }
        if self.max_attempts == 0 {
            return Err(AisError::config("AIS_FETCH_MAX_ATTEMPTS must be at least 1"));
        }
        if self.http_timeout_secs == 0 {
            return Err(AisError::config("AIS_HTTP_TIMEOUT_SECS must be greater than 0"));
        }
        Ok(())
    }

    pub fn locator(&self) -> SourceLocator {
        SourceLocator::new(&self.base_url, &self.source_name)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SOURCE_BASE_URL.to_string(),
            source_name: DEFAULT_SOURCE_NAME.to_string(),
            tabular_suffix: DEFAULT_TABULAR_SUFFIX.to_string(),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            max_attempts: DEFAULT_FETCH_MAX_ATTEMPTS,
            retry_backoff_ms: DEFAULT_FETCH_RETRY_BACKOFF_MS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl PublishConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bucket: env_or("GCS_BUCKET_NAME", DEFAULT_BUCKET),
            key_prefix: env_or("AIS_KEY_PREFIX", DEFAULT_KEY_PREFIX),
            upload_concurrency: env_parse("AIS_UPLOAD_CONCURRENCY", DEFAULT_UPLOAD_CONCURRENCY)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(AisError::config("GCS_BUCKET_NAME cannot be empty"));
        }
        if self.upload_concurrency == 0 {
            return Err(AisError::config("AIS_UPLOAD_CONCURRENCY must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
        }
    }
}

impl WarehouseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            project_id: env_or("GCP_PROJECT_ID", DEFAULT_PROJECT_ID),
            dataset: env_or("BQ_STAGING_DATASET", DEFAULT_STAGING_DATASET),
            table: env_or("BQ_RAW_TABLE", DEFAULT_RAW_TABLE),
            location: std::env::var("BQ_LOCATION").ok(),
            endpoint: env_or("BQ_API_ENDPOINT", DEFAULT_BIGQUERY_ENDPOINT),
            access_token: std::env::var("BQ_ACCESS_TOKEN").ok(),
            poll_interval_ms: env_parse("BQ_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
            max_polls: env_parse("BQ_MAX_POLLS", DEFAULT_MAX_POLLS)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.project_id.is_empty() || self.dataset.is_empty() || self.table.is_empty() {
            return Err(AisError::config(
                "GCP_PROJECT_ID, BQ_STAGING_DATASET and BQ_RAW_TABLE must all be set",
            ));
        }
        if self.max_polls == 0 {
            return Err(AisError::config("BQ_MAX_POLLS must be greater than 0"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: DEFAULT_PROJECT_ID.to_string(),
            dataset: DEFAULT_STAGING_DATASET.to_string(),
            table: DEFAULT_RAW_TABLE.to_string(),
            location: None,
            endpoint: DEFAULT_BIGQUERY_ENDPOINT.to_string(),
            access_token: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }
}
