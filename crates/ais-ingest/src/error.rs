//! Error taxonomy for the ingestion pipeline
//!
//! Item-level errors (`FetchError`, `ExtractionError`, `UploadError`, load failures)
//! never cross a stage boundary: the coordinator turns them into report entries.
//! Only [`PipelineError`] escapes a run.

use chrono::NaiveDate;
use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::PublishedObject;
use crate::report::{RunReport, Stage};
use crate::storage::StorageError;
use crate::warehouse::WarehouseError;

/// End date precedes start date once both are normalized to month start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid range: end {end} is before start {start}")]
pub struct InvalidRangeError {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("Stream from {url} truncated: received {received} of {expected} bytes")]
    Truncated {
        url: String,
        expected: u64,
        received: u64,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// A 404 means the month is not published; local disk errors will not fix
    /// themselves between attempts.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { .. } | FetchError::Truncated { .. } => true,
            FetchError::Status { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            },
            FetchError::Io { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Failed to open archive {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt archive {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction task aborted: {0}")]
    Join(String),

    #[error("Extraction cancelled")]
    Cancelled,
}

/// One file that could not be uploaded.
#[derive(Debug, Error)]
#[error("Upload of {} to {key} failed: {source}", .file.display())]
pub struct UploadError {
    pub period_key: String,
    pub file: PathBuf,
    pub key: String,
    #[source]
    pub source: StorageError,
}

/// Every upload failed, or there was nothing to upload.
#[derive(Debug, Error)]
#[error("No objects published: {attempted} file(s) attempted, {} failed", .failures.len())]
pub struct NoObjectsPublishedError {
    pub attempted: usize,
    pub failures: Vec<UploadError>,
}

/// Some loads failed. Non-fatal: the successful loads stand.
#[derive(Debug, Error)]
#[error("{} of {} load(s) failed", .failed.len(), .failed.len() + .loaded.len())]
pub struct PartialLoadFailure {
    pub loaded: Vec<PublishedObject>,
    pub failed: Vec<(PublishedObject, WarehouseError)>,
}

/// Errors that end a run early.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidRange(#[from] InvalidRangeError),

    #[error("Stage '{stage}' exhausted: no items succeeded")]
    StageExhausted { stage: Stage, report: Box<RunReport> },

    #[error("Run cancelled during stage '{stage}'")]
    Cancelled { stage: Stage, report: Box<RunReport> },
}

impl PipelineError {
    /// Partial report for runs that started before failing.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            PipelineError::InvalidRange(_) => None,
            PipelineError::StageExhausted { report, .. } | PipelineError::Cancelled { report, .. } => {
                Some(&**report)
            },
        }
    }
}
