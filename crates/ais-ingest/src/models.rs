//! Typed records handed between pipeline stages
//!
//! These are the only inter-stage contract. Each stage consumes the full collection
//! produced by its predecessor and emits a subset of items keyed by `period_key`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One calendar month of work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkDescriptor {
    pub year: i32,
    pub month: u32,
    /// Canonical `YYYY-MM` identifier
    pub period_key: String,
}

impl WorkDescriptor {
    pub fn new(year: i32, month: u32) -> Self {
        Self {
            year,
            month,
            period_key: format!("{:04}-{:02}", year, month),
        }
    }
}

impl fmt::Display for WorkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.period_key)
    }
}

/// Run-scoped context threaded through every stage call.
///
/// `work_root` belongs to exactly one run; callers must not reuse a `run_id`
/// concurrently.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub work_root: PathBuf,
}

impl RunContext {
    /// Derive the run's transient root as `<work_dir>/ais-<run_id>`.
    pub fn new(work_dir: impl AsRef<Path>, run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        let work_root = work_dir.as_ref().join(format!("ais-{}", run_id));
        Self { run_id, work_root }
    }

    /// Context with a fresh random run id.
    pub fn generate(work_dir: impl AsRef<Path>) -> Self {
        Self::new(work_dir, Uuid::new_v4().simple().to_string())
    }

    /// Local archive path for one period.
    pub fn archive_path(&self, period_key: &str) -> PathBuf {
        self.work_root.join(format!("ais-{}.zip", period_key))
    }

    /// Per-period extraction directory.
    pub fn extract_dir(&self, period_key: &str) -> PathBuf {
        self.work_root.join("extracted").join(period_key)
    }
}

/// A downloaded archive waiting for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub period_key: String,
    pub local_archive_path: PathBuf,
    pub work_root: PathBuf,
}

/// Tabular files unpacked from one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    pub period_key: String,
    /// Sorted; empty when the archive held no tabular files
    pub extracted_file_paths: Vec<PathBuf>,
    pub extract_dir: PathBuf,
    pub work_root: PathBuf,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.extracted_file_paths.is_empty()
    }
}

/// A file staged in durable object storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublishedObject {
    pub period_key: String,
    pub object_uri: String,
}
