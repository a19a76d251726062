//! Common test utilities for pipeline integration tests
//!
//! In-memory stand-ins for the object store and the warehouse, zip fixtures, and a
//! coordinator wired against a wiremock archive server.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestEnvironment;
//!
//! #[tokio::test]
//! async fn test_pipeline() {
//!     let env = TestEnvironment::start().await;
//!     env.serve_archive(2020, 1, common::csv_archive(&[("aisdk.csv", 3)])).await;
//!     let coordinator = env.coordinator();
//!     // ...
//! }
//! ```

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use ais_ingest::config::{PublishConfig, WarehouseConfig};
use ais_ingest::coordinator::{PipelineCoordinator, RetryPolicy};
use ais_ingest::extractor::Extractor;
use ais_ingest::fetcher::Fetcher;
use ais_ingest::loader::Loader;
use ais_ingest::locator::SourceLocator;
use ais_ingest::publisher::Publisher;
use ais_ingest::reaper::{Reaper, WorkRootReaper};
use ais_ingest::storage::{ObjectStore, StorageError};
use ais_ingest::warehouse::{LoadReceipt, LoadRequest, Warehouse, WarehouseError};
use ais_ingest::{CleanupStatus, RunContext};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

pub const TEST_BUCKET: &str = "test-bucket";
pub const CSV_HEADER: &str = "timestamp,mmsi,latitude,longitude,sog,cog,heading,vessel_name,imo,call_sign,vessel_type,status,length,width,draft,cargo";

// ============================================================================
// Object store
// ============================================================================

/// Object store backed by a map of `uri -> bytes`.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failing_keys: Mutex<HashSet<String>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject uploads to any key ending with `suffix`.
    pub fn fail_key_suffix(&self, suffix: &str) {
        self.failing_keys.lock().unwrap().insert(suffix.to_string());
    }

    pub fn get(&self, uri: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(uri).cloned()
    }

    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        uris.sort();
        uris
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, local_path: &Path) -> Result<String, StorageError> {
        let rejected = self
            .failing_keys
            .lock()
            .unwrap()
            .iter()
            .any(|suffix| key.ends_with(suffix.as_str()));
        if rejected {
            return Err(StorageError::Request(format!("simulated failure for {}", key)));
        }

        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| StorageError::LocalFile {
                path: local_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let uri = format!("mem://{}/{}", bucket, key);
        self.objects.lock().unwrap().insert(uri.clone(), bytes);
        Ok(uri)
    }
}

// ============================================================================
// Warehouse
// ============================================================================

/// Append-only table fed from the in-memory store, one row per CSV data line.
pub struct RecordingWarehouse {
    store: Arc<InMemoryObjectStore>,
    rows: Mutex<Vec<String>>,
    requests: Mutex<Vec<LoadRequest>>,
    failing: AtomicBool,
}

impl RecordingWarehouse {
    pub fn new(store: Arc<InMemoryObjectStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            rows: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        })
    }

    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<String> {
        self.rows.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<LoadRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Warehouse for RecordingWarehouse {
    async fn load(&self, request: &LoadRequest) -> Result<LoadReceipt, WarehouseError> {
        self.requests.lock().unwrap().push(request.clone());

        if self.failing.load(Ordering::SeqCst) {
            return Err(WarehouseError::JobFailed {
                job_id: "test-job".to_string(),
                reason: "simulated failure".to_string(),
            });
        }

        let bytes = self.store.get(&request.source_uri).ok_or_else(|| {
            WarehouseError::JobFailed {
                job_id: "test-job".to_string(),
                reason: format!("not found: {}", request.source_uri),
            }
        })?;
        let text = String::from_utf8_lossy(&bytes);
        let new_rows: Vec<String> = text
            .lines()
            .skip(request.skip_leading_rows as usize)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        let count = new_rows.len() as u64;
        self.rows.lock().unwrap().extend(new_rows);

        Ok(LoadReceipt {
            job_id: "test-job".to_string(),
            output_rows: Some(count),
        })
    }
}

// ============================================================================
// Reapers
// ============================================================================

/// Leaves the work root in place and reports a failure.
pub struct FailingReaper;

#[async_trait]
impl Reaper for FailingReaper {
    async fn reap(&self, _ctx: &RunContext) -> CleanupStatus {
        CleanupStatus::Failed {
            error: "simulated cleanup failure".to_string(),
        }
    }
}

/// Removes the work root only after the warehouse has received a load, failing if
/// none arrives. Succeeds only when cleanup runs alongside loading.
pub struct LoadAwareReaper {
    pub warehouse: Arc<RecordingWarehouse>,
}

#[async_trait]
impl Reaper for LoadAwareReaper {
    async fn reap(&self, ctx: &RunContext) -> CleanupStatus {
        for _ in 0..200 {
            if !self.warehouse.requests().is_empty() {
                return WorkRootReaper.reap(ctx).await;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        CleanupStatus::Failed {
            error: "no load started while reaping".to_string(),
        }
    }
}

// ============================================================================
// Archives
// ============================================================================

/// CSV body with a header and `rows` data lines.
pub fn csv_body(rows: usize) -> String {
    let mut body = format!("{}\n", CSV_HEADER);
    for i in 0..rows {
        body.push_str(&format!(
            "2020-01-01T00:00:{:02}Z,2190{:05},55.1,12.3,10.2,180.0,179,VESSEL {},,OXAB{},70,0,120.0,20.0,7.5,\n",
            i % 60,
            i,
            i,
            i
        ));
    }
    body
}

/// Zip archive holding the given `(name, body)` entries.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Zip archive with one CSV per `(name, rows)` pair.
pub fn csv_archive(files: &[(&str, usize)]) -> Vec<u8> {
    let bodies: Vec<(String, String)> = files
        .iter()
        .map(|(name, rows)| (name.to_string(), csv_body(*rows)))
        .collect();
    let entries: Vec<(&str, &str)> = bodies
        .iter()
        .map(|(name, body)| (name.as_str(), body.as_str()))
        .collect();
    zip_bytes(&entries)
}

pub fn archive_path(year: i32, month: u32) -> String {
    format!("/{}/aisdk-{}-{:02}.zip", year, year, month)
}

// ============================================================================
// Environment
// ============================================================================

pub struct TestEnvironment {
    pub server: MockServer,
    pub store: Arc<InMemoryObjectStore>,
    pub warehouse: Arc<RecordingWarehouse>,
    pub work_dir: TempDir,
}

impl TestEnvironment {
    pub async fn start() -> Self {
        let store = InMemoryObjectStore::new();
        Self {
            server: MockServer::start().await,
            warehouse: RecordingWarehouse::new(Arc::clone(&store)),
            store,
            work_dir: tempfile::tempdir().unwrap(),
        }
    }

    pub async fn serve_archive(&self, year: i32, month: u32, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(archive_path(year, month)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&self.server)
            .await;
    }

    pub async fn serve_status(&self, year: i32, month: u32, status: u16) {
        Mock::given(method("GET"))
            .and(path(archive_path(year, month)))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    pub fn context(&self, run_id: &str) -> RunContext {
        RunContext::new(self.work_dir.path(), run_id)
    }

    /// Coordinator against the mock server with fast retries.
    pub fn coordinator(&self) -> PipelineCoordinator {
        let publish = PublishConfig {
            bucket: TEST_BUCKET.to_string(),
            ..PublishConfig::default()
        };

        PipelineCoordinator::new(
            SourceLocator::new(self.server.uri(), "aisdk"),
            Fetcher::new(Duration::from_secs(10)).unwrap(),
            Extractor::default(),
            Publisher::new(self.store.clone(), &publish),
            Loader::new(self.warehouse.clone(), &WarehouseConfig::default()),
        )
        .with_retry(RetryPolicy::new(3, Duration::from_millis(10)))
        .with_fetch_concurrency(2)
    }

    /// Number of requests the archive server saw for one month.
    pub async fn requests_for(&self, year: i32, month: u32) -> usize {
        let wanted = archive_path(year, month);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == wanted)
            .count()
    }
}
