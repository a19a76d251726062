//! Upload of extracted files to durable object storage

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::PublishConfig;
use crate::error::{NoObjectsPublishedError, UploadError};
use crate::models::{ExtractionResult, PublishedObject};
use crate::storage::{ObjectStoreRef, StorageError};

/// Result of a publish pass with at least one object staged.
#[derive(Debug)]
pub struct PublishOutcome {
    pub attempted: usize,
    pub published: Vec<PublishedObject>,
    pub failures: Vec<UploadError>,
}

pub struct Publisher {
    store: ObjectStoreRef,
    bucket: String,
    key_prefix: String,
    concurrency: usize,
}

struct UploadJob {
    period_key: String,
    file: PathBuf,
    key: String,
}

impl Publisher {
    pub fn new(store: ObjectStoreRef, config: &PublishConfig) -> Self {
        Self {
            store,
            bucket: config.bucket.clone(),
            key_prefix: config.key_prefix.trim_matches('/').to_string(),
            concurrency: config.upload_concurrency.max(1),
        }
    }

    /// Object key for one extracted file: `<prefix>/<period_key>/<relative_path>`.
    ///
    /// `relative_path` is the file's path under the period's extraction directory, so
    /// equally named files in different archive folders get distinct keys.
    pub fn object_key(&self, period_key: &str, relative_path: &str) -> String {
        if self.key_prefix.is_empty() {
            format!("{}/{}", period_key, relative_path)
        } else {
            format!("{}/{}/{}", self.key_prefix, period_key, relative_path)
        }
    }

    /// Upload every file of every result. Individual failures are collected; the
    /// pass fails only when nothing at all was published.
    #[instrument(skip(self, extracted), fields(bucket = %self.bucket))]
    pub async fn publish(
        &self,
        extracted: &[ExtractionResult],
    ) -> Result<PublishOutcome, NoObjectsPublishedError> {
        let mut claimed = HashSet::new();
        let mut rejected = Vec::new();
        let mut jobs = Vec::new();
        for result in extracted {
            for file in &result.extracted_file_paths {
                let key = self.object_key(&result.period_key, &relative_key(&result.extract_dir, file));
                if !claimed.insert(key.clone()) {
                    warn!(period_key = %result.period_key, key = %key, "Duplicate object key");
                    rejected.push(UploadError {
                        period_key: result.period_key.clone(),
                        file: file.clone(),
                        source: StorageError::DuplicateKey(key.clone()),
                        key,
                    });
                    continue;
                }
                jobs.push(UploadJob {
                    period_key: result.period_key.clone(),
                    file: file.clone(),
                    key,
                });
            }
        }

        let attempted = jobs.len() + rejected.len();
        info!(
            files = attempted,
            concurrency = self.concurrency,
            "Publishing extracted files"
        );

        let results: Vec<Result<PublishedObject, UploadError>> = stream::iter(jobs)
            .map(|job| {
                let store = Arc::clone(&self.store);
                let bucket = self.bucket.clone();
                async move {
                    match store.put(&bucket, &job.key, &job.file).await {
                        Ok(object_uri) => Ok(PublishedObject {
                            period_key: job.period_key,
                            object_uri,
                        }),
                        Err(source) => {
                            warn!(
                                period_key = %job.period_key,
                                key = %job.key,
                                error = %source,
                                "Upload failed"
                            );
                            Err(UploadError {
                                period_key: job.period_key,
                                file: job.file,
                                key: job.key,
                                source,
                            })
                        },
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let (published, failures): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
        let published: Vec<PublishedObject> = published.into_iter().filter_map(Result::ok).collect();
        let mut failures: Vec<UploadError> = failures.into_iter().filter_map(Result::err).collect();
        failures.extend(rejected);

        if published.is_empty() {
            return Err(NoObjectsPublishedError { attempted, failures });
        }

        info!(
            published = published.len(),
            failed = failures.len(),
            "Publish pass complete"
        );

        Ok(PublishOutcome {
            attempted,
            published,
            failures,
        })
    }
}

/// `/`-separated path of `file` below `extract_dir`, or its file name when it lies
/// elsewhere.
fn relative_key(extract_dir: &Path, file: &Path) -> String {
    match file.strip_prefix(extract_dir) {
        Ok(relative) => relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}
