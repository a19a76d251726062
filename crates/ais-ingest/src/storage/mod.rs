//! Durable object storage
//!
//! The pipeline only needs `put(bucket, key, local_path)`. [`ObjectStore`] is the seam;
//! [`S3ObjectStore`] is the production implementation over the S3 API.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub mod config;

use config::StorageConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Cannot read local file {}: {reason}", .path.display())]
    LocalFile { path: PathBuf, reason: String },

    #[error("Object store request failed: {0}")]
    Request(String),

    #[error("Object key {0} is already claimed by another file in this run")]
    DuplicateKey(String),
}

/// Write interface to durable storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `local_path` to `bucket/key` and return the object URI.
    async fn put(&self, bucket: &str, key: &str, local_path: &Path) -> Result<String, StorageError>;
}

pub type ObjectStoreRef = Arc<dyn ObjectStore>;

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    uri_scheme: String,
}

impl S3ObjectStore {
    pub async fn new(config: StorageConfig) -> Self {
        debug!(
            endpoint = ?config.endpoint,
            region = %config.region,
            path_style = config.path_style,
            "Initializing object store client"
        );

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "ais-storage",
            ));
        }

        let shared = loader.load().await;
        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(scheme = %config.uri_scheme, "Object store client initialized");

        Self {
            client: Client::from_conf(builder.build()),
            uri_scheme: config.uri_scheme,
        }
    }

    pub fn object_uri(&self, bucket: &str, key: &str) -> String {
        format!("{}://{}/{}", self.uri_scheme, bucket, key)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn put(&self, bucket: &str, key: &str, local_path: &Path) -> Result<String, StorageError> {
        // Streams from disk; the file is never read into memory at once
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::LocalFile {
                path: local_path.to_path_buf(),
                reason: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type_for(local_path))
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Request(DisplayErrorContext(&e).to_string()))?;

        let uri = self.object_uri(bucket, key);
        info!(uri = %uri, "Uploaded object");
        Ok(uri)
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("csv") => "text/csv",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(scheme: &str) -> S3ObjectStore {
        S3ObjectStore {
            client: Client::from_conf(aws_sdk_s3::Config::builder().build()),
            uri_scheme: scheme.to_string(),
        }
    }

    #[test]
    fn test_object_uri() {
        assert_eq!(
            store("gs").object_uri("ais-data-lake", "raw/ais/2020-01/aisdk.csv"),
            "gs://ais-data-lake/raw/ais/2020-01/aisdk.csv"
        );
        assert_eq!(store("s3").object_uri("b", "k"), "s3://b/k");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a/b/AIS.CSV")), "text/csv");
        assert_eq!(content_type_for(Path::new("x.zip")), "application/zip");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_put_missing_file_is_local_error() {
        let result = store("s3")
            .put("bucket", "key", Path::new("/definitely/not/here.csv"))
            .await;
        assert!(matches!(result, Err(StorageError::LocalFile { .. })));
    }
}
