use ais_common::error::{env_or, env_parse};
use ais_common::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Cloud Storage XML API, which speaks the S3 protocol with HMAC keys.
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
pub const DEFAULT_STORAGE_REGION: &str = "auto";

/// Scheme of published object URIs. BigQuery load jobs only read `gs://` sources.
pub const DEFAULT_URI_SCHEME: &str = "gs";

/// S3-compatible object store connection.
///
/// Defaults target Cloud Storage through its interoperability endpoint. Setting
/// `S3_ENDPOINT` to an empty value uses the AWS endpoint resolution instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    /// `None` falls back to the default AWS credential chain
    #[serde(skip_serializing)]
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
    pub uri_scheme: String,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        let endpoint = env_or("S3_ENDPOINT", DEFAULT_STORAGE_ENDPOINT);

        Ok(Self {
            endpoint: Some(endpoint).filter(|url| !url.trim().is_empty()),
            region: env_or("S3_REGION", DEFAULT_STORAGE_REGION),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env_parse("S3_PATH_STYLE", false)?,
            uri_scheme: env_or("S3_URI_SCHEME", DEFAULT_URI_SCHEME),
        })
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: Some(DEFAULT_STORAGE_ENDPOINT.to_string()),
            region: DEFAULT_STORAGE_REGION.to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
            uri_scheme: DEFAULT_URI_SCHEME.to_string(),
        }
    }
}
