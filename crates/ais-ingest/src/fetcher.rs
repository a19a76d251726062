//! Archive download
//!
//! Bodies are streamed to `<archive>.part` and renamed into place only after the
//! byte count checks out, so a `FetchResult` never points at a partial file.

use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::config::SourceConfig;
use crate::error::FetchError;
use crate::models::{FetchResult, RunContext};

/// One download attempt per call; retry policy belongs to the caller.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(http_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(http_timeout)
            .user_agent(concat!("ais-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self, reqwest::Error> {
        Self::new(config.http_timeout())
    }

    /// Download `url` to the run's archive path for `period_key`.
    #[instrument(skip(self, ctx), fields(run_id = %ctx.run_id))]
    pub async fn fetch(
        &self,
        url: &str,
        period_key: &str,
        ctx: &RunContext,
    ) -> Result<FetchResult, FetchError> {
        tokio::fs::create_dir_all(&ctx.work_root)
            .await
            .map_err(|source| FetchError::Io {
                path: ctx.work_root.clone(),
                source,
            })?;

        let target = ctx.archive_path(period_key);
        let partial = part_path(&target);

        let result = self.download(url, &partial).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|source| FetchError::Io {
                path: target.clone(),
                source,
            })?;

        info!(path = %target.display(), "Archive downloaded");

        Ok(FetchResult {
            period_key: period_key.to_string(),
            local_archive_path: target,
            work_root: ctx.work_root.clone(),
        })
    }

    async fn download(&self, url: &str, output_path: &Path) -> Result<u64, FetchError> {
        let transport = |source: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let io_error = |source: std::io::Error| FetchError::Io {
            path: output_path.to_path_buf(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let expected = response.content_length();
        debug!(url, expected_bytes = ?expected, "Streaming archive");

        let mut file = tokio::fs::File::create(output_path)
            .await
            .map_err(io_error)?;
        let mut received = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transport)?;
            file.write_all(&chunk).await.map_err(io_error)?;
            received += chunk.len() as u64;
        }
        file.flush().await.map_err(io_error)?;

        if let Some(expected) = expected {
            if received != expected {
                return Err(FetchError::Truncated {
                    url: url.to_string(),
                    expected,
                    received,
                });
            }
        }

        Ok(received)
    }
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
