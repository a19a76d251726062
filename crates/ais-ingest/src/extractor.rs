//! Archive extraction
//!
//! Entries are copied to disk one at a time under `<work_root>/extracted/<period_key>/`;
//! the archive is never held in memory. Entries whose names would land outside that
//! directory are skipped.
//!
//! The copy runs on the blocking pool, which a dropped future cannot stop. Callers
//! cancel through the token instead; it is checked before every entry, and `extract`
//! only returns once the blocking work has.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::DEFAULT_TABULAR_SUFFIX;
use crate::error::ExtractionError;
use crate::models::{ExtractionResult, FetchResult, RunContext};

#[derive(Debug, Clone)]
pub struct Extractor {
    /// Lowercased file suffix identifying tabular files
    suffix: String,
}

impl Extractor {
    pub fn new(suffix: &str) -> Self {
        Self {
            suffix: suffix.to_ascii_lowercase(),
        }
    }

    /// Unpack one archive. An archive with no tabular files yields an empty result.
    ///
    /// Once `cancel` fires, no further entries are written and the call fails with
    /// [`ExtractionError::Cancelled`].
    #[instrument(skip(self, ctx, fetched, cancel), fields(run_id = %ctx.run_id, period_key = %fetched.period_key))]
    pub async fn extract(
        &self,
        ctx: &RunContext,
        fetched: FetchResult,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ExtractionError> {
        let extract_dir = ctx.extract_dir(&fetched.period_key);
        let suffix = self.suffix.clone();
        let archive = fetched.local_archive_path.clone();
        let target = extract_dir.clone();
        let cancel = cancel.clone();

        let files =
            tokio::task::spawn_blocking(move || unpack(&archive, &target, &suffix, &cancel))
                .await
                .map_err(|e| ExtractionError::Join(e.to_string()))??;

        if files.is_empty() {
            warn!(extract_dir = %extract_dir.display(), "Archive contained no tabular files");
        } else {
            info!(files = files.len(), extract_dir = %extract_dir.display(), "Archive extracted");
        }

        Ok(ExtractionResult {
            period_key: fetched.period_key,
            extracted_file_paths: files,
            extract_dir,
            work_root: fetched.work_root,
        })
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(DEFAULT_TABULAR_SUFFIX)
    }
}

fn unpack(
    archive_path: &Path,
    extract_dir: &Path,
    suffix: &str,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>, ExtractionError> {
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| ExtractionError::Io { path, source }
    };

    let file = File::open(archive_path).map_err(|source| ExtractionError::Open {
        path: archive_path.to_path_buf(),
        source,
    })?;
    let archive_error = |source: zip::result::ZipError| ExtractionError::Archive {
        path: archive_path.to_path_buf(),
        source,
    };
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(archive_error)?;

    if cancel.is_cancelled() {
        return Err(ExtractionError::Cancelled);
    }
    fs::create_dir_all(extract_dir).map_err(io_error(extract_dir))?;

    let mut tabular = Vec::new();
    for index in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }
        let mut entry = archive.by_index(index).map_err(archive_error)?;

        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "Skipping archive entry outside extraction dir");
            continue;
        };
        let out_path = extract_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(io_error(&out_path))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let mut out = File::create(&out_path).map_err(io_error(&out_path))?;
        io::copy(&mut entry, &mut out).map_err(io_error(&out_path))?;

        if is_tabular(&out_path, suffix) {
            tabular.push(out_path);
        }
    }

    tabular.sort();
    // Repeated entry names overwrite the same file on disk
    tabular.dedup();
    Ok(tabular)
}

fn is_tabular(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_ascii_lowercase().ends_with(suffix))
        .unwrap_or(false)
}
