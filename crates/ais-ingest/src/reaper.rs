//! Transient storage cleanup

use async_trait::async_trait;
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::RunContext;
use crate::report::CleanupStatus;

/// Disposes of a run's transient storage once staging is over.
#[async_trait]
pub trait Reaper: Send + Sync {
    async fn reap(&self, ctx: &RunContext) -> CleanupStatus;
}

pub type ReaperRef = Arc<dyn Reaper>;

/// Deletes the run's work root from local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkRootReaper;

#[async_trait]
impl Reaper for WorkRootReaper {
    async fn reap(&self, ctx: &RunContext) -> CleanupStatus {
        reap(ctx).await
    }
}

/// Remove the run's work root. Never fails: problems are logged and returned as
/// [`CleanupStatus::Failed`].
pub async fn reap(ctx: &RunContext) -> CleanupStatus {
    match tokio::fs::remove_dir_all(&ctx.work_root).await {
        Ok(()) => {
            info!(run_id = %ctx.run_id, path = %ctx.work_root.display(), "Removed transient storage");
            CleanupStatus::Removed
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(run_id = %ctx.run_id, path = %ctx.work_root.display(), "No transient storage to remove");
            CleanupStatus::AlreadyAbsent
        },
        Err(e) => {
            warn!(
                run_id = %ctx.run_id,
                path = %ctx.work_root.display(),
                error = %e,
                "Failed to remove transient storage"
            );
            CleanupStatus::Failed {
                error: e.to_string(),
            }
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_removes_work_root() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path(), "r");
        std::fs::create_dir_all(ctx.extract_dir("2020-01")).unwrap();
        std::fs::write(ctx.archive_path("2020-01"), b"zip").unwrap();

        assert_eq!(reap(&ctx).await, CleanupStatus::Removed);
        assert!(!ctx.work_root.exists());
    }

    #[tokio::test]
    async fn test_missing_work_root_is_already_absent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path(), "never-created");

        assert_eq!(reap(&ctx).await, CleanupStatus::AlreadyAbsent);
    }

    #[tokio::test]
    async fn test_unremovable_work_root_is_failed_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path(), "r");
        // A regular file where the directory should be
        std::fs::write(&ctx.work_root, b"not a directory").unwrap();

        let status = WorkRootReaper.reap(&ctx).await;

        assert!(matches!(status, CleanupStatus::Failed { .. }), "{:?}", status);
        assert!(ctx.work_root.exists());
    }

    #[tokio::test]
    async fn test_reap_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path(), "r");
        std::fs::create_dir_all(&ctx.work_root).unwrap();

        assert_eq!(reap(&ctx).await, CleanupStatus::Removed);
        assert_eq!(reap(&ctx).await, CleanupStatus::AlreadyAbsent);
    }
}
