//! AIS Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Monthly batch ingestion of archived AIS vessel-tracking bundles.
//!
//! # Pipeline
//!
//! 1. **Range**: expand a date range into one [`WorkDescriptor`] per calendar month
//! 2. **Locate**: map each month to its archive URL
//! 3. **Fetch**: stream archives to run-scoped transient storage (with retries)
//! 4. **Extract**: unpack the tabular files from each archive
//! 5. **Publish**: upload files to durable object storage
//! 6. **Reap**: remove the run's transient storage, whatever happened above
//! 7. **Load**: append every published object to the warehouse staging table
//!
//! Failures are isolated per item and collected into a [`RunReport`]; a stage that
//! produces nothing ends the run.
//!
//! # Example
//!
//! ```no_run
//! use ais_ingest::{PipelineConfig, PipelineCoordinator, RunContext};
//! use chrono::NaiveDate;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::load()?;
//! let coordinator = PipelineCoordinator::from_config(&config).await?;
//! let ctx = RunContext::generate(&config.work_dir);
//!
//! let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default();
//! let end = NaiveDate::from_ymd_opt(2020, 2, 1).unwrap_or_default();
//! let report = coordinator.run(&ctx, start, end, CancellationToken::new()).await?;
//! println!("{}", report.to_json_pretty()?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod loader;
pub mod locator;
pub mod models;
pub mod publisher;
pub mod range;
pub mod reaper;
pub mod report;
pub mod storage;
pub mod warehouse;

pub use config::PipelineConfig;
pub use coordinator::{PipelineCoordinator, PlannedFetch, RetryPolicy};
pub use error::{
    ExtractionError, FetchError, InvalidRangeError, NoObjectsPublishedError, PartialLoadFailure,
    PipelineError, UploadError,
};
pub use models::{ExtractionResult, FetchResult, PublishedObject, RunContext, WorkDescriptor};
pub use report::{CleanupStatus, RunOutcome, RunReport, Stage, StageReport};
