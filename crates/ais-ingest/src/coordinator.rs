//! Pipeline coordinator
//!
//! Runs fetch → extract → publish over the whole batch, then loads whatever was
//! published while the run's work root is reaped. Failed items drop out of the
//! collection handed to the next stage and land in the [`RunReport`]; a stage that
//! ends with nothing aborts the run.
//!
//! Cancellation and timeout never drop the staging work mid-flight: the stages are
//! told to stop and the coordinator waits for them, so nothing writes under the work
//! root once it has been reaped.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::{ExtractionError, FetchError, PipelineError};
use crate::extractor::Extractor;
use crate::fetcher::Fetcher;
use crate::loader::Loader;
use crate::locator::SourceLocator;
use crate::models::{ExtractionResult, FetchResult, PublishedObject, RunContext, WorkDescriptor};
use crate::publisher::Publisher;
use crate::range::expand_range;
use crate::reaper::{ReaperRef, WorkRootReaper};
use crate::report::{ItemFailure, RunOutcome, RunReport, Stage, StageReport};
use crate::storage::S3ObjectStore;
use crate::warehouse::BigQueryWarehouse;

/// Stages that run before the work root is reaped, in order.
const STAGING: [Stage; 3] = [Stage::Fetch, Stage::Extract, Stage::Publish];

/// Bounded exponential backoff for archive downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per item, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt - 1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_FETCH_MAX_ATTEMPTS,
            Duration::from_millis(crate::config::DEFAULT_FETCH_RETRY_BACKOFF_MS),
        )
    }
}

/// One month the run would fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedFetch {
    pub period_key: String,
    pub url: String,
}

enum StagingEnd {
    Finished(std::result::Result<Vec<PublishedObject>, Stage>),
    Cancelled,
    TimedOut,
}

pub struct PipelineCoordinator {
    locator: SourceLocator,
    fetcher: Fetcher,
    extractor: Extractor,
    publisher: Publisher,
    loader: Loader,
    reaper: ReaperRef,
    retry: RetryPolicy,
    fetch_concurrency: usize,
    run_timeout: Option<Duration>,
}

impl PipelineCoordinator {
    pub fn new(
        locator: SourceLocator,
        fetcher: Fetcher,
        extractor: Extractor,
        publisher: Publisher,
        loader: Loader,
    ) -> Self {
        Self {
            locator,
            fetcher,
            extractor,
            publisher,
            loader,
            reaper: Arc::new(WorkRootReaper),
            retry: RetryPolicy::default(),
            fetch_concurrency: crate::config::DEFAULT_FETCH_CONCURRENCY,
            run_timeout: None,
        }
    }

    /// Wire the production collaborators (S3-compatible store, BigQuery) from config.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self> {
        let fetcher =
            Fetcher::from_config(&config.source).context("Failed to build HTTP client")?;
        let store = Arc::new(S3ObjectStore::new(config.storage.clone()).await);
        let warehouse = Arc::new(
            BigQueryWarehouse::new(&config.warehouse)
                .context("Failed to build warehouse client")?,
        );

        Ok(Self::new(
            config.source.locator(),
            fetcher,
            Extractor::new(&config.source.tabular_suffix),
            Publisher::new(store, &config.publish),
            Loader::new(warehouse, &config.warehouse),
        )
        .with_retry(RetryPolicy::new(config.source.max_attempts, config.source.retry_backoff()))
        .with_fetch_concurrency(config.source.fetch_concurrency)
        .with_run_timeout(config.run_timeout()))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency.max(1);
        self
    }

    pub fn with_reaper(mut self, reaper: ReaperRef) -> Self {
        self.reaper = reaper;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn plan(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> std::result::Result<Vec<PlannedFetch>, PipelineError> {
        plan(&self.locator, start, end)
    }

    /// Execute one run over `[start, end]`.
    ///
    /// The work root is reaped before returning whenever the staging stages started,
    /// including on exhaustion, cancellation and timeout. After a successful staging
    /// phase the reap runs alongside the load. The returned error carries the
    /// partial report.
    #[instrument(skip(self, ctx, cancel), fields(run_id = %ctx.run_id))]
    pub async fn run(
        &self,
        ctx: &RunContext,
        start: NaiveDate,
        end: NaiveDate,
        cancel: CancellationToken,
    ) -> std::result::Result<RunReport, PipelineError> {
        let descriptors = expand_range(start, end)?;
        let mut report = RunReport::new(ctx, &descriptors);

        info!(
            periods = descriptors.len(),
            work_root = %ctx.work_root.display(),
            "Starting run"
        );

        let deadline = self.run_timeout.map(|timeout| Instant::now() + timeout);

        let stop = cancel.child_token();
        let staging_end = {
            let staging = self.stage(ctx, &descriptors, &mut report, &stop);
            tokio::pin!(staging);
            let staged = tokio::select! {
                biased;
                _ = cancel.cancelled() => StagingEnd::Cancelled,
                _ = sleep_until_deadline(deadline) => StagingEnd::TimedOut,
                result = &mut staging => StagingEnd::Finished(result),
            };
            match staged {
                // A stage cut short by the stop is not exhausted
                StagingEnd::Finished(Err(_)) if stop.is_cancelled() => StagingEnd::Cancelled,
                StagingEnd::Finished(result) => StagingEnd::Finished(result),
                interrupted => {
                    // Blocking extraction outlives a dropped future; let it wind down first
                    stop.cancel();
                    let _ = staging.await;
                    interrupted
                },
            }
        };

        let published = match staging_end {
            StagingEnd::Finished(Ok(published)) => published,
            StagingEnd::Finished(Err(stage)) => {
                report.cleanup = self.reaper.reap(ctx).await;
                report.finish(RunOutcome::Exhausted { stage });
                report.log_summary();
                return Err(PipelineError::StageExhausted {
                    stage,
                    report: Box::new(report),
                });
            },
            StagingEnd::Cancelled => {
                report.cleanup = self.reaper.reap(ctx).await;
                let stage = interrupted_stage(&report);
                warn!(stage = %stage, "Run cancelled");
                return Err(cancelled(report, stage));
            },
            StagingEnd::TimedOut => {
                report.cleanup = self.reaper.reap(ctx).await;
                let stage = interrupted_stage(&report);
                warn!(stage = %stage, timeout = ?self.run_timeout, "Run timed out");
                return Err(cancelled(report, stage));
            },
        };

        // Loads read from the object store, so the local work root can go meanwhile
        let load_pass = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                _ = sleep_until_deadline(deadline) => None,
                result = self.loader.load_all(&published) => Some(result),
            }
        };
        let (cleanup, load) = tokio::join!(self.reaper.reap(ctx), load_pass);
        report.cleanup = cleanup;

        let Some(load) = load else {
            warn!(stage = %Stage::Load, "Run interrupted");
            return Err(cancelled(report, Stage::Load));
        };

        let mut stage = StageReport::new(Stage::Load);
        stage.attempted = published.len();
        let outcome = match load {
            Ok(loaded) => {
                stage.succeeded = loaded.len();
                RunOutcome::Completed
            },
            Err(partial) => {
                stage.succeeded = partial.loaded.len();
                stage.failures = partial
                    .failed
                    .iter()
                    .map(|(object, e)| {
                        ItemFailure::new(&object.period_key, e).with_item(&object.object_uri)
                    })
                    .collect();
                RunOutcome::CompletedWithLoadFailures
            },
        };
        report.record(stage);
        report.finish(outcome);
        report.log_summary();

        Ok(report)
    }

    /// Fetch, extract and publish. `Err(stage)` names the stage that produced nothing.
    ///
    /// Once `stop` fires, in-flight items are abandoned or wound down, no further stage
    /// starts, and the result is meaningless to the caller.
    async fn stage(
        &self,
        ctx: &RunContext,
        descriptors: &[WorkDescriptor],
        report: &mut RunReport,
        stop: &CancellationToken,
    ) -> std::result::Result<Vec<PublishedObject>, Stage> {
        let fetched = self.fetch_stage(ctx, descriptors, report, stop).await;
        if fetched.is_empty() || stop.is_cancelled() {
            return Err(Stage::Fetch);
        }

        let extracted = self.extract_stage(ctx, fetched, report, stop).await;
        if extracted.is_empty() || stop.is_cancelled() {
            return Err(Stage::Extract);
        }

        // Uploads only read the work root, so abandoning them is safe
        tokio::select! {
            biased;
            _ = stop.cancelled() => Err(Stage::Publish),
            published = self.publish_stage(&extracted, report) => published.ok_or(Stage::Publish),
        }
    }

    async fn fetch_stage(
        &self,
        ctx: &RunContext,
        descriptors: &[WorkDescriptor],
        report: &mut RunReport,
        stop: &CancellationToken,
    ) -> Vec<FetchResult> {
        report.stage_mut(Stage::Fetch).attempted = descriptors.len();

        let mut downloads = stream::iter(descriptors)
            .map(|descriptor| async move {
                let url = self.locator.locate(descriptor);
                let result = tokio::select! {
                    biased;
                    _ = stop.cancelled() => None,
                    result = self.fetch_with_retry(ctx, &url, &descriptor.period_key) => Some(result),
                };
                (descriptor.period_key.clone(), result)
            })
            .buffer_unordered(self.fetch_concurrency);

        let mut fetched = Vec::with_capacity(descriptors.len());
        while let Some((period_key, result)) = downloads.next().await {
            // Abandoned by a stop: neither a success nor a failure
            let Some(result) = result else {
                continue;
            };
            let stage = report.stage_mut(Stage::Fetch);
            match result {
                Ok(item) => {
                    stage.succeeded += 1;
                    fetched.push(item);
                },
                Err(e) => {
                    warn!(period_key = %period_key, error = %e, "Fetch failed");
                    stage.failures.push(ItemFailure::new(period_key, &e));
                },
            }
        }

        fetched
    }

    /// Retry retryable fetch failures with exponential backoff.
    async fn fetch_with_retry(
        &self,
        ctx: &RunContext,
        url: &str,
        period_key: &str,
    ) -> std::result::Result<FetchResult, FetchError> {
        let mut attempt = 1;
        loop {
            match self.fetcher.fetch(url, period_key, ctx).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        period_key,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Download attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn extract_stage(
        &self,
        ctx: &RunContext,
        fetched: Vec<FetchResult>,
        report: &mut RunReport,
        stop: &CancellationToken,
    ) -> Vec<ExtractionResult> {
        report.stage_mut(Stage::Extract).attempted = fetched.len();

        let mut extracted = Vec::with_capacity(fetched.len());
        for item in fetched {
            if stop.is_cancelled() {
                break;
            }
            let period_key = item.period_key.clone();
            let result = self.extractor.extract(ctx, item, stop).await;
            let stage = report.stage_mut(Stage::Extract);
            match result {
                Err(ExtractionError::Cancelled) => break,
                Ok(result) => {
                    if result.is_empty() {
                        stage.empty.push(period_key);
                    }
                    stage.succeeded += 1;
                    extracted.push(result);
                },
                Err(e) => {
                    warn!(period_key = %period_key, error = %e, "Extraction failed");
                    stage.failures.push(ItemFailure::new(period_key, &e));
                },
            }
        }

        extracted
    }

    async fn publish_stage(
        &self,
        extracted: &[ExtractionResult],
        report: &mut RunReport,
    ) -> Option<Vec<PublishedObject>> {
        // Visible as the in-flight stage until the publisher returns
        report.stage_mut(Stage::Publish).attempted =
            extracted.iter().map(|e| e.extracted_file_paths.len()).sum();

        let mut stage = StageReport::new(Stage::Publish);

        let (published, failures) = match self.publisher.publish(extracted).await {
            Ok(outcome) => {
                stage.attempted = outcome.attempted;
                (Some(outcome.published), outcome.failures)
            },
            Err(e) => {
                warn!(error = %e, "Publish stage produced no objects");
                stage.attempted = e.attempted;
                (None, e.failures)
            },
        };

        stage.succeeded = published.as_ref().map(Vec::len).unwrap_or(0);
        stage.failures = failures
            .iter()
            .map(|f| ItemFailure::new(&f.period_key, &f.source).with_item(&f.key))
            .collect();
        report.record(stage);

        published
    }
}

/// Descriptors and URLs for a range, with no side effects.
pub fn plan(
    locator: &SourceLocator,
    start: NaiveDate,
    end: NaiveDate,
) -> std::result::Result<Vec<PlannedFetch>, PipelineError> {
    Ok(expand_range(start, end)?
        .iter()
        .map(|descriptor| PlannedFetch {
            period_key: descriptor.period_key.clone(),
            url: locator.locate(descriptor),
        })
        .collect())
}

/// Stages record themselves when they start, so the latest staging entry is the one
/// that was in flight. Nothing recorded means fetch never got going.
fn interrupted_stage(report: &RunReport) -> Stage {
    report
        .stages
        .iter()
        .rev()
        .map(|entry| entry.stage)
        .find(|stage| STAGING.contains(stage))
        .unwrap_or(Stage::Fetch)
}

fn cancelled(mut report: RunReport, stage: Stage) -> PipelineError {
    report.finish(RunOutcome::Cancelled { stage });
    report.log_summary();
    PipelineError::Cancelled {
        stage,
        report: Box::new(report),
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
