//! AIS Ingest - monthly AIS archive ingestion

use ais_common::logging::{init_logging, LogConfig, LogLevel};
use ais_ingest::coordinator::plan;
use ais_ingest::range::resolve_window;
use ais_ingest::{PipelineConfig, PipelineCoordinator, PipelineError, RunContext, RunReport};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ais-ingest")]
#[command(author, version, about = "Monthly AIS archive ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, stage and load every month in the range
    Run {
        #[command(flatten)]
        range: RangeArgs,

        /// Run identifier; names the transient work directory
        #[arg(long)]
        run_id: Option<String>,

        /// Abort the run after this many seconds (overrides AIS_RUN_TIMEOUT_SECS)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Write the JSON run report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List the months and archive URLs a run would fetch
    Plan {
        #[command(flatten)]
        range: RangeArgs,
    },
}

#[derive(Args, Debug)]
struct RangeArgs {
    /// First day of the range (YYYY-MM-DD); defaults to 30 days before --end
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Last day of the range (YYYY-MM-DD); defaults to today
    #[arg(long)]
    end: Option<NaiveDate>,
}

impl RangeArgs {
    fn resolve(&self) -> (NaiveDate, NaiveDate) {
        resolve_window(self.start, self.end, chrono::Local::now().date_naive())
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("ais-ingest")
        .build()
        .merge_env()
        .context("Invalid logging configuration")?;

    let _guard = init_logging(&log_config)?;

    let config = PipelineConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Plan { range } => {
            let (start, end) = range.resolve();
            for planned in plan(&config.source.locator(), start, end)? {
                println!("{}\t{}", planned.period_key, planned.url);
            }
            Ok(ExitCode::SUCCESS)
        },
        Command::Run {
            range,
            run_id,
            timeout_secs,
            report,
        } => {
            let (start, end) = range.resolve();
            run(&config, start, end, run_id, timeout_secs, report.as_deref()).await
        },
    }
}

async fn run(
    config: &PipelineConfig,
    start: NaiveDate,
    end: NaiveDate,
    run_id: Option<String>,
    timeout_secs: Option<u64>,
    report_path: Option<&Path>,
) -> Result<ExitCode> {
    let mut coordinator = PipelineCoordinator::from_config(config).await?;
    if let Some(secs) = timeout_secs {
        coordinator = coordinator.with_run_timeout(Duration::from_secs(secs));
    }

    let ctx = match run_id {
        Some(run_id) => RunContext::new(&config.work_dir, run_id),
        None => RunContext::generate(&config.work_dir),
    };

    info!(
        run_id = %ctx.run_id,
        start = %start,
        end = %end,
        "Starting AIS ingestion"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    let result = coordinator.run(&ctx, start, end, cancel).await;

    let report = match &result {
        Ok(report) => Some(report),
        Err(e) => e.report(),
    };
    if let (Some(path), Some(report)) = (report_path, report) {
        write_report(path, report)?;
    }

    match result {
        Ok(report) => {
            info!(run_id = %report.run_id, outcome = ?report.outcome, "Ingestion complete");
            Ok(ExitCode::SUCCESS)
        },
        Err(PipelineError::InvalidRange(e)) => Err(e.into()),
        Err(e) => {
            error!(run_id = %ctx.run_id, error = %e, "Ingestion failed");
            Ok(ExitCode::FAILURE)
        },
    }
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = report.to_json_pretty()?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    info!(path = %path.display(), "Run report written");
    Ok(())
}

/// Cancel the run on Ctrl+C or SIGTERM.
async fn cancel_on_shutdown(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling run");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling run");
        },
    }

    cancel.cancel();
}
