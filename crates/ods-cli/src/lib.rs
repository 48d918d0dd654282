//! # ods-cli
//!
//! Command-line front end for [`ods_loader`]: argument parsing, logging
//! setup, Ctrl+C handling, the end-of-run report and process exit codes.

#![warn(missing_docs)]

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ods_loader::{
    CancellationController, ImportConfig, ImportReport, ImportResult, OutputFormat, RunOutcome,
    RunState,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Every record was imported.
pub const EXIT_SUCCESS: u8 = 0;
/// The run stopped on a fatal error.
pub const EXIT_FAILURE: u8 = 1;
/// The run was interrupted once and drained; output is partial.
pub const EXIT_INTERRUPTED: u8 = 2;
/// A second interrupt terminated the process.
pub const EXIT_FORCED: u8 = 130;

const DEFAULT_SOURCE: &str = "HSCOrgRefData_Full_20250324.xml";

/// Command-line arguments of `ods-import`.
#[derive(Parser, Debug, Clone)]
#[command(name = "ods-import")]
#[command(about = "Imports an NHS ODS HSCOrgRefData XML release into per-organisation YAML/JSON documents")]
#[command(version)]
pub struct Args {
    /// Source XML file, or a directory holding HSCOrgRefData_Full_*.xml releases
    #[arg(env = "ODS_SOURCE_PATH", default_value = DEFAULT_SOURCE)]
    pub source: PathBuf,

    /// Output root; one subdirectory per format is created below it
    #[arg(short, long, env = "ODS_OUTPUT_PATH", default_value = "output")]
    pub output: PathBuf,

    /// Records per batch
    #[arg(short, long, default_value_t = 1000)]
    pub batch_size: usize,

    /// Maximum number of batches waiting for a worker
    #[arg(long, default_value_t = 10)]
    pub channel_depth: usize,

    /// Number of worker threads
    #[arg(short, long, env = "ODS_WORKERS", default_value_t = 6)]
    pub workers: usize,

    /// Output formats, comma separated
    #[arg(long = "format", value_delimiter = ',', default_value = "yaml,json")]
    pub formats: Vec<OutputFormat>,

    /// Read and transform only; write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Transform the records of a batch on the worker thread only
    #[arg(long)]
    pub sequential: bool,

    /// Write the summary index even when the run fails
    #[arg(long)]
    pub flush_on_abort: bool,

    /// Local name of the record element
    #[arg(long, default_value = "Organisation")]
    pub record_tag: String,

    /// Log filter used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Seconds between progress lines
    #[arg(long, default_value_t = 5)]
    pub progress_interval_secs: u64,
}

impl Args {
    /// Builds the import configuration.
    pub fn to_config(&self) -> ImportConfig {
        ImportConfig {
            source: self.source.clone(),
            output_root: self.output.clone(),
            record_tag: self.record_tag.clone(),
            batch_size: self.batch_size,
            channel_depth: self.channel_depth,
            workers: self.workers,
            persist: !self.dry_run,
            formats: self.formats.clone(),
            parallel_transform: !self.sequential,
            flush_on_abort: self.flush_on_abort,
            progress_interval: Duration::from_secs(self.progress_interval_secs.max(1)),
            ..ImportConfig::default()
        }
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

/// Routes Ctrl+C to the controller.
///
/// The first interrupt drains the run; the second exits the process with
/// [`EXIT_FORCED`] without waiting for pending writes.
pub fn install_signal_handler(
    controller: Arc<CancellationController>,
) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || match controller.signal() {
        RunState::Stopped => {
            warn!("second interrupt, exiting without flushing");
            process::exit(i32::from(EXIT_FORCED));
        }
        RunState::Draining => {
            warn!("interrupt received, finishing queued batches (press Ctrl+C again to stop now)");
        }
        state => {
            warn!(?state, "interrupt received");
        }
    })
}

/// Maps the result of a run to a process exit code.
pub fn exit_code(result: &ImportResult<ImportReport>) -> u8 {
    match result {
        Ok(report) => match report.outcome {
            RunOutcome::Completed => EXIT_SUCCESS,
            RunOutcome::Interrupted => EXIT_INTERRUPTED,
        },
        Err(_) => EXIT_FAILURE,
    }
}

/// Logs the end-of-run summary.
pub fn log_report(report: &ImportReport) {
    let stats = &report.stats;

    info!("[Summary] Outcome: {:?}", report.outcome);
    info!("[Summary] Organisations read: {}", stats.records_read);
    info!("[Summary] Organisations transformed: {}", stats.records_transformed);
    info!("[Summary] Documents persisted: {}", stats.documents_persisted);
    info!("[Summary] Distinct organisations: {}", stats.distinct_identities);
    info!(
        "[Summary] Total time taken: {:.2} seconds",
        stats.elapsed_ms as f64 / 1000.0
    );
    info!(
        "[Summary] Average rate: {:.2} organisations per second",
        stats.records_per_second()
    );

    for (role_id, count) in &stats.role_counts {
        info!("[Summary] Role ID '{}': {} organisations", role_id, count);
    }
    info!(
        "[Summary] No primary role found: {} organisations",
        stats.unresolved_classification
    );
    info!(
        "[Summary] No organisation code: {} organisations",
        stats.missing_identity
    );

    if let Some(flush) = &report.flush {
        info!(
            "[Summary] Summary files: {} across {} groups",
            flush.files_written, flush.groups
        );
    }
    if report.producer.records_discarded > 0 {
        warn!(
            "[Summary] Records read but not processed after interrupt: {}",
            report.producer.records_discarded
        );
    }
}
