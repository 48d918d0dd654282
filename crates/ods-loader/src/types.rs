//! Importer-specific types: errors, configuration and run statistics.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use ods_types::well_known;
use thiserror::Error;

use crate::sink::OutputFormat;

/// Errors that can occur while importing an ODS release.
///
/// Every variant is fatal to the run. Recoverable anomalies (records without
/// a primary role or without an identity) are counted, not raised.
#[derive(Error, Debug)]
pub enum ImportError {
    /// I/O error reading the source or writing output.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Source file not found.
    #[error("Source file not found: {path}")]
    SourceNotFound {
        /// The path that was not found.
        path: String,
    },

    /// The source stream could not be tokenized, or holds no XML at all.
    #[error("Malformed input at byte {position}: {reason}")]
    MalformedInput {
        /// Byte offset at which the tokenizer gave up.
        position: u64,
        /// What was wrong with the stream.
        reason: String,
        /// The underlying XML error, if the tokenizer raised one.
        #[source]
        source: Option<quick_xml::Error>,
    },

    /// A record lacks a structurally mandatory section.
    #[error("Record {record} is missing required section '{section}'")]
    MissingRequiredSection {
        /// 1-based ordinal of the record in the source stream.
        record: usize,
        /// Name of the missing element.
        section: &'static str,
    },

    /// A write kept failing after every retry.
    #[error("Failed to write {path} after {attempts} attempts: {source}")]
    Write {
        /// The file that could not be written.
        path: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last I/O error.
        source: std::io::Error,
    },

    /// A document could not be serialized.
    #[error("Failed to encode {path}: {message}")]
    Encode {
        /// Target file.
        path: String,
        /// Encoder message.
        message: String,
    },

    /// A persisted document could not be parsed back.
    #[error("Failed to decode {path}: {message}")]
    Decode {
        /// Source file.
        path: String,
        /// Decoder message.
        message: String,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A pipeline thread panicked.
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

/// Result type for import operations.
pub type ImportResult<T> = Result<T, ImportError>;

/// Configuration for an import run.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Path to the source XML file.
    pub source: PathBuf,
    /// Root under which one directory per output format is created.
    pub output_root: PathBuf,
    /// Local name of the record element.
    pub record_tag: String,
    /// Records per batch (affects memory usage).
    pub batch_size: usize,
    /// Maximum number of batches waiting in the queue.
    pub channel_depth: usize,
    /// Number of worker threads draining the queue.
    pub workers: usize,
    /// Write documents and summaries; `false` is a statistics-only dry run.
    pub persist: bool,
    /// Output encodings, one output tree each.
    pub formats: Vec<OutputFormat>,
    /// Transform the records of a batch in parallel.
    pub parallel_transform: bool,
    /// How long one publish attempt waits on a full queue.
    pub publish_timeout: Duration,
    /// Failed publish attempts before the producer backs off.
    pub publish_retries: u32,
    /// Pause after `publish_retries` failed attempts.
    pub publish_backoff: Duration,
    /// How long a worker waits on an empty queue before re-checking state.
    pub poll_interval: Duration,
    /// Attempts per file write.
    pub write_retries: u32,
    /// Base pause between write attempts (multiplied by the attempt number).
    pub write_backoff: Duration,
    /// Flush the summary index even when the run aborts on a fatal error.
    pub flush_on_abort: bool,
    /// Interval between producer throughput log lines.
    pub progress_interval: Duration,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("HSCOrgRefData_Full.xml"),
            output_root: PathBuf::from("output"),
            record_tag: well_known::ORGANISATION.to_string(),
            batch_size: 1_000,
            channel_depth: 10,
            workers: 6,
            persist: true,
            formats: vec![OutputFormat::Yaml, OutputFormat::Json],
            parallel_transform: true,
            publish_timeout: Duration::from_secs(5),
            publish_retries: 3,
            publish_backoff: Duration::from_secs(1),
            poll_interval: Duration::from_secs(5),
            write_retries: 3,
            write_backoff: Duration::from_millis(50),
            flush_on_abort: false,
            progress_interval: Duration::from_secs(5),
        }
    }
}

impl ImportConfig {
    /// Creates a config for a statistics-only run (nothing is written).
    pub fn dry_run() -> Self {
        Self {
            persist: false,
            ..Self::default()
        }
    }

    /// Checks that sizes and counts are usable.
    pub fn validate(&self) -> ImportResult<()> {
        if self.record_tag.trim().is_empty() {
            return Err(ImportError::InvalidConfig(
                "record tag must not be empty".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ImportError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.channel_depth == 0 {
            return Err(ImportError::InvalidConfig(
                "channel depth must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ImportError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.write_retries == 0 || self.publish_retries == 0 {
            return Err(ImportError::InvalidConfig(
                "retry counts must be at least 1".to_string(),
            ));
        }
        if self.persist && self.formats.is_empty() {
            return Err(ImportError::InvalidConfig(
                "at least one output format is required when persisting".to_string(),
            ));
        }
        Ok(())
    }
}

/// Statistics from an import run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportStats {
    /// Records read from the source.
    pub records_read: usize,
    /// Records transformed by workers.
    pub records_transformed: usize,
    /// Documents written to every output target.
    pub documents_persisted: usize,
    /// Document files written across all targets.
    pub files_written: usize,
    /// Records without an organisation code (not persisted).
    pub missing_identity: usize,
    /// Records without a primary role (stored under the placeholder).
    pub unresolved_classification: usize,
    /// Batches handed to the queue.
    pub batches_published: usize,
    /// Batches fully processed by workers.
    pub batches_processed: usize,
    /// Distinct organisation codes in the summary index.
    pub distinct_identities: usize,
    /// Records per resolved primary role.
    pub role_counts: BTreeMap<String, usize>,
    /// Wall-clock time of the run in milliseconds.
    pub elapsed_ms: u64,
}

impl ImportStats {
    /// Returns the average throughput in records per second.
    pub fn records_per_second(&self) -> f64 {
        if self.elapsed_ms == 0 {
            0.0
        } else {
            self.records_transformed as f64 / (self.elapsed_ms as f64 / 1000.0)
        }
    }
}
