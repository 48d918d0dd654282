//! Import orchestration.
//!
//! An [`Importer`] runs one producer and a fixed pool of workers around a
//! bounded queue, then flushes the summary index once every worker has
//! finished:
//!
//! ```text
//! reader ─▶ producer ─▶ [bounded queue, depth K] ─▶ worker × W ─▶ targets
//!                                                       │
//!                                                       ▼
//!                                              summary aggregator ─▶ flush
//! ```

use std::io::BufRead;
use std::thread;
use std::time::Instant;

use crossbeam_channel::bounded;
use tracing::{error, info, warn};

use crate::aggregator::{FlushReport, SummaryAggregator};
use crate::batch::{Producer, ProducerReport};
use crate::cancel::CancellationController;
use crate::loader::{format_bytes, prepare_output_targets, resolve_source, source_size};
use crate::reader::{RawRecord, RecordReader};
use crate::sink::OutputTarget;
use crate::stats::RunCounters;
use crate::types::{ImportConfig, ImportError, ImportResult, ImportStats};
use crate::worker::{Worker, WorkerContext, WorkerReport};

/// How a run that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every record was read and processed.
    Completed,
    /// The run was cancelled and drained; the output is partial.
    Interrupted,
}

/// Result of a run that did not fail.
#[derive(Debug, Clone)]
pub struct ImportReport {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Counters of the run.
    pub stats: ImportStats,
    /// Summary flush result; `None` on a dry run or a forced stop.
    pub flush: Option<FlushReport>,
    /// Producer side of the run.
    pub producer: ProducerReport,
    /// One report per worker.
    pub workers: Vec<WorkerReport>,
}

/// Runs imports with one configuration.
///
/// # Example
///
/// ```ignore
/// use ods_loader::{CancellationController, ImportConfig, Importer};
///
/// let importer = Importer::new(ImportConfig::default())?;
/// let report = importer.run(&CancellationController::new())?;
/// println!("{} documents", report.stats.documents_persisted);
/// ```
#[derive(Debug)]
pub struct Importer {
    config: ImportConfig,
    targets: Vec<OutputTarget>,
}

impl Importer {
    /// Validates the configuration and creates the output roots.
    ///
    /// # Errors
    /// Returns an error for an invalid configuration or if an output root
    /// cannot be created.
    pub fn new(config: ImportConfig) -> ImportResult<Self> {
        config.validate()?;
        let targets = if config.persist {
            prepare_output_targets(&config)?
        } else {
            Vec::new()
        };
        Ok(Self { config, targets })
    }

    /// Creates an importer writing to the given targets instead of the
    /// configured formats.
    pub fn with_targets(config: ImportConfig, targets: Vec<OutputTarget>) -> ImportResult<Self> {
        config.validate()?;
        if config.persist && targets.is_empty() {
            return Err(ImportError::InvalidConfig(
                "at least one output target is required when persisting".to_string(),
            ));
        }
        Ok(Self { config, targets })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Returns the output targets.
    pub fn targets(&self) -> &[OutputTarget] {
        &self.targets
    }

    /// Imports the configured source file.
    ///
    /// # Errors
    /// Returns the first fatal error of the run.
    pub fn run(&self, controller: &CancellationController) -> ImportResult<ImportReport> {
        let source = resolve_source(&self.config.source)?;
        let size = source_size(&source)?;
        info!(
            source = %source.display(),
            size = %format_bytes(size),
            "starting import"
        );

        let reader = RecordReader::from_path(&source, &self.config.record_tag)?;
        self.run_records(reader, controller)
    }

    /// Imports from any buffered byte stream.
    ///
    /// # Errors
    /// Returns the first fatal error of the run.
    pub fn run_reader<R: BufRead>(
        &self,
        reader: R,
        controller: &CancellationController,
    ) -> ImportResult<ImportReport> {
        let records = RecordReader::from_reader(reader, &self.config.record_tag);
        self.run_records(records, controller)
    }

    /// Runs the pipeline over already-split records.
    ///
    /// The producer runs on the calling thread; workers run on scoped
    /// threads and are all joined before the summary index is flushed.
    ///
    /// # Errors
    /// Returns the first fatal error of the run, producer errors first.
    pub fn run_records<I>(
        &self,
        records: I,
        controller: &CancellationController,
    ) -> ImportResult<ImportReport>
    where
        I: IntoIterator<Item = ImportResult<RawRecord>>,
    {
        let start = Instant::now();
        let counters = RunCounters::new();
        let aggregator = SummaryAggregator::new();
        let (sender, receiver) = bounded(self.config.channel_depth);

        let context = WorkerContext {
            config: &self.config,
            controller,
            counters: &counters,
            aggregator: &aggregator,
            targets: &self.targets,
        };

        info!(
            workers = self.config.workers,
            batch_size = self.config.batch_size,
            channel_depth = self.config.channel_depth,
            persist = self.config.persist,
            "pipeline starting"
        );

        let (producer_result, worker_results) = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.config.workers);
            let mut spawn_error = None;

            for id in 0..self.config.workers {
                let worker = Worker::new(id, receiver.clone(), context);
                let spawned = thread::Builder::new()
                    .name(format!("ods-worker-{id}"))
                    .spawn_scoped(scope, move || worker.run());
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        controller.abort();
                        spawn_error = Some(ImportError::Io(e));
                        break;
                    }
                }
            }
            drop(receiver);

            let producer_result = match spawn_error {
                Some(e) => {
                    drop(sender);
                    Err(e)
                }
                None => Producer::new(sender, &self.config, controller, &counters).run(records),
            };

            let worker_results: Vec<ImportResult<WorkerReport>> = handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        controller.abort();
                        Err(ImportError::ThreadPanicked("worker"))
                    })
                })
                .collect();

            (producer_result, worker_results)
        });

        let mut first_error = None;
        let producer = match producer_result {
            Ok(report) => report,
            Err(e) => {
                first_error = Some(e);
                ProducerReport::default()
            }
        };
        let mut workers = Vec::with_capacity(worker_results.len());
        for result in worker_results {
            match result {
                Ok(report) => workers.push(report),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        let distinct_identities = aggregator.len();

        if let Some(error) = first_error {
            if self.config.flush_on_abort && self.config.persist {
                warn!("flushing partial summary index after a fatal error");
                if let Err(flush_error) = aggregator.flush(&self.targets) {
                    warn!(error = %flush_error, "partial summary flush failed");
                }
            }
            let stats = counters.snapshot(start.elapsed(), distinct_identities);
            error!(
                error = %error,
                records_read = stats.records_read,
                documents = stats.documents_persisted,
                "import aborted"
            );
            return Err(error);
        }

        // A forced stop skips the flush; a drain still flushes.
        let flush = if self.config.persist && !controller.is_aborting() {
            Some(aggregator.flush(&self.targets)?)
        } else {
            None
        };

        let outcome = if controller.is_cancelled() {
            RunOutcome::Interrupted
        } else {
            RunOutcome::Completed
        };
        let stats = counters.snapshot(start.elapsed(), distinct_identities);

        info!(
            outcome = ?outcome,
            records = stats.records_read,
            documents = stats.documents_persisted,
            elapsed_ms = stats.elapsed_ms,
            "import finished"
        );

        Ok(ImportReport {
            outcome,
            stats,
            flush,
            producer,
            workers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{DocumentSink, JsonSink, OutputFormat, WritePolicy};
    use ods_types::well_known::UNKNOWN;
    use ods_types::Value;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const THREE_RECORDS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <OrgRefData><Organisations>
          <Organisation>
            <Name>PRIMARY ORG</Name><OrgId extension="P1"/><Status value="Active"/>
            <Roles><Role id="A" primaryRole="true"/><Role id="B"/></Roles>
          </Organisation>
          <Organisation>
            <Name>UNRESOLVED ORG</Name><OrgId extension="U1"/><Status value="Active"/>
            <Roles><Role id="B"/></Roles>
          </Organisation>
          <Organisation>
            <Name>ANONYMOUS ORG</Name><Status value="Active"/>
            <Roles><Role id="A" primaryRole="true"/></Roles>
          </Organisation>
        </Organisations></OrgRefData>"#;

    fn config(root: &Path) -> ImportConfig {
        ImportConfig {
            output_root: root.join("output"),
            batch_size: 2,
            channel_depth: 1,
            workers: 2,
            poll_interval: Duration::from_millis(10),
            publish_timeout: Duration::from_millis(10),
            publish_backoff: Duration::from_millis(10),
            ..Default::default()
        }
    }

    fn read_summary(path: &Path) -> Value {
        JsonSink.read(path).unwrap()
    }

    #[test]
    fn test_three_record_scenario() {
        let dir = TempDir::new().unwrap();
        let importer = Importer::new(config(dir.path())).unwrap();
        let controller = CancellationController::new();

        let report = importer
            .run_reader(THREE_RECORDS.as_bytes(), &controller)
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.stats.records_read, 3);
        assert_eq!(report.stats.documents_persisted, 2);
        assert_eq!(report.stats.files_written, 4);
        assert_eq!(report.stats.unresolved_classification, 1);
        assert_eq!(report.stats.missing_identity, 1);
        assert_eq!(report.stats.distinct_identities, 2);

        let json = dir.path().join("output").join("json");
        assert!(json.join("Active/A/P1.json").exists());
        assert!(json.join("Active/Unknown/U1.json").exists());
        assert!(dir.path().join("output/yaml/Active/A/P1.yaml").exists());

        let unresolved = read_summary(&json.join("Active").join(UNKNOWN).join("summary.json"));
        assert_eq!(unresolved.items().len(), 1);
        assert_eq!(
            unresolved.items()[0].get("org_id").and_then(Value::as_str),
            Some("U1")
        );
        let primary = read_summary(&json.join("Active/A/summary.json"));
        assert_eq!(primary.items().len(), 1);

        let flush = report.flush.unwrap();
        assert_eq!(flush.groups, 2);
        assert_eq!(flush.files_written, 4);
    }

    #[test]
    fn test_missing_roles_aborts_without_summaries() {
        let dir = TempDir::new().unwrap();
        let importer = Importer::new(ImportConfig {
            workers: 1,
            ..config(dir.path())
        })
        .unwrap();
        let controller = CancellationController::new();

        let xml = r#"<Root>
            <Organisation><OrgId extension="A1"/><Roles><Role id="A" primaryRole="true"/></Roles></Organisation>
            <Organisation><OrgId extension="A2"/><Roles><Role id="A" primaryRole="true"/></Roles></Organisation>
            <Organisation><OrgId extension="A3"/><Status value="Active"/></Organisation>
        </Root>"#;

        let result = importer.run_reader(xml.as_bytes(), &controller);
        assert!(matches!(
            result,
            Err(ImportError::MissingRequiredSection {
                record: 3,
                section: "Roles"
            })
        ));
        assert!(controller.is_aborting());

        let summaries = count_files(&dir.path().join("output"), "summary.json");
        assert_eq!(summaries, 0);
    }

    #[test]
    fn test_flush_on_abort_writes_partial_summary() {
        let dir = TempDir::new().unwrap();
        let importer = Importer::new(ImportConfig {
            workers: 1,
            flush_on_abort: true,
            ..config(dir.path())
        })
        .unwrap();

        let xml = r#"<Root>
            <Organisation><OrgId extension="A1"/><Roles><Role id="A" primaryRole="true"/></Roles></Organisation>
            <Organisation><OrgId extension="A2"/><Roles><Role id="A" primaryRole="true"/></Roles></Organisation>
            <Organisation><OrgId extension="A3"/></Organisation>
        </Root>"#;

        let result = importer.run_reader(xml.as_bytes(), &CancellationController::new());
        assert!(result.is_err());
        assert_eq!(count_files(&dir.path().join("output"), "summary.json"), 1);
    }

    #[test]
    fn test_counting_identity() {
        let dir = TempDir::new().unwrap();
        let importer = Importer::new(config(dir.path())).unwrap();

        let mut xml = String::from("<Root>");
        for i in 0..25 {
            if i % 5 == 0 {
                xml.push_str(r#"<Organisation><Roles><Role id="A" primaryRole="true"/></Roles></Organisation>"#);
            } else {
                xml.push_str(&format!(
                    r#"<Organisation><OrgId extension="X{i}"/><Roles><Role id="A" primaryRole="true"/></Roles></Organisation>"#
                ));
            }
        }
        xml.push_str("</Root>");

        let report = importer
            .run_reader(xml.as_bytes(), &CancellationController::new())
            .unwrap();
        let stats = report.stats;
        assert_eq!(stats.records_read, 25);
        assert_eq!(stats.records_transformed, 25);
        assert_eq!(stats.documents_persisted + stats.missing_identity, stats.records_read);
        assert_eq!(stats.batches_published, 13);
        assert_eq!(stats.batches_processed, 13);
        assert_eq!(
            report.workers.iter().map(|w| w.documents_written).sum::<usize>(),
            20
        );
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let importer = Importer::new(ImportConfig {
            persist: false,
            ..config(dir.path())
        })
        .unwrap();

        let report = importer
            .run_reader(THREE_RECORDS.as_bytes(), &CancellationController::new())
            .unwrap();
        assert_eq!(report.stats.records_transformed, 3);
        assert_eq!(report.stats.documents_persisted, 0);
        assert_eq!(report.stats.distinct_identities, 2);
        assert!(report.flush.is_none());
        assert!(!dir.path().join("output").exists());
    }

    #[test]
    fn test_cancelled_run_is_interrupted() {
        let dir = TempDir::new().unwrap();
        let importer = Importer::new(config(dir.path())).unwrap();
        let controller = CancellationController::new();
        controller.signal();

        let report = importer
            .run_reader(THREE_RECORDS.as_bytes(), &controller)
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Interrupted);
        assert_eq!(report.stats.records_read, 0);
        assert_eq!(report.flush, Some(FlushReport::default()));
    }

    #[test]
    fn test_interrupt_mid_run_drains_published_batches() {
        let dir = TempDir::new().unwrap();
        let importer = Importer::new(ImportConfig {
            formats: vec![OutputFormat::Json],
            ..config(dir.path())
        })
        .unwrap();
        let controller = CancellationController::new();

        let mut xml = String::from("<Root>");
        for i in 1..=7 {
            xml.push_str(&format!(
                r#"<Organisation><OrgId extension="A{i}"/><Status value="Active"/><Roles><Role id="RO1" primaryRole="true"/></Roles></Organisation>"#
            ));
        }
        xml.push_str("</Root>");

        // Ctrl+C arrives while record 5 is being read
        let records = RecordReader::from_reader(xml.as_bytes(), "Organisation")
            .enumerate()
            .map(|(index, record)| {
                if index == 4 {
                    controller.signal();
                }
                record
            });

        let report = importer.run_records(records, &controller).unwrap();
        assert_eq!(report.outcome, RunOutcome::Interrupted);
        assert!(!controller.is_aborting());
        assert_eq!(report.stats.records_read, 5);
        assert_eq!(report.producer.batches_published, 2);
        assert_eq!(report.producer.records_discarded, 1);
        assert!(report.producer.end_of_input_sent);
        assert_eq!(report.stats.documents_persisted, 4);

        let group = dir.path().join("output/json/Active/RO1");
        for i in 1..=4 {
            assert!(group.join(format!("A{i}.json")).exists());
        }
        assert!(!group.join("A5.json").exists());

        let summary = read_summary(&group.join("summary.json"));
        assert_eq!(summary.items().len(), 4);
        assert_eq!(report.flush.unwrap().entries, 4);
    }

    #[test]
    fn test_with_targets_writes_only_given_targets() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("custom");
        let target = OutputTarget::with_sink(&root, Arc::new(JsonSink), WritePolicy::default());
        let importer = Importer::with_targets(config(dir.path()), vec![target]).unwrap();
        assert_eq!(importer.targets().len(), 1);

        let report = importer
            .run_reader(THREE_RECORDS.as_bytes(), &CancellationController::new())
            .unwrap();
        assert_eq!(report.stats.files_written, 2);
        assert!(root.join("Active/A/P1.json").exists());
        assert!(root.join("Active/A/summary.json").exists());
        assert!(!dir.path().join("output").exists());

        let result = Importer::with_targets(config(dir.path()), Vec::new());
        assert!(matches!(result, Err(ImportError::InvalidConfig(_))));
    }

    #[test]
    fn test_run_from_path() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("HSCOrgRefData_Full_20250324.xml");
        fs::write(&source, THREE_RECORDS).unwrap();

        let importer = Importer::new(ImportConfig {
            source: dir.path().to_path_buf(),
            formats: vec![OutputFormat::Json],
            ..config(dir.path())
        })
        .unwrap();
        let report = importer.run(&CancellationController::new()).unwrap();
        assert_eq!(report.stats.documents_persisted, 2);
        assert!(!dir.path().join("output").join("yaml").exists());
    }

    #[test]
    fn test_non_xml_source_fails() {
        let importer = Importer::new(ImportConfig::dry_run()).unwrap();
        let controller = CancellationController::new();

        let result = importer.run_reader("HSCOrgRefData,not,xml\n".as_bytes(), &controller);
        assert!(matches!(result, Err(ImportError::MalformedInput { .. })));
        assert!(controller.is_aborting());
    }

    #[test]
    fn test_ill_formed_text_does_not_abort() {
        let importer = Importer::new(ImportConfig::dry_run()).unwrap();
        let xml = r#"<Root>
            <Organisation><Name>SMITH & JONES</Name><OrgId extension="S1"/><Roles><Role id="A" primaryRole="true"/></Roles></Organisation>
            <Organisation><Name>C</Name><OrgId extension="S2"/><Roles><Role id="A" primaryRole="true"/></Roles></Organisation>
        </Root>"#;

        let report = importer
            .run_reader(xml.as_bytes(), &CancellationController::new())
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.stats.records_read, 2);
        assert_eq!(report.stats.distinct_identities, 2);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = Importer::new(ImportConfig {
            workers: 0,
            ..ImportConfig::dry_run()
        });
        assert!(matches!(result, Err(ImportError::InvalidConfig(_))));
    }

    fn count_files(root: &Path, name: &str) -> usize {
        let Ok(entries) = fs::read_dir(root) else {
            return 0;
        };
        entries
            .flatten()
            .map(|entry| {
                let path = entry.path();
                if path.is_dir() {
                    count_files(&path, name)
                } else {
                    usize::from(path.file_name().is_some_and(|n| n == name))
                }
            })
            .sum()
    }
}
