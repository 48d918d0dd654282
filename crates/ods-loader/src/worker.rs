//! Batch workers.
//!
//! Each worker drains the work queue until it sees the end-of-input marker,
//! the queue disconnects or the run aborts. A batch is transformed as a
//! whole, grouped by classification key, recorded in the summary index and
//! then written to every output target.

use std::collections::BTreeMap;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use ods_types::{ClassificationKey, OrgId, Value};
use tracing::{debug, error, info, trace, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::aggregator::SummaryAggregator;
use crate::batch::{Batch, BatchMessage};
use crate::cancel::CancellationController;
use crate::sink::OutputTarget;
use crate::stats::RunCounters;
use crate::transform::{transform, Classification, TransformOutcome};
use crate::types::{ImportConfig, ImportResult};

/// Documents of one batch, grouped by where they are stored.
type GroupedBuffer = BTreeMap<ClassificationKey, Vec<(OrgId, Value)>>;

/// Shared state every worker of a run borrows.
#[derive(Clone, Copy)]
pub struct WorkerContext<'a> {
    /// Run configuration.
    pub config: &'a ImportConfig,
    /// Cancellation state.
    pub controller: &'a CancellationController,
    /// Run counters.
    pub counters: &'a RunCounters,
    /// Summary index.
    pub aggregator: &'a SummaryAggregator,
    /// Output targets; empty on a dry run.
    pub targets: &'a [OutputTarget],
}

/// What one worker did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker index.
    pub worker: usize,
    /// Batches processed.
    pub batches: usize,
    /// Documents written to every target.
    pub documents_written: usize,
}

/// One queue consumer.
pub struct Worker<'a> {
    id: usize,
    receiver: Receiver<BatchMessage>,
    context: WorkerContext<'a>,
}

impl<'a> Worker<'a> {
    /// Creates a worker.
    pub fn new(id: usize, receiver: Receiver<BatchMessage>, context: WorkerContext<'a>) -> Self {
        Self {
            id,
            receiver,
            context,
        }
    }

    /// Processes batches until the queue is finished or the run aborts.
    ///
    /// # Errors
    /// Returns the first transform or write error, after moving the run to
    /// aborting.
    pub fn run(self) -> ImportResult<WorkerReport> {
        let mut report = WorkerReport {
            worker: self.id,
            ..Default::default()
        };

        loop {
            if self.context.controller.is_aborting() {
                debug!(worker = self.id, "run aborting, worker stopping");
                break;
            }

            match self.receiver.recv_timeout(self.context.config.poll_interval) {
                Ok(BatchMessage::Batch(batch)) => {
                    let sequence = batch.sequence;
                    match self.process(batch) {
                        Ok(written) => {
                            report.batches += 1;
                            report.documents_written += written;
                        }
                        Err(e) => {
                            self.context.controller.abort();
                            error!(worker = self.id, sequence, error = %e, "batch failed");
                            return Err(e);
                        }
                    }
                }
                Ok(BatchMessage::EndOfInput) => {
                    debug!(worker = self.id, "end of input");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    trace!(worker = self.id, "queue empty");
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!(
            worker = self.id,
            batches = report.batches,
            documents = report.documents_written,
            "worker finished"
        );
        Ok(report)
    }

    /// Transforms, aggregates and persists one batch. Returns the number of
    /// documents written.
    fn process(&self, batch: Batch) -> ImportResult<usize> {
        let WorkerContext {
            config,
            counters,
            aggregator,
            targets,
            ..
        } = self.context;
        let start = Instant::now();
        let sequence = batch.sequence;

        let outcomes = transform_records(&batch, config.parallel_transform)?;
        drop(batch);

        let mut grouped = GroupedBuffer::new();
        for outcome in outcomes {
            counters.record_transformed();

            let TransformOutcome {
                document,
                summary,
                classification,
            } = outcome;

            if classification == Classification::Unresolved {
                counters.unresolved_classification();
                warn!(
                    org_id = document.org_id().unwrap_or("-"),
                    status = %document.key.status,
                    "unresolved classification, no primary role"
                );
            } else {
                counters.primary_role(&document.key.role_id);
            }

            let Some(org_id) = document.metadata.org_id.clone() else {
                counters.missing_identity();
                warn!(sequence, key = %document.key, "missing identity, record skipped");
                continue;
            };

            if let Some(summary) = summary {
                aggregator.record(summary);
            }
            grouped
                .entry(document.key.clone())
                .or_default()
                .push((org_id, document.to_value()));
        }

        let mut written = 0;
        if config.persist {
            for (key, documents) in &grouped {
                for target in targets {
                    target.ensure_group_dir(key)?;
                }
                for (org_id, value) in documents {
                    for target in targets {
                        target.write_document(key, org_id, value)?;
                        counters.file_written();
                    }
                    counters.document_persisted();
                    written += 1;
                }
            }
        }

        counters.batch_processed();
        info!(
            worker = self.id,
            sequence,
            groups = grouped.len(),
            documents = written,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "batch done"
        );
        Ok(written)
    }
}

#[cfg(feature = "parallel")]
fn transform_records(batch: &Batch, parallel: bool) -> ImportResult<Vec<TransformOutcome>> {
    if !parallel {
        return transform_sequential(batch);
    }
    batch
        .records
        .par_iter()
        .enumerate()
        .map(|(i, raw)| transform(raw, batch.first_ordinal + i))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn transform_records(batch: &Batch, _parallel: bool) -> ImportResult<Vec<TransformOutcome>> {
    transform_sequential(batch)
}

fn transform_sequential(batch: &Batch) -> ImportResult<Vec<TransformOutcome>> {
    batch
        .records
        .iter()
        .enumerate()
        .map(|(i, raw)| transform(raw, batch.first_ordinal + i))
        .collect()
}
