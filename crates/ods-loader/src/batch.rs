//! Batching producer.
//!
//! The producer pulls records from the reader, groups them into fixed-size
//! [`Batch`]es and publishes them on the bounded work queue. The queue depth
//! is the only backpressure mechanism: when workers fall behind, publishing
//! blocks and the producer stops pulling from the reader.

use std::mem;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{SendTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationController;
use crate::reader::RawRecord;
use crate::stats::RunCounters;
use crate::types::{ImportConfig, ImportResult};

/// A group of consecutive records.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// 0-based publication order.
    pub sequence: u64,
    /// 1-based source ordinal of the first record.
    pub first_ordinal: usize,
    /// The records, at most `batch_size` of them.
    pub records: Vec<RawRecord>,
}

impl Batch {
    /// Returns the number of records in the batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A message on the work queue.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchMessage {
    /// Records to process.
    Batch(Batch),
    /// No further batches will be published.
    EndOfInput,
}

/// What the producer did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerReport {
    /// Records pulled from the reader.
    pub records_read: usize,
    /// Batches accepted by the queue.
    pub batches_published: usize,
    /// Records read but dropped because of cancellation.
    pub records_discarded: usize,
    /// Whether the end-of-input marker reached the queue.
    pub end_of_input_sent: bool,
}

enum Publish {
    Sent,
    GaveUp,
    Disconnected,
}

/// Publishes batches of records on the work queue.
pub struct Producer<'a> {
    sender: Sender<BatchMessage>,
    config: &'a ImportConfig,
    controller: &'a CancellationController,
    counters: &'a RunCounters,
}

impl<'a> Producer<'a> {
    /// Creates a producer. The sender is dropped when [`Producer::run`]
    /// returns.
    pub fn new(
        sender: Sender<BatchMessage>,
        config: &'a ImportConfig,
        controller: &'a CancellationController,
        counters: &'a RunCounters,
    ) -> Self {
        Self {
            sender,
            config,
            controller,
            counters,
        }
    }

    /// Reads every record and publishes them in batches.
    ///
    /// Stops reading as soon as the run is cancelled; the batch being
    /// assembled at that point is discarded. Unless the run is aborting, the
    /// end-of-input marker is published last.
    ///
    /// # Errors
    /// Returns the first reader error, after moving the run to aborting.
    pub fn run<I>(self, records: I) -> ImportResult<ProducerReport>
    where
        I: IntoIterator<Item = ImportResult<RawRecord>>,
    {
        let batch_size = self.config.batch_size;
        let start = Instant::now();
        let mut last_progress = start;
        let mut report = ProducerReport::default();
        let mut pending: Vec<RawRecord> = Vec::with_capacity(batch_size);
        let mut first_ordinal = 1;
        let mut sequence = 0u64;
        let mut consumers_gone = false;

        let mut records = records.into_iter();
        loop {
            if self.controller.is_cancelled() {
                if !pending.is_empty() {
                    report.records_discarded += pending.len();
                    info!(
                        discarded = pending.len(),
                        "cancellation requested, discarding partial batch"
                    );
                    pending.clear();
                }
                break;
            }

            let record = match records.next() {
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    self.controller.abort();
                    error!(error = %e, records = report.records_read, "failed to read source");
                    return Err(e);
                }
                None => {
                    if !pending.is_empty() {
                        let batch = Batch {
                            sequence,
                            first_ordinal,
                            records: mem::take(&mut pending),
                        };
                        if let Publish::Disconnected = self.publish_batch(batch, &mut report) {
                            consumers_gone = true;
                        }
                    }
                    break;
                }
            };

            report.records_read += 1;
            self.counters.record_read();
            if pending.is_empty() {
                first_ordinal = report.records_read;
            }
            pending.push(record);

            if pending.len() >= batch_size {
                let batch = Batch {
                    sequence,
                    first_ordinal,
                    records: mem::replace(&mut pending, Vec::with_capacity(batch_size)),
                };
                match self.publish_batch(batch, &mut report) {
                    Publish::Sent => sequence += 1,
                    Publish::GaveUp => {}
                    Publish::Disconnected => {
                        consumers_gone = true;
                        break;
                    }
                }
            }

            if last_progress.elapsed() >= self.config.progress_interval {
                let secs = start.elapsed().as_secs_f64();
                let rate = if secs > 0.0 {
                    report.records_read as f64 / secs
                } else {
                    0.0
                };
                info!(
                    records = report.records_read,
                    batches = report.batches_published,
                    rate = %format!("{rate:.0}/s"),
                    "reading source"
                );
                last_progress = Instant::now();
            }
        }

        if consumers_gone {
            warn!("all workers have stopped, no end-of-input marker sent");
        } else if !self.controller.is_aborting() {
            let sent = self.publish(BatchMessage::EndOfInput, |controller| {
                controller.is_aborting()
            });
            report.end_of_input_sent = matches!(sent, Publish::Sent);
        }

        info!(
            records = report.records_read,
            batches = report.batches_published,
            discarded = report.records_discarded,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "producer finished"
        );
        Ok(report)
    }

    fn publish_batch(&self, batch: Batch, report: &mut ProducerReport) -> Publish {
        let len = batch.len();
        let sequence = batch.sequence;
        let outcome = self.publish(BatchMessage::Batch(batch), |controller| {
            controller.is_cancelled()
        });

        match outcome {
            Publish::Sent => {
                report.batches_published += 1;
                self.counters.batch_published();
                debug!(sequence, records = len, "batch published");
            }
            Publish::GaveUp => {
                report.records_discarded += len;
                info!(sequence, records = len, "cancelled while queue was full, batch discarded");
            }
            Publish::Disconnected => {
                report.records_discarded += len;
            }
        }
        outcome
    }

    /// Sends one message, waiting at most `publish_timeout` per attempt.
    ///
    /// After `publish_retries` consecutive timeouts the producer sleeps for
    /// `publish_backoff` and starts over. `give_up` is checked before every
    /// attempt.
    fn publish<F>(&self, message: BatchMessage, give_up: F) -> Publish
    where
        F: Fn(&CancellationController) -> bool,
    {
        let mut message = message;
        let mut failures = 0u32;

        loop {
            if give_up(self.controller) {
                return Publish::GaveUp;
            }

            match self
                .sender
                .send_timeout(message, self.config.publish_timeout)
            {
                Ok(()) => return Publish::Sent,
                Err(SendTimeoutError::Disconnected(_)) => return Publish::Disconnected,
                Err(SendTimeoutError::Timeout(returned)) => {
                    message = returned;
                    failures += 1;
                    debug!(failures, "queue full, publish timed out");

                    if failures >= self.config.publish_retries {
                        warn!(
                            attempts = failures,
                            backoff_ms = self.config.publish_backoff.as_millis() as u64,
                            "queue still full, backing off"
                        );
                        thread::sleep(self.config.publish_backoff);
                        failures = 0;
                    }
                }
            }
        }
    }
}
