//! Per-run counters shared by the producer and the workers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::types::ImportStats;

/// Counters for one import run.
///
/// A fresh instance is built for every run; all updates are atomic
/// increments except the role histogram, which sits behind its own mutex.
#[derive(Debug, Default)]
pub struct RunCounters {
    records_read: AtomicUsize,
    records_transformed: AtomicUsize,
    documents_persisted: AtomicUsize,
    files_written: AtomicUsize,
    missing_identity: AtomicUsize,
    unresolved_classification: AtomicUsize,
    batches_published: AtomicUsize,
    batches_processed: AtomicUsize,
    role_counts: Mutex<BTreeMap<String, usize>>,
}

impl RunCounters {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transformed(&self) {
        self.records_transformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn document_persisted(&self) {
        self.documents_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn file_written(&self) {
        self.files_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn missing_identity(&self) {
        self.missing_identity.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unresolved_classification(&self) {
        self.unresolved_classification.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn batch_published(&self) {
        self.batches_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn batch_processed(&self) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn primary_role(&self, role_id: &str) {
        let mut counts = self
            .role_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *counts.entry(role_id.to_string()).or_default() += 1;
    }

    /// Returns the number of records read so far.
    pub fn records_read(&self) -> usize {
        self.records_read.load(Ordering::Relaxed)
    }

    /// Returns the number of documents persisted so far.
    pub fn documents_persisted(&self) -> usize {
        self.documents_persisted.load(Ordering::Relaxed)
    }

    /// Copies the counters into a stats value.
    pub fn snapshot(&self, elapsed: Duration, distinct_identities: usize) -> ImportStats {
        let role_counts = self
            .role_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        ImportStats {
            records_read: self.records_read.load(Ordering::Relaxed),
            records_transformed: self.records_transformed.load(Ordering::Relaxed),
            documents_persisted: self.documents_persisted.load(Ordering::Relaxed),
            files_written: self.files_written.load(Ordering::Relaxed),
            missing_identity: self.missing_identity.load(Ordering::Relaxed),
            unresolved_classification: self.unresolved_classification.load(Ordering::Relaxed),
            batches_published: self.batches_published.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            distinct_identities,
            role_counts,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}
