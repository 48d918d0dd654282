//! Run-wide summary index.
//!
//! Workers feed one [`SummaryEntry`] per identified document into the
//! [`SummaryAggregator`]; at the end of a successful run it is consumed by
//! [`SummaryAggregator::flush`], which writes one summary file per group.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use ods_types::{ClassificationKey, OrgId, SummaryEntry, Value};
use tracing::{debug, info};

use crate::sink::OutputTarget;
use crate::types::ImportResult;

/// Thread-safe upsert map from organisation code to summary entry.
///
/// A later entry for the same code replaces the earlier one.
#[derive(Debug, Default)]
pub struct SummaryAggregator {
    entries: Mutex<HashMap<OrgId, SummaryEntry>>,
}

/// Result of flushing the summary index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Number of `(status, role)` groups.
    pub groups: usize,
    /// Number of entries across all groups.
    pub entries: usize,
    /// Summary files written across all targets.
    pub files_written: usize,
    /// Time spent flushing in milliseconds.
    pub elapsed_ms: u64,
}

impl SummaryAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for its organisation code.
    ///
    /// Returns the replaced entry, if any.
    pub fn record(&self, entry: SummaryEntry) -> Option<SummaryEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(entry.org_id.clone(), entry)
    }

    /// Returns the number of distinct organisation codes.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Partitions the entries by classification key.
    ///
    /// Every entry lands in exactly one group; entries within a group are
    /// ordered by organisation code.
    pub fn grouped(&self) -> BTreeMap<ClassificationKey, Vec<SummaryEntry>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let mut groups: BTreeMap<ClassificationKey, Vec<SummaryEntry>> = BTreeMap::new();
        for entry in entries.values() {
            groups.entry(entry.key()).or_default().push(entry.clone());
        }
        for group in groups.values_mut() {
            group.sort_by(|a, b| a.org_id.cmp(&b.org_id));
        }
        groups
    }

    /// Writes one summary file per group to every target.
    ///
    /// Consumes the aggregator, so a run can flush at most once. Flushing an
    /// empty aggregator writes nothing.
    ///
    /// # Errors
    /// Returns the first directory or write error.
    pub fn flush(self, targets: &[OutputTarget]) -> ImportResult<FlushReport> {
        let start = Instant::now();
        let groups = self.grouped();

        if groups.is_empty() {
            debug!("summary index is empty, nothing to flush");
            return Ok(FlushReport::default());
        }

        let mut report = FlushReport {
            groups: groups.len(),
            entries: groups.values().map(Vec::len).sum(),
            ..Default::default()
        };

        for (key, entries) in &groups {
            let value = Value::Sequence(entries.iter().map(SummaryEntry::to_value).collect());
            for target in targets {
                target.ensure_group_dir(key)?;
                let path = target.write_summary(key, &value)?;
                debug!(path = %path.display(), entries = entries.len(), "summary written");
                report.files_written += 1;
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            groups = report.groups,
            entries = report.entries,
            files = report.files_written,
            elapsed_ms = report.elapsed_ms,
            "summary index flushed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{OutputFormat, WritePolicy};
    use ods_types::well_known::UNKNOWN;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn entry(org_id: &str, status: &str, role: &str, name: &str) -> SummaryEntry {
        SummaryEntry {
            org_id: org_id.to_string(),
            name: name.to_string(),
            primary_role_id: role.to_string(),
            role_ids: vec![role.to_string()],
            status: status.to_string(),
            post_code: UNKNOWN.to_string(),
            uprn: UNKNOWN.to_string(),
        }
    }

    #[test]
    fn test_last_write_wins() {
        let aggregator = SummaryAggregator::new();
        assert!(aggregator.record(entry("RR8", "Active", "RO197", "OLD")).is_none());

        let replaced = aggregator.record(entry("RR8", "Inactive", "RO197", "NEW"));
        assert_eq!(replaced.unwrap().name, "OLD");
        assert_eq!(aggregator.len(), 1);

        let groups = aggregator.grouped();
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[&ClassificationKey::new("Inactive", "RO197")][0].name,
            "NEW"
        );
    }

    #[test]
    fn test_grouped_is_a_partition() {
        let aggregator = SummaryAggregator::new();
        aggregator.record(entry("C3", "Active", "RO177", "C"));
        aggregator.record(entry("A1", "Active", "RO177", "A"));
        aggregator.record(entry("B2", "Active", UNKNOWN, "B"));
        aggregator.record(entry("D4", "Inactive", "RO177", "D"));

        let groups = aggregator.grouped();
        let total: usize = groups.values().map(Vec::len).sum();
        assert_eq!(total, aggregator.len());
        assert_eq!(groups.len(), 3);

        let practices = &groups[&ClassificationKey::new("Active", "RO177")];
        let ids: Vec<_> = practices.iter().map(|e| e.org_id.as_str()).collect();
        assert_eq!(ids, vec!["A1", "C3"]);
    }

    #[test]
    fn test_concurrent_record() {
        let aggregator = Arc::new(SummaryAggregator::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || {
                    for i in 0..100 {
                        aggregator.record(entry(&format!("X{}", t * 100 + i), "Active", "RO1", "N"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(aggregator.len(), 400);
    }

    #[test]
    fn test_flush_writes_one_file_per_group_and_target() {
        let dir = TempDir::new().unwrap();
        let targets = vec![
            OutputTarget::new(dir.path().join("json"), OutputFormat::Json, WritePolicy::default()),
            OutputTarget::new(dir.path().join("yaml"), OutputFormat::Yaml, WritePolicy::default()),
        ];

        let aggregator = SummaryAggregator::new();
        aggregator.record(entry("A1", "Active", "RO177", "A"));
        aggregator.record(entry("B2", "Active", UNKNOWN, "B"));

        let report = aggregator.flush(&targets).unwrap();
        assert_eq!(report.groups, 2);
        assert_eq!(report.entries, 2);
        assert_eq!(report.files_written, 4);

        let key = ClassificationKey::new("Active", UNKNOWN);
        let written = targets[0].sink().read(&targets[0].summary_path(&key)).unwrap();
        assert_eq!(written.items().len(), 1);
        assert_eq!(
            written.items()[0].get("org_id").and_then(Value::as_str),
            Some("B2")
        );
        assert!(targets[1].summary_path(&key).exists());
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let dir = TempDir::new().unwrap();
        let targets = vec![OutputTarget::new(
            dir.path().join("json"),
            OutputFormat::Json,
            WritePolicy::default(),
        )];

        let report = SummaryAggregator::new().flush(&targets).unwrap();
        assert_eq!(report, FlushReport::default());
        assert!(!dir.path().join("json").exists());
    }
}
