//! # ods-loader
//!
//! Streaming batch importer for NHS ODS organisation reference data
//! (`HSCOrgRefData_*.xml`).
//!
//! The source is read forward-only, one `Organisation` record at a time,
//! grouped into batches and handed to a fixed pool of workers over a bounded
//! queue. Workers transform each record into a document, write it under
//! `<root>/<status>/<role_id>/<org_id>.<ext>` and feed a run-wide summary
//! index, which is flushed once as `<root>/<status>/<role_id>/summary.<ext>`
//! after every worker has finished.
//!
//! ## Features
//!
//! - `parallel` (default): transform the records of a batch on the rayon
//!   thread pool.
//!
//! ## Usage
//!
//! ```rust
//! use ods_loader::{CancellationController, ImportConfig, Importer, RunOutcome};
//!
//! let xml = r#"<Organisations>
//!   <Organisation>
//!     <Name>WEST PARK SURGERY</Name>
//!     <OrgId extension="B81001"/>
//!     <Status value="Active"/>
//!     <Roles><Role id="RO177" primaryRole="true"/></Roles>
//!   </Organisation>
//! </Organisations>"#;
//!
//! // Statistics only, nothing is written
//! let importer = Importer::new(ImportConfig::dry_run()).unwrap();
//! let report = importer
//!     .run_reader(xml.as_bytes(), &CancellationController::new())
//!     .unwrap();
//!
//! assert_eq!(report.outcome, RunOutcome::Completed);
//! assert_eq!(report.stats.role_counts["RO177"], 1);
//! ```

#![warn(missing_docs)]

pub mod aggregator;
pub mod batch;
pub mod cancel;
pub mod loader;
pub mod pipeline;
pub mod reader;
pub mod sink;
pub mod stats;
pub mod transform;
pub mod types;
pub mod worker;

// Re-export ods-types for convenience
pub use ods_types;

pub use aggregator::{FlushReport, SummaryAggregator};
pub use batch::{Batch, BatchMessage, Producer, ProducerReport};
pub use cancel::{CancellationController, RunState};
pub use loader::{format_bytes, resolve_source};
pub use pipeline::{ImportReport, Importer, RunOutcome};
pub use reader::{RawRecord, RecordReader, XmlElement};
pub use sink::{DocumentSink, JsonSink, OutputFormat, OutputTarget, WritePolicy, YamlSink};
pub use stats::RunCounters;
pub use transform::{transform, Classification, TransformOutcome};
pub use types::{ImportConfig, ImportError, ImportResult, ImportStats};
pub use worker::{Worker, WorkerContext, WorkerReport};
