//! # ods-types
//!
//! Type definitions for NHS ODS organisation reference data.
//!
//! This crate provides the document model produced when an `Organisation`
//! record from an `HSCOrgRefData` XML release is transformed: the shape-aware
//! [`Value`] tree, the [`ClassificationKey`] used to group output, the
//! [`Metadata`] block and the flat [`SummaryEntry`] projection.
//!
//! ## Features
//!
//! - `serde` (default): Enables serialization/deserialization support via serde.
//!   Disable this feature for zero-dependency usage.
//!
//! ## Usage
//!
//! ```rust
//! use ods_types::{push_field, well_known, ClassificationKey, Fields, Value};
//!
//! // Repeated child elements promote to a sequence
//! let mut roles = Fields::new();
//! push_field(&mut roles, well_known::ROLE.to_string(), Value::scalar("RO197"));
//! push_field(&mut roles, well_known::ROLE.to_string(), Value::scalar("RO57"));
//! assert!(roles[well_known::ROLE].is_sequence());
//!
//! // Missing attributes resolve to the placeholder
//! let key = ClassificationKey::new("Active", well_known::UNKNOWN);
//! assert!(!key.has_primary_role());
//! ```

#![warn(missing_docs)]

mod document;
mod org_id;
mod summary;
mod value;
pub mod well_known;

// Re-export all public types at crate root
pub use document::{path_component, ClassificationKey, Metadata, TransformedDocument};
pub use org_id::OrgId;
pub use summary::SummaryEntry;
pub use value::{push_field, Fields, Value};
