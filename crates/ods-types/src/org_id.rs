//! ODS organisation identifier type.
//!
//! This module provides a type alias for ODS organisation codes, taken from
//! the `extension` attribute of an organisation's `OrgId` element.

/// An ODS organisation code (for example `RXA` or `Y01234`).
///
/// Codes are opaque strings; they are used as output file stems and as the
/// aggregation key for summary entries.
///
/// # Examples
///
/// ```
/// use ods_types::OrgId;
///
/// let trust: OrgId = "RXA".to_string();
/// assert_eq!(trust.len(), 3);
/// ```
pub type OrgId = String;
