//! Well-known element and attribute names in ODS organisation records.
//!
//! This module provides constants for the structural names the transformer
//! looks up in an `Organisation` subtree, plus the placeholder used whenever
//! one of them is missing.
//!
//! # Examples
//!
//! ```
//! use ods_types::well_known;
//!
//! assert_eq!(well_known::ORGANISATION, "Organisation");
//! assert_eq!(well_known::UNKNOWN, "Unknown");
//! ```

// =============================================================================
// Placeholders
// =============================================================================

/// Placeholder for any classification or location attribute that the source
/// record does not carry.
pub const UNKNOWN: &str = "Unknown";

// =============================================================================
// Record Boundary
// =============================================================================

/// Tag of one top-level record in an HSCOrgRefData file.
pub const ORGANISATION: &str = "Organisation";

// =============================================================================
// Identity
// =============================================================================

/// Element holding the organisation code.
pub const ORG_ID: &str = "OrgId";

/// Attribute of [`ORG_ID`] holding the organisation code itself.
pub const EXTENSION: &str = "extension";

/// Element holding the organisation's display name.
pub const NAME: &str = "Name";

// =============================================================================
// Classification
// =============================================================================

/// Element holding the lifecycle status (`Active` / `Inactive`).
pub const STATUS: &str = "Status";

/// Attribute of [`STATUS`] holding the status label.
pub const STATUS_VALUE: &str = "value";

/// Mandatory roles collection.
pub const ROLES: &str = "Roles";

/// One entry of the [`ROLES`] collection.
pub const ROLE: &str = "Role";

/// Attribute of [`ROLE`] holding the role code (for example `RO197`).
pub const ROLE_ID: &str = "id";

/// Attribute of [`ROLE`] flagging the primary role.
pub const PRIMARY_ROLE: &str = "primaryRole";

// =============================================================================
// Location
// =============================================================================

/// Geographic location wrapper element.
pub const GEO_LOC: &str = "GeoLoc";

/// Child of [`GEO_LOC`] holding the address fields.
pub const LOCATION: &str = "Location";

/// Post code text element inside [`LOCATION`].
pub const POST_CODE: &str = "PostCode";

/// Unique Property Reference Number text element inside [`LOCATION`].
pub const UPRN: &str = "UPRN";

// =============================================================================
// Output
// =============================================================================

/// Key under which the derived metadata block is attached to a document.
pub const METADATA: &str = "metadata";

/// File stem of the grouped summary list written into every group directory.
pub const SUMMARY_STEM: &str = "summary";
