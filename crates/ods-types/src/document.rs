//! Transformed organisation documents.
//!
//! This module provides [`TransformedDocument`], the structured form of one
//! `Organisation` record, together with the [`ClassificationKey`] that decides
//! where it is stored and the [`Metadata`] block attached to it on output.

use std::fmt;
use std::path::PathBuf;

use crate::value::{Fields, Value};
use crate::well_known::{self, UNKNOWN};
use crate::OrgId;

/// Grouping attributes of a document: lifecycle status and primary role.
///
/// Both components are always present; a missing source attribute resolves
/// to [`well_known::UNKNOWN`].
///
/// # Examples
///
/// ```
/// use ods_types::ClassificationKey;
///
/// let key = ClassificationKey::new("Active", "RO197");
/// assert_eq!(key.to_string(), "Active/RO197");
/// assert!(key.has_primary_role());
///
/// let unresolved = ClassificationKey::new("Active", ods_types::well_known::UNKNOWN);
/// assert!(!unresolved.has_primary_role());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassificationKey {
    /// Lifecycle status label (`Active`, `Inactive`, or the placeholder).
    pub status: String,
    /// Primary role code, or the placeholder.
    pub role_id: String,
}

impl ClassificationKey {
    /// Creates a key from its two components.
    pub fn new(status: impl Into<String>, role_id: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            role_id: role_id.into(),
        }
    }

    /// Returns true if the primary role was resolved.
    pub fn has_primary_role(&self) -> bool {
        self.role_id != UNKNOWN
    }

    /// Returns the key as relative directory components (`status/role_id`).
    ///
    /// Each component passes through [`path_component`], so a label can
    /// never escape the output root.
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(path_component(&self.status)).join(path_component(&self.role_id))
    }
}

impl fmt::Display for ClassificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.status, self.role_id)
    }
}

/// Turns a data-derived label into a single safe path component.
///
/// Path separators, `%` and control characters are percent-encoded, and the
/// relative components `.` and `..` are encoded as `%2E` and `%2E%2E`, so
/// distinct labels always map to distinct components. The one exception is
/// the empty label, which maps to the placeholder: both mean "not present".
///
/// ```rust
/// use ods_types::path_component;
///
/// assert_eq!(path_component("RO197"), "RO197");
/// assert_eq!(path_component("a/b"), "a%2Fb");
/// assert_eq!(path_component(".."), "%2E%2E");
/// ```
pub fn path_component(raw: &str) -> String {
    match raw {
        "" => UNKNOWN.to_string(),
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => {
            let mut component = String::with_capacity(raw.len());
            for c in raw.chars() {
                if matches!(c, '%' | '/' | '\\') || c.is_control() {
                    let mut utf8 = [0u8; 4];
                    for byte in c.encode_utf8(&mut utf8).bytes() {
                        component.push_str(&format!("%{byte:02X}"));
                    }
                } else {
                    component.push(c);
                }
            }
            component
        }
    }
}

/// Derived fields attached to every document under `metadata`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metadata {
    /// Organisation code, if the record carried one.
    pub org_id: Option<OrgId>,
    /// Lifecycle status label.
    pub status: String,
    /// Primary role code.
    pub role_id: String,
    /// Post code from `GeoLoc/Location`.
    pub post_code: String,
    /// UPRN from `GeoLoc/Location`.
    pub uprn: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            org_id: None,
            status: UNKNOWN.to_string(),
            role_id: UNKNOWN.to_string(),
            post_code: UNKNOWN.to_string(),
            uprn: UNKNOWN.to_string(),
        }
    }
}

impl Metadata {
    /// Returns the metadata block as a mapping value.
    ///
    /// `org_id` is omitted when the record has no identity.
    pub fn to_value(&self) -> Value {
        let mut fields = Fields::new();
        if let Some(org_id) = &self.org_id {
            fields.insert("org_id".to_string(), Value::scalar(org_id.as_str()));
        }
        fields.insert("status".to_string(), Value::scalar(self.status.as_str()));
        fields.insert("role_id".to_string(), Value::scalar(self.role_id.as_str()));
        fields.insert("post_code".to_string(), Value::scalar(self.post_code.as_str()));
        fields.insert("uprn".to_string(), Value::scalar(self.uprn.as_str()));
        Value::Mapping(fields)
    }
}

/// One transformed `Organisation` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedDocument {
    /// Attributes and child elements of the record, folded into values.
    pub body: Value,
    /// Where the document is grouped and stored.
    pub key: ClassificationKey,
    /// Derived identity and summary fields.
    pub metadata: Metadata,
}

impl TransformedDocument {
    /// Returns the organisation code, if any.
    pub fn org_id(&self) -> Option<&str> {
        self.metadata.org_id.as_deref()
    }

    /// Returns true if this document can be persisted and aggregated.
    pub fn has_identity(&self) -> bool {
        self.metadata.org_id.is_some()
    }

    /// Builds the persisted form: the body with the metadata block inserted
    /// under [`well_known::METADATA`].
    ///
    /// A body that is not a mapping (a text-only record) is stored under
    /// `value` next to the metadata.
    pub fn to_value(&self) -> Value {
        let mut fields = match &self.body {
            Value::Mapping(fields) => fields.clone(),
            other => {
                let mut fields = Fields::new();
                fields.insert("value".to_string(), other.clone());
                fields
            }
        };
        fields.insert(well_known::METADATA.to_string(), self.metadata.to_value());
        Value::Mapping(fields)
    }
}
