//! Summary index entries.
//!
//! A [`SummaryEntry`] is the flat projection of one identified document that
//! ends up in the grouped `summary` files.

use crate::document::{ClassificationKey, TransformedDocument};
use crate::value::{Fields, Value};
use crate::well_known::{NAME, ROLE, ROLES, ROLE_ID, UNKNOWN};
use crate::OrgId;

/// Flat projection of a [`TransformedDocument`], keyed by organisation code.
///
/// # Examples
///
/// ```
/// use ods_types::{ClassificationKey, SummaryEntry};
///
/// let entry = SummaryEntry {
///     org_id: "RR8".to_string(),
///     name: "LEEDS TEACHING HOSPITALS NHS TRUST".to_string(),
///     primary_role_id: "RO197".to_string(),
///     role_ids: vec!["RO197".to_string(), "RO57".to_string()],
///     status: "Active".to_string(),
///     post_code: "LS9 7TF".to_string(),
///     uprn: "72656153".to_string(),
/// };
///
/// assert_eq!(entry.key(), ClassificationKey::new("Active", "RO197"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SummaryEntry {
    /// Organisation code.
    pub org_id: OrgId,
    /// Organisation name, or the placeholder.
    pub name: String,
    /// Primary role code, or the placeholder.
    pub primary_role_id: String,
    /// Every role code listed under `Roles`, primary or not, in source order.
    pub role_ids: Vec<String>,
    /// Lifecycle status label.
    pub status: String,
    /// Post code, or the placeholder.
    pub post_code: String,
    /// UPRN, or the placeholder.
    pub uprn: String,
}

impl SummaryEntry {
    /// Projects a document into a summary entry.
    ///
    /// Returns `None` when the document has no identity.
    pub fn from_document(document: &TransformedDocument) -> Option<Self> {
        let org_id = document.metadata.org_id.clone()?;

        let name = document
            .body
            .get(NAME)
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN)
            .to_string();

        let role_ids = document
            .body
            .pointer(&[ROLES, ROLE])
            .map(|roles| {
                roles
                    .items()
                    .iter()
                    .filter(|role| role.as_mapping().is_some())
                    .map(|role| {
                        role.get(ROLE_ID)
                            .and_then(Value::as_str)
                            .unwrap_or(UNKNOWN)
                            .to_string()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            org_id,
            name,
            primary_role_id: document.metadata.role_id.clone(),
            role_ids,
            status: document.metadata.status.clone(),
            post_code: document.metadata.post_code.clone(),
            uprn: document.metadata.uprn.clone(),
        })
    }

    /// Returns the group this entry is flushed into.
    pub fn key(&self) -> ClassificationKey {
        ClassificationKey::new(self.status.as_str(), self.primary_role_id.as_str())
    }

    /// Returns the entry as a mapping value.
    pub fn to_value(&self) -> Value {
        let mut fields = Fields::new();
        fields.insert("org_id".to_string(), Value::scalar(self.org_id.as_str()));
        fields.insert("name".to_string(), Value::scalar(self.name.as_str()));
        fields.insert(
            "primary_role_id".to_string(),
            Value::scalar(self.primary_role_id.as_str()),
        );
        fields.insert("role_ids".to_string(), Value::from(self.role_ids.clone()));
        fields.insert("status".to_string(), Value::scalar(self.status.as_str()));
        fields.insert("post_code".to_string(), Value::scalar(self.post_code.as_str()));
        fields.insert("uprn".to_string(), Value::scalar(self.uprn.as_str()));
        Value::Mapping(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Metadata;

    fn role(id: Option<&str>, primary: bool) -> Value {
        let mut fields = Fields::new();
        if let Some(id) = id {
            fields.insert("id".to_string(), Value::scalar(id));
        }
        if primary {
            fields.insert("primaryRole".to_string(), Value::scalar("true"));
        }
        Value::Mapping(fields)
    }

    fn document(org_id: Option<&str>, roles: Vec<Value>) -> TransformedDocument {
        let mut roles_fields = Fields::new();
        roles_fields.insert("Role".to_string(), Value::Sequence(roles));
        let mut body = Fields::new();
        body.insert("Name".to_string(), Value::scalar("WEST PARK SURGERY"));
        body.insert("Roles".to_string(), Value::Mapping(roles_fields));

        TransformedDocument {
            body: Value::Mapping(body),
            key: ClassificationKey::new("Active", "RO177"),
            metadata: Metadata {
                org_id: org_id.map(str::to_string),
                status: "Active".to_string(),
                role_id: "RO177".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_from_document_collects_all_roles() {
        let doc = document(
            Some("B81001"),
            vec![role(Some("RO177"), true), role(Some("RO76"), false), role(None, false)],
        );

        let entry = SummaryEntry::from_document(&doc).unwrap();
        assert_eq!(entry.org_id, "B81001");
        assert_eq!(entry.name, "WEST PARK SURGERY");
        assert_eq!(entry.primary_role_id, "RO177");
        assert_eq!(entry.role_ids, vec!["RO177", "RO76", UNKNOWN]);
        assert_eq!(entry.post_code, UNKNOWN);
        assert_eq!(entry.key(), doc.key);
    }

    #[test]
    fn test_from_document_without_identity() {
        let doc = document(None, vec![role(Some("RO177"), true)]);
        assert!(SummaryEntry::from_document(&doc).is_none());
    }

    #[test]
    fn test_to_value_role_ids_is_sequence() {
        let doc = document(Some("B81001"), vec![role(Some("RO177"), true)]);
        let value = SummaryEntry::from_document(&doc).unwrap().to_value();
        assert!(value.get("role_ids").unwrap().is_sequence());
        assert_eq!(value.get("org_id").and_then(Value::as_str), Some("B81001"));
    }
}
