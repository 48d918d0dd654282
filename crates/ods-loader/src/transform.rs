//! Record transformation.
//!
//! Turns one raw `Organisation` subtree into a [`TransformedDocument`], its
//! classification and its summary projection. Transformation is a pure
//! function of the record: no I/O and no shared state, so records of a batch
//! can be transformed in any order and on any thread.

use ods_types::well_known::{
    EXTENSION, GEO_LOC, LOCATION, ORG_ID, POST_CODE, PRIMARY_ROLE, ROLE, ROLES, ROLE_ID, STATUS,
    STATUS_VALUE, UNKNOWN, UPRN,
};
use ods_types::{
    push_field, ClassificationKey, Fields, Metadata, SummaryEntry, TransformedDocument, Value,
};

use crate::reader::XmlElement;
use crate::types::{ImportError, ImportResult};

/// Whether a record's primary role could be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A role flagged `primaryRole="true"` with an `id` was found.
    Resolved,
    /// No usable primary role; the role component is the placeholder.
    Unresolved,
}

/// Everything derived from one record.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome {
    /// The structured document.
    pub document: TransformedDocument,
    /// Summary projection, present only when the record has an identity.
    pub summary: Option<SummaryEntry>,
    /// Whether the primary role was resolved.
    pub classification: Classification,
}

impl TransformOutcome {
    /// Returns the grouping key of the document.
    pub fn key(&self) -> &ClassificationKey {
        &self.document.key
    }
}

/// Folds an element into a value.
///
/// Attributes come first, then child elements, each keyed by local name. A
/// key seen twice is promoted to a sequence. An element with neither
/// attributes nor children becomes its trimmed text; `Roles.Role` is always
/// a sequence.
pub fn element_to_value(element: &XmlElement) -> Value {
    let mut fields = Fields::new();

    for (key, value) in &element.attributes {
        push_field(&mut fields, key.clone(), Value::scalar(value.as_str()));
    }
    for child in &element.children {
        push_field(&mut fields, child.name.clone(), element_to_value(child));
    }

    if fields.is_empty() {
        let text = element.text.trim();
        if !text.is_empty() {
            return Value::scalar(text);
        }
    }

    if element.name == ROLES {
        if let Some(roles) = fields.get_mut(ROLE) {
            roles.ensure_sequence();
        }
    }

    Value::Mapping(fields)
}

/// Transforms one record.
///
/// `ordinal` is the 1-based position of the record in the source and is
/// used only for error reporting.
///
/// # Errors
/// Returns [`ImportError::MissingRequiredSection`] if the record has no
/// `Roles` element.
pub fn transform(raw: &XmlElement, ordinal: usize) -> ImportResult<TransformOutcome> {
    let roles = raw
        .child(ROLES)
        .ok_or(ImportError::MissingRequiredSection {
            record: ordinal,
            section: ROLES,
        })?;

    let primary = roles
        .children_named(ROLE)
        .find(|role| role.attribute(PRIMARY_ROLE) == Some("true"));
    let role_id = primary
        .and_then(|role| role.attribute(ROLE_ID))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string();
    let classification = if role_id == UNKNOWN {
        Classification::Unresolved
    } else {
        Classification::Resolved
    };

    let status = raw
        .child(STATUS)
        .and_then(|status| status.attribute(STATUS_VALUE))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string();

    let location = raw.find(&[GEO_LOC, LOCATION]);
    let location_text = |name: &str| {
        location
            .and_then(|location| location.child_text(name))
            .unwrap_or(UNKNOWN)
            .to_string()
    };

    let org_id = raw
        .child(ORG_ID)
        .and_then(|id| id.attribute(EXTENSION))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let metadata = Metadata {
        org_id,
        status: status.clone(),
        role_id: role_id.clone(),
        post_code: location_text(POST_CODE),
        uprn: location_text(UPRN),
    };

    let document = TransformedDocument {
        body: element_to_value(raw),
        key: ClassificationKey::new(status, role_id),
        metadata,
    };
    let summary = SummaryEntry::from_document(&document);

    Ok(TransformOutcome {
        document,
        summary,
        classification,
    })
}
