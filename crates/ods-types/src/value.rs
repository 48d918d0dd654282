//! Structured document values.
//!
//! A transformed record is a tree of [`Value`]s. The same field can be a
//! scalar in one record, a mapping in another and a sequence when its tag
//! repeats, so the shape is carried explicitly in the variant instead of
//! being inspected at runtime.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Named fields of a [`Value::Mapping`].
pub type Fields = BTreeMap<String, Value>;

/// A node in a transformed document.
///
/// # Examples
///
/// ```
/// use ods_types::{push_field, Fields, Value};
///
/// let mut fields = Fields::new();
/// push_field(&mut fields, "Role".to_string(), Value::scalar("RO197"));
/// push_field(&mut fields, "Role".to_string(), Value::scalar("RO76"));
///
/// let roles = fields.get("Role").unwrap();
/// assert_eq!(roles.items().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Text content or an attribute value.
    Scalar(String),
    /// Attributes and child elements keyed by name.
    Mapping(Fields),
    /// Repeated child elements, in source order.
    Sequence(Vec<Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Mapping(Fields::new())
    }
}

impl Value {
    /// Creates a scalar value.
    pub fn scalar(text: impl Into<String>) -> Self {
        Value::Scalar(text.into())
    }

    /// Creates an empty mapping.
    pub fn mapping() -> Self {
        Self::default()
    }

    /// Returns the text of a scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the fields of a mapping.
    pub fn as_mapping(&self) -> Option<&Fields> {
        match self {
            Value::Mapping(fields) => Some(fields),
            _ => None,
        }
    }

    /// Returns the items of a sequence.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Returns true if this value is a sequence.
    pub fn is_sequence(&self) -> bool {
        matches!(self, Value::Sequence(_))
    }

    /// Looks up a field of a mapping.
    ///
    /// Returns `None` for scalars and sequences.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_mapping().and_then(|fields| fields.get(key))
    }

    /// Follows a path of field names through nested mappings.
    pub fn pointer(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(self, |value, key| value.get(key))
    }

    /// Views this value as a list: the items of a sequence, or a
    /// one-element slice holding the value itself.
    pub fn items(&self) -> &[Value] {
        match self {
            Value::Sequence(items) => items,
            other => std::slice::from_ref(other),
        }
    }

    /// Wraps a non-sequence value into a one-element sequence.
    pub fn ensure_sequence(&mut self) {
        if !self.is_sequence() {
            let single = std::mem::take(self);
            *self = Value::Sequence(vec![single]);
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Scalar(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Scalar(text)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::Sequence(items.into_iter().map(Value::Scalar).collect())
    }
}

impl From<Fields> for Value {
    fn from(fields: Fields) -> Self {
        Value::Mapping(fields)
    }
}

/// Inserts a field, promoting an existing value of the same name to a
/// sequence and appending.
///
/// Once a key holds a sequence every later value with that key is appended,
/// so repeated child elements are never dropped.
pub fn push_field(fields: &mut Fields, key: String, value: Value) {
    match fields.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(value);
        }
        Entry::Occupied(mut slot) => match slot.get_mut() {
            Value::Sequence(items) => items.push(value),
            existing => {
                let first = std::mem::take(existing);
                *existing = Value::Sequence(vec![first, value]);
            }
        },
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use std::fmt;

    use serde::de::{MapAccess, SeqAccess, Visitor};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{Fields, Value};

    impl Serialize for Value {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                Value::Scalar(text) => serializer.serialize_str(text),
                Value::Mapping(fields) => fields.serialize(serializer),
                Value::Sequence(items) => items.serialize(serializer),
            }
        }
    }

    struct ValueVisitor;

    impl<'de> Visitor<'de> for ValueVisitor {
        type Value = Value;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a scalar, a mapping or a sequence")
        }

        fn visit_str<E>(self, v: &str) -> Result<Value, E> {
            Ok(Value::Scalar(v.to_string()))
        }

        fn visit_string<E>(self, v: String) -> Result<Value, E> {
            Ok(Value::Scalar(v))
        }

        // Self-describing formats may type numbers and booleans; documents
        // only ever hold text, so fold them back.
        fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
            Ok(Value::Scalar(v.to_string()))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
            Ok(Value::Scalar(v.to_string()))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
            Ok(Value::Scalar(v.to_string()))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
            Ok(Value::Scalar(v.to_string()))
        }

        fn visit_unit<E>(self) -> Result<Value, E> {
            Ok(Value::Scalar(String::new()))
        }

        fn visit_none<E>(self) -> Result<Value, E> {
            Ok(Value::Scalar(String::new()))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
            let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(item) = seq.next_element()? {
                items.push(item);
            }
            Ok(Value::Sequence(items))
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
            let mut fields = Fields::new();
            while let Some((key, value)) = map.next_entry::<String, Value>()? {
                fields.insert(key, value);
            }
            Ok(Value::Mapping(fields))
        }
    }

    impl<'de> Deserialize<'de> for Value {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_any(ValueVisitor)
        }
    }
}
