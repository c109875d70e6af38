//! The opaque domain record every entity store holds.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::StoreError;

/// A domain entity as returned by the API: a JSON object with a stable `id`.
///
/// Records are deliberately untyped. Stores only need the id to reconcile
/// their lists; screens that want a typed view call
/// [`to_typed`](Record::to_typed). Numeric ids are normalized to their
/// decimal string form on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: String,
    fields: Map<String, Value>,
}

impl Record {
    /// Build a record from an id and a set of fields.
    ///
    /// Any `id` key in `fields` is overwritten with `id`.
    pub fn new(id: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        let id = id.into();
        fields.insert("id".to_owned(), Value::String(id.clone()));
        Self { id, fields }
    }

    /// Build a record from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Envelope`] if the value is not an object or
    /// carries no usable `id`.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        let Value::Object(fields) = value else {
            return Err(StoreError::Envelope(format!(
                "record must be a JSON object, got {}",
                kind_of(&value)
            )));
        };
        let id = fields
            .get("id")
            .and_then(id_string)
            .ok_or_else(|| StoreError::Envelope("record has no id".to_owned()))?;
        Ok(Self::new(id, fields))
    }

    /// Build a record from a JSON value, using `fallback_id` when the value
    /// carries no id of its own.
    ///
    /// Update responses frequently echo only the changed fields.
    pub(crate) fn from_value_with_id(value: Value, fallback_id: &str) -> Result<Self, StoreError> {
        match value {
            Value::Object(fields) => {
                let id = fields
                    .get("id")
                    .and_then(id_string)
                    .unwrap_or_else(|| fallback_id.to_owned());
                Ok(Self::new(id, fields))
            }
            other => Self::from_value(other),
        }
    }

    /// Serialize a typed DTO into a record.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` does not serialize to an object with an id.
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, StoreError> {
        Self::from_value(serde_json::to_value(value)?)
    }

    /// Deserialize the record into a typed DTO.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Json`] if the fields do not match `T`.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    /// The record's identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Look up a single field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// All fields, including `id`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Shallow-merge `other` into `self`.
    ///
    /// Fields present in `other` overwrite; fields absent from `other` are
    /// kept. The id of `self` never changes.
    pub fn merge(&mut self, other: &Record) {
        for (key, value) in &other.fields {
            if key == "id" {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Convert into the underlying JSON object.
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl TryFrom<Value> for Record {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_value_requires_object() {
        let err = Record::from_value(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn from_value_requires_id() {
        assert!(Record::from_value(json!({"title": "X"})).is_err());
        assert!(Record::from_value(json!({"id": ""})).is_err());
    }

    #[test]
    fn numeric_id_is_normalized_to_string() {
        let record = Record::from_value(json!({"id": 42, "name": "Ana"})).unwrap();
        assert_eq!(record.id(), "42");
        assert_eq!(record.get("id"), Some(&json!("42")));
    }

    #[test]
    fn merge_overwrites_returned_fields_and_keeps_the_rest() {
        let mut local = Record::from_value(json!({"id": "c1", "status": 1, "title": "X"})).unwrap();
        let server = Record::from_value(json!({"id": "c1", "status": 2})).unwrap();
        local.merge(&server);
        assert_eq!(
            local.into_value(),
            json!({"id": "c1", "status": 2, "title": "X"})
        );
    }

    #[test]
    fn merge_never_changes_id() {
        let mut local = Record::from_value(json!({"id": "a"})).unwrap();
        let other = Record::from_value(json!({"id": "b", "x": 1})).unwrap();
        local.merge(&other);
        assert_eq!(local.id(), "a");
        assert_eq!(local.get("x"), Some(&json!(1)));
    }

    #[test]
    fn fallback_id_used_when_body_has_none() {
        let record = Record::from_value_with_id(json!({"status": 3}), "c9").unwrap();
        assert_eq!(record.id(), "c9");
    }

    #[test]
    fn typed_view_reads_fields() {
        #[derive(serde::Deserialize)]
        struct View {
            id: String,
            title: String,
        }
        let record = Record::from_value(json!({"id": "c1", "title": "X", "extra": true})).unwrap();
        let view: View = record.to_typed().unwrap();
        assert_eq!(view.id, "c1");
        assert_eq!(view.title, "X");
    }
}
