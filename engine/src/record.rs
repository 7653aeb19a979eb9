//! Record types for cached entity data.

use crate::{error::Result, Error, RecordId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A single entity row as returned by the upstream.
///
/// Only the `id` is interpreted by the engine; every other column is carried
/// through untouched in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier within the entity type
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RecordId,
    /// Remaining columns
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record from an id and a set of fields.
    pub fn new(id: impl Into<RecordId>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a record from a JSON object with an `id` member.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::InvalidRecord(format!(
                "expected a JSON object, got {value}"
            )));
        }
        serde_json::from_value(value).map_err(|e| Error::InvalidRecord(e.to_string()))
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a field as a string slice.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Get a field as a number, accepting numeric strings.
    pub fn number_field(&self, field: &str) -> Option<f64> {
        match self.get(field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Truthiness of a field, loosely: `true`, non-zero numbers and
    /// non-empty strings count.
    pub fn is_truthy(&self, field: &str) -> bool {
        match self.get(field) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(_)) | Some(Value::Object(_)) => true,
            Some(Value::Null) | None => false,
        }
    }

    /// Shallow-merge a patch into this record. `id` cannot be patched.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            if key != "id" {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }

    /// Render back into a single JSON object.
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(object)
    }
}

/// Upstream ids may be integers or strings; both are kept as strings.
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<RecordId, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "record id must be a string or number, got {other}"
        ))),
    }
}

/// The records of one entity type.
///
/// Upstream order is preserved for display, but the collection is keyed by
/// id: callers look records up with [`EntityCollection::get`] rather than by
/// position. Serializes as a plain array of records.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Vec<Record>")]
pub struct EntityCollection {
    records: Vec<Record>,
    /// Position of each id in `records`
    index: HashMap<RecordId, usize>,
}

impl EntityCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection, keeping the last occurrence of duplicated ids.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut collection = Self {
            records: Vec::with_capacity(records.len()),
            index: HashMap::with_capacity(records.len()),
        };
        for record in records {
            collection.upsert(record);
        }
        collection
    }

    /// Get a record by ID.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    /// Check if a record exists.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Insert or replace a record by id.
    pub fn upsert(&mut self, record: Record) {
        match self.index.get(&record.id) {
            Some(&i) => self.records[i] = record,
            None => {
                self.index.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Remove a record by id, returning it.
    pub fn remove(&mut self, id: &str) -> Option<Record> {
        let index = self.index.remove(id)?;
        let removed = self.records.remove(index);
        for position in self.index.values_mut() {
            if *position > index {
                *position -= 1;
            }
        }
        Some(removed)
    }

    /// Iterate over the records.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the collection has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The first record in upstream order.
    pub fn first(&self) -> Option<&Record> {
        self.records.first()
    }

    /// Set equality by id and content, ignoring order.
    pub fn same_records(&self, other: &EntityCollection) -> bool {
        self.len() == other.len()
            && self
                .records
                .iter()
                .all(|r| other.get(&r.id).is_some_and(|o| o == r))
    }
}

impl From<Vec<Record>> for EntityCollection {
    fn from(records: Vec<Record>) -> Self {
        Self::from_records(records)
    }
}

impl Serialize for EntityCollection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.records.serialize(serializer)
    }
}

impl FromIterator<Record> for EntityCollection {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self::from_records(iter.into_iter().collect())
    }
}
