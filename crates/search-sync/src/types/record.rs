//! Primary-store records as seen by the synchronization layer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable primary-key identifier of a record.
///
/// Ids order the rebuild cursor, so they are compared numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    /// Wraps a raw primary key.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw primary key.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(RecordId)
    }
}

/// A committed primary-store entity.
///
/// The synchronization layer only reads records. Associations are present
/// only when the query that produced the record asked for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    record_type: String,
    id: RecordId,
    attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    associations: BTreeMap<String, Vec<Record>>,
}

impl Record {
    /// Creates a record. Non-object attribute values are treated as empty.
    pub fn new(record_type: impl Into<String>, id: impl Into<RecordId>, attributes: Value) -> Self {
        let attributes = match attributes {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            record_type: record_type.into(),
            id: id.into(),
            attributes,
            associations: BTreeMap::new(),
        }
    }

    /// Attaches a loaded association.
    pub fn with_association(mut self, name: impl Into<String>, records: Vec<Record>) -> Self {
        self.associations.insert(name.into(), records);
        self
    }

    /// Returns the record type (e.g. `"Observation"`).
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Returns the primary key.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Returns all attributes.
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Returns a single attribute.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Mutable access to the attributes, for batch preparation hooks.
    pub fn attributes_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.attributes
    }

    /// Returns all loaded associations.
    pub fn associations(&self) -> &BTreeMap<String, Vec<Record>> {
        &self.associations
    }

    /// Returns a loaded association, or `None` if it was not loaded.
    pub fn association(&self, name: &str) -> Option<&[Record]> {
        self.associations.get(name).map(Vec::as_slice)
    }

    /// Returns true if the association was pre-fetched.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.associations.contains_key(name)
    }

    /// Replaces an association.
    pub fn set_association(&mut self, name: impl Into<String>, records: Vec<Record>) {
        self.associations.insert(name.into(), records);
    }

    /// Returns a copy restricted to the given attribute names.
    pub fn project(&self, fields: &[String]) -> Record {
        let attributes = self
            .attributes
            .iter()
            .filter(|(k, _)| fields.iter().any(|f| f == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Record {
            record_type: self.record_type.clone(),
            id: self.id,
            attributes,
            associations: BTreeMap::new(),
        }
    }

    /// Returns the attributes as a JSON object with `id` set.
    pub fn to_json(&self) -> Value {
        let mut map = self.attributes.clone();
        map.insert("id".to_string(), Value::from(self.id.value()));
        Value::Object(map)
    }
}
