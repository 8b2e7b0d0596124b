//! Record scopes and retrieval queries against the primary store.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::{Record, RecordId};

/// Selects a subset of a type's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordScope {
    /// Every record of the type.
    #[default]
    All,

    /// Records with one of the given ids.
    Ids(BTreeSet<RecordId>),

    /// Records whose id lies in the inclusive range. Open ends are unbounded.
    IdRange {
        start: Option<RecordId>,
        end: Option<RecordId>,
    },

    /// Records whose attribute equals the value.
    AttributeEquals { field: String, value: Value },

    /// Records matching every inner scope.
    And(Vec<RecordScope>),
}

impl RecordScope {
    /// Scope over an explicit id list.
    pub fn ids<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<RecordId>,
    {
        RecordScope::Ids(ids.into_iter().map(Into::into).collect())
    }

    /// Scope over an inclusive id range.
    pub fn id_range(start: Option<RecordId>, end: Option<RecordId>) -> Self {
        RecordScope::IdRange { start, end }
    }

    /// Scope over records with `field == value`.
    pub fn attribute_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        RecordScope::AttributeEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Combines two scopes; both must match.
    pub fn and(self, other: RecordScope) -> Self {
        match (self, other) {
            (RecordScope::All, other) => other,
            (scope, RecordScope::All) => scope,
            (RecordScope::And(mut left), RecordScope::And(right)) => {
                left.extend(right);
                RecordScope::And(left)
            }
            (RecordScope::And(mut left), other) => {
                left.push(other);
                RecordScope::And(left)
            }
            (scope, other) => RecordScope::And(vec![scope, other]),
        }
    }

    /// Evaluates the scope against a record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            RecordScope::All => true,
            RecordScope::Ids(ids) => ids.contains(&record.id()),
            RecordScope::IdRange { start, end } => {
                start.is_none_or(|s| record.id() >= s) && end.is_none_or(|e| record.id() <= e)
            }
            RecordScope::AttributeEquals { field, value } => {
                record.attribute(field).unwrap_or(&Value::Null) == value
            }
            RecordScope::And(scopes) => scopes.iter().all(|s| s.matches(record)),
        }
    }
}

/// Which attributes a store fetches for a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Only the primary key.
    #[default]
    IdOnly,
    /// The primary key plus the named attributes.
    Fields(Vec<String>),
    /// Every attribute.
    All,
}

impl Projection {
    /// Applies the projection to a fully loaded record.
    pub fn apply(&self, record: &Record) -> Record {
        match self {
            Projection::IdOnly => record.project(&[]),
            Projection::Fields(fields) => record.project(fields),
            Projection::All => {
                let fields: Vec<String> = record.attributes().keys().cloned().collect();
                record.project(&fields)
            }
        }
    }
}

/// A retrieval query against one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordQuery {
    /// The record type queried.
    pub record_type: String,

    /// Which records.
    #[serde(default)]
    pub scope: RecordScope,

    /// Associations to pre-fetch with each record.
    #[serde(default)]
    pub includes: Vec<String>,

    /// Attributes fetched when paging.
    #[serde(default)]
    pub projection: Projection,
}

impl RecordQuery {
    /// Creates a query over every record of a type.
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            scope: RecordScope::All,
            includes: Vec::new(),
            projection: Projection::IdOnly,
        }
    }

    /// Restricts the query to a scope.
    pub fn with_scope(mut self, scope: RecordScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the paging projection.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Adds an association to pre-fetch. Repeated names are ignored.
    pub fn include(mut self, association: impl Into<String>) -> Self {
        let association = association.into();
        if !self.includes.contains(&association) {
            self.includes.push(association);
        }
        self
    }
}
