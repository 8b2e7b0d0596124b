//! Search request shape and its Elasticsearch query DSL rendering.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::types::RecordId;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    /// Document field.
    pub field: String,
    /// Direction.
    #[serde(default)]
    pub order: SortOrder,
}

impl SortField {
    /// Ascending on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    /// Descending on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Full-text match against one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMatch {
    /// Document field.
    pub field: String,
    /// Text to match.
    pub query: String,
}

/// Which part of each hit's source to return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldSelection {
    /// Ids only, no source.
    #[default]
    IdOnly,
    /// The named source fields.
    Fields(Vec<String>),
    /// The whole source.
    All,
}

impl FieldSelection {
    /// Builds a selection from an optional field list. `None` means ids only.
    pub fn from_fields(fields: Option<Vec<String>>) -> Self {
        match fields {
            None => FieldSelection::IdOnly,
            Some(fields) if fields.is_empty() => FieldSelection::IdOnly,
            Some(fields) => FieldSelection::Fields(fields),
        }
    }

    /// Applies the selection to a stored document body.
    pub fn apply(&self, body: &Value) -> Option<Value> {
        match self {
            FieldSelection::IdOnly => None,
            FieldSelection::All => Some(body.clone()),
            FieldSelection::Fields(fields) => {
                let mut selected = Map::new();
                for field in fields {
                    if let Some(value) = body.get(field) {
                        selected.insert(field.clone(), value.clone());
                    }
                }
                Some(Value::Object(selected))
            }
        }
    }
}

/// Filters combined with AND. An empty query matches every document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Restrict to these ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<RecordId>>,
    /// Exact-value filters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub terms: BTreeMap<String, Value>,
    /// Full-text match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextMatch>,
}

impl SearchQuery {
    /// Matches everything.
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Restricts to the given ids.
    pub fn with_ids<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<RecordId>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Adds an exact-value filter.
    pub fn with_term(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.insert(field.into(), value.into());
        self
    }

    /// Sets the full-text match.
    pub fn with_text(mut self, field: impl Into<String>, query: impl Into<String>) -> Self {
        self.text = Some(TextMatch {
            field: field.into(),
            query: query.into(),
        });
        self
    }

    /// Renders the query clause.
    pub fn to_es_query(&self) -> Value {
        let mut filter = Vec::new();
        if let Some(ids) = &self.ids {
            let values: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            filter.push(json!({"ids": {"values": values}}));
        }
        for (field, value) in &self.terms {
            filter.push(json!({"term": {field.as_str(): value}}));
        }

        let must: Vec<Value> = self
            .text
            .iter()
            .map(|text| json!({"match": {text.field.as_str(): {"query": text.query}}}))
            .collect();

        if filter.is_empty() && must.is_empty() {
            return json!({"match_all": {}});
        }

        let mut bool_query = Map::new();
        if !filter.is_empty() {
            bool_query.insert("filter".to_string(), Value::Array(filter));
        }
        if !must.is_empty() {
            bool_query.insert("must".to_string(), Value::Array(must));
        }
        json!({"bool": bool_query})
    }
}

/// A search against one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Filters.
    #[serde(default)]
    pub query: SearchQuery,
    /// Number of hits to skip.
    #[serde(default)]
    pub from: u64,
    /// Maximum number of hits to return.
    pub size: u64,
    /// Source fields to return.
    #[serde(default)]
    pub fields: FieldSelection,
    /// Sort keys. Empty means `id` ascending.
    #[serde(default)]
    pub sort: Vec<SortField>,
}

impl SearchRequest {
    /// A request for the first `size` hits of `query`.
    pub fn new(query: SearchQuery, size: u64) -> Self {
        Self {
            query,
            from: 0,
            size,
            fields: FieldSelection::IdOnly,
            sort: Vec::new(),
        }
    }

    /// Sets the window offset.
    pub fn with_from(mut self, from: u64) -> Self {
        self.from = from;
        self
    }

    /// Sets the returned fields.
    pub fn with_fields(mut self, fields: FieldSelection) -> Self {
        self.fields = fields;
        self
    }

    /// Sets the sort keys.
    pub fn with_sort(mut self, sort: Vec<SortField>) -> Self {
        self.sort = sort;
        self
    }

    /// The effective sort: the requested keys, or `id` ascending.
    pub fn effective_sort(&self) -> Vec<SortField> {
        if self.sort.is_empty() {
            vec![SortField::asc("id")]
        } else {
            self.sort.clone()
        }
    }

    /// Renders the `_search` request body.
    pub fn to_es_body(&self) -> Value {
        let sort: Vec<Value> = self
            .effective_sort()
            .iter()
            .map(|s| json!({s.field.as_str(): {"order": s.order.as_str()}}))
            .collect();

        let source = match &self.fields {
            FieldSelection::IdOnly => json!(false),
            FieldSelection::All => json!(true),
            FieldSelection::Fields(fields) => json!(fields),
        };

        json!({
            "query": self.query.to_es_query(),
            "from": self.from,
            "size": self.size,
            "sort": sort,
            "_source": source,
            "track_total_hits": true
        })
    }
}
