//! Search and bulk replies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TransportError, TransportResult};
use crate::types::RecordId;

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Document id.
    pub id: RecordId,
    /// Selected source fields, `None` for id-only searches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
}

/// Search result: total matches plus the requested window of hits.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Total number of matching documents.
    pub total: u64,
    /// Hits in the requested window.
    pub hits: Vec<SearchHit>,
}

impl SearchResponse {
    /// Ids of the returned hits, in order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.hits.iter().map(|hit| hit.id).collect()
    }

    /// Parses an Elasticsearch `_search` reply.
    pub fn from_es_body(index: &str, body: &Value) -> TransportResult<Self> {
        let invalid = |message: &str| TransportError::InvalidResponse {
            index: index.to_string(),
            message: message.to_string(),
        };

        let hits_section = body.get("hits").ok_or_else(|| invalid("missing hits"))?;

        let total = match hits_section.get("total") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(total) => total.get("value").and_then(Value::as_u64),
            None => None,
        }
        .ok_or_else(|| invalid("missing hits.total"))?;

        let raw_hits = hits_section
            .get("hits")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("missing hits.hits"))?;

        let mut hits = Vec::with_capacity(raw_hits.len());
        for hit in raw_hits {
            let id = hit
                .get("_id")
                .and_then(Value::as_str)
                .and_then(|id| id.parse::<RecordId>().ok())
                .ok_or_else(|| invalid("hit without a numeric _id"))?;
            let source = hit.get("_source").cloned();
            hits.push(SearchHit { id, source });
        }

        Ok(Self { total, hits })
    }
}

/// Outcome of an accepted bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BulkSummary {
    /// Documents written.
    pub written: usize,
}

impl BulkSummary {
    /// Parses an Elasticsearch `_bulk` reply for `total` operations.
    ///
    /// A reply with `errors: true` is an error naming the first failed item.
    pub fn from_es_body(index: &str, total: usize, body: &Value) -> TransportResult<Self> {
        if !body.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(Self { written: total });
        }

        let items = body
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let failures: Vec<&Value> = items
            .iter()
            .filter_map(|item| item.as_object().and_then(|o| o.values().next()))
            .filter(|result| result.get("error").is_some())
            .collect();

        let first_error = failures
            .first()
            .and_then(|result| result.get("error"))
            .map(|error| {
                error
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string())
            })
            .unwrap_or_else(|| "unknown bulk failure".to_string());

        Err(TransportError::BulkItemsFailed {
            index: index.to_string(),
            failed: failures.len().max(1),
            total,
            first_error,
        })
    }
}
