//! In-process index engine with near-real-time visibility.
//!
//! Each index keeps two layers: the searchable segment and the writes
//! buffered since the last refresh. `refresh_index` folds the buffer into the
//! segment. Point reads through [`MemoryIndexClient::get_document`] are
//! realtime and see buffered writes, like an engine's GET API.
//!
//! The client can be told to fail specific bulk requests or to behave as if
//! the engine were down, and it records every call it receives.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::{BulkSummary, IndexClient, SearchHit, SearchQuery, SearchRequest, SearchResponse, SortOrder};
use crate::error::{TransportError, TransportResult};
use crate::registry::IndexDescriptor;
use crate::types::{Document, RecordId};

#[derive(Debug, Default)]
struct MemoryIndex {
    descriptor: Option<IndexDescriptor>,
    searchable: BTreeMap<RecordId, Value>,
    // `None` marks a buffered delete.
    buffered: BTreeMap<RecordId, Option<Value>>,
}

impl MemoryIndex {
    fn refresh(&mut self) {
        for (id, body) in std::mem::take(&mut self.buffered) {
            match body {
                Some(body) => {
                    self.searchable.insert(id, body);
                }
                None => {
                    self.searchable.remove(&id);
                }
            }
        }
    }

    fn realtime(&self, id: RecordId) -> Option<&Value> {
        match self.buffered.get(&id) {
            Some(buffered) => buffered.as_ref(),
            None => self.searchable.get(&id),
        }
    }
}

/// One recorded bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkCall {
    /// Target index.
    pub index: String,
    /// Document ids in request order.
    pub ids: Vec<RecordId>,
    /// Whether the request was failed by injection.
    pub failed: bool,
}

/// In-process [`IndexClient`].
#[derive(Debug, Default)]
pub struct MemoryIndexClient {
    indices: RwLock<HashMap<String, MemoryIndex>>,
    failing_bulk_calls: Mutex<HashSet<usize>>,
    unavailable: AtomicBool,
    bulk_calls: Mutex<Vec<BulkCall>>,
    index_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    refresh_calls: Mutex<Vec<String>>,
}

impl MemoryIndexClient {
    /// Creates an engine with no indices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the `n`-th bulk request (1-based, counted across all indices).
    pub fn fail_bulk_call(&self, n: usize) {
        self.failing_bulk_calls.lock().insert(n);
    }

    /// Makes every request fail as if the engine were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Recorded bulk requests, in order.
    pub fn bulk_calls(&self) -> Vec<BulkCall> {
        self.bulk_calls.lock().clone()
    }

    /// Number of single-document index requests received.
    pub fn index_call_count(&self) -> usize {
        self.index_calls.load(Ordering::SeqCst)
    }

    /// Number of delete requests received.
    pub fn delete_call_count(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Indices refreshed, one entry per refresh request.
    pub fn refresh_calls(&self) -> Vec<String> {
        self.refresh_calls.lock().clone()
    }

    /// Realtime read of one document, including unrefreshed writes.
    pub fn get_document(&self, index: &str, id: RecordId) -> Option<Value> {
        self.indices
            .read()
            .get(index)
            .and_then(|idx| idx.realtime(id).cloned())
    }

    /// Ids visible to search.
    pub fn searchable_ids(&self, index: &str) -> Vec<RecordId> {
        self.indices
            .read()
            .get(index)
            .map(|idx| idx.searchable.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of documents visible to search.
    pub fn searchable_count(&self, index: &str) -> usize {
        self.indices
            .read()
            .get(index)
            .map(|idx| idx.searchable.len())
            .unwrap_or(0)
    }

    /// Number of writes waiting for a refresh.
    pub fn buffered_count(&self, index: &str) -> usize {
        self.indices
            .read()
            .get(index)
            .map(|idx| idx.buffered.len())
            .unwrap_or(0)
    }

    /// The descriptor an index was created with.
    pub fn index_descriptor(&self, index: &str) -> Option<IndexDescriptor> {
        self.indices
            .read()
            .get(index)
            .and_then(|idx| idx.descriptor.clone())
    }

    /// Names of existing indices, sorted.
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indices.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn check_available(&self) -> TransportResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable {
                engine: "memory".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn write(&self, index: &str, id: RecordId, body: Value) {
        self.indices
            .write()
            .entry(index.to_string())
            .or_default()
            .buffered
            .insert(id, Some(body));
    }
}

fn query_matches(query: &SearchQuery, id: RecordId, body: &Value) -> bool {
    if let Some(ids) = &query.ids
        && !ids.contains(&id)
    {
        return false;
    }

    for (field, expected) in &query.terms {
        let matched = match body.get(field) {
            Some(Value::Array(values)) => values.contains(expected),
            Some(value) => value == expected,
            None => false,
        };
        if !matched {
            return false;
        }
    }

    if let Some(text) = &query.text {
        let needle = text.query.to_lowercase();
        let matched = match body.get(&text.field) {
            Some(Value::String(s)) => s.to_lowercase().contains(&needle),
            Some(Value::Array(values)) => values.iter().any(|v| {
                v.as_str()
                    .is_some_and(|s| s.to_lowercase().contains(&needle))
            }),
            _ => false,
        };
        if !matched {
            return false;
        }
    }

    true
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (None, None) => CmpOrdering::Equal,
        // Missing values sort last.
        (None, Some(_)) => CmpOrdering::Greater,
        (Some(_), None) => CmpOrdering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl IndexClient for MemoryIndexClient {
    fn engine_name(&self) -> &'static str {
        "memory"
    }

    async fn index_document(&self, index: &str, id: RecordId, body: &Value) -> TransportResult<()> {
        self.check_available()?;
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        self.write(index, id, body.clone());
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: RecordId) -> TransportResult<()> {
        self.check_available()?;
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        // Deleting from an absent index is a success and does not create it.
        if let Some(target) = self.indices.write().get_mut(index) {
            target.buffered.insert(id, None);
        }
        Ok(())
    }

    async fn bulk_write(&self, index: &str, documents: &[Document]) -> TransportResult<BulkSummary> {
        self.check_available()?;

        let failed = {
            let mut calls = self.bulk_calls.lock();
            let number = calls.len() + 1;
            let failed = self.failing_bulk_calls.lock().contains(&number);
            calls.push(BulkCall {
                index: index.to_string(),
                ids: documents.iter().map(|d| d.id).collect(),
                failed,
            });
            failed
        };

        if failed {
            return Err(TransportError::Rejected {
                index: index.to_string(),
                status: 503,
                body: "injected bulk failure".to_string(),
            });
        }

        let mut indices = self.indices.write();
        let target = indices.entry(index.to_string()).or_default();
        for document in documents {
            target.buffered.insert(document.id, Some(document.body.clone()));
        }

        Ok(BulkSummary {
            written: documents.len(),
        })
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> TransportResult<SearchResponse> {
        self.check_available()?;

        let indices = self.indices.read();
        let Some(target) = indices.get(index) else {
            return Ok(SearchResponse::default());
        };

        let mut matches: Vec<(RecordId, &Value)> = target
            .searchable
            .iter()
            .filter(|(id, body)| query_matches(&request.query, **id, body))
            .map(|(id, body)| (*id, body))
            .collect();

        let sort = request.effective_sort();
        matches.sort_by(|(a_id, a), (b_id, b)| {
            for key in &sort {
                let ordering = if key.field == "id" {
                    a_id.cmp(b_id)
                } else {
                    compare_values(a.get(&key.field), b.get(&key.field))
                };
                let ordering = match key.order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                };
                if ordering != CmpOrdering::Equal {
                    return ordering;
                }
            }
            a_id.cmp(b_id)
        });

        let total = matches.len() as u64;
        let hits = matches
            .into_iter()
            .skip(request.from as usize)
            .take(request.size as usize)
            .map(|(id, body)| SearchHit {
                id,
                source: request.fields.apply(body),
            })
            .collect();

        Ok(SearchResponse { total, hits })
    }

    async fn refresh_index(&self, index: &str) -> TransportResult<()> {
        self.check_available()?;
        self.refresh_calls.lock().push(index.to_string());
        if let Some(target) = self.indices.write().get_mut(index) {
            target.refresh();
        }
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> TransportResult<bool> {
        self.check_available()?;
        Ok(self.indices.read().contains_key(index))
    }

    async fn create_index(
        &self,
        index: &str,
        descriptor: Option<&IndexDescriptor>,
    ) -> TransportResult<()> {
        self.check_available()?;
        let mut indices = self.indices.write();
        if indices.contains_key(index) {
            return Err(TransportError::Rejected {
                index: index.to_string(),
                status: 400,
                body: "resource_already_exists_exception".to_string(),
            });
        }
        indices.insert(
            index.to_string(),
            MemoryIndex {
                descriptor: descriptor.cloned(),
                ..Default::default()
            },
        );
        Ok(())
    }
}
