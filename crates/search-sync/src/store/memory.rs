//! In-memory primary store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Weak;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    AssociationDef, Change, ChangeSet, CommitDispatcher, CommitObserver, RecordStore, references,
};
use crate::error::{StoreError, StoreResult};
use crate::types::{CommitEvent, Record, RecordId, RecordQuery};

type Tables = HashMap<String, BTreeMap<RecordId, Record>>;

/// A primary store held in process memory.
///
/// Counts `page` and `load` calls so callers can verify how many round-trips
/// a batch took.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<Tables>,
    associations: RwLock<HashMap<(String, String), AssociationDef>>,
    dispatcher: CommitDispatcher,
    page_calls: AtomicUsize,
    load_calls: AtomicUsize,
}

impl InMemoryRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a has-many association from `parent_type` to `target_type`.
    pub fn define_association(
        &self,
        parent_type: impl Into<String>,
        name: impl Into<String>,
        target_type: impl Into<String>,
        foreign_key: impl Into<String>,
    ) {
        self.associations.write().insert(
            (parent_type.into(), name.into()),
            AssociationDef {
                target_type: target_type.into(),
                foreign_key: foreign_key.into(),
            },
        );
    }

    /// Inserts records without notifying observers.
    pub fn seed(&self, records: impl IntoIterator<Item = Record>) {
        let mut tables = self.tables.write();
        for record in records {
            tables
                .entry(record.record_type().to_string())
                .or_default()
                .insert(record.id(), record);
        }
    }

    /// Returns a stored record.
    pub fn get(&self, record_type: &str, id: RecordId) -> Option<Record> {
        self.tables
            .read()
            .get(record_type)
            .and_then(|table| table.get(&id).cloned())
    }

    /// Number of records of a type.
    pub fn count(&self, record_type: &str) -> usize {
        self.tables
            .read()
            .get(record_type)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Number of `page` calls served.
    pub fn page_call_count(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    /// Number of `load` calls served.
    pub fn load_call_count(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    fn association(&self, record_type: &str, name: &str) -> StoreResult<AssociationDef> {
        self.associations
            .read()
            .get(&(record_type.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::UnknownAssociation {
                record_type: record_type.to_string(),
                association: name.to_string(),
            })
    }

    fn apply(tables: &mut Tables, change: Change, undo: &mut Vec<Undo>) -> StoreResult<CommitEvent> {
        match change {
            Change::Insert(record) => {
                let table = tables.entry(record.record_type().to_string()).or_default();
                if table.contains_key(&record.id()) {
                    return Err(StoreError::AlreadyExists {
                        record_type: record.record_type().to_string(),
                        id: record.id().value(),
                    });
                }
                table.insert(record.id(), record.clone());
                undo.push(Undo::Remove {
                    record_type: record.record_type().to_string(),
                    id: record.id(),
                });
                Ok(CommitEvent::created(record))
            }
            Change::Update(record) => {
                let existing = tables
                    .get_mut(record.record_type())
                    .and_then(|table| table.get_mut(&record.id()))
                    .ok_or_else(|| StoreError::NotFound {
                        record_type: record.record_type().to_string(),
                        id: record.id().value(),
                    })?;
                let previous = std::mem::replace(existing, record.clone());
                undo.push(Undo::Restore(previous));
                Ok(CommitEvent::updated(record))
            }
            Change::Destroy { record_type, id } => {
                let removed = tables
                    .get_mut(&record_type)
                    .and_then(|table| table.remove(&id))
                    .ok_or_else(|| StoreError::NotFound {
                        record_type: record_type.clone(),
                        id: id.value(),
                    })?;
                undo.push(Undo::Restore(removed.clone()));
                Ok(CommitEvent::destroyed(removed))
            }
        }
    }

    fn rollback(tables: &mut Tables, undo: Vec<Undo>) {
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Remove { record_type, id } => {
                    if let Some(table) = tables.get_mut(&record_type) {
                        table.remove(&id);
                    }
                }
                Undo::Restore(record) => {
                    tables
                        .entry(record.record_type().to_string())
                        .or_default()
                        .insert(record.id(), record);
                }
            }
        }
    }
}

/// Reverts one applied change of a failed commit.
enum Undo {
    Remove { record_type: String, id: RecordId },
    Restore(Record),
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn store_name(&self) -> &'static str {
        "memory"
    }

    async fn page(
        &self,
        query: &RecordQuery,
        after: Option<RecordId>,
        limit: usize,
    ) -> StoreResult<Vec<Record>> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);

        let tables = self.tables.read();
        let Some(table) = tables.get(&query.record_type) else {
            return Ok(Vec::new());
        };

        let records = table
            .values()
            .filter(|record| after.is_none_or(|after| record.id() > after))
            .filter(|record| query.scope.matches(record))
            .take(limit)
            .map(|record| query.projection.apply(record))
            .collect();

        Ok(records)
    }

    async fn load(&self, query: &RecordQuery, ids: &[RecordId]) -> StoreResult<Vec<Record>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);

        let definitions = query
            .includes
            .iter()
            .map(|name| Ok((name.clone(), self.association(&query.record_type, name)?)))
            .collect::<StoreResult<Vec<_>>>()?;

        let tables = self.tables.read();
        let Some(table) = tables.get(&query.record_type) else {
            return Ok(Vec::new());
        };

        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut records: Vec<Record> = ids
            .iter()
            .filter_map(|id| table.get(id).cloned())
            .collect();

        for (name, definition) in definitions {
            let children = tables.get(&definition.target_type);
            for record in records.iter_mut() {
                let loaded: Vec<Record> = children
                    .map(|children| {
                        children
                            .values()
                            .filter(|child| references(child, &definition.foreign_key, record.id()))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                record.set_association(name.clone(), loaded);
            }
        }

        Ok(records)
    }

    async fn commit(&self, changes: ChangeSet) -> StoreResult<Vec<CommitEvent>> {
        let events = {
            let mut tables = self.tables.write();
            let mut undo = Vec::with_capacity(changes.len());
            let mut events = Vec::with_capacity(changes.len());
            for change in changes.into_changes() {
                match Self::apply(&mut tables, change, &mut undo) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        Self::rollback(&mut tables, undo);
                        return Err(e);
                    }
                }
            }
            events
        };

        self.dispatcher.dispatch(&events).await;
        Ok(events)
    }

    fn subscribe(&self, observer: Weak<dyn CommitObserver>) {
        self.dispatcher.subscribe(observer);
    }
}
