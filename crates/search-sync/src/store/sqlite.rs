//! SQLite primary store.
//!
//! Records live in a single `records` table keyed by `(record_type, id)` with
//! their attributes stored as a JSON document. Scopes compile to SQL over
//! `json_extract`, and id lists are bound as one JSON array expanded with
//! `json_each`, so a batch costs one statement regardless of its size.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    AssociationDef, Change, ChangeSet, CommitDispatcher, CommitObserver, RecordStore, references,
};
use crate::error::{StoreError, StoreResult};
use crate::types::{CommitEvent, Projection, Record, RecordId, RecordQuery, RecordScope};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    record_type TEXT NOT NULL,
    id INTEGER NOT NULL,
    attributes TEXT NOT NULL,
    PRIMARY KEY (record_type, id)
);
";

/// Configuration for the SQLite store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteStoreConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
        }
    }
}

/// Primary store backed by SQLite.
pub struct SqliteRecordStore {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteStoreConfig,
    is_memory: bool,
    associations: RwLock<HashMap<(String, String), AssociationDef>>,
    dispatcher: CommitDispatcher,
}

impl Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecordStore")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl SqliteRecordStore {
    /// Creates a new in-memory store.
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_config(":memory:", SqliteStoreConfig::default())
    }

    /// Opens or creates a file-based database.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::with_config(path, SqliteStoreConfig::default())
    }

    /// Creates a store with custom configuration and initializes the schema.
    pub fn with_config<P: AsRef<Path>>(path: P, config: SqliteStoreConfig) -> StoreResult<Self> {
        let path_str = path.as_ref().to_string_lossy();
        let is_memory = path_str == ":memory:";

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms as u64);
        let manager = SqliteConnectionManager::file(path.as_ref())
            .with_init(move |conn| conn.busy_timeout(busy_timeout));

        // Every connection to ":memory:" opens a separate database.
        let max_size = if is_memory { 1 } else { config.max_connections };

        let mut builder = Pool::builder().max_size(max_size);
        if is_memory {
            builder = builder.idle_timeout(None).max_lifetime(None);
        }
        let pool = builder
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)?;

        let store = Self {
            pool,
            config,
            is_memory,
            associations: RwLock::new(HashMap::new()),
            dispatcher: CommitDispatcher::new(),
        };

        store.configure_connection()?;
        store.init_schema()?;

        Ok(store)
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &SqliteStoreConfig {
        &self.config
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

    /// Number of records of a type.
    pub fn count(&self, record_type: &str) -> StoreResult<u64> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE record_type = ?1",
            params![record_type],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Returns a stored record without associations.
    pub fn get(&self, record_type: &str, id: RecordId) -> StoreResult<Option<Record>> {
        let conn = self.get_connection()?;
        fetch_one(&conn, record_type, id)
    }

    fn get_connection(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn configure_connection(&self) -> StoreResult<()> {
        let conn = self.get_connection()?;

        if self.config.enable_wal && !self.is_memory {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
                .map_err(|e| internal(format!("Failed to enable WAL mode: {}", e)))?;
        }

        Ok(())
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
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

    fn page_sync(
        &self,
        query: &RecordQuery,
        after: Option<RecordId>,
        limit: usize,
    ) -> StoreResult<Vec<Record>> {
        let mut bind = vec![SqlValue::Text(query.record_type.clone())];
        let mut sql = String::from(match query.projection {
            Projection::IdOnly => "SELECT id, NULL FROM records WHERE record_type = ?",
            _ => "SELECT id, attributes FROM records WHERE record_type = ?",
        });

        if let Some(after) = after {
            sql.push_str(" AND id > ?");
            bind.push(SqlValue::Integer(after.value()));
        }
        sql.push_str(" AND ");
        sql.push_str(&scope_sql(&query.scope, &mut bind)?);
        sql.push_str(" ORDER BY id LIMIT ?");
        bind.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bind.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, attributes) = row?;
            let attributes = match attributes {
                Some(text) => serde_json::from_str(&text)?,
                None => Value::Object(Default::default()),
            };
            let record = Record::new(query.record_type.clone(), id, attributes);
            records.push(query.projection.apply(&record));
        }
        Ok(records)
    }

    fn load_sync(&self, query: &RecordQuery, ids: &[RecordId]) -> StoreResult<Vec<Record>> {
        let definitions = query
            .includes
            .iter()
            .map(|name| Ok((name.clone(), self.association(&query.record_type, name)?)))
            .collect::<StoreResult<Vec<_>>>()?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_connection()?;
        let id_list = id_array(ids);

        let mut records = fetch_where(
            &conn,
            "SELECT id, attributes FROM records \
             WHERE record_type = ?1 AND id IN (SELECT value FROM json_each(?2)) ORDER BY id",
            &query.record_type,
            params![query.record_type, id_list],
        )?;

        if records.is_empty() {
            return Ok(records);
        }
        let parent_ids = id_array(&records.iter().map(Record::id).collect::<Vec<_>>());

        for (name, definition) in definitions {
            let path = json_path(&definition.foreign_key)?;
            let children = fetch_where(
                &conn,
                "SELECT id, attributes FROM records \
                 WHERE record_type = ?1 \
                 AND json_extract(attributes, ?2) IN (SELECT value FROM json_each(?3)) \
                 ORDER BY id",
                &definition.target_type,
                params![definition.target_type, path, parent_ids],
            )?;

            for record in records.iter_mut() {
                let loaded: Vec<Record> = children
                    .iter()
                    .filter(|child| references(child, &definition.foreign_key, record.id()))
                    .cloned()
                    .collect();
                record.set_association(name.clone(), loaded);
            }
        }

        Ok(records)
    }

    fn commit_sync(&self, changes: ChangeSet) -> StoreResult<Vec<CommitEvent>> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let mut events = Vec::with_capacity(changes.len());

        for change in changes.into_changes() {
            let event = match change {
                Change::Insert(record) => {
                    let inserted = tx.execute(
                        "INSERT INTO records (record_type, id, attributes) VALUES (?1, ?2, ?3) \
                         ON CONFLICT (record_type, id) DO NOTHING",
                        params![
                            record.record_type(),
                            record.id().value(),
                            serde_json::to_string(record.attributes())?
                        ],
                    )?;
                    if inserted == 0 {
                        return Err(StoreError::AlreadyExists {
                            record_type: record.record_type().to_string(),
                            id: record.id().value(),
                        });
                    }
                    CommitEvent::created(record)
                }
                Change::Update(record) => {
                    let updated = tx.execute(
                        "UPDATE records SET attributes = ?3 WHERE record_type = ?1 AND id = ?2",
                        params![
                            record.record_type(),
                            record.id().value(),
                            serde_json::to_string(record.attributes())?
                        ],
                    )?;
                    if updated == 0 {
                        return Err(StoreError::NotFound {
                            record_type: record.record_type().to_string(),
                            id: record.id().value(),
                        });
                    }
                    CommitEvent::updated(record)
                }
                Change::Destroy { record_type, id } => {
                    let Some(existing) = fetch_one(&tx, &record_type, id)? else {
                        return Err(StoreError::NotFound {
                            record_type,
                            id: id.value(),
                        });
                    };
                    tx.execute(
                        "DELETE FROM records WHERE record_type = ?1 AND id = ?2",
                        params![record_type, id.value()],
                    )?;
                    CommitEvent::destroyed(existing)
                }
            };
            events.push(event);
        }

        tx.commit()?;
        Ok(events)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn store_name(&self) -> &'static str {
        "sqlite"
    }

    async fn page(
        &self,
        query: &RecordQuery,
        after: Option<RecordId>,
        limit: usize,
    ) -> StoreResult<Vec<Record>> {
        self.page_sync(query, after, limit)
    }

    async fn load(&self, query: &RecordQuery, ids: &[RecordId]) -> StoreResult<Vec<Record>> {
        self.load_sync(query, ids)
    }

    async fn commit(&self, changes: ChangeSet) -> StoreResult<Vec<CommitEvent>> {
        let events = self.commit_sync(changes)?;
        self.dispatcher.dispatch(&events).await;
        Ok(events)
    }

    fn subscribe(&self, observer: Weak<dyn CommitObserver>) {
        self.dispatcher.subscribe(observer);
    }
}

fn internal(message: String) -> StoreError {
    StoreError::Internal {
        store_name: "sqlite".to_string(),
        message,
        source: None,
    }
}

fn id_array(ids: &[RecordId]) -> String {
    Value::from(ids.iter().map(|id| id.value()).collect::<Vec<_>>()).to_string()
}

/// `$.field` for a plain attribute name.
fn json_path(field: &str) -> StoreResult<String> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::Query {
            message: format!("invalid attribute name '{}'", field),
        });
    }
    Ok(format!("$.{}", field))
}

/// Compiles a scope to a SQL condition, appending its parameters.
fn scope_sql(scope: &RecordScope, bind: &mut Vec<SqlValue>) -> StoreResult<String> {
    let sql = match scope {
        RecordScope::All => "1 = 1".to_string(),
        RecordScope::Ids(ids) => {
            if ids.is_empty() {
                "0 = 1".to_string()
            } else {
                bind.push(SqlValue::Text(id_array(
                    &ids.iter().copied().collect::<Vec<_>>(),
                )));
                "id IN (SELECT value FROM json_each(?))".to_string()
            }
        }
        RecordScope::IdRange { start, end } => {
            let mut parts = vec!["1 = 1".to_string()];
            if let Some(start) = start {
                bind.push(SqlValue::Integer(start.value()));
                parts.push("id >= ?".to_string());
            }
            if let Some(end) = end {
                bind.push(SqlValue::Integer(end.value()));
                parts.push("id <= ?".to_string());
            }
            parts.join(" AND ")
        }
        RecordScope::AttributeEquals { field, value } => {
            bind.push(SqlValue::Text(json_path(field)?));
            match value {
                Value::Null => "json_extract(attributes, ?) IS NULL".to_string(),
                Value::Bool(b) => {
                    bind.push(SqlValue::Integer(i64::from(*b)));
                    "json_extract(attributes, ?) = ?".to_string()
                }
                Value::Number(n) => {
                    bind.push(match n.as_i64() {
                        Some(i) => SqlValue::Integer(i),
                        None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
                    });
                    "json_extract(attributes, ?) = ?".to_string()
                }
                Value::String(s) => {
                    bind.push(SqlValue::Text(s.clone()));
                    "json_extract(attributes, ?) = ?".to_string()
                }
                Value::Array(_) | Value::Object(_) => {
                    bind.push(SqlValue::Text(value.to_string()));
                    "json_extract(attributes, ?) = json(?)".to_string()
                }
            }
        }
        RecordScope::And(scopes) => {
            let mut parts = Vec::with_capacity(scopes.len());
            for inner in scopes {
                parts.push(format!("({})", scope_sql(inner, bind)?));
            }
            if parts.is_empty() {
                "1 = 1".to_string()
            } else {
                parts.join(" AND ")
            }
        }
    };
    Ok(sql)
}

fn fetch_one(conn: &Connection, record_type: &str, id: RecordId) -> StoreResult<Option<Record>> {
    let attributes: Option<String> = conn
        .query_row(
            "SELECT attributes FROM records WHERE record_type = ?1 AND id = ?2",
            params![record_type, id.value()],
            |row| row.get(0),
        )
        .optional()?;

    match attributes {
        Some(text) => Ok(Some(Record::new(
            record_type,
            id,
            serde_json::from_str(&text)?,
        ))),
        None => Ok(None),
    }
}

fn fetch_where<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    record_type: &str,
    params: P,
) -> StoreResult<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (id, attributes) = row?;
        records.push(Record::new(record_type, id, serde_json::from_str(&attributes)?));
    }
    Ok(records)
}
