use super::adapter::{Adapter, FindQuery, Transaction};
use crate::core::{DbError, Record, RequestMeta, Result, SchemaRegistry, Value};
use crate::transaction::{TransactionId, TransactionState};
use crate::update::{UpdateDirective, diff};

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{Level, event};

type Table = BTreeMap<Value, Record>;

/// In-memory backend.
///
/// Each transaction works on a private copy of the tables it touches and
/// publishes them on commit; an abort simply drops the copy. Writers are
/// serialized: a transaction holds the write lock from begin to end.
#[derive(Clone)]
pub struct MemoryAdapter {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    registry: Arc<SchemaRegistry>,
    tables: RwLock<BTreeMap<String, Table>>,
    writer: Arc<Mutex<()>>,
    stats: Counters,
}

#[derive(Default)]
struct Counters {
    begun: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    finds: AtomicU64,
    updates: AtomicU64,
}

/// Call counters since the adapter was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterStats {
    pub transactions_begun: u64,
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
    pub find_calls: u64,
    pub update_calls: u64,
}

impl AdapterStats {
    /// Transactions begun but not yet ended.
    pub fn open_transactions(&self) -> u64 {
        self.transactions_begun
            .saturating_sub(self.transactions_committed)
            .saturating_sub(self.transactions_aborted)
    }
}

impl MemoryAdapter {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                registry,
                tables: RwLock::new(BTreeMap::new()),
                writer: Arc::new(Mutex::new(())),
                stats: Counters::default(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.inner.registry
    }

    /// Stores a record outside any transaction (fixtures, seeding).
    pub async fn insert(&self, record_type: &str, record: Record) -> Result<()> {
        let schema = self.inner.registry.get(record_type)?;
        let id = schema.id_of(&record).clone();
        if id.is_null() {
            return Err(DbError::BadRequest(format!(
                "Record of type '{}' has no '{}'",
                record_type, schema.primary_key
            )));
        }
        let _writer = self.inner.writer.lock().await;
        let mut tables = self.inner.tables.write().await;
        tables
            .entry(record_type.to_string())
            .or_default()
            .insert(id, record);
        Ok(())
    }

    /// Reads the committed state of one record.
    pub async fn get(&self, record_type: &str, id: impl Into<Value>) -> Option<Record> {
        let tables = self.inner.tables.read().await;
        tables.get(record_type)?.get(&id.into()).cloned()
    }

    /// All committed records of a type, ordered by primary key.
    pub async fn records(&self, record_type: &str) -> Vec<Record> {
        let tables = self.inner.tables.read().await;
        tables
            .get(record_type)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> AdapterStats {
        let c = &self.inner.stats;
        AdapterStats {
            transactions_begun: c.begun.load(Ordering::SeqCst),
            transactions_committed: c.committed.load(Ordering::SeqCst),
            transactions_aborted: c.aborted.load(Ordering::SeqCst),
            find_calls: c.finds.load(Ordering::SeqCst),
            update_calls: c.updates.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        let writer = self.inner.writer.clone().lock_owned().await;
        let id = TransactionId::new();
        self.inner.stats.begun.fetch_add(1, Ordering::SeqCst);
        event!(Level::TRACE, txn = %id, "memory transaction begun");

        Ok(Box::new(MemoryTransaction {
            id,
            adapter: self.clone(),
            inner: Mutex::new(TxInner {
                state: TransactionState::Active,
                staged: BTreeMap::new(),
                writer: Some(writer),
            }),
        }))
    }

    fn apply_operators(&self, record: &Record, operate: &serde_json::Value) -> Result<Record> {
        apply_operators(record, operate)
    }
}

struct MemoryTransaction {
    id: TransactionId,
    adapter: MemoryAdapter,
    inner: Mutex<TxInner>,
}

struct TxInner {
    state: TransactionState,
    /// Copies of every table written in this transaction.
    staged: BTreeMap<String, Table>,
    writer: Option<OwnedMutexGuard<()>>,
}

impl MemoryTransaction {
    async fn read_record(&self, inner: &TxInner, record_type: &str, id: &Value) -> Option<Record> {
        if let Some(table) = inner.staged.get(record_type) {
            return table.get(id).cloned();
        }
        let tables = self.adapter.inner.tables.read().await;
        tables.get(record_type)?.get(id).cloned()
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    async fn find(
        &self,
        record_type: &str,
        ids: &[Value],
        query: &FindQuery,
        _meta: &RequestMeta,
    ) -> Result<Vec<Record>> {
        self.adapter.inner.stats.finds.fetch_add(1, Ordering::SeqCst);
        let schema = self.adapter.inner.registry.get(record_type)?;
        let inner = self.inner.lock().await;
        inner.state.ensure_active(self.id)?;

        let mut seen = BTreeSet::new();
        let mut found = Vec::new();
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            if let Some(mut record) = self.read_record(&inner, record_type, id).await {
                if let Some(fields) = &query.fields {
                    record.retain(|name, _| *name == schema.primary_key || fields.contains(name));
                }
                found.push(record);
            }
        }
        Ok(found)
    }

    async fn update(
        &self,
        record_type: &str,
        updates: &[UpdateDirective],
        _meta: &RequestMeta,
    ) -> Result<()> {
        self.adapter.inner.stats.updates.fetch_add(1, Ordering::SeqCst);
        let schema = self.adapter.inner.registry.get(record_type)?;
        let mut inner = self.inner.lock().await;
        inner.state.ensure_active(self.id)?;

        if !inner.staged.contains_key(record_type) {
            let tables = self.adapter.inner.tables.read().await;
            let copy = tables.get(record_type).cloned().unwrap_or_default();
            inner.staged.insert(record_type.to_string(), copy);
        }
        let Some(table) = inner.staged.get_mut(record_type) else {
            return Err(DbError::StorageError(format!(
                "table '{}' was not staged",
                record_type
            )));
        };

        for update in updates {
            let id = update.target().ok_or_else(|| {
                DbError::BadRequest(format!("update on '{}' without an id", record_type))
            })?;
            let current = table.get(id).ok_or_else(|| {
                DbError::NotFound(format!("{} {} does not exist", record_type, id))
            })?;
            let mut next = diff::apply_update(schema, current, update)?;
            if let Some(operate) = &update.operate {
                next = apply_operators(&next, operate)?;
            }
            table.insert(id.clone(), next);
        }
        Ok(())
    }

    async fn end_transaction(&self, error: Option<&DbError>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let state = inner.state.finish(self.id, error.is_some())?;
        let staged = std::mem::take(&mut inner.staged);

        if state == TransactionState::Committed {
            let mut tables = self.adapter.inner.tables.write().await;
            for (record_type, table) in staged {
                tables.insert(record_type, table);
            }
            self.adapter.inner.stats.committed.fetch_add(1, Ordering::SeqCst);
            event!(Level::TRACE, txn = %self.id, "memory transaction committed");
        } else {
            self.adapter.inner.stats.aborted.fetch_add(1, Ordering::SeqCst);
            event!(Level::TRACE, txn = %self.id, "memory transaction aborted");
        }

        inner.writer.take();
        Ok(())
    }
}

/// Applies an operator document of the form
/// `{"$inc": {field: n}, "$set": {field: value}, "$unset": [field, ...]}`.
pub fn apply_operators(record: &Record, operate: &serde_json::Value) -> Result<Record> {
    let serde_json::Value::Object(ops) = operate else {
        return Err(DbError::BadRequest(format!(
            "operate must be an object, got {}",
            operate
        )));
    };

    let mut next = record.clone();
    for (op, args) in ops {
        match op.as_str() {
            "$inc" => {
                for (field, by) in object_arg(op, args)? {
                    let incremented = increment(next.get(field), &Value::from(by.clone()))
                        .ok_or_else(|| {
                            DbError::TypeMismatch(format!(
                                "cannot $inc field '{}' by {}",
                                field, by
                            ))
                        })?;
                    next.set(field.clone(), incremented);
                }
            }
            "$set" => {
                for (field, value) in object_arg(op, args)? {
                    next.set(field.clone(), Value::from(value.clone()));
                }
            }
            "$unset" => {
                let fields = args.as_array().ok_or_else(|| {
                    DbError::BadRequest("$unset expects a list of field names".into())
                })?;
                for field in fields {
                    let name = field.as_str().ok_or_else(|| {
                        DbError::BadRequest(format!("$unset field name must be text, got {}", field))
                    })?;
                    next.set(name, Value::Null);
                }
            }
            other => {
                return Err(DbError::BadRequest(format!("unknown operator '{}'", other)));
            }
        }
    }
    Ok(next)
}

fn object_arg<'a>(
    op: &str,
    args: &'a serde_json::Value,
) -> Result<&'a serde_json::Map<String, serde_json::Value>> {
    args.as_object()
        .ok_or_else(|| DbError::BadRequest(format!("{} expects an object", op)))
}

fn increment(current: &Value, by: &Value) -> Option<Value> {
    match (current, by) {
        (Value::Null, Value::Integer(b)) => Some(Value::Integer(*b)),
        (Value::Null, Value::Float(b)) => Some(Value::Float(*b)),
        (Value::Integer(a), Value::Integer(b)) => a.checked_add(*b).map(Value::Integer),
        (a, b) => Some(Value::Float(a.as_f64()? + b.as_f64()?)),
    }
}
