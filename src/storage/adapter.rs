use crate::core::{DbError, Record, RequestMeta, Result, Value};
use crate::transaction::TransactionId;
use crate::update::UpdateDirective;

use async_trait::async_trait;

/// Options for `Transaction::find`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    /// Projection; the primary key is always returned. `None` means all fields.
    pub fields: Option<Vec<String>>,
}

impl FindQuery {
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: Some(fields.into_iter().map(Into::into).collect()),
        }
    }
}

/// Storage backend - allows pluggable persistence.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Backend name for diagnostics
    fn name(&self) -> &'static str;

    /// Opens a transaction scoping every read and write of one request.
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Applies a backend-specific `operate` instruction to a record state.
    fn apply_operators(&self, record: &Record, operate: &serde_json::Value) -> Result<Record>;
}

/// An open storage transaction.
///
/// `end_transaction` must be called exactly once: with `None` to commit, or
/// with the error that aborted the request to roll back.
#[async_trait]
pub trait Transaction: Send + Sync {
    fn id(&self) -> TransactionId;

    /// Fetches the records with the given primary keys. Missing ids are
    /// skipped, not reported.
    async fn find(
        &self,
        record_type: &str,
        ids: &[Value],
        query: &FindQuery,
        meta: &RequestMeta,
    ) -> Result<Vec<Record>>;

    async fn update(
        &self,
        record_type: &str,
        updates: &[UpdateDirective],
        meta: &RequestMeta,
    ) -> Result<()>;

    async fn end_transaction(&self, error: Option<&DbError>) -> Result<()>;
}
