use super::diff;
use super::directive::{DirectiveId, UpdateDirective};
use super::links::{LinkContext, LinkedSnapshot, normalize_to_many, resolve_links};
use super::notify::{ChangeEvent, ChangeNotifier};
use super::related::RelatedUpdates;
use super::resolve::{ResolvedUpdate, resolve_records};
use crate::config::EngineConfig;
use crate::core::{DbError, Record, RecordSchema, RequestMeta, Result, SchemaRegistry, Value};
use crate::hooks::{
    ExistingLinkChecker, LinkChecker, NoopValidator, RecordValidator, SchemaEnforcer,
    TransformHook, TypeEnforcer,
};
use crate::storage::{Adapter, Transaction};

use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{Instrument, Level, event, info_span};

/// Result of a committed update batch.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResponse {
    /// Post-update state of every addressed record, in request order.
    pub records: Vec<Record>,
    /// Set when a transform hook altered at least one directive.
    pub update_modified: bool,
}

/// Everything a successful batch produced before commit.
struct BatchOutcome {
    records: Vec<Record>,
    update_modified: bool,
    primary: Vec<UpdateDirective>,
    related: BTreeMap<String, Vec<UpdateDirective>>,
}

/// Relational update engine.
///
/// Applies a batch of update directives against one record type inside a
/// single backend transaction, keeps every inverse link consistent, and
/// publishes one change event per committed batch.
///
/// # Examples
///
/// ```
/// use linkmemodb::prelude::engine::*;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let registry = Arc::new(SchemaRegistry::new(vec![
///     RecordSchema::new("post").field(FieldDef::link("tags", "tag").array().inverse("owner")),
///     RecordSchema::new("tag").field(FieldDef::link("owner", "post").inverse("tags")),
/// ])?);
/// let adapter = MemoryAdapter::new(registry.clone());
/// adapter.insert("post", Record::new().with("id", 1)).await?;
/// adapter.insert("tag", Record::new().with("id", 2)).await?;
///
/// let engine = UpdateEngine::new(Arc::new(adapter.clone()), registry);
/// let update = UpdateDirective::new(1).push("tags", 2);
/// engine.update("post", vec![update], &RequestMeta::new()).await?;
///
/// let tag = adapter.get("tag", 2).await.unwrap();
/// assert_eq!(tag.get("owner"), &Value::from(1));
/// # Ok::<(), DbError>(())
/// # }).unwrap();
/// ```
pub struct UpdateEngine {
    adapter: Arc<dyn Adapter>,
    registry: Arc<SchemaRegistry>,
    transforms: HashMap<String, Arc<dyn TransformHook>>,
    enforcer: Arc<dyn SchemaEnforcer>,
    link_checker: Arc<dyn LinkChecker>,
    validator: Arc<dyn RecordValidator>,
    notifier: ChangeNotifier,
    config: EngineConfig,
}

impl UpdateEngine {
    pub fn new(adapter: Arc<dyn Adapter>, registry: Arc<SchemaRegistry>) -> Self {
        Self::with_config(adapter, registry, EngineConfig::default())
    }

    pub fn with_config(
        adapter: Arc<dyn Adapter>,
        registry: Arc<SchemaRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            adapter,
            registry,
            transforms: HashMap::new(),
            enforcer: Arc::new(TypeEnforcer),
            link_checker: Arc::new(ExistingLinkChecker),
            validator: Arc::new(NoopValidator),
            notifier: ChangeNotifier::new(config.change_channel_capacity),
            config,
        }
    }

    /// Registers the input transform for `record_type`, replacing any previous one.
    pub fn transform(mut self, record_type: impl Into<String>, hook: impl TransformHook + 'static) -> Self {
        self.transforms.insert(record_type.into(), Arc::new(hook));
        self
    }

    pub fn enforcer(mut self, enforcer: impl SchemaEnforcer + 'static) -> Self {
        self.enforcer = Arc::new(enforcer);
        self
    }

    pub fn link_checker(mut self, checker: impl LinkChecker + 'static) -> Self {
        self.link_checker = Arc::new(checker);
        self
    }

    pub fn validator(mut self, validator: impl RecordValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Subscribes to the change events of committed batches.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.notifier.subscribe()
    }

    /// Applies `directives` to records of `record_type` atomically.
    ///
    /// Either every directive and every cascading inverse-link update is
    /// committed, or the transaction is aborted and nothing is persisted.
    pub async fn update(
        &self,
        record_type: &str,
        directives: Vec<UpdateDirective>,
        meta: &RequestMeta,
    ) -> Result<UpdateResponse> {
        let span = info_span!(
            "update.batch",
            record_type = %record_type,
            request_id = %meta.request_id,
            count = directives.len()
        );
        self.update_batch(record_type, directives, meta)
            .instrument(span)
            .await
    }

    async fn update_batch(
        &self,
        record_type: &str,
        mut directives: Vec<UpdateDirective>,
        meta: &RequestMeta,
    ) -> Result<UpdateResponse> {
        let schema = self.registry.get(record_type)?.clone();
        self.check_batch(&schema, &directives)?;
        for directive in &mut directives {
            diff::strip_denormalized(&schema, directive);
        }

        let transaction = self.adapter.begin_transaction().await?;
        event!(Level::DEBUG, txn = %transaction.id(), "transaction begun");

        let outcome = match self.run(transaction.as_ref(), &schema, directives, meta).await {
            Ok(outcome) => outcome,
            Err(err) => {
                event!(Level::ERROR, error = %err, "update batch aborted");
                if let Err(abort_err) = transaction.end_transaction(Some(&err)).await {
                    event!(Level::WARN, error = %abort_err, "transaction abort failed");
                }
                return Err(err);
            }
        };

        transaction.end_transaction(None).await?;
        event!(
            Level::DEBUG,
            primary = outcome.primary.len(),
            related_types = outcome.related.len(),
            "transaction committed"
        );

        if self.config.emit_changes {
            let event = ChangeEvent::consolidate(
                meta.request_id,
                record_type,
                outcome.primary,
                outcome.related,
            );
            let receivers = self.notifier.emit(event);
            event!(Level::TRACE, receivers, "change event emitted");
        }

        Ok(UpdateResponse {
            records: outcome.records,
            update_modified: outcome.update_modified,
        })
    }

    /// Rejects malformed batches before any transaction is opened.
    fn check_batch(&self, schema: &RecordSchema, directives: &[UpdateDirective]) -> Result<()> {
        if directives.is_empty() {
            return Err(DbError::BadRequest("update batch is empty".into()));
        }
        if let Some(max) = self.config.max_batch_size {
            if directives.len() > max {
                return Err(DbError::BadRequest(format!(
                    "update batch of {} exceeds the limit of {}",
                    directives.len(),
                    max
                )));
            }
        }

        let mut seen: HashSet<&Value> = HashSet::with_capacity(directives.len());
        for (index, directive) in directives.iter().enumerate() {
            let id = directive.target().ok_or_else(|| {
                DbError::BadRequest(format!(
                    "{} on '{}' is missing its '{}'",
                    DirectiveId(index),
                    schema.name,
                    schema.primary_key
                ))
            })?;
            if !seen.insert(id) {
                return Err(DbError::BadRequest(format!(
                    "{} {} is addressed more than once",
                    schema.name, id
                )));
            }
        }
        Ok(())
    }

    async fn run(
        &self,
        transaction: &dyn Transaction,
        schema: &RecordSchema,
        directives: Vec<UpdateDirective>,
        meta: &RequestMeta,
    ) -> Result<BatchOutcome> {
        let concurrency = self.config.transform_concurrency;
        let hook = self.transforms.get(&schema.name).map(|hook| hook.as_ref());

        let resolved = resolve_records(transaction, schema, hook, directives, meta, concurrency).await?;
        let update_modified = resolved.iter().any(|r| r.modified);
        event!(Level::DEBUG, records = resolved.len(), update_modified, "records resolved");

        let mut staged: Vec<(ResolvedUpdate, Record)> = Vec::with_capacity(resolved.len());
        for mut update in resolved {
            diff::drop_undeclared(schema, &mut update.directive);
            normalize_to_many(schema, &update.original, &mut update.directive);
            let mut candidate = diff::apply_update(schema, &update.original, &update.directive)?;
            if let Some(operate) = &update.directive.operate {
                candidate = self.adapter.apply_operators(&candidate, operate)?;
            }
            staged.push((update, candidate));
        }

        let link_fields = schema.link_field_names();
        let linked: BTreeMap<DirectiveId, LinkedSnapshot> = stream::iter(staged.iter())
            .map(|(update, candidate)| {
                let link_fields = &link_fields;
                async move {
                    self.enforcer.enforce(schema, candidate, meta).await?;
                    let snapshot = self
                        .link_checker
                        .check_links(transaction, &self.registry, schema, candidate, link_fields, meta)
                        .await?;
                    Ok::<_, DbError>((update.id, snapshot))
                }
            })
            .buffered(concurrency.max(1))
            .try_collect()
            .await?;

        let candidates: Vec<Record> = staged.iter().map(|(_, candidate)| candidate.clone()).collect();
        self.validator
            .validate_records(schema, &candidates, &link_fields, meta)
            .await?;
        event!(Level::DEBUG, "candidates validated");

        let empty = LinkedSnapshot::new();
        let mut related = RelatedUpdates::new();
        let mut primary = Vec::with_capacity(staged.len());
        for (update, _) in staged {
            let ctx = LinkContext {
                registry: &self.registry,
                schema,
                original: &update.original,
                linked: linked.get(&update.id).unwrap_or(&empty),
            };
            primary.push(resolve_links(&ctx, update.directive, &mut related)?);
        }

        transaction.update(&schema.name, &primary, meta).await?;
        event!(Level::DEBUG, updates = primary.len(), "primary updates persisted");

        let related = related.into_batches();
        for (related_type, batch) in &related {
            if batch.is_empty() {
                continue;
            }
            transaction.update(related_type, batch, meta).await?;
            event!(Level::DEBUG, record_type = %related_type, updates = batch.len(), "related updates persisted");
        }

        Ok(BatchOutcome {
            records: candidates,
            update_modified,
            primary,
            related,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldDef, FieldType};
    use crate::storage::MemoryAdapter;

    async fn engine() -> (UpdateEngine, MemoryAdapter) {
        let registry = Arc::new(
            SchemaRegistry::new(vec![
                RecordSchema::new("post")
                    .field(FieldDef::new("title", FieldType::Text))
                    .field(FieldDef::link("tags", "tag").array().inverse("owner")),
                RecordSchema::new("tag").field(FieldDef::link("owner", "post").inverse("tags")),
            ])
            .unwrap(),
        );
        let adapter = MemoryAdapter::new(registry.clone());
        adapter
            .insert("post", Record::new().with("id", 1).with("title", "a").with("tags", vec![2]))
            .await
            .unwrap();
        adapter
            .insert("tag", Record::new().with("id", 2).with("owner", 1))
            .await
            .unwrap();
        adapter.insert("tag", Record::new().with("id", 3)).await.unwrap();
        (UpdateEngine::new(Arc::new(adapter.clone()), registry), adapter)
    }

    #[tokio::test]
    async fn test_malformed_batches_never_open_a_transaction() {
        let (engine, adapter) = engine().await;
        let meta = RequestMeta::new();

        let empty = engine.update("post", vec![], &meta).await.unwrap_err();
        assert!(matches!(empty, DbError::BadRequest(_)));

        let missing_id = engine
            .update("post", vec![UpdateDirective::default().replace("title", "x")], &meta)
            .await
            .unwrap_err();
        assert!(matches!(missing_id, DbError::BadRequest(_)));

        let duplicate = engine
            .update(
                "post",
                vec![UpdateDirective::new(1), UpdateDirective::new(1)],
                &meta,
            )
            .await
            .unwrap_err();
        assert!(matches!(duplicate, DbError::BadRequest(_)));

        assert_eq!(adapter.stats().transactions_begun, 0);
    }

    #[tokio::test]
    async fn test_batch_size_limit() {
        let (engine, adapter) = engine().await;
        let registry = engine.registry().clone();
        let limited = UpdateEngine::with_config(
            Arc::new(adapter.clone()),
            registry,
            EngineConfig::new().max_batch_size(1),
        );
        let err = limited
            .update(
                "post",
                vec![UpdateDirective::new(1), UpdateDirective::new(2)],
                &RequestMeta::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::BadRequest(_)));
        assert_eq!(adapter.stats().transactions_begun, 0);
    }

    #[tokio::test]
    async fn test_push_updates_inverse_and_emits_one_event() {
        let (engine, adapter) = engine().await;
        let mut rx = engine.subscribe();

        let response = engine
            .update("post", vec![UpdateDirective::new(1).push("tags", 3)], &RequestMeta::new())
            .await
            .unwrap();

        assert!(!response.update_modified);
        assert_eq!(response.records[0].get("tags"), &Value::from(vec![2, 3]));
        assert_eq!(adapter.get("tag", 3).await.unwrap().get("owner"), &Value::from(1));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.updates_for("post").len(), 1);
        assert_eq!(event.updates_for("tag").len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_type_is_rejected() {
        let (engine, _) = engine().await;
        let err = engine
            .update("ghost", vec![UpdateDirective::new(1)], &RequestMeta::new())
            .await
            .unwrap_err();
        assert_eq!(err, DbError::TypeNotFound("ghost".into()));
    }
}
