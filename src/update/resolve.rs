use super::directive::{DirectiveId, UpdateDirective};
use crate::core::{DbError, Record, RecordSchema, RequestMeta, Result, Value};
use crate::hooks::{HookContext, TransformHook};
use crate::storage::{FindQuery, Transaction};

use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use tracing::{Level, event};

/// One directive matched to the record it addresses.
#[derive(Debug, Clone)]
pub struct ResolvedUpdate {
    pub id: DirectiveId,
    /// Stored state before this batch.
    pub original: Record,
    /// Directive after the transform hook.
    pub directive: UpdateDirective,
    /// Whether the transform hook changed the directive.
    pub modified: bool,
}

/// Fetches the addressed records and runs the type's transform hook on each
/// directive.
///
/// Fails with `NotFound` if any directive addresses a missing record, and
/// with `BadRequest` if a hook redirects a directive to another key. Hooks
/// run concurrently, at most `concurrency` at a time; output order follows
/// input order.
pub async fn resolve_records(
    transaction: &dyn Transaction,
    schema: &RecordSchema,
    hook: Option<&dyn TransformHook>,
    directives: Vec<UpdateDirective>,
    meta: &RequestMeta,
    concurrency: usize,
) -> Result<Vec<ResolvedUpdate>> {
    let ids: Vec<Value> = directives
        .iter()
        .map(|d| d.target().cloned().unwrap_or_default())
        .collect();
    let found = transaction
        .find(&schema.name, &ids, &FindQuery::default(), meta)
        .await?;

    let mut by_id: HashMap<Value, Record> = found
        .into_iter()
        .map(|record| (schema.id_of(&record).clone(), record))
        .collect();

    let mut matched = Vec::with_capacity(directives.len());
    for (index, directive) in directives.into_iter().enumerate() {
        let id = directive.target().cloned().unwrap_or_default();
        let original = by_id.remove(&id).ok_or_else(|| {
            DbError::NotFound(format!("{} record {} not found", schema.name, id))
        })?;
        matched.push((DirectiveId(index), original, directive));
    }

    let ctx = HookContext {
        record_type: &schema.name,
        meta,
        transaction,
    };
    let ctx = &ctx;

    stream::iter(matched)
        .map(|(id, original, directive)| async move {
            let Some(hook) = hook else {
                return Ok(ResolvedUpdate {
                    id,
                    original,
                    directive,
                    modified: false,
                });
            };

            let before = directive.clone();
            let directive = hook.input(ctx, &original, directive).await?;
            let modified = directive != before;

            let key = schema.id_of(&original);
            if directive.target() != Some(key) {
                return Err(DbError::BadRequest(format!(
                    "invalid id: transform of {} {} changed its target to {}",
                    schema.name,
                    key,
                    directive.target().cloned().unwrap_or_default()
                )));
            }
            if modified {
                event!(Level::DEBUG, %id, "transform hook modified directive");
            }

            Ok(ResolvedUpdate {
                id,
                original,
                directive,
                modified,
            })
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldDef, FieldType, SchemaRegistry};
    use crate::storage::{Adapter, MemoryAdapter};
    use std::sync::Arc;

    async fn setup() -> (MemoryAdapter, Arc<SchemaRegistry>) {
        let registry = Arc::new(
            SchemaRegistry::new(vec![
                RecordSchema::new("post").field(FieldDef::new("title", FieldType::Text)),
            ])
            .unwrap(),
        );
        let adapter = MemoryAdapter::new(registry.clone());
        for id in 1..=3 {
            adapter
                .insert("post", Record::new().with("id", id).with("title", "t"))
                .await
                .unwrap();
        }
        (adapter, registry)
    }

    #[tokio::test]
    async fn test_resolves_in_input_order() {
        let (adapter, registry) = setup().await;
        let schema = registry.get("post").unwrap();
        let tx = adapter.begin_transaction().await.unwrap();

        let directives = vec![
            UpdateDirective::new(3).replace("title", "c"),
            UpdateDirective::new(1).replace("title", "a"),
        ];
        let resolved = resolve_records(tx.as_ref(), schema, None, directives, &RequestMeta::new(), 4)
            .await
            .unwrap();

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].id, DirectiveId(0));
        assert_eq!(resolved[0].original.get("id"), &Value::from(3));
        assert_eq!(resolved[1].original.get("id"), &Value::from(1));
        assert!(resolved.iter().all(|r| !r.modified));
        tx.end_transaction(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let (adapter, registry) = setup().await;
        let schema = registry.get("post").unwrap();
        let tx = adapter.begin_transaction().await.unwrap();

        let directives = vec![
            UpdateDirective::new(1).replace("title", "a"),
            UpdateDirective::new(42).replace("title", "b"),
        ];
        let err = resolve_records(tx.as_ref(), schema, None, directives, &RequestMeta::new(), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
        tx.end_transaction(Some(&err)).await.unwrap();
    }

    #[tokio::test]
    async fn test_hook_modification_is_detected() {
        let (adapter, registry) = setup().await;
        let schema = registry.get("post").unwrap();
        let tx = adapter.begin_transaction().await.unwrap();

        let hook = |_: &Record, directive: UpdateDirective| -> Result<UpdateDirective> {
            if directive.target() == Some(&Value::from(2)) {
                Ok(directive.replace("title", "computed"))
            } else {
                Ok(directive)
            }
        };
        let directives = vec![
            UpdateDirective::new(1).replace("title", "a"),
            UpdateDirective::new(2).replace("title", "b"),
        ];
        let resolved = resolve_records(
            tx.as_ref(),
            schema,
            Some(&hook),
            directives,
            &RequestMeta::new(),
            1,
        )
        .await
        .unwrap();

        assert!(!resolved[0].modified);
        assert!(resolved[1].modified);
        assert_eq!(resolved[1].directive.replace_value("title"), Some(&Value::from("computed")));
        tx.end_transaction(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_hook_cannot_redirect_update() {
        let (adapter, registry) = setup().await;
        let schema = registry.get("post").unwrap();
        let tx = adapter.begin_transaction().await.unwrap();

        let hook = |_: &Record, mut directive: UpdateDirective| -> Result<UpdateDirective> {
            directive.id = Some(Value::from(3));
            Ok(directive)
        };
        let err = resolve_records(
            tx.as_ref(),
            schema,
            Some(&hook),
            vec![UpdateDirective::new(1).replace("title", "a")],
            &RequestMeta::new(),
            4,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::BadRequest(msg) if msg.starts_with("invalid id")));
        tx.end_transaction(Some(&DbError::BadRequest("invalid id".into())))
            .await
            .unwrap();
    }
}
