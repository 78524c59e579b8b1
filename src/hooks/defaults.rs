use super::{LinkChecker, RecordValidator, SchemaEnforcer};
use crate::core::{DbError, Record, RecordSchema, RequestMeta, Result, SchemaRegistry, Value};
use crate::storage::{FindQuery, Transaction};
use crate::update::LinkedSnapshot;

use async_trait::async_trait;

/// Checks every declared field of a record against its `FieldDef`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypeEnforcer;

#[async_trait]
impl SchemaEnforcer for TypeEnforcer {
    fn name(&self) -> &'static str {
        "type-enforcer"
    }

    async fn enforce(&self, schema: &RecordSchema, record: &Record, _meta: &RequestMeta) -> Result<()> {
        for field in &schema.fields {
            if !record.contains(&field.name) {
                continue;
            }
            field.validate(record.get(&field.name)).map_err(|err| match err {
                DbError::ConstraintViolation(msg) | DbError::TypeMismatch(msg) => {
                    DbError::ValidationError(format!("{} on '{}'", msg, schema.name))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

/// Requires every id referenced by a link field to exist, and returns the
/// referenced records as the linked snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExistingLinkChecker;

#[async_trait]
impl LinkChecker for ExistingLinkChecker {
    fn name(&self) -> &'static str {
        "existing-link-checker"
    }

    async fn check_links(
        &self,
        transaction: &dyn Transaction,
        registry: &SchemaRegistry,
        schema: &RecordSchema,
        record: &Record,
        link_fields: &[String],
        meta: &RequestMeta,
    ) -> Result<LinkedSnapshot> {
        let mut linked = LinkedSnapshot::new();

        for name in link_fields {
            let Some(link) = schema.get_field(name).and_then(|f| f.link_def()) else {
                continue;
            };
            let ids: Vec<Value> = record
                .get(name)
                .to_items()
                .into_iter()
                .filter(|id| !id.is_null())
                .collect();
            if ids.is_empty() {
                continue;
            }

            let target = registry.get(&link.target)?;
            let found = transaction
                .find(&link.target, &ids, &FindQuery::default(), meta)
                .await?;
            if let Some(missing) = ids
                .iter()
                .find(|id| !found.iter().any(|r| target.id_of(r) == *id))
            {
                return Err(DbError::ConstraintViolation(format!(
                    "'{}.{}' links to missing {} {}",
                    schema.name, name, link.target, missing
                )));
            }
            linked.insert(name.clone(), found);
        }

        Ok(linked)
    }
}

/// Accepts every batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopValidator;

#[async_trait]
impl RecordValidator for NoopValidator {
    fn name(&self) -> &'static str {
        "noop-validator"
    }

    async fn validate_records(
        &self,
        _schema: &RecordSchema,
        _records: &[Record],
        _link_fields: &[String],
        _meta: &RequestMeta,
    ) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldDef, FieldType};
    use crate::storage::{Adapter, MemoryAdapter};
    use std::sync::Arc;

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::new(vec![
                RecordSchema::new("post")
                    .field(FieldDef::new("title", FieldType::Text).not_null())
                    .field(FieldDef::link("tags", "tag").array().inverse("owner")),
                RecordSchema::new("tag").field(FieldDef::link("owner", "post").inverse("tags")),
            ])
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_type_enforcer_reports_validation_error() {
        let registry = registry();
        let schema = registry.get("post").unwrap();
        let meta = RequestMeta::new();

        let ok = Record::new().with("id", 1).with("title", "t");
        assert!(TypeEnforcer.enforce(schema, &ok, &meta).await.is_ok());

        let bad = Record::new().with("id", 1).with("title", Value::Null);
        let err = TypeEnforcer.enforce(schema, &bad, &meta).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_link_checker_snapshots_linked_records() {
        let registry = registry();
        let adapter = MemoryAdapter::new(registry.clone());
        adapter
            .insert("tag", Record::new().with("id", 2).with("owner", 9))
            .await
            .unwrap();

        let schema = registry.get("post").unwrap();
        let tx = adapter.begin_transaction().await.unwrap();
        let meta = RequestMeta::new();
        let links = schema.link_field_names();

        let record = Record::new().with("id", 1).with("tags", vec![2]);
        let linked = ExistingLinkChecker
            .check_links(tx.as_ref(), &registry, schema, &record, &links, &meta)
            .await
            .unwrap();
        assert_eq!(linked["tags"][0].get("owner"), &Value::from(9));

        let dangling = Record::new().with("id", 1).with("tags", vec![2, 3]);
        let err = ExistingLinkChecker
            .check_links(tx.as_ref(), &registry, schema, &dangling, &links, &meta)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));

        tx.end_transaction(None).await.unwrap();
    }
}
