//! Collaborators the update engine calls out to.
//!
//! Transform hooks are registered per record type; enforcement, link checking
//! and batch validation have defaults in [`defaults`] that the engine uses
//! unless replaced.

pub mod defaults;

use crate::core::{Record, RecordSchema, RequestMeta, Result, SchemaRegistry};
use crate::storage::Transaction;
use crate::update::{LinkedSnapshot, UpdateDirective};

use async_trait::async_trait;

pub use defaults::{ExistingLinkChecker, NoopValidator, TypeEnforcer};

/// What a transform hook can see besides the record and directive.
pub struct HookContext<'a> {
    pub record_type: &'a str,
    pub meta: &'a RequestMeta,
    pub transaction: &'a dyn Transaction,
}

/// Per-type input transform, run on every directive before it is applied.
///
/// The hook returns the directive to use; it may add computed fields or
/// reject the update with an error. Changing the primary key is rejected by
/// the engine.
#[async_trait]
pub trait TransformHook: Send + Sync {
    async fn input(
        &self,
        ctx: &HookContext<'_>,
        original: &Record,
        directive: UpdateDirective,
    ) -> Result<UpdateDirective>;
}

#[async_trait]
impl<F> TransformHook for F
where
    F: Fn(&Record, UpdateDirective) -> Result<UpdateDirective> + Send + Sync,
{
    async fn input(
        &self,
        _ctx: &HookContext<'_>,
        original: &Record,
        directive: UpdateDirective,
    ) -> Result<UpdateDirective> {
        self(original, directive)
    }
}

/// Schema enforcement for one candidate record.
#[async_trait]
pub trait SchemaEnforcer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn enforce(&self, schema: &RecordSchema, record: &Record, meta: &RequestMeta) -> Result<()>;
}

/// Referential checks for one candidate record.
///
/// Returns the pre-update state of the records each link field references,
/// which the link resolver uses to find second-degree relationships.
#[async_trait]
pub trait LinkChecker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check_links(
        &self,
        transaction: &dyn Transaction,
        registry: &SchemaRegistry,
        schema: &RecordSchema,
        record: &Record,
        link_fields: &[String],
        meta: &RequestMeta,
    ) -> Result<LinkedSnapshot>;
}

/// Validation over the whole batch of candidate records.
#[async_trait]
pub trait RecordValidator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn validate_records(
        &self,
        schema: &RecordSchema,
        records: &[Record],
        link_fields: &[String],
        meta: &RequestMeta,
    ) -> Result<()>;
}
