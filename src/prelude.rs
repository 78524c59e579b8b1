//! Recommended API entrypoints grouped by abstraction level.
//!
//! `engine` covers what an application needs to run update batches.
//! `extend` is for plugging in custom backends and hooks.

pub mod engine {
    //! Schemas, records, directives and the engine that applies them.
    pub use crate::{
        ChangeEvent, DbError, EngineConfig, FieldDef, FieldType, MemoryAdapter, Record,
        RecordSchema, RequestMeta, Result, SchemaRegistry, UpdateDirective, UpdateEngine,
        UpdateResponse, Value,
    };
}

pub mod extend {
    //! Traits and building blocks for custom backends and collaborators.
    pub use crate::hooks::{
        ExistingLinkChecker, HookContext, LinkChecker, NoopValidator, RecordValidator,
        SchemaEnforcer, TransformHook, TypeEnforcer,
    };
    pub use crate::storage::{Adapter, FindQuery, Transaction};
    pub use crate::transaction::{TransactionId, TransactionState};
    pub use crate::update::{LinkedSnapshot, RelatedUpdates};
}
