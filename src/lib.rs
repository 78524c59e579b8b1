// ============================================================================
// LinkMemDB Library
// ============================================================================
//
// Batched record updates with bidirectional link integrity. An update batch
// runs inside one backend transaction: records are resolved, transformed,
// validated, the inverse side of every changed link is updated, and one
// change event is published per commit.
//
// ============================================================================

pub mod config;
pub mod core;
pub mod hooks;
pub mod prelude;
pub mod storage;
pub mod transaction;
pub mod update;

pub use config::EngineConfig;
pub use core::{
    DbError, FieldDef, FieldType, LinkDef, Record, RecordSchema, RequestMeta, Result,
    SchemaRegistry, Value,
};
pub use storage::{Adapter, AdapterStats, FindQuery, MemoryAdapter, Transaction};
pub use update::{ChangeEvent, DirectiveId, UpdateDirective, UpdateEngine, UpdateResponse};
