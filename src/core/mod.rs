pub mod error;
pub mod meta;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use meta::RequestMeta;
pub use types::{FieldDef, FieldType, LinkDef, Record, RecordSchema, SchemaRegistry};
pub use value::Value;
