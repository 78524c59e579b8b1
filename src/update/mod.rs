pub mod diff;
pub mod directive;
pub mod engine;
pub mod links;
pub mod notify;
pub mod related;
pub mod resolve;

pub use directive::{DirectiveId, FieldMap, UpdateDirective};
pub use engine::{UpdateEngine, UpdateResponse};
pub use links::{LinkContext, LinkedSnapshot, normalize_to_many, resolve_links};
pub use notify::{ChangeEvent, ChangeNotifier, UPDATE_METHOD};
pub use related::RelatedUpdates;
pub use resolve::{ResolvedUpdate, resolve_records};
