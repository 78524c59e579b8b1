use crate::core::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type FieldMap = BTreeMap<String, Value>;

/// Stable identifier of a directive within one batch (its position).
///
/// Per-request side tables (original record, candidate record, linked
/// snapshot) are keyed by this token rather than by the directive itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirectiveId(pub usize);

impl fmt::Display for DirectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "update#{}", self.0)
    }
}

/// A partial update addressed to one record by primary key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateDirective {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull: Option<FieldMap>,
    /// Backend-specific mutation, applied by `Adapter::apply_operators`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operate: Option<serde_json::Value>,
}

impl UpdateDirective {
    pub fn new(id: impl Into<Value>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn replace(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_replace(field, value.into());
        self
    }

    pub fn push(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_push(field, value.into());
        self
    }

    pub fn pull(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_pull(field, value.into());
        self
    }

    pub fn operate(mut self, ops: serde_json::Value) -> Self {
        self.operate = Some(ops);
        self
    }

    /// The addressed primary key; `None` when missing or null.
    pub fn target(&self) -> Option<&Value> {
        self.id.as_ref().filter(|id| !id.is_null())
    }

    pub fn set_replace(&mut self, field: impl Into<String>, value: Value) {
        self.replace
            .get_or_insert_with(FieldMap::new)
            .insert(field.into(), value);
    }

    /// Appends to the pending push list of `field`; never overwrites.
    pub fn add_push(&mut self, field: impl Into<String>, value: Value) {
        accumulate(self.push.get_or_insert_with(FieldMap::new), field.into(), value);
    }

    /// Appends to the pending pull list of `field`; never overwrites.
    pub fn add_pull(&mut self, field: impl Into<String>, value: Value) {
        accumulate(self.pull.get_or_insert_with(FieldMap::new), field.into(), value);
    }

    pub fn replace_value(&self, field: &str) -> Option<&Value> {
        self.replace.as_ref().and_then(|map| map.get(field))
    }

    /// Items pushed onto `field`, scalars normalized to one item.
    pub fn push_items(&self, field: &str) -> Vec<Value> {
        items_of(self.push.as_ref(), field)
    }

    /// Items pulled from `field`, scalars normalized to one item.
    pub fn pull_items(&self, field: &str) -> Vec<Value> {
        items_of(self.pull.as_ref(), field)
    }

    /// Every field named in replace/push/pull.
    pub fn touched_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = [&self.replace, &self.push, &self.pull]
            .into_iter()
            .flatten()
            .flat_map(|map| map.keys().cloned())
            .collect();
        fields.sort();
        fields.dedup();
        fields
    }

    /// Drops replace/push/pull entries whose field fails `keep`, and empty maps.
    pub fn retain_fields(&mut self, mut keep: impl FnMut(&str) -> bool) {
        for part in [&mut self.replace, &mut self.push, &mut self.pull] {
            if let Some(map) = part {
                map.retain(|field, _| keep(field));
                if map.is_empty() {
                    *part = None;
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.replace.is_none() && self.push.is_none() && self.pull.is_none() && self.operate.is_none()
    }
}

fn accumulate(map: &mut FieldMap, field: String, value: Value) {
    match map.get_mut(&field) {
        Some(Value::List(items)) => items.extend(value.to_items()),
        Some(existing) => {
            let mut items = existing.to_items();
            items.extend(value.to_items());
            *existing = Value::List(items);
        }
        None => {
            map.insert(field, value);
        }
    }
}

fn items_of(map: Option<&FieldMap>, field: &str) -> Vec<Value> {
    map.and_then(|m| m.get(field))
        .map(Value::to_items)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_accumulates_into_list() {
        let directive = UpdateDirective::new(1).push("tags", 2).push("tags", 3);
        assert_eq!(directive.push_items("tags"), vec![Value::from(2), Value::from(3)]);

        let directive = UpdateDirective::new(1)
            .pull("tags", vec![4, 5])
            .pull("tags", 6);
        assert_eq!(directive.pull_items("tags").len(), 3);
    }

    #[test]
    fn test_missing_or_null_id_has_no_target() {
        assert!(UpdateDirective::default().target().is_none());
        let null_id = UpdateDirective {
            id: Some(Value::Null),
            ..UpdateDirective::default()
        };
        assert!(null_id.target().is_none());
        assert_eq!(UpdateDirective::new(7).target(), Some(&Value::from(7)));
    }

    #[test]
    fn test_retain_fields_drops_empty_parts() {
        let mut directive = UpdateDirective::new(1)
            .replace("title", "a")
            .push("ephemeral", 1);
        directive.retain_fields(|field| field != "ephemeral");
        assert!(directive.push.is_none());
        assert_eq!(directive.touched_fields(), vec!["title".to_string()]);
    }

    #[test]
    fn test_deserializes_partial_directive() {
        let directive: UpdateDirective =
            serde_json::from_str(r#"{"id": 1, "pull": {"tags": 5}}"#).unwrap();
        assert_eq!(directive.pull_items("tags"), vec![Value::from(5)]);
        assert!(directive.replace.is_none());
    }
}
