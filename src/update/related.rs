use super::directive::{FieldMap, UpdateDirective};
use crate::core::Value;
use std::collections::{BTreeMap, HashMap};

/// Pending updates to related records, accumulated across one batch.
///
/// At most one directive exists per `(type, id)`; every inverse-link effect
/// on the same record is merged into it in the order it was generated.
#[derive(Debug, Default)]
pub struct RelatedUpdates {
    batches: BTreeMap<String, Vec<UpdateDirective>>,
    index: HashMap<(String, Value), usize>,
}

impl RelatedUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pending directive for `(record_type, id)`, registering an
    /// empty one on first use.
    pub fn get(&mut self, record_type: &str, id: &Value) -> &mut UpdateDirective {
        let batch = self.batches.entry(record_type.to_string()).or_default();
        let position = *self
            .index
            .entry((record_type.to_string(), id.clone()))
            .or_insert_with(|| {
                batch.push(UpdateDirective::new(id.clone()));
                batch.len() - 1
            });
        &mut batch[position]
    }

    /// Makes `field` on the related record point at `value`.
    ///
    /// To-one fields are overwritten; to-many fields get `value` appended.
    ///
    /// Returns the pending to-one value displaced by this call, if another
    /// non-null value was already queued for `field`.
    pub fn link(
        &mut self,
        record_type: &str,
        id: &Value,
        field: &str,
        to_many: bool,
        value: &Value,
    ) -> Option<Value> {
        let update = self.get(record_type, id);
        remove_item(&mut update.pull, field, value);
        if to_many {
            if !update.push_items(field).contains(value) {
                update.add_push(field, value.clone());
            }
            return None;
        }

        let displaced = update
            .replace_value(field)
            .filter(|pending| !pending.is_null() && *pending != value)
            .cloned();
        update.set_replace(field, value.clone());
        displaced
    }

    /// Removes `value` from `field` on the related record.
    ///
    /// Expressed as a pull, so a to-one field is cleared only if it still
    /// holds `value` when the update is applied.
    pub fn unlink(&mut self, record_type: &str, id: &Value, field: &str, to_many: bool, value: &Value) {
        let update = self.get(record_type, id);
        if to_many {
            remove_item(&mut update.push, field, value);
        } else if update.replace_value(field) == Some(value) {
            update.set_replace(field, Value::Null);
        }
        if !update.pull_items(field).contains(value) {
            update.add_pull(field, value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn batch(&self, record_type: &str) -> &[UpdateDirective] {
        self.batches
            .get(record_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Consumes the aggregator, yielding one batch per related type.
    pub fn into_batches(self) -> BTreeMap<String, Vec<UpdateDirective>> {
        self.batches
    }
}

fn remove_item(part: &mut Option<FieldMap>, field: &str, value: &Value) {
    let Some(map) = part else {
        return;
    };
    if let Some(current) = map.get_mut(field) {
        let remaining: Vec<Value> = current
            .to_items()
            .into_iter()
            .filter(|item| item != value)
            .collect();
        if remaining.is_empty() {
            map.remove(field);
        } else {
            *current = Value::List(remaining);
        }
    }
    if map.is_empty() {
        *part = None;
    }
}
