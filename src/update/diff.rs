use super::directive::UpdateDirective;
use crate::core::{DbError, FieldDef, Record, RecordSchema, Result, Value};

/// Removes replace/push/pull entries that target denormalized inverse fields.
///
/// Runs before transform hooks; those fields are derived and never writable.
pub fn strip_denormalized(schema: &RecordSchema, directive: &mut UpdateDirective) {
    directive.retain_fields(|field| !schema.is_denormalized(field));
}

/// Removes replace/push/pull entries the backend cannot persist: fields not
/// declared on the type (ephemeral transform inputs) and the primary key.
pub fn drop_undeclared(schema: &RecordSchema, directive: &mut UpdateDirective) {
    directive.retain_fields(|field| field != schema.primary_key && schema.get_field(field).is_some());
}

/// Produces the candidate state of `record` after replace, push and pull.
///
/// The original is left untouched. `operate` is not handled here; it belongs
/// to the backend (`Adapter::apply_operators`).
pub fn apply_update(
    schema: &RecordSchema,
    record: &Record,
    directive: &UpdateDirective,
) -> Result<Record> {
    let mut candidate = record.clone();

    if let Some(replace) = &directive.replace {
        for (field, value) in replace {
            candidate.set(field.clone(), value.clone());
        }
    }

    if let Some(push) = &directive.push {
        for (field, value) in push {
            let def = schema.get_field(field);
            if def.is_some_and(|d| !d.is_array) {
                return Err(DbError::BadRequest(format!(
                    "Cannot push onto non-array field '{}'",
                    field
                )));
            }
            let merged = push_values(def, candidate.get(field), &value.to_items());
            candidate.set(field.clone(), merged);
        }
    }

    if let Some(pull) = &directive.pull {
        for (field, value) in pull {
            let pulled = pull_values(candidate.get(field), &value.to_items());
            candidate.set(field.clone(), pulled);
        }
    }

    Ok(candidate)
}

/// Appends `items` to an array value. Link arrays behave as sets: nulls and
/// ids already present are skipped.
fn push_values(def: Option<&FieldDef>, current: &Value, items: &[Value]) -> Value {
    let is_link = def.is_some_and(|d| d.link_def().is_some());
    let mut values = current.to_items();
    for item in items {
        if is_link && (item.is_null() || values.contains(item)) {
            continue;
        }
        values.push(item.clone());
    }
    Value::List(values)
}

/// Removes `items` from an array value. On a scalar the value is cleared only
/// when it equals one of `items`; anything else is left as is.
fn pull_values(current: &Value, items: &[Value]) -> Value {
    match current {
        Value::List(values) => Value::List(
            values
                .iter()
                .filter(|value| !items.contains(value))
                .cloned()
                .collect(),
        ),
        scalar if items.contains(scalar) => Value::Null,
        other => other.clone(),
    }
}
