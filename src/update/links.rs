//! Bidirectional link maintenance.
//!
//! For every link field with an inverse, the changes carried by a primary
//! directive are mirrored onto the inverse field of each related record. No
//! record is written here: every inverse-side effect is queued on the
//! [`RelatedUpdates`] aggregator and persisted later in one batch per type.

use super::directive::UpdateDirective;
use super::related::RelatedUpdates;
use crate::core::{DbError, FieldDef, Record, RecordSchema, Result, SchemaRegistry, Value};
use std::collections::BTreeMap;

/// Pre-update state of the records a candidate references, per link field.
pub type LinkedSnapshot = BTreeMap<String, Vec<Record>>;

/// Everything the resolver needs to know about one primary directive.
pub struct LinkContext<'a> {
    pub registry: &'a SchemaRegistry,
    pub schema: &'a RecordSchema,
    pub original: &'a Record,
    pub linked: &'a LinkedSnapshot,
}

struct InverseSide<'a> {
    target_type: &'a str,
    target_schema: &'a RecordSchema,
    field: &'a str,
    to_many: bool,
}

/// Queues the inverse-side effects of `directive` and returns the directive
/// normalized for persistence: a replace on a to-many link comes back as the
/// equivalent push/pull pair against the stored array.
pub fn resolve_links(
    ctx: &LinkContext<'_>,
    mut directive: UpdateDirective,
    related: &mut RelatedUpdates,
) -> Result<UpdateDirective> {
    let id = ctx.schema.id_of(ctx.original).clone();

    for field in ctx.schema.link_fields() {
        let Some(inverse) = inverse_side(ctx, field)? else {
            continue;
        };

        if let Some(value) = directive.replace_value(&field.name).cloned() {
            if !field.is_array {
                replace_to_one(ctx, field, &inverse, &id, &value, related)?;
                continue;
            }
            replace_to_many(ctx.original, field, &value, &mut directive);
        }

        let previous = ctx.original.get(&field.name);

        for pushed in directive.push_items(&field.name) {
            if pushed.is_null() || previous.contains(&pushed) {
                continue;
            }
            let displaced = related.link(inverse.target_type, &pushed, inverse.field, inverse.to_many, &id);
            check_claim(ctx, field, &inverse, &pushed, displaced)?;
            if !inverse.to_many {
                release_second_degree(ctx, field, &inverse, &id, &pushed, related);
            }
        }

        for pulled in directive.pull_items(&field.name) {
            if pulled.is_null() || !previous.contains(&pulled) {
                continue;
            }
            related.unlink(inverse.target_type, &pulled, inverse.field, inverse.to_many, &id);
        }
    }

    Ok(directive)
}

/// Rewrites every to-many link `replace` of `directive` as push/pull against
/// the stored array, so the candidate built from it matches what the backend
/// will persist.
pub fn normalize_to_many(schema: &RecordSchema, original: &Record, directive: &mut UpdateDirective) {
    for field in schema.link_fields().filter(|f| f.is_array) {
        if let Some(value) = directive.replace_value(&field.name).cloned() {
            replace_to_many(original, field, &value, directive);
        }
    }
}

/// Two records of one batch claiming the same related record through a
/// to-one inverse cannot both be satisfied.
fn check_claim(
    ctx: &LinkContext<'_>,
    field: &FieldDef,
    inverse: &InverseSide<'_>,
    linked_id: &Value,
    displaced: Option<Value>,
) -> Result<()> {
    match displaced {
        Some(other) => Err(DbError::BadRequest(format!(
            "{} {} is claimed through '{}.{}' by both {} {} and {} {}",
            inverse.target_type,
            linked_id,
            ctx.schema.name,
            field.name,
            ctx.schema.name,
            other,
            ctx.schema.name,
            ctx.schema.id_of(ctx.original)
        ))),
        None => Ok(()),
    }
}

fn inverse_side<'a>(ctx: &LinkContext<'a>, field: &'a FieldDef) -> Result<Option<InverseSide<'a>>> {
    let Some(link) = field.link_def() else {
        return Ok(None);
    };
    let Some(inverse) = link.inverse.as_deref() else {
        return Ok(None);
    };
    let target_schema = ctx.registry.get(&link.target)?;
    let to_many = target_schema
        .get_field(inverse)
        .is_some_and(|def| def.is_array);
    Ok(Some(InverseSide {
        target_type: &link.target,
        target_schema,
        field: inverse,
        to_many,
    }))
}

/// Replace on a to-one link.
///
/// Points the newly linked record back at `id`, releases the record that
/// newly linked record used to belong to (to-one inverse only), and detaches
/// `id` from the record the field previously pointed at.
fn replace_to_one(
    ctx: &LinkContext<'_>,
    field: &FieldDef,
    inverse: &InverseSide<'_>,
    id: &Value,
    value: &Value,
    related: &mut RelatedUpdates,
) -> Result<()> {
    if !value.is_null() {
        let displaced = related.link(inverse.target_type, value, inverse.field, inverse.to_many, id);
        check_claim(ctx, field, inverse, value, displaced)?;
    }

    let mut released: Option<Value> = None;
    if !value.is_null() && !inverse.to_many {
        if let Some(owner) = previous_owner(ctx, field, inverse, value) {
            if &owner != id {
                related.unlink(&ctx.schema.name, &owner, &field.name, false, value);
                released = Some(owner);
            }
        }
    }

    let previous = ctx.original.get(&field.name);
    let already_handled = inverse.target_type == ctx.schema.name && released.as_ref() == Some(previous);
    if !previous.is_null() && previous != value && !already_handled {
        related.unlink(inverse.target_type, previous, inverse.field, inverse.to_many, id);
    }
    Ok(())
}

/// Replace on a to-many link, rewritten as push (added ids) and pull
/// (removed ids) against the stored array.
fn replace_to_many(original: &Record, field: &FieldDef, value: &Value, directive: &mut UpdateDirective) {
    let before = original.get(&field.name).to_items();
    let after = value.to_items();

    for added in after.iter().filter(|v| !v.is_null() && !before.contains(v)) {
        if !directive.push_items(&field.name).contains(added) {
            directive.add_push(field.name.clone(), added.clone());
        }
    }

    for removed in before.iter().filter(|v| !after.contains(v)) {
        if !directive.pull_items(&field.name).contains(removed) {
            directive.add_pull(field.name.clone(), removed.clone());
        }
    }

    if let Some(replace) = directive.replace.as_mut() {
        replace.remove(&field.name);
        if replace.is_empty() {
            directive.replace = None;
        }
    }
}

/// Second-degree cleanup on push: `linked_id` is being attached to `id`, but
/// its to-one inverse still names another record, which must drop it.
fn release_second_degree(
    ctx: &LinkContext<'_>,
    field: &FieldDef,
    inverse: &InverseSide<'_>,
    id: &Value,
    linked_id: &Value,
    related: &mut RelatedUpdates,
) {
    let Some(owner) = previous_owner(ctx, field, inverse, linked_id) else {
        return;
    };
    if &owner != id {
        related.unlink(&ctx.schema.name, &owner, &field.name, field.is_array, linked_id);
    }
}

/// What the linked record's inverse field pointed at before this batch.
fn previous_owner(
    ctx: &LinkContext<'_>,
    field: &FieldDef,
    inverse: &InverseSide<'_>,
    linked_id: &Value,
) -> Option<Value> {
    let linked = ctx
        .linked
        .get(&field.name)?
        .iter()
        .find(|record| inverse.target_schema.id_of(record) == linked_id)?;
    let owner = linked.get(inverse.field);
    (!owner.is_null()).then(|| owner.clone())
}
