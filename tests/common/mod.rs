#![allow(dead_code)]

use linkmemodb::core::{FieldDef, FieldType, Record, RecordSchema, Result, SchemaRegistry, Value};
use linkmemodb::{MemoryAdapter, UpdateEngine};
use std::sync::Arc;

/// Blog fixture.
///
/// - post 1: tags [2, 4], no cover
/// - post 9: tags [5, 6], cover 10
/// - tags 2, 4 owned by post 1; tags 5, 6 owned by post 9; tag 3 unowned;
///   tag 11 claims post 99, which does not exist
/// - users 7 and 8 without posts
pub fn blog_registry() -> Arc<SchemaRegistry> {
    let registry = SchemaRegistry::new(vec![
        RecordSchema::new("post")
            .field(FieldDef::new("title", FieldType::Text).not_null())
            .field(FieldDef::new("views", FieldType::Integer))
            .field(FieldDef::link("tags", "tag").array().inverse("owner"))
            .field(FieldDef::link("author", "user").inverse("posts"))
            .field(FieldDef::link("cover", "image").inverse("post")),
        RecordSchema::new("tag")
            .field(FieldDef::new("name", FieldType::Text))
            .field(FieldDef::link("owner", "post").inverse("tags")),
        RecordSchema::new("user")
            .field(FieldDef::new("name", FieldType::Text))
            .field(FieldDef::link("posts", "post").array().inverse("author")),
        RecordSchema::new("image").field(FieldDef::link("post", "post").inverse("cover")),
    ]);
    match registry {
        Ok(registry) => Arc::new(registry),
        Err(err) => panic!("blog schema rejected: {}", err),
    }
}

pub async fn blog() -> Result<(UpdateEngine, MemoryAdapter)> {
    let registry = blog_registry();
    let adapter = MemoryAdapter::new(registry.clone());

    adapter
        .insert(
            "post",
            Record::new()
                .with("id", 1)
                .with("title", "first")
                .with("views", 0)
                .with("tags", vec![2, 4]),
        )
        .await?;
    adapter
        .insert(
            "post",
            Record::new()
                .with("id", 9)
                .with("title", "other")
                .with("views", 0)
                .with("tags", vec![5, 6])
                .with("cover", 10),
        )
        .await?;

    let tags = [
        (2, Value::from(1)),
        (3, Value::Null),
        (4, Value::from(1)),
        (5, Value::from(9)),
        (6, Value::from(9)),
        (11, Value::from(99)),
    ];
    for (id, owner) in tags {
        adapter
            .insert(
                "tag",
                Record::new()
                    .with("id", id)
                    .with("name", format!("tag-{}", id))
                    .with("owner", owner),
            )
            .await?;
    }
    for id in [7, 8] {
        adapter
            .insert(
                "user",
                Record::new()
                    .with("id", id)
                    .with("name", format!("user-{}", id))
                    .with("posts", Value::List(vec![])),
            )
            .await?;
    }
    adapter
        .insert("image", Record::new().with("id", 10).with("post", 9))
        .await?;

    let engine = UpdateEngine::new(Arc::new(adapter.clone()), registry);
    Ok((engine, adapter))
}

pub async fn field(adapter: &MemoryAdapter, record_type: &str, id: i64, name: &str) -> Value {
    match adapter.get(record_type, id).await {
        Some(record) => record.get(name).clone(),
        None => panic!("{} {} missing", record_type, id),
    }
}
