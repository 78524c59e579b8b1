use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use linkmemodb::{
    EngineConfig, MemoryAdapter, Record, RecordSchema, RequestMeta, SchemaRegistry,
    UpdateDirective, UpdateEngine,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "link-tool")]
#[command(about = "Developer tooling for LinkMemDB update batches")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Loads a fixture, applies one update batch and prints the outcome
    Apply {
        /// JSON file with `schemas` and `records`
        #[arg(long)]
        fixture: PathBuf,
        /// Record type the batch addresses
        #[arg(long = "type")]
        record_type: String,
        /// JSON file holding an array of update directives
        #[arg(long)]
        updates: PathBuf,
        /// Also print every table after the batch
        #[arg(long)]
        dump: bool,
    },
    /// Checks a fixture's schemas and prints the resolved link declarations
    Schema {
        #[arg(long)]
        fixture: PathBuf,
    },
}

#[derive(Deserialize)]
struct Fixture {
    schemas: Vec<RecordSchema>,
    #[serde(default)]
    records: BTreeMap<String, Vec<Record>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Apply {
            fixture,
            record_type,
            updates,
            dump,
        } => apply(&fixture, &record_type, &updates, dump).await,
        Command::Schema { fixture } => schema(&fixture),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse '{}'", path.display()))
}

async fn load(path: &Path) -> Result<MemoryAdapter> {
    let fixture: Fixture = read_json(path)?;
    let registry = Arc::new(SchemaRegistry::new(fixture.schemas)?);
    let adapter = MemoryAdapter::new(registry);
    for (record_type, records) in fixture.records {
        for record in records {
            adapter
                .insert(&record_type, record)
                .await
                .with_context(|| format!("Failed to load fixture record of type '{}'", record_type))?;
        }
    }
    Ok(adapter)
}

async fn apply(fixture: &Path, record_type: &str, updates: &Path, dump: bool) -> Result<()> {
    let adapter = load(fixture).await?;
    let directives: Vec<UpdateDirective> = read_json(updates)?;
    let config = EngineConfig::from_env()?;

    let output = run_batch(&adapter, config, record_type, directives, dump).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_batch(
    adapter: &MemoryAdapter,
    config: EngineConfig,
    record_type: &str,
    directives: Vec<UpdateDirective>,
    dump: bool,
) -> Result<serde_json::Value> {
    let engine = UpdateEngine::with_config(
        Arc::new(adapter.clone()),
        adapter.registry().clone(),
        config,
    );
    let mut changes = engine.subscribe();

    let response = engine
        .update(record_type, directives, &RequestMeta::new())
        .await
        .with_context(|| format!("update of '{}' failed", record_type))?;

    let event = changes.try_recv().ok();
    let mut output = json!({
        "records": response.records,
        "update_modified": response.update_modified,
        "change": event,
    });

    if dump {
        let mut tables = serde_json::Map::new();
        for name in adapter.registry().type_names() {
            tables.insert(name.to_string(), serde_json::to_value(adapter.records(name).await)?);
        }
        output["tables"] = serde_json::Value::Object(tables);
    }
    Ok(output)
}

fn schema(fixture: &Path) -> Result<()> {
    let fixture: Fixture = read_json(fixture)?;
    let registry = SchemaRegistry::new(fixture.schemas)?;

    for name in registry.type_names() {
        let schema = registry.get(name)?;
        println!("{} (key: {})", schema.name, schema.primary_key);
        for field in schema.link_fields() {
            let Some(link) = field.link_def() else {
                continue;
            };
            println!(
                "  {}{} -> {}.{}{}",
                field.name,
                if field.is_array { "[]" } else { "" },
                link.target,
                link.inverse.as_deref().unwrap_or("-"),
                if link.denormalized_inverse { " (denormalized)" } else { "" }
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkmemodb::{DbError, FieldDef, FieldType};

    async fn posts() -> MemoryAdapter {
        let registry = SchemaRegistry::new(vec![
            RecordSchema::new("post").field(FieldDef::new("title", FieldType::Text)),
        ])
        .unwrap();
        let adapter = MemoryAdapter::new(Arc::new(registry));
        adapter
            .insert("post", Record::new().with("id", 1).with("title", "a"))
            .await
            .unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_run_batch_reports_records_and_tables() {
        let adapter = posts().await;
        let directives = vec![UpdateDirective::new(1).replace("title", "b")];

        let output = run_batch(&adapter, EngineConfig::default(), "post", directives, true)
            .await
            .unwrap();
        assert_eq!(output["records"][0]["title"], json!("b"));
        assert_eq!(output["tables"]["post"][0]["title"], json!("b"));
    }

    #[tokio::test]
    async fn test_failed_update_keeps_engine_error() {
        let adapter = posts().await;
        let directives = vec![UpdateDirective::new(2).replace("title", "b")];

        let err = run_batch(&adapter, EngineConfig::default(), "post", directives, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("update of 'post' failed"));
        assert!(matches!(err.downcast_ref::<DbError>(), Some(DbError::NotFound(_))));
    }
}
