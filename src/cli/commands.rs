//! Command implementations for the Quiver CLI.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use log::{debug, info};
use serde::Deserialize;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::client::CollectionManager;
use crate::collection::Row;
use crate::config::{QuiverConfig, StorageBackend};
use crate::embedding::{EmbedderRegistry, HashingEmbedder, TextEmbedder};
use crate::schema::{CollectionSchema, IndexParamsBuilder};

/// Contents of a `create --schema` file.
#[derive(Debug, Deserialize)]
pub struct CollectionFile {
    pub schema: CollectionSchema,
    pub index_params: IndexParamsBuilder,
}

/// Execute a CLI command.
pub async fn execute_command(args: QuiverArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    let manager = CollectionManager::open(config, fallback_embedders())
        .await
        .with_context(|| format!("opening data directory {}", args.data_dir.display()))?;

    match &args.command {
        Command::Create(create_args) => create_collection(&manager, create_args, &args),
        Command::Insert(insert_args) => insert_rows(&manager, insert_args, &args).await,
        Command::Load(target) => {
            manager.load_collection(&target.name).await?;
            output_message(&format!("Collection '{}' loaded", target.name), &args);
            Ok(())
        }
        Command::Unload(target) => {
            manager.unload_collection(&target.name).await?;
            output_message(&format!("Collection '{}' unloaded", target.name), &args);
            Ok(())
        }
        Command::Search(search_args) => search_collection(&manager, search_args, &args).await,
        Command::Get(ids_args) => {
            let records = manager.get(&ids_args.name, &ids_args.ids)?;
            let results = GetResults {
                collection: ids_args.name.clone(),
                records,
            };
            Ok(output_records(&results, &ids_args.ids, &args)?)
        }
        Command::Delete(ids_args) => {
            let removed = manager.delete(&ids_args.name, &ids_args.ids)?;
            output_message(
                &format!("Deleted {removed} rows from '{}'", ids_args.name),
                &args,
            );
            Ok(())
        }
        Command::Drop(target) => {
            manager.drop_collection(&target.name)?;
            output_message(&format!("Collection '{}' dropped", target.name), &args);
            Ok(())
        }
        Command::List => Ok(output_names(&manager.list_collections(), &args)?),
        Command::Describe(target) => {
            let description = manager.describe_collection(&target.name)?;
            Ok(output_description(&description, &args)?)
        }
    }
}

/// Engine configuration for a CLI run: the config file if given, rooted at
/// `--data-dir`.
pub fn build_config(args: &QuiverArgs) -> anyhow::Result<QuiverConfig> {
    let mut config = match &args.config {
        Some(path) => QuiverConfig::from_file(path)
            .with_context(|| format!("reading config file {}", path.display()))?,
        None => QuiverConfig::default(),
    };
    config.storage = StorageBackend::File(args.data_dir.clone());
    config.validate()?;
    Ok(config)
}

/// The CLI has no model access; every provider is served by the hashing
/// embedder at the dimension the schema declares.
pub fn fallback_embedders() -> EmbedderRegistry {
    let registry = EmbedderRegistry::new();
    registry.register_fallback(|dim| -> Arc<dyn TextEmbedder> { Arc::new(HashingEmbedder::new(dim)) });
    registry
}

fn create_collection(
    manager: &CollectionManager,
    args: &CreateArgs,
    cli_args: &QuiverArgs,
) -> anyhow::Result<()> {
    let file = load_collection_file(&args.schema)?;
    manager.create_collection(&args.name, &file.schema, &file.index_params)?;
    output_message(&format!("Collection '{}' created", args.name), cli_args);
    Ok(())
}

fn load_collection_file(path: &Path) -> anyhow::Result<CollectionFile> {
    let bytes =
        fs::read(path).with_context(|| format!("reading schema file {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing schema file {}", path.display()))
}

/// Parse a JSONL row file, skipping blank lines.
pub fn read_rows(path: &Path) -> anyhow::Result<Vec<Row>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading rows from {}", path.display()))?;
    let mut rows = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: Row = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid row", path.display(), line_no + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

async fn insert_rows(
    manager: &CollectionManager,
    args: &InsertArgs,
    cli_args: &QuiverArgs,
) -> anyhow::Result<()> {
    if args.batch_size == 0 {
        bail!("--batch-size must be at least 1");
    }
    let rows = read_rows(&args.rows_file)?;
    let total = rows.len();
    info!("inserting {total} rows into '{}'", args.name);

    let start_time = Instant::now();
    let mut inserted = 0;
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let batch: Vec<Row> = rows.by_ref().take(args.batch_size).collect();
        inserted += manager.insert_many(&args.name, batch).await?;
        debug!("{inserted}/{total} rows inserted");
    }

    let summary = InsertSummary {
        collection: args.name.clone(),
        rows_inserted: inserted,
        duration_ms: start_time.elapsed().as_millis() as u64,
    };
    if cli_args.output_format == OutputFormat::Json {
        output_result(&summary, cli_args)?;
    } else {
        output_message(
            &format!(
                "Inserted {} rows into '{}' in {}ms",
                summary.rows_inserted, summary.collection, summary.duration_ms
            ),
            cli_args,
        );
    }
    Ok(())
}

async fn search_collection(
    manager: &CollectionManager,
    args: &SearchArgs,
    cli_args: &QuiverArgs,
) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let hits = manager.search(&args.name, &args.query, args.limit).await?;
    let results = SearchResults {
        collection: args.name.clone(),
        query: args.query.clone(),
        hits,
        duration_ms: start_time.elapsed().as_millis() as u64,
    };
    Ok(output_search_results(&results, cli_args)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const SCHEMA: &str = r#"{
        "schema": {
            "fields": [
                {"name": "id", "data_type": "VARCHAR", "is_primary": true, "max_length": 32},
                {"name": "content", "data_type": "VARCHAR", "max_length": 256},
                {"name": "dense", "data_type": "FLOAT_VECTOR", "dim": 16}
            ],
            "functions": [{
                "name": "embed",
                "function_type": "TEXTEMBEDDING",
                "input_field": "content",
                "output_field": "dense",
                "params": {"provider": "openai", "model_name": "text-embedding-3-small"}
            }]
        },
        "index_params": {
            "indexes": [{"field_name": "dense", "index_type": "AUTOINDEX", "metric_type": "COSINE"}]
        }
    }"#;

    fn args(dir: &Path, rest: &[&str]) -> QuiverArgs {
        let data_dir = dir.join("data");
        let mut argv = vec!["quiver", "-q", "--data-dir", data_dir.to_str().unwrap()];
        argv.extend_from_slice(rest);
        QuiverArgs::try_parse_from(argv).unwrap()
    }

    #[tokio::test]
    async fn test_commands_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("schema.json");
        let rows_path = dir.path().join("rows.jsonl");
        fs::write(&schema_path, SCHEMA).unwrap();
        fs::write(
            &rows_path,
            "{\"id\": \"a\", \"fields\": {\"content\": \"rust vector search\"}}\n\n\
             {\"id\": \"b\", \"fields\": {\"content\": \"baking bread at home\"}}\n",
        )
        .unwrap();

        let schema_arg = schema_path.to_str().unwrap();
        let rows_arg = rows_path.to_str().unwrap();
        for command in [
            vec!["create", "docs", "--schema", schema_arg],
            vec!["insert", "docs", rows_arg, "--batch-size", "1"],
            vec!["load", "docs"],
        ] {
            execute_command(args(dir.path(), &command)).await.unwrap();
        }

        // a fresh manager sees the collection loaded again
        let config = build_config(&args(dir.path(), &["list"])).unwrap();
        let manager = CollectionManager::open(config, fallback_embedders())
            .await
            .unwrap();
        let hits = manager.search("docs", "rust vector search", 1).await.unwrap();
        assert_eq!(hits[0].id, "a");
        drop(manager);

        execute_command(args(dir.path(), &["drop", "docs"]))
            .await
            .unwrap();
        let config = build_config(&args(dir.path(), &["list"])).unwrap();
        let manager = CollectionManager::open(config, fallback_embedders())
            .await
            .unwrap();
        assert!(manager.list_collections().is_empty());
    }

    #[test]
    fn test_read_rows_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        fs::write(&path, "{\"id\": \"a\"}\nnot json\n").unwrap();
        let err = read_rows(&path).unwrap_err();
        assert!(err.to_string().ends_with(":2: invalid row"));
    }
}
