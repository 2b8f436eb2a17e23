//! Output formatting for CLI commands.

use serde::Serialize;

use crate::cli::args::{OutputFormat, QuiverArgs};
use crate::collection::{CollectionDescription, Record, SearchHit};
use crate::error::Result;
use crate::schema::FieldValue;

/// Result of an insert command.
#[derive(Debug, Serialize)]
pub struct InsertSummary {
    pub collection: String,
    pub rows_inserted: usize,
    pub duration_ms: u64,
}

/// Result of a search command.
#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub collection: String,
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub duration_ms: u64,
}

/// Result of a get command; `None` for ids that do not exist.
#[derive(Debug, Serialize)]
pub struct GetResults {
    pub collection: String,
    pub records: Vec<Option<Record>>,
}

/// Output a value in the selected format.
pub fn output_result<T: Serialize>(value: &T, args: &QuiverArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

/// Print a one-line status message unless running quietly.
pub fn output_message(message: &str, args: &QuiverArgs) {
    if args.output_format == OutputFormat::Human && args.verbosity() > 0 {
        println!("{message}");
    }
}

pub fn output_search_results(results: &SearchResults, args: &QuiverArgs) -> Result<()> {
    if args.output_format == OutputFormat::Json {
        return output_result(results, args);
    }

    println!("Search Results for \"{}\" in '{}':", results.query, results.collection);
    println!("═══════════════");
    for (rank, hit) in results.hits.iter().enumerate() {
        println!();
        println!("{}. {} (distance: {:.4})", rank + 1, hit.id, hit.distance);
        for (name, value) in &hit.record.fields {
            println!("   {name}: {}", display_value(value));
        }
    }
    println!();
    println!("{} hits in {}ms", results.hits.len(), results.duration_ms);
    Ok(())
}

pub fn output_records(results: &GetResults, ids: &[String], args: &QuiverArgs) -> Result<()> {
    if args.output_format == OutputFormat::Json {
        return output_result(results, args);
    }

    for (id, record) in ids.iter().zip(&results.records) {
        match record {
            Some(record) => {
                println!("{id}:");
                for (name, value) in &record.fields {
                    println!("   {name}: {}", display_value(value));
                }
            }
            None => println!("{id}: <not found>"),
        }
    }
    Ok(())
}

pub fn output_description(description: &CollectionDescription, args: &QuiverArgs) -> Result<()> {
    if args.output_format == OutputFormat::Json {
        return output_result(description, args);
    }

    println!("Collection '{}'", description.name);
    println!("─────────────");
    println!("State:    {}", description.state);
    println!("Rows:     {}", description.row_count);
    println!(
        "Index:    {} on '{}' ({})",
        description.index.index_type, description.index.field_name, description.index.metric_type
    );
    if let Some(structure) = description.search_structure {
        println!("Serving:  {structure}");
    }
    println!("Created:  {}", description.created_at.to_rfc3339());
    println!("Fields:");
    for field in &description.schema.fields {
        let mut extras = Vec::new();
        if field.is_primary {
            extras.push("primary".to_string());
        }
        if let Some(max_length) = field.max_length {
            extras.push(format!("max_length={max_length}"));
        }
        if let Some(dim) = field.dim {
            extras.push(format!("dim={dim}"));
        }
        println!("   {} {} {}", field.name, field.data_type, extras.join(" "));
    }
    for function in &description.schema.functions {
        println!(
            "Function: {} ({} -> {}, {}/{})",
            function.name,
            function.input_field,
            function.output_field,
            function.params.provider,
            function.params.model_name
        );
    }
    Ok(())
}

pub fn output_names(names: &[String], args: &QuiverArgs) -> Result<()> {
    if args.output_format == OutputFormat::Json {
        return output_result(&names, args);
    }
    if names.is_empty() && args.verbosity() > 0 {
        println!("No collections");
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

fn display_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Bool(v) => v.to_string(),
        FieldValue::Int64(v) => v.to_string(),
        FieldValue::Double(v) => v.to_string(),
        FieldValue::VarChar(v) => v.clone(),
        FieldValue::FloatVector(v) => format!("<vector of {}>", v.len()),
    }
}
