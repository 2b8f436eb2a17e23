//! Command line argument parsing for the Quiver CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Quiver - a single-node vector collection engine
#[derive(Parser, Debug, Clone)]
#[command(name = "quiver")]
#[command(about = "Create, fill and search vector collections")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct QuiverArgs {
    /// Directory holding the collections
    #[arg(short = 'd', long, env = "QUIVER_DATA_DIR", default_value = "./quiver-data")]
    pub data_dir: PathBuf,

    /// Engine configuration file (JSON); its storage setting is replaced by --data-dir
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl QuiverArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose.saturating_add(1)
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a collection from a schema file
    Create(CreateArgs),

    /// Insert rows from a JSONL file
    Insert(InsertArgs),

    /// Build the search structure of a collection
    Load(CollectionArgs),

    /// Release the search structure of a collection
    Unload(CollectionArgs),

    /// Search a loaded collection by text
    Search(SearchArgs),

    /// Fetch rows by primary key
    Get(IdsArgs),

    /// Delete rows by primary key
    Delete(IdsArgs),

    /// Drop a collection and all its data
    Drop(CollectionArgs),

    /// List all collections
    List,

    /// Show schema, index and state of a collection
    Describe(CollectionArgs),
}

/// A command that only names a collection
#[derive(Parser, Debug, Clone)]
pub struct CollectionArgs {
    /// Collection name
    #[arg(value_name = "NAME")]
    pub name: String,
}

/// Arguments for creating a collection
#[derive(Parser, Debug, Clone)]
pub struct CreateArgs {
    /// Collection name
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Schema definition file (JSON with `schema` and `index_params`)
    #[arg(short, long, value_name = "SCHEMA_FILE")]
    pub schema: PathBuf,
}

/// Arguments for inserting rows
#[derive(Parser, Debug, Clone)]
pub struct InsertArgs {
    /// Collection name
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Row file, one `{"id": ..., "fields": {...}}` object per line
    #[arg(value_name = "ROWS_FILE")]
    pub rows_file: PathBuf,

    /// Rows per embedding request
    #[arg(short, long, default_value = "256")]
    pub batch_size: usize,
}

/// Arguments for searching
#[derive(Parser, Debug, Clone)]
pub struct SearchArgs {
    /// Collection name
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Query text
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Maximum number of results to return
    #[arg(short = 'k', long = "limit", default_value = "10")]
    pub limit: usize,
}

/// Arguments naming rows of a collection
#[derive(Parser, Debug, Clone)]
pub struct IdsArgs {
    /// Collection name
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Primary keys
    #[arg(value_name = "ID", required = true)]
    pub ids: Vec<String>,
}

/// Output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
