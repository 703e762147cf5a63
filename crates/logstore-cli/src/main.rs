//! Logstore CLI (`logstore`)
//!
//! Runs LogsQL queries over JSON-lines log files.
//!
//! ## Quick Start
//!
//! ```bash
//! # Print the canonical form of a query
//! logstore parse 'error AND _time:5m | stats by (host) count()'
//!
//! # Ingest files and run a query; rows are printed as JSON lines
//! logstore query -i app.log -i db.log --stream-fields host,app 'error | sort by (_time desc) | limit 10'
//!
//! # Field introspection
//! logstore field-names -i app.log
//! logstore field-values -i app.log host --limit 5
//! logstore streams -i app.log --stream-fields host
//!
//! # Delete rows, then inspect what is left
//! logstore delete -i app.log 'level:debug' --query '* | stats count()'
//! ```
//!
//! ## Configuration
//!
//! - `--config FILE` (or `LOGSTORE_CONFIG`): JSON storage settings such as
//!   `{"retention": "30d", "max_concurrency": 4}`
//! - `RUST_LOG`: log filter, `info` by default. Logs go to stderr.
//! - `--metrics`: print Prometheus metrics to stderr before exiting

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use logstore_query::{parse_query, Storage};
use logstore_storage::StorageConfig;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

mod format;
mod ingest;

#[derive(Parser)]
#[command(name = "logstore")]
#[command(about = "Run LogsQL queries over JSON-lines logs", long_about = None)]
struct Cli {
    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a query and print its canonical form
    Parse {
        /// LogsQL query
        query: String,
        /// Print the optimized query
        #[arg(long)]
        optimize: bool,
    },
    /// Run a query and print the resulting rows as JSON lines
    Query {
        #[command(flatten)]
        input: InputArgs,
        /// LogsQL query
        query: String,
    },
    /// Print the field names of the selected rows with their hits
    FieldNames {
        #[command(flatten)]
        input: InputArgs,
        /// LogsQL query selecting the rows
        #[arg(default_value = "*")]
        query: String,
    },
    /// Print the distinct values of a field with their hits
    FieldValues {
        #[command(flatten)]
        input: InputArgs,
        /// Field name
        field: String,
        /// LogsQL query selecting the rows
        #[arg(short, long, default_value = "*")]
        query: String,
        /// Maximum number of values; 0 means no limit
        #[arg(short, long, default_value = "0")]
        limit: u64,
    },
    /// Print the streams of the selected rows with their hits
    Streams {
        #[command(flatten)]
        input: InputArgs,
        /// LogsQL query selecting the rows
        #[arg(short, long, default_value = "*")]
        query: String,
        /// Maximum number of streams; 0 means no limit
        #[arg(short, long, default_value = "0")]
        limit: u64,
    },
    /// Delete the rows matching a filter, then run a query over the rest
    Delete {
        #[command(flatten)]
        input: InputArgs,
        /// LogsQL filter selecting the rows to delete
        filter: String,
        /// LogsQL query to run after the deletion
        #[arg(short, long, default_value = "* | stats count() rows")]
        query: String,
    },
}

#[derive(Args)]
struct InputArgs {
    /// JSON-lines files to ingest
    #[arg(short, long = "input", required = true)]
    inputs: Vec<PathBuf>,

    /// Storage config file (JSON)
    #[arg(short, long, env = "LOGSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Fields forming the stream of every entry
    #[arg(long, value_delimiter = ',')]
    stream_fields: Vec<String>,

    /// Tenant of the ingested entries, as `account:project`
    #[arg(long, default_value = "0:0")]
    tenant: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    logstore_observability::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Parse { query, optimize } => handle_parse(&query, optimize)?,
        Commands::Query { input, query } => {
            let storage = load_storage(&input).await?;
            handle_query(&storage, &query).await?
        }
        Commands::FieldNames { input, query } => {
            let storage = load_storage(&input).await?;
            let q = parse_query(&query).context("invalid query")?;
            let names = storage.get_field_names(&[], &q).await.context("cannot get field names")?;
            print!("{}", format::values_with_hits_to_json_lines(&names));
        }
        Commands::FieldValues {
            input,
            field,
            query,
            limit,
        } => {
            let storage = load_storage(&input).await?;
            let q = parse_query(&query).context("invalid query")?;
            let values = storage
                .get_field_values(&[], &q, &field, limit)
                .await
                .with_context(|| format!("cannot get values of field {field:?}"))?;
            print!("{}", format::values_with_hits_to_json_lines(&values));
        }
        Commands::Streams { input, query, limit } => {
            let storage = load_storage(&input).await?;
            let q = parse_query(&query).context("invalid query")?;
            let streams = storage.get_streams(&[], &q, limit).await.context("cannot get streams")?;
            print!("{}", format::values_with_hits_to_json_lines(&streams));
        }
        Commands::Delete { input, filter, query } => {
            let storage = load_storage(&input).await?;
            let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
            let deleted = storage
                .delete_run_task("cli", now, &[], &filter)
                .await
                .with_context(|| format!("cannot delete rows matching {filter:?}"))?;
            info!(deleted, "Deleted rows");
            handle_query(&storage, &query).await?
        }
    }

    if cli.metrics {
        eprint!("{}", logstore_observability::gather_text());
    }
    Ok(())
}

fn handle_parse(query: &str, optimize: bool) -> Result<()> {
    let mut q = parse_query(query).context("invalid query")?;
    if optimize {
        q.optimize();
    }
    println!("{q}");
    Ok(())
}

async fn handle_query(storage: &Storage, query: &str) -> Result<()> {
    let q = parse_query(query).context("invalid query")?;
    storage
        .run_query(&[], &q, |_, br| {
            let text = format::block_to_json_lines(&br);
            let _ = std::io::stdout().lock().write_all(text.as_bytes());
        })
        .await
        .with_context(|| format!("cannot execute query {query:?}"))?;
    std::io::stdout().flush().context("cannot flush stdout")?;
    Ok(())
}

async fn load_storage(input: &InputArgs) -> Result<Storage> {
    let config = match &input.config {
        Some(path) => {
            let data = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
            serde_json::from_str::<StorageConfig>(&data)
                .with_context(|| format!("cannot parse storage config {}", path.display()))?
        }
        None => StorageConfig::default(),
    };
    let tenant_id = ingest::parse_tenant(&input.tenant)?;
    let storage = Storage::new(config.clone()).context("cannot open storage")?;

    for path in &input.inputs {
        let mut batches = Vec::new();
        let entries = ingest::read_json_lines(path, &config, tenant_id, &input.stream_fields, |lr| {
            batches.push(lr);
            Ok(())
        })?;
        for lr in batches {
            storage.must_add_rows(lr).await.context("cannot ingest rows")?;
        }
        info!(path = %path.display(), entries, "Ingested file");
    }
    Ok(storage)
}
