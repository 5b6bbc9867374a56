//! Command-line front end for the batch engine.
//!
//! Records are read as a JSON array of objects from a file or stdin; results
//! are printed as JSON on stdout. Connection settings come from `PGBULK_*`
//! environment variables and may be overridden by flags.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pgbulk::{
    connect, read_records, BatchConfig, BatchEngine, BatchMetrics, DeleteRequest, FieldValue,
    PgTransport, Record, SelectRequest,
};
use serde_json::Value as JsonValue;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pgbulk", about = "Batch INSERT/UPDATE/SELECT/DELETE against PostgreSQL")]
struct Cli {
    /// Connection string; overrides PGBULK_DATABASE_URL.
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Schema for unqualified table names; overrides PGBULK_SCHEMA.
    #[arg(long, global = true)]
    schema: Option<String>,

    /// Log every statement at info level.
    #[arg(long, global = true)]
    statement_log: bool,

    /// Print engine counters to stderr when done.
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert records, one statement per record shape.
    Insert {
        table: String,
        /// JSON input file, `-` for stdin.
        #[arg(long, default_value = "-")]
        input: PathBuf,
        /// Raw RETURNING column list.
        #[arg(long)]
        returning: Option<String>,
    },
    /// Update records matched on one or more key columns.
    Update {
        table: String,
        #[arg(long, default_value = "-")]
        input: PathBuf,
        /// Key column; repeat for composite keys.
        #[arg(long = "key")]
        keys: Vec<String>,
    },
    /// Read rows.
    Select {
        table: String,
        /// Raw column list, defaults to `*`.
        #[arg(long)]
        columns: Option<String>,
        /// Raw WHERE predicate using `$n` placeholders.
        #[arg(long = "where")]
        predicate: Option<String>,
        /// Positional predicate parameter; repeat in `$n` order.
        #[arg(long = "param")]
        params: Vec<String>,
        /// Render date columns as YYYY-MM-DD.
        #[arg(long)]
        presentation: bool,
    },
    /// Delete rows; a predicate is required unless --all is given.
    Delete {
        table: String,
        #[arg(long = "where")]
        predicate: Option<String>,
        #[arg(long = "param")]
        params: Vec<String>,
        /// Allow deleting every row of the table.
        #[arg(long)]
        all: bool,
    },
    /// Show column metadata, including enum labels.
    Describe { table: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pgbulk=info,warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = BatchConfig::from_env()?;
    if let Some(database_url) = cli.database_url.clone() {
        config.database_url = database_url;
    }
    if let Some(schema) = cli.schema.clone() {
        config.schema = schema;
    }
    config.statement_log |= cli.statement_log;

    let metrics = Arc::new(BatchMetrics::default());
    let (transport, connection) = connect(&config).await?;
    let output = run(&cli.command, &config, &transport, Arc::clone(&metrics)).await;
    drop(transport);
    connection.await.context("join connection task")?;

    if cli.metrics {
        eprint!("{}", metrics.render_text());
    }
    print_json(&output?)
}

async fn run(
    command: &Command,
    config: &BatchConfig,
    transport: &PgTransport,
    metrics: Arc<BatchMetrics>,
) -> Result<JsonValue> {
    let engine = BatchEngine::new(transport)
        .with_metrics(metrics)
        .with_statement_log(config.statement_log);

    let value = match command {
        Command::Insert {
            table,
            input,
            returning,
        } => {
            let records = load_records(input)?;
            engine
                .bulk_insert(&config.table(table), &records, returning.as_deref())
                .await?
                .to_json()
        }
        Command::Update { table, input, keys } => {
            let records = load_records(input)?;
            engine
                .bulk_update_by_keys(&config.table(table), &records, keys.as_slice())
                .await?
                .to_json()
        }
        Command::Select {
            table,
            columns,
            predicate,
            params,
            presentation,
        } => {
            let mut request = SelectRequest::new(config.table(table)).presentation(*presentation);
            if let Some(columns) = columns {
                request = request.with_columns(columns.as_str());
            }
            if let Some(predicate) = predicate {
                request = request.with_predicate(predicate.as_str(), text_params(params));
            }
            let rows = engine.select_rows(&request).await?;
            JsonValue::Array(rows.iter().map(Record::to_json).collect())
        }
        Command::Delete {
            table,
            predicate,
            params,
            all,
        } => {
            let mut request = DeleteRequest::new(config.table(table)).allow_full_table_delete(*all);
            if let Some(predicate) = predicate {
                request = request.with_predicate(predicate.as_str(), text_params(params));
            }
            let deleted = engine.delete(&request).await?;
            serde_json::json!({ "rows_affected": deleted })
        }
        Command::Describe { table } => {
            let schema = engine.describe_table(&config.table(table)).await?;
            serde_json::to_value(&schema).context("serialize table schema")?
        }
    };
    Ok(value)
}

/// CLI parameters travel as text and are coerced to the placeholder type.
fn text_params(params: &[String]) -> Vec<FieldValue> {
    params.iter().map(|param| FieldValue::Text(param.clone())).collect()
}

fn load_records(input: &Path) -> Result<Vec<Record>> {
    if input.as_os_str() == "-" {
        return Ok(read_records(io::stdin().lock())?);
    }
    let file = File::open(input).with_context(|| format!("open input {}", input.display()))?;
    read_records(BufReader::new(file)).with_context(|| format!("read records from {}", input.display()))
}

fn print_json(value: &JsonValue) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value).context("write output")?;
    writeln!(out).context("write output")?;
    Ok(())
}
