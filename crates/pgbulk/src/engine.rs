//! Batch write engine, read path and guarded delete.
//!
//! Every batch call runs the same pipeline: validate input, fetch the column
//! catalog once, partition by shape, synthesize every statement, then execute
//! the statements one at a time in partition order. Nothing is sent to the
//! store until all statements rendered; a failing partition stops the run and
//! leaves earlier partitions applied.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::catalog::{self, TableSchema};
use crate::decorate::decorate_rows;
use crate::error::BatchError;
use crate::guard::DeleteRequest;
use crate::metrics::BatchMetrics;
use crate::partition::partition_records;
use crate::record::{FieldValue, Record};
use crate::statement::{insert_statement, returning_clause, update_statement, ColumnCasts, Statement};
use crate::transport::{QueryOutput, TableRef, Transport};

/// Result of a batch write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Rows produced by `RETURNING`, concatenated in partition order.
    Returned(Vec<Record>),
    /// Success marker with execution totals.
    Applied { statements: usize, rows_affected: u64 },
}

impl WriteOutcome {
    /// Returned rows; empty for [`WriteOutcome::Applied`].
    pub fn into_rows(self) -> Vec<Record> {
        match self {
            Self::Returned(rows) => rows,
            Self::Applied { .. } => Vec::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Returned(rows) => serde_json::Value::Array(rows.iter().map(Record::to_json).collect()),
            Self::Applied {
                statements,
                rows_affected,
            } => serde_json::json!({
                "statements": statements,
                "rows_affected": rows_affected,
            }),
        }
    }
}

/// A `SELECT` over one table.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectRequest {
    pub table: TableRef,
    /// Raw column list; `None` or blank selects `*`.
    pub columns: Option<String>,
    pub predicate: Option<String>,
    pub params: Vec<FieldValue>,
    /// Format `date` columns as `YYYY-MM-DD` instead of normalizing timestamps.
    pub presentation: bool,
}

impl SelectRequest {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            columns: None,
            predicate: None,
            params: Vec::new(),
            presentation: false,
        }
    }

    pub fn with_columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = Some(columns.into());
        self
    }

    pub fn with_predicate(
        mut self,
        predicate: impl Into<String>,
        params: impl IntoIterator<Item = FieldValue>,
    ) -> Self {
        self.predicate = Some(predicate.into());
        self.params = params.into_iter().collect();
        self
    }

    pub fn presentation(mut self, presentation: bool) -> Self {
        self.presentation = presentation;
        self
    }

    pub fn to_statement(&self) -> Statement {
        let columns = non_blank(self.columns.as_deref()).unwrap_or("*");
        let mut text = format!("SELECT {columns} FROM {}", self.table);
        if let Some(predicate) = non_blank(self.predicate.as_deref()) {
            text.push_str(" WHERE ");
            text.push_str(predicate);
        }
        Statement {
            text,
            params: self.params.clone(),
        }
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|text| !text.is_empty())
}

/// Executes batch operations over a caller-owned transport.
pub struct BatchEngine<'t, T: Transport + ?Sized> {
    transport: &'t T,
    metrics: Arc<BatchMetrics>,
    statement_log: bool,
}

impl<'t, T: Transport + ?Sized> BatchEngine<'t, T> {
    pub fn new(transport: &'t T) -> Self {
        Self {
            transport,
            metrics: Arc::new(BatchMetrics::default()),
            statement_log: false,
        }
    }

    /// Shares an existing metrics instance with this engine.
    pub fn with_metrics(mut self, metrics: Arc<BatchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Logs every statement at `info` instead of `debug`.
    pub fn with_statement_log(mut self, enabled: bool) -> Self {
        self.statement_log = enabled;
        self
    }

    pub fn metrics(&self) -> &Arc<BatchMetrics> {
        &self.metrics
    }

    pub fn transport(&self) -> &'t T {
        self.transport
    }

    /// Inserts `records` into `table`, one multi-row statement per shape.
    ///
    /// With a non-blank `returning` list the returned rows of all partitions
    /// are concatenated in partition order.
    pub async fn bulk_insert(
        &self,
        table: &TableRef,
        records: &[Record],
        returning: Option<&str>,
    ) -> Result<WriteOutcome, BatchError> {
        let span = info_span!(
            "pgbulk.batch",
            op = "insert",
            table = %table,
            records = records.len()
        );
        self.insert_inner(table, records, returning)
            .instrument(span)
            .await
    }

    async fn insert_inner(
        &self,
        table: &TableRef,
        records: &[Record],
        returning: Option<&str>,
    ) -> Result<WriteOutcome, BatchError> {
        let partitions = partition_records(table, records)?;
        let schema = self.fetch_schema(table).await?;
        let casts = ColumnCasts::resolve(&schema, &partitions)?;
        let statements = partitions
            .iter()
            .map(|partition| insert_statement(table, partition, &casts, returning))
            .collect::<Result<Vec<_>, _>>()?;
        self.metrics.record_batch(partitions.len());

        let collect_rows = returning_clause(returning).is_some();
        let (rows, rows_affected) = self.execute_partitions(table, &statements).await?;
        if collect_rows {
            Ok(WriteOutcome::Returned(rows))
        } else {
            Ok(WriteOutcome::Applied {
                statements: statements.len(),
                rows_affected,
            })
        }
    }

    /// Updates rows of `table` matched on `keys`, one VALUES join per shape.
    ///
    /// Every record must carry every key; violations are reported by record
    /// position before the store is contacted.
    pub async fn bulk_update_by_keys<K: AsRef<str>>(
        &self,
        table: &TableRef,
        records: &[Record],
        keys: &[K],
    ) -> Result<WriteOutcome, BatchError> {
        let keys: Vec<String> = keys.iter().map(|key| key.as_ref().to_string()).collect();
        let span = info_span!(
            "pgbulk.batch",
            op = "update",
            table = %table,
            records = records.len(),
            keys = keys.len()
        );
        self.update_inner(table, records, &keys)
            .instrument(span)
            .await
    }

    async fn update_inner(
        &self,
        table: &TableRef,
        records: &[Record],
        keys: &[String],
    ) -> Result<WriteOutcome, BatchError> {
        if records.is_empty() {
            return Err(BatchError::NoRecords {
                table: table.to_string(),
            });
        }
        if keys.is_empty() {
            return Err(BatchError::NoKeyColumns {
                table: table.to_string(),
            });
        }
        for (index, record) in records.iter().enumerate() {
            if let Some(key) = keys.iter().find(|key| !record.contains(key)) {
                return Err(BatchError::MissingKeyColumn {
                    table: table.to_string(),
                    index,
                    key: key.clone(),
                });
            }
        }

        let partitions = partition_records(table, records)?;
        let schema = self.fetch_schema(table).await?;
        let casts = ColumnCasts::resolve(&schema, &partitions)?;
        let statements = partitions
            .iter()
            .enumerate()
            .map(|(idx, partition)| update_statement(table, idx, partition, &casts, keys))
            .collect::<Result<Vec<_>, _>>()?;
        self.metrics.record_batch(partitions.len());

        let (_, rows_affected) = self.execute_partitions(table, &statements).await?;
        Ok(WriteOutcome::Applied {
            statements: statements.len(),
            rows_affected,
        })
    }

    /// Runs a guarded delete and returns the number of rows removed.
    pub async fn delete(&self, request: &DeleteRequest) -> Result<u64, BatchError> {
        let statement = match request.to_statement() {
            Ok(statement) => statement,
            Err(err) => {
                if matches!(err, BatchError::UnscopedDelete { .. }) {
                    self.metrics.record_unscoped_delete_rejected();
                    warn!(table = %request.table, "rejected delete without predicate");
                }
                return Err(err);
            }
        };
        let span = info_span!("pgbulk.delete", table = %request.table);
        let output = self
            .execute_single(&request.table, &statement)
            .instrument(span)
            .await?;
        Ok(output.rows_affected)
    }

    /// Reads rows and decorates them for presentation or wall-clock use.
    pub async fn select_rows(&self, request: &SelectRequest) -> Result<Vec<Record>, BatchError> {
        let span = info_span!(
            "pgbulk.select",
            table = %request.table,
            presentation = request.presentation
        );
        self.select_inner(request).instrument(span).await
    }

    async fn select_inner(&self, request: &SelectRequest) -> Result<Vec<Record>, BatchError> {
        let statement = request.to_statement();
        let output = self.execute_single(&request.table, &statement).await?;
        if request.presentation {
            let schema = self.fetch_schema(&request.table).await?;
            Ok(decorate_rows(&output.rows, &schema.columns, true))
        } else {
            Ok(decorate_rows(&output.rows, &[], false))
        }
    }

    /// Column catalog of `table` with enum labels attached.
    pub async fn describe_table(&self, table: &TableRef) -> Result<TableSchema, BatchError> {
        catalog::describe_table(self.transport, table, &self.metrics).await
    }

    async fn fetch_schema(&self, table: &TableRef) -> Result<TableSchema, BatchError> {
        self.metrics.record_schema_lookup();
        catalog::fetch_columns(self.transport, table).await
    }

    /// Executes partition statements in order, stopping at the first failure.
    async fn execute_partitions(
        &self,
        table: &TableRef,
        statements: &[Statement],
    ) -> Result<(Vec<Record>, u64), BatchError> {
        let table_name = table.to_string();
        let mut rows = Vec::new();
        let mut rows_affected = 0u64;
        for (partition, statement) in statements.iter().enumerate() {
            self.log_statement(&table_name, partition, statement);
            let started = Instant::now();
            match self
                .transport
                .execute(&statement.text, &statement.params)
                .await
            {
                Ok(output) => {
                    self.metrics.record_statement(
                        &table_name,
                        output.rows_affected,
                        output.rows.len() as u64,
                        started.elapsed(),
                    );
                    rows_affected = rows_affected.saturating_add(output.rows_affected);
                    rows.extend(output.rows);
                }
                Err(source) => {
                    self.metrics.record_statement_failure(&table_name);
                    warn!(
                        table = %table_name,
                        partition,
                        completed = partition,
                        remaining = statements.len() - partition - 1,
                        error = %source,
                        "partition statement failed; aborting batch"
                    );
                    return Err(BatchError::PartitionTransport {
                        table: table_name,
                        partition,
                        completed: partition,
                        source,
                    });
                }
            }
        }
        debug!(
            table = %table_name,
            statements = statements.len(),
            rows_affected,
            "batch complete"
        );
        Ok((rows, rows_affected))
    }

    async fn execute_single(
        &self,
        table: &TableRef,
        statement: &Statement,
    ) -> Result<QueryOutput, BatchError> {
        let table_name = table.to_string();
        self.log_statement(&table_name, 0, statement);
        let started = Instant::now();
        match self
            .transport
            .execute(&statement.text, &statement.params)
            .await
        {
            Ok(output) => {
                self.metrics.record_statement(
                    &table_name,
                    output.rows_affected,
                    output.rows.len() as u64,
                    started.elapsed(),
                );
                Ok(output)
            }
            Err(source) => {
                self.metrics.record_statement_failure(&table_name);
                Err(BatchError::Transport {
                    table: table_name,
                    source,
                })
            }
        }
    }

    fn log_statement(&self, table: &str, partition: usize, statement: &Statement) {
        if self.statement_log {
            info!(
                table,
                partition,
                params = statement.params.len(),
                sql = %statement.text,
                "executing statement"
            );
        } else {
            debug!(
                table,
                partition,
                params = statement.params.len(),
                sql = %statement.text,
                "executing statement"
            );
        }
    }
}
