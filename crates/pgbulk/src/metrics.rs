//! In-process counters for batch writes, reads and catalog lookups.
//!
//! Counters are lock-free atomics; only the per-table breakdown takes a mutex.
//! The caller owns the instance and may share it across engines.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Per-table write aggregates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TableWriteMetrics {
    /// Number of partition statements executed successfully.
    pub statements: u64,
    /// Rows reported affected by those statements.
    pub rows_affected: u64,
    /// Number of partition statements that failed.
    pub failures: u64,
}

/// Aggregated engine counters.
#[derive(Debug, Default)]
pub struct BatchMetrics {
    /// Batch write calls that reached execution.
    batches: AtomicU64,
    /// Partitions produced by the shape partitioner.
    partitions: AtomicU64,
    statements_executed: AtomicU64,
    statement_failures: AtomicU64,
    /// Sum of statement latency in nanoseconds.
    statement_latency_ns_total: AtomicU64,
    rows_affected: AtomicU64,
    rows_returned: AtomicU64,
    schema_lookups: AtomicU64,
    /// Enum label lookups that failed and degraded to an empty label set.
    enum_lookup_failures: AtomicU64,
    /// Deletes refused by the unscoped-delete gate.
    unscoped_deletes_rejected: AtomicU64,
    by_table: Mutex<BTreeMap<String, TableWriteMetrics>>,
}

/// Immutable snapshot view of [`BatchMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchMetricsSnapshot {
    pub batches: u64,
    pub partitions: u64,
    pub statements_executed: u64,
    pub statement_failures: u64,
    pub statement_latency_ns_total: u64,
    pub rows_affected: u64,
    pub rows_returned: u64,
    pub schema_lookups: u64,
    pub enum_lookup_failures: u64,
    pub unscoped_deletes_rejected: u64,
}

impl BatchMetrics {
    /// Records one batch entering execution with its partition count.
    pub fn record_batch(&self, partitions: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.partitions
            .fetch_add(partitions as u64, Ordering::Relaxed);
    }

    /// Records one successful statement against `table`.
    pub fn record_statement(
        &self,
        table: &str,
        rows_affected: u64,
        rows_returned: u64,
        latency: Duration,
    ) {
        self.statements_executed.fetch_add(1, Ordering::Relaxed);
        self.rows_affected
            .fetch_add(rows_affected, Ordering::Relaxed);
        self.rows_returned
            .fetch_add(rows_returned, Ordering::Relaxed);
        self.statement_latency_ns_total
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        let mut by_table = self
            .by_table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = by_table.entry(table.to_string()).or_default();
        entry.statements = entry.statements.saturating_add(1);
        entry.rows_affected = entry.rows_affected.saturating_add(rows_affected);
    }

    /// Records one failed statement against `table`.
    pub fn record_statement_failure(&self, table: &str) {
        self.statement_failures.fetch_add(1, Ordering::Relaxed);
        let mut by_table = self
            .by_table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = by_table.entry(table.to_string()).or_default();
        entry.failures = entry.failures.saturating_add(1);
    }

    pub fn record_schema_lookup(&self) {
        self.schema_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enum_lookup_failure(&self) {
        self.enum_lookup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unscoped_delete_rejected(&self) {
        self.unscoped_deletes_rejected
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the per-table breakdown for `table`, if any statement ran.
    pub fn table(&self, table: &str) -> Option<TableWriteMetrics> {
        self.by_table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(table)
            .copied()
    }

    /// Captures a point-in-time copy of all counters.
    pub fn snapshot(&self) -> BatchMetricsSnapshot {
        BatchMetricsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            partitions: self.partitions.load(Ordering::Relaxed),
            statements_executed: self.statements_executed.load(Ordering::Relaxed),
            statement_failures: self.statement_failures.load(Ordering::Relaxed),
            statement_latency_ns_total: self.statement_latency_ns_total.load(Ordering::Relaxed),
            rows_affected: self.rows_affected.load(Ordering::Relaxed),
            rows_returned: self.rows_returned.load(Ordering::Relaxed),
            schema_lookups: self.schema_lookups.load(Ordering::Relaxed),
            enum_lookup_failures: self.enum_lookup_failures.load(Ordering::Relaxed),
            unscoped_deletes_rejected: self.unscoped_deletes_rejected.load(Ordering::Relaxed),
        }
    }

    /// Renders metrics as `key=value` lines.
    pub fn render_text(&self) -> String {
        let s = self.snapshot();
        let mut out = format!(
            "batches={}\npartitions={}\nstatements_executed={}\nstatement_failures={}\nstatement_latency_ns_total={}\nrows_affected={}\nrows_returned={}\nschema_lookups={}\nenum_lookup_failures={}\nunscoped_deletes_rejected={}\n",
            s.batches,
            s.partitions,
            s.statements_executed,
            s.statement_failures,
            s.statement_latency_ns_total,
            s.rows_affected,
            s.rows_returned,
            s.schema_lookups,
            s.enum_lookup_failures,
            s.unscoped_deletes_rejected,
        );
        let by_table = self
            .by_table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (table, metrics) in by_table.iter() {
            out.push_str(
                format!(
                    "table_{table}_statements={}\ntable_{table}_rows_affected={}\ntable_{table}_failures={}\n",
                    metrics.statements, metrics.rows_affected, metrics.failures,
                )
                .as_str(),
            );
        }
        out
    }
}
