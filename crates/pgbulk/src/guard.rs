//! Delete requests and the unscoped-delete gate.

use crate::error::BatchError;
use crate::record::FieldValue;
use crate::statement::Statement;
use crate::transport::TableRef;

/// A `DELETE FROM <table> [WHERE <predicate>]` request.
///
/// The predicate is raw SQL owned by the caller; its `$n` placeholders refer
/// to `params`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub table: TableRef,
    pub predicate: Option<String>,
    pub params: Vec<FieldValue>,
    pub allow_full_table_delete: bool,
}

impl DeleteRequest {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            predicate: None,
            params: Vec::new(),
            allow_full_table_delete: false,
        }
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

    /// Opens the gate for a delete without a predicate.
    pub fn allow_full_table_delete(mut self, allow: bool) -> Self {
        self.allow_full_table_delete = allow;
        self
    }

    /// Predicate text, with blank predicates treated as absent.
    pub fn scope(&self) -> Option<&str> {
        self.predicate
            .as_deref()
            .map(str::trim)
            .filter(|predicate| !predicate.is_empty())
    }

    /// Renders the statement, refusing an unscoped delete unless allowed.
    pub fn to_statement(&self) -> Result<Statement, BatchError> {
        let text = match self.scope() {
            Some(predicate) => format!("DELETE FROM {} WHERE {predicate}", self.table),
            None if self.allow_full_table_delete => format!("DELETE FROM {}", self.table),
            None => {
                return Err(BatchError::UnscopedDelete {
                    table: self.table.to_string(),
                })
            }
        };
        Ok(Statement {
            text,
            params: self.params.clone(),
        })
    }
}
