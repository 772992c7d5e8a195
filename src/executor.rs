//! Statement execution against the underlying store.
//!
//! The engine never talks to a database directly; it hands normalized
//! statements and flat argument lists to an [`Executor`].

use std::time::Duration;

use serde_json::Value;

use crate::error::StorageError;
use crate::value::Row;

/// Lazily produced rows.
pub type RowStream<'a> = Box<dyn Iterator<Item = Result<Row, StorageError>> + 'a>;

pub trait Executor: Send + Sync {
    /// Fetch at most one row.
    fn get(&self, statement: &str, timeout: Option<Duration>, args: &[Value]) -> Result<Option<Row>, StorageError>;

    /// Fetch rows. `expect_rows` is a hint for how many rows the caller will
    /// consume (0 when unknown); implementations may stop reading after it.
    fn select(
        &self,
        statement: &str,
        expect_rows: usize,
        timeout: Option<Duration>,
        args: &[Value],
    ) -> Result<Vec<Row>, StorageError>;

    /// Iterate rows lazily. Defaults to a fully buffered `select`.
    fn stream(&self, statement: &str, timeout: Option<Duration>, args: &[Value]) -> Result<RowStream<'_>, StorageError> {
        let rows = self.select(statement, 0, timeout, args)?;
        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}
