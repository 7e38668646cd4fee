//! Durable operation log and purge strategies.

use crate::{Operation, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// Controls which old operations are removed from the log.
pub enum PurgeStrategy {
    /// Retain only the most recent `keep_last` operations.
    LocalOnly { keep_last: usize },
}

/// A logged operation as returned by [`OperationLog::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    pub operation_id: String,
    pub timestamp: i64,
    pub reader_id: String,
    pub operation_type: String,
    pub operation_data: String,
}

/// Records structural mutations to the `operations` table and purges stale entries.
pub struct OperationLog {
    strategy: PurgeStrategy,
}

impl OperationLog {
    /// Creates a new `OperationLog` with the given purge strategy.
    pub fn new(strategy: PurgeStrategy) -> Self {
        Self { strategy }
    }

    /// Serialises `op` and appends it to the `operations` table.
    ///
    /// `conn` is normally the mutation's open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MarginaliaError::Database`] if the INSERT fails, or
    /// [`crate::MarginaliaError::Json`] if `op` cannot be serialised.
    pub fn log(&self, conn: &Connection, op: &Operation) -> Result<()> {
        let op_json = serde_json::to_string(op)?;

        conn.execute(
            "INSERT INTO operations (operation_id, timestamp, reader_id, operation_type, operation_data, synced)
             VALUES (?, ?, ?, ?, ?, 0)",
            rusqlite::params![
                op.operation_id(),
                op.timestamp(),
                op.reader_id(),
                op.type_name(),
                op_json,
            ],
        )?;

        Ok(())
    }

    /// Deletes old operations from the log according to the purge strategy.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MarginaliaError::Database`] if the DELETE fails.
    pub fn purge_if_needed(&self, conn: &Connection) -> Result<()> {
        match self.strategy {
            PurgeStrategy::LocalOnly { keep_last } => {
                conn.execute(
                    "DELETE FROM operations WHERE id NOT IN (
                        SELECT id FROM operations ORDER BY id DESC LIMIT ?
                    )",
                    [keep_last as i64],
                )?;
            }
        }
        Ok(())
    }

    /// Returns operations matching the filters, newest first.
    pub fn list(
        &self,
        conn: &Connection,
        type_filter: Option<&str>,
        since: Option<i64>,
        until: Option<i64>,
    ) -> Result<Vec<OperationSummary>> {
        let mut stmt = conn.prepare(
            "SELECT operation_id, timestamp, reader_id, operation_type, operation_data
             FROM operations
             WHERE (?1 IS NULL OR operation_type = ?1)
               AND (?2 IS NULL OR timestamp >= ?2)
               AND (?3 IS NULL OR timestamp <= ?3)
             ORDER BY id DESC",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![type_filter, since, until], |row| {
                Ok(OperationSummary {
                    operation_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    reader_id: row.get(2)?,
                    operation_type: row.get(3)?,
                    operation_data: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Deletes every logged operation. Returns the number removed.
    pub fn purge_all(&self, conn: &Connection) -> Result<usize> {
        Ok(conn.execute("DELETE FROM operations", [])?)
    }
}
