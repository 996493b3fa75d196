//! Table lifecycle at sink initialization
//!
//! Decides whether the target table is created, dropped and recreated, or
//! left alone, according to the [`SinkMode`]. Every operation runs on its own
//! short-lived connection which is committed and always closed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::dialect::SqlDialect;
use crate::driver::{close_quietly, ConnectionFactory};
use crate::error::{Error, Result};
use crate::table::TableDescriptor;
use crate::types::Row;

/// Table policy applied when the job's sink is initialized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkMode {
    /// Write into the table as it is; never create or drop
    #[default]
    Append,
    /// Drop the table if it exists, then create it
    Replace,
    /// Create the table only if it is missing
    Keep,
}

impl fmt::Display for SinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append => write!(f, "append"),
            Self::Replace => write!(f, "replace"),
            Self::Keep => write!(f, "keep"),
        }
    }
}

/// Where a sink operation is invoked from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionContext {
    /// Job-level initialization on the coordinator. Only here may DDL run.
    Job,
    /// A worker task
    Task {
        /// Partition handled by the task
        partition: u32,
    },
}

impl ExecutionContext {
    /// Check for the job-level context
    pub fn is_job(&self) -> bool {
        matches!(self, Self::Job)
    }
}

/// How many rows [`TableLifecycle::execute_query`] returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QueryLimit {
    /// Every row
    #[default]
    All,
    /// No rows; the query runs for its side effects
    None,
    /// At most the first `n` rows
    First(usize),
}

impl QueryLimit {
    fn apply(self, mut rows: Vec<Row>) -> Vec<Row> {
        match self {
            Self::All => rows,
            Self::None => Vec::new(),
            Self::First(n) => {
                rows.truncate(n);
                rows
            }
        }
    }
}

/// Create, drop and existence checks for one table
#[derive(Clone)]
pub struct TableLifecycle {
    factory: ConnectionFactory,
    descriptor: Arc<TableDescriptor>,
    dialect: Arc<dyn SqlDialect>,
}

impl TableLifecycle {
    /// Lifecycle for `descriptor`, using the factory driver's dialect
    pub fn new(factory: ConnectionFactory, descriptor: Arc<TableDescriptor>) -> Self {
        let dialect = factory.dialect();
        Self {
            factory,
            descriptor,
            dialect,
        }
    }

    /// Override the dialect
    pub fn with_dialect(mut self, dialect: Arc<dyn SqlDialect>) -> Self {
        self.dialect = dialect;
        self
    }

    /// The managed table
    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    /// Whether the table exists. Any failure reads as `false`.
    pub async fn exists(&self) -> bool {
        let sql = self.dialect.table_exists_sql(self.descriptor.table_name());
        match self.execute_query(&sql, QueryLimit::None).await {
            Ok(_) => {
                debug!(table = %self.descriptor.table_name(), "Table exists");
                true
            }
            Err(e) => {
                debug!(table = %self.descriptor.table_name(), error = %e, "Table probe failed");
                false
            }
        }
    }

    /// Create the table from the descriptor's columns
    pub async fn create(&self) -> Result<()> {
        let table = self.descriptor.table_name();
        let sql = self.descriptor.create_table_sql().ok_or_else(|| Error::Create {
            table: table.to_string(),
            message: "no column definitions".to_string(),
        })?;

        info!(table = %table, "Creating table");
        self.execute_update(&sql).await.map_err(|e| Error::Create {
            table: table.to_string(),
            message: e.message(),
        })?;
        Ok(())
    }

    /// Drop the table. Succeeds without a statement if it does not exist.
    pub async fn drop(&self) -> Result<()> {
        let table = self.descriptor.table_name();
        if !self.exists().await {
            debug!(table = %table, "Table absent, nothing to drop");
            return Ok(());
        }
        self.drop_existing().await
    }

    async fn drop_existing(&self) -> Result<()> {
        let table = self.descriptor.table_name();
        info!(table = %table, "Dropping table");
        self.execute_update(&self.descriptor.drop_table_sql())
            .await
            .map_err(|e| Error::Drop {
                table: table.to_string(),
                message: e.message(),
            })?;
        Ok(())
    }

    /// Bring the table into the state `mode` requires.
    ///
    /// DDL only runs from [`ExecutionContext::Job`]; in every case the table
    /// must exist afterwards.
    pub async fn ensure_for_sink(&self, mode: SinkMode, ctx: &ExecutionContext) -> Result<()> {
        let table = self.descriptor.table_name();

        if ctx.is_job() {
            match mode {
                SinkMode::Append => {}
                SinkMode::Replace => {
                    if self.exists().await {
                        self.drop_existing().await?;
                    }
                    self.create().await?;
                }
                SinkMode::Keep => {
                    if !self.exists().await {
                        self.create().await?;
                    }
                }
            }
        } else if mode != SinkMode::Append {
            debug!(table = %table, mode = %mode, ctx = ?ctx, "Skipping DDL outside job context");
        }

        if !self.exists().await {
            return Err(Error::SinkInit {
                table: table.to_string(),
                message: format!("table does not exist after {} initialization", mode),
            });
        }
        Ok(())
    }

    /// Run a data or schema statement on a fresh connection and commit it
    pub async fn execute_update(&self, sql: &str) -> Result<u64> {
        let mut conn = self.factory.open().await?;
        let result = run_update(conn.as_mut(), sql).await;
        close_quietly(conn.as_mut()).await;
        result
    }

    /// Run a query on a fresh connection, returning rows per `limit`
    pub async fn execute_query(&self, sql: &str, limit: QueryLimit) -> Result<Vec<Row>> {
        let mut conn = self.factory.open().await?;
        let result = run_query(conn.as_mut(), sql).await;
        close_quietly(conn.as_mut()).await;
        result.map(|rows| limit.apply(rows))
    }
}

impl fmt::Debug for TableLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableLifecycle")
            .field("table", &self.descriptor.table_name())
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

async fn run_update(conn: &mut dyn Connection, sql: &str) -> Result<u64> {
    match conn.execute(sql).await {
        Ok(affected) => {
            conn.commit().await?;
            Ok(affected)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.rollback().await {
                warn!(error = %rollback_err, "Rollback failed after statement error");
            }
            Err(e)
        }
    }
}

async fn run_query(conn: &mut dyn Connection, sql: &str) -> Result<Vec<Row>> {
    match conn.query(sql).await {
        Ok(rows) => {
            conn.commit().await?;
            Ok(rows)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.rollback().await {
                warn!(error = %rollback_err, "Rollback failed after query error");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<Row> {
        (0..n).map(|_| Row::new(vec![], vec![])).collect()
    }

    #[test]
    fn test_query_limit() {
        assert_eq!(QueryLimit::All.apply(rows(5)).len(), 5);
        assert_eq!(QueryLimit::None.apply(rows(5)).len(), 0);
        assert_eq!(QueryLimit::First(2).apply(rows(5)).len(), 2);
        assert_eq!(QueryLimit::First(9).apply(rows(5)).len(), 5);
    }

    #[test]
    fn test_sink_mode_serde() {
        let mode: SinkMode = serde_json::from_str("\"replace\"").unwrap();
        assert_eq!(mode, SinkMode::Replace);
        assert_eq!(SinkMode::default(), SinkMode::Append);
        assert_eq!(serde_json::to_string(&SinkMode::Keep).unwrap(), "\"keep\"");
    }

    #[test]
    fn test_execution_context() {
        assert!(ExecutionContext::Job.is_job());
        assert!(!ExecutionContext::Task { partition: 3 }.is_job());
    }
}
