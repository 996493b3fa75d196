//! Job-facing table sink
//!
//! [`SinkAdapter`] is what the surrounding job framework talks to: it prepares
//! the target table once at job start and hands every task a fresh
//! [`BatchWriter`].
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_dbtap::prelude::*;
//! use std::sync::Arc;
//!
//! let sink = SinkAdapter::builder(factory, Arc::new(users))
//!     .sink_mode(SinkMode::Keep)
//!     .batch_size(NonZeroUsize::new(500).unwrap())
//!     .build()?;
//!
//! sink.sink_init(&ExecutionContext::Job).await?;
//!
//! let binder: Arc<dyn StatementBinder<Vec<Value>>> = Arc::new(ValuesBinder);
//! let mut writer = sink
//!     .new_writer(&ExecutionContext::Task { partition: 0 }, binder)
//!     .await?;
//! writer.write(&vec![Value::from(1i64), Value::from("ada")]).await?;
//! writer.close().await?;
//! ```

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::binder::StatementBinder;
use crate::driver::{close_quietly, ConnectionFactory};
use crate::error::{Error, Result};
use crate::lifecycle::{ExecutionContext, QueryLimit, SinkMode, TableLifecycle};
use crate::query::QueryBuilder;
use crate::table::TableDescriptor;
use crate::types::Row;
use crate::writer::{BatchWriter, DEFAULT_BATCH_SIZE};

/// Scheduler settings the sink adjusts on the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSettings {
    /// Re-run slow map tasks elsewhere
    pub map_speculative_execution: bool,
    /// Re-run slow reduce tasks elsewhere
    pub reduce_speculative_execution: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            map_speculative_execution: true,
            reduce_speculative_execution: true,
        }
    }
}

/// Builder for [`SinkAdapter`]
#[derive(Debug)]
pub struct SinkAdapterBuilder {
    factory: ConnectionFactory,
    descriptor: Arc<TableDescriptor>,
    field_names: Option<Vec<Option<String>>>,
    sink_mode: SinkMode,
    batch_size: NonZeroUsize,
}

impl SinkAdapterBuilder {
    /// Field names of the INSERT. `None` entries omit the column list.
    pub fn field_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        self.field_names = Some(names.into_iter().map(|n| n.map(Into::into)).collect());
        self
    }

    /// Table policy at job start
    pub fn sink_mode(mut self, mode: SinkMode) -> Self {
        self.sink_mode = mode;
        self
    }

    /// Statements per batch
    pub fn batch_size(mut self, size: NonZeroUsize) -> Self {
        self.batch_size = size;
        self
    }

    /// Build the sink.
    ///
    /// `Replace` and `Keep` need column definitions to create the table.
    pub fn build(self) -> Result<SinkAdapter> {
        self.descriptor.validate()?;

        if self.sink_mode != SinkMode::Append {
            if !self.descriptor.has_columns() {
                return Err(Error::invalid_argument(format!(
                    "sink mode {} requires column definitions for table {}",
                    self.sink_mode,
                    self.descriptor.table_name()
                )));
            }
            warn!(
                table = %self.descriptor.table_name(),
                mode = %self.sink_mode,
                "Sink mode other than append may drop or create the table"
            );
        }

        let lifecycle = TableLifecycle::new(self.factory.clone(), Arc::clone(&self.descriptor));

        Ok(SinkAdapter {
            factory: self.factory,
            descriptor: self.descriptor,
            lifecycle,
            field_names: self.field_names,
            sink_mode: self.sink_mode,
            batch_size: self.batch_size,
        })
    }
}

/// A relational table exposed as a job sink
#[derive(Clone)]
pub struct SinkAdapter {
    factory: ConnectionFactory,
    descriptor: Arc<TableDescriptor>,
    lifecycle: TableLifecycle,
    field_names: Option<Vec<Option<String>>>,
    sink_mode: SinkMode,
    batch_size: NonZeroUsize,
}

impl SinkAdapter {
    /// Start building a sink for `descriptor`
    pub fn builder(factory: ConnectionFactory, descriptor: Arc<TableDescriptor>) -> SinkAdapterBuilder {
        SinkAdapterBuilder {
            factory,
            descriptor,
            field_names: None,
            sink_mode: SinkMode::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// The target table
    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    /// Table lifecycle operations for the target table
    pub fn lifecycle(&self) -> &TableLifecycle {
        &self.lifecycle
    }

    /// Table policy at job start
    pub fn sink_mode(&self) -> SinkMode {
        self.sink_mode
    }

    /// Statements per batch
    pub fn batch_size(&self) -> NonZeroUsize {
        self.batch_size
    }

    /// Open a connection and a prepared INSERT for one task
    pub async fn new_writer<R: ?Sized>(
        &self,
        ctx: &ExecutionContext,
        binder: Arc<dyn StatementBinder<R>>,
    ) -> Result<BatchWriter<R>> {
        let sql = self.insert_sql()?;

        let mut conn = self.factory.open().await?;
        let statement = match conn.prepare(&sql).await {
            Ok(statement) => statement,
            Err(e) => {
                close_quietly(conn.as_mut()).await;
                return Err(Error::Statement {
                    message: format!("unable to create statement for: {}: {}", sql, e.message()),
                    sql: Some(sql),
                    source: Some(Arc::new(e)),
                });
            }
        };

        debug!(
            table = %self.descriptor.table_name(),
            ctx = ?ctx,
            batch_size = self.batch_size.get(),
            "Opened batch writer"
        );
        Ok(BatchWriter::new(conn, statement, binder, self.batch_size))
    }

    /// Output specs need no checking for a table sink
    pub fn check_output_specs(&self) -> Result<()> {
        Ok(())
    }

    /// Disable speculative execution; duplicate task attempts would insert twice
    pub fn configure_job(&self, settings: &mut JobSettings) {
        settings.map_speculative_execution = false;
        settings.reduce_speculative_execution = false;
    }

    /// Prepare the table according to the sink mode
    pub async fn sink_init(&self, ctx: &ExecutionContext) -> Result<()> {
        self.lifecycle.ensure_for_sink(self.sink_mode, ctx).await?;
        info!(
            table = %self.descriptor.table_name(),
            mode = %self.sink_mode,
            "Sink initialized"
        );
        Ok(())
    }

    /// Run a statement on its own connection and commit it
    pub async fn execute_update(&self, sql: &str) -> Result<u64> {
        self.lifecycle.execute_update(sql).await
    }

    /// Run a query on its own connection
    pub async fn execute_query(&self, sql: &str, limit: QueryLimit) -> Result<Vec<Row>> {
        self.lifecycle.execute_query(sql, limit).await
    }

    /// Stable identifier of the sink resource, without credentials
    pub fn resource_path(&self) -> String {
        format!("rdbc:/{}", self.factory.config().redacted_url().replace(':', "_"))
    }

    fn insert_sql(&self) -> Result<String> {
        match &self.field_names {
            Some(names) => QueryBuilder::build(self.descriptor.table_name(), Some(names.as_slice())),
            None if self.descriptor.has_columns() => Ok(QueryBuilder::build_for_columns(
                self.descriptor.table_name(),
                &self.descriptor.column_names(),
            )),
            None => QueryBuilder::build::<String>(self.descriptor.table_name(), None),
        }
    }
}

impl fmt::Display for SinkAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SinkAdapter{{url={}, driver={}, table={}, mode={}}}",
            self.factory.config().redacted_url(),
            self.factory.driver_id(),
            self.descriptor.table_name(),
            self.sink_mode
        )
    }
}

impl fmt::Debug for SinkAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkAdapter")
            .field("factory", &self.factory)
            .field("descriptor", &self.descriptor)
            .field("field_names", &self.field_names)
            .field("sink_mode", &self.sink_mode)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_settings_default_speculative() {
        let settings = JobSettings::default();
        assert!(settings.map_speculative_execution);
        assert!(settings.reduce_speculative_execution);
    }
}
