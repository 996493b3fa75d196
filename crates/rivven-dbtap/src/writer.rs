//! Transactional batched writer
//!
//! A [`BatchWriter`] owns one connection and one prepared INSERT for the
//! lifetime of a task. Records are bound into parameter sets and executed in
//! batches of `batch_size`; all batches share a single transaction that is
//! committed by [`BatchWriter::close`].
//!
//! ```text
//! Open ──write──▶ Accumulating ◀──▶ Flushing
//!                      │                │ (failure: rollback)
//!                    close              ▼
//!                      ▼              Failed ──close──┐
//!                   Closing ──────────────────────────┴──▶ Closed
//! ```

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::binder::{Parameters, StatementBinder};
use crate::connection::{Connection, PreparedStatement};
use crate::error::{Error, ErrorKind, Result};
use crate::query::placeholder_count;
use crate::types::Value;

/// Default number of statements per batch
pub const DEFAULT_BATCH_SIZE: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(size) => size,
    None => unreachable!(),
};

/// Writer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterState {
    /// Created, nothing written yet
    Open,
    /// Accepting records
    Accumulating,
    /// Executing a batch
    Flushing,
    /// Final flush and commit in progress
    Closing,
    /// Closed; terminal
    Closed,
    /// A flush or commit failed and the transaction was rolled back
    Failed,
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Accumulating => write!(f, "accumulating"),
            Self::Flushing => write!(f, "flushing"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of the last flush or commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// The operation succeeded
    Success,
    /// The operation failed
    Failed {
        /// Failure class
        kind: ErrorKind,
        /// Bounded driver message
        message: String,
        /// Statements covered by the failed operation
        attempted: u64,
    },
}

impl WriteResult {
    /// Check for success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Per-task writer accumulating records into one transaction
pub struct BatchWriter<R: ?Sized> {
    conn: Box<dyn Connection>,
    statement: Box<dyn PreparedStatement>,
    binder: Arc<dyn StatementBinder<R>>,
    arity: usize,
    batch_size: NonZeroUsize,
    batch: Vec<Vec<Value>>,
    pending: u64,
    total: u64,
    flushes: u64,
    state: WriterState,
    last_result: Option<WriteResult>,
    failure: Option<Error>,
    outcome: Option<Result<()>>,
}

impl<R: ?Sized> BatchWriter<R> {
    /// Wrap an open connection and its prepared INSERT.
    ///
    /// The connection must have autocommit disabled.
    pub fn new(
        conn: Box<dyn Connection>,
        statement: Box<dyn PreparedStatement>,
        binder: Arc<dyn StatementBinder<R>>,
        batch_size: NonZeroUsize,
    ) -> Self {
        let arity = placeholder_count(statement.sql());
        Self {
            conn,
            statement,
            binder,
            arity,
            batch_size,
            batch: Vec::with_capacity(batch_size.get().min(4096)),
            pending: 0,
            total: 0,
            flushes: 0,
            state: WriterState::Open,
            last_result: None,
            failure: None,
            outcome: None,
        }
    }

    /// Current state
    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Statements added since the last successful flush
    pub fn pending(&self) -> u64 {
        self.pending
    }

    /// Statements added over the writer's lifetime
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Successful flushes so far
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Flush threshold
    pub fn batch_size(&self) -> NonZeroUsize {
        self.batch_size
    }

    /// Outcome of the last flush or commit, if any ran
    pub fn last_result(&self) -> Option<&WriteResult> {
        self.last_result.as_ref()
    }

    /// The prepared INSERT
    pub fn sql(&self) -> &str {
        self.statement.sql()
    }

    /// Bind `record` and add it to the batch, flushing when the batch is full
    pub async fn write(&mut self, record: &R) -> Result<()> {
        self.ensure_usable()?;

        let mut params = Parameters::with_capacity(self.arity);
        self.binder.bind(record, &mut params).map_err(|e| match e {
            Error::Bind { .. } => e,
            other => Error::bind(other.to_string()),
        })?;

        if params.len() != self.arity {
            return Err(Error::bind(format!(
                "statement expects {} parameters, record bound {}",
                self.arity,
                params.len()
            )));
        }

        self.batch.push(params.into_values());
        self.pending += 1;
        self.total += 1;
        self.state = WriterState::Accumulating;

        if self.pending % self.batch_size.get() as u64 == 0 {
            self.flush_batch().await?;
        }

        Ok(())
    }

    /// Execute the accumulated batch without committing
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_usable()?;
        self.flush_batch().await
    }

    /// Flush what is pending, commit, and close the connection.
    ///
    /// The first call's result is memoized; later calls return it again
    /// without touching the connection.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        let mut result = match self.failure.clone() {
            Some(err) => {
                debug!(error = %err, "Closing failed writer without commit");
                Err(err)
            }
            None => self.flush_remaining().await,
        };

        if let Err(e) = self.statement.close().await {
            warn!(error = %e, "Failed to close statement");
        }

        if result.is_ok() {
            result = self.commit().await;
        }

        if let Err(e) = self.conn.close().await {
            match result {
                Ok(()) => {
                    error!(error = %e, "Failed to close connection after commit");
                    result = Err(Error::ConnectionClose {
                        message: e.message(),
                    });
                }
                Err(_) => warn!(error = %e, "Failed to close connection after earlier error"),
            }
        }

        self.state = WriterState::Closed;
        self.outcome = Some(result.clone());
        result
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.state {
            WriterState::Failed => Err(Error::illegal_state(match &self.failure {
                Some(err) => format!("writer has failed: {}", err),
                None => "writer has failed".to_string(),
            })),
            WriterState::Closing | WriterState::Closed => {
                Err(Error::illegal_state("writer is closed"))
            }
            _ => Ok(()),
        }
    }

    async fn flush_batch(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let previous = self.state;
        self.state = WriterState::Flushing;

        match self.statement.execute_batch(&self.batch).await {
            Ok(_) => {
                debug!(
                    statements = self.batch.len(),
                    total = self.total,
                    "Batch flushed"
                );
                self.batch.clear();
                self.pending = 0;
                self.flushes += 1;
                self.last_result = Some(WriteResult::Success);
                self.state = if previous == WriterState::Closing {
                    WriterState::Closing
                } else {
                    WriterState::Accumulating
                };
                Ok(())
            }
            Err(cause) => {
                self.rollback_quietly().await;
                let err = Error::batch_execution(self.pending, self.total, &cause);
                error!(error = %err, total = self.total, "Batch execution failed");
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    async fn flush_remaining(&mut self) -> Result<()> {
        self.state = WriterState::Closing;
        if self.pending > 0 {
            self.flush_batch().await?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        match self.conn.commit().await {
            Ok(()) => {
                self.last_result = Some(WriteResult::Success);
                info!(
                    statements = self.total,
                    flushes = self.flushes,
                    "Committed batch writer"
                );
                Ok(())
            }
            Err(cause) => {
                self.rollback_quietly().await;
                let err = Error::commit(self.total, &cause);
                error!(error = %err, "Commit failed");
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    async fn rollback_quietly(&mut self) {
        if let Err(e) = self.conn.rollback().await {
            warn!(error = %e, "Rollback failed after batch error");
        }
    }

    fn fail(&mut self, err: Error) {
        self.last_result = Some(WriteResult::Failed {
            kind: err.kind(),
            message: err.message(),
            attempted: err.attempted().unwrap_or(self.pending),
        });
        self.failure = Some(err);
        self.state = WriterState::Failed;
    }
}

impl<R: ?Sized> Drop for BatchWriter<R> {
    fn drop(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        if self.total > 0 && self.failure.is_none() {
            warn!(
                pending = self.pending,
                total = self.total,
                "Batch writer dropped without close, uncommitted statements discarded"
            );
        } else {
            debug!(state = %self.state, "Batch writer dropped without close");
        }
    }
}

impl<R: ?Sized> fmt::Debug for BatchWriter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchWriter")
            .field("sql", &self.statement.sql())
            .field("state", &self.state)
            .field("batch_size", &self.batch_size)
            .field("pending", &self.pending)
            .field("total", &self.total)
            .field("flushes", &self.flushes)
            .finish()
    }
}
