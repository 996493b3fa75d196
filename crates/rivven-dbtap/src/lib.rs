//! # rivven-dbtap
//!
//! Relational tables as sinks for partitioned batch jobs.
//!
//! Each worker task owns one connection, binds typed records into a prepared
//! INSERT, executes them in bounded batches and commits once when the task
//! finishes. At job start the table lifecycle creates, replaces or keeps the
//! target table according to the sink mode.
//!
//! ## Features
//!
//! - **Batched Writes**: One transaction per task, flushed every `batch_size` records
//! - **Table Lifecycle**: Append, replace or keep-if-present policies
//! - **Pluggable Drivers**: Explicit driver registry, optional process-wide install
//! - **Typed Binding**: Closures, positional values, rows or JSON objects
//! - **Safe Configuration**: YAML config with identifier validation and redacted secrets
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_dbtap::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = DriverRegistry::new().with_driver(Arc::new(PgDriver));
//! let sink = TapConfig::from_file("users-sink.yaml")?.into_sink(&registry)?;
//!
//! sink.sink_init(&ExecutionContext::Job).await?;
//!
//! let binder: Arc<dyn StatementBinder<serde_json::Value>> =
//!     Arc::new(JsonBinder::new(["id", "name"]));
//! let mut writer = sink.new_writer(&ExecutionContext::Task { partition: 7 }, binder).await?;
//! for record in records {
//!     writer.write(&record).await?;
//! }
//! writer.close().await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL driver via tokio-postgres

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod binder;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod query;
pub mod security;
pub mod sink;
pub mod table;
pub mod types;
pub mod writer;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorKind, Result};

    pub use crate::types::{Row, Value};

    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionConfigurer, InitStatements, PreparedStatement,
        SensitiveString,
    };

    pub use crate::driver::{ConnectionFactory, Driver, DriverRegistry};

    pub use crate::dialect::{dialect_for, SqlDialect};

    pub use crate::table::{ColumnDef, TableDescriptor};

    pub use crate::query::QueryBuilder;

    pub use crate::binder::{JsonBinder, Parameters, RowBinder, StatementBinder, ValuesBinder};

    pub use crate::writer::{BatchWriter, WriteResult, WriterState, DEFAULT_BATCH_SIZE};

    pub use crate::lifecycle::{ExecutionContext, QueryLimit, SinkMode, TableLifecycle};

    pub use crate::sink::{JobSettings, SinkAdapter, SinkAdapterBuilder};

    pub use crate::config::TapConfig;

    #[cfg(feature = "postgres")]
    pub use crate::postgres::PgDriver;

    pub use std::num::NonZeroUsize;
}

pub use error::{Error, ErrorKind, Result};
pub use types::Value;
