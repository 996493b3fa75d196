//! Error types for rivven-dbtap
//!
//! Every failure crossing a public boundary is an [`Error`]. The failure class
//! is carried as data through [`ErrorKind`] so callers can match exhaustively
//! without downcasting.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for rivven-dbtap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Shared error source. `Arc` keeps [`Error`] cloneable.
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync>;

/// Longest driver message excerpt carried by batch and commit errors.
pub const MAX_MESSAGE_EXCERPT: usize = 75;

/// Error kinds for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller misuse (missing field list, bad sink mode for the descriptor)
    InvalidArgument,
    /// No driver registered under the requested id
    DriverUnavailable,
    /// Opening or configuring a connection failed
    Connection,
    /// The driver rejected a statement
    Statement,
    /// A record could not be bound to the statement parameters
    Bind,
    /// Executing the accumulated batch failed
    BatchExecution,
    /// Committing the transaction failed
    Commit,
    /// Closing the connection failed after the work was done
    ConnectionClose,
    /// Creating the target table failed
    Create,
    /// Dropping the target table failed
    Drop,
    /// The table is still missing after sink initialization
    SinkInit,
    /// Configuration could not be loaded or validated
    Configuration,
    /// Operation not allowed in the current writer state
    IllegalState,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid_argument"),
            Self::DriverUnavailable => write!(f, "driver_unavailable"),
            Self::Connection => write!(f, "connection"),
            Self::Statement => write!(f, "statement"),
            Self::Bind => write!(f, "bind"),
            Self::BatchExecution => write!(f, "batch_execution"),
            Self::Commit => write!(f, "commit"),
            Self::ConnectionClose => write!(f, "connection_close"),
            Self::Create => write!(f, "create"),
            Self::Drop => write!(f, "drop"),
            Self::SinkInit => write!(f, "sink_init"),
            Self::Configuration => write!(f, "configuration"),
            Self::IllegalState => write!(f, "illegal_state"),
        }
    }
}

/// Main error type for rivven-dbtap
#[derive(Error, Debug, Clone)]
#[allow(missing_docs)]
pub enum Error {
    /// Caller misuse
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Driver id not present in the registry
    #[error("unable to load driver: {driver}")]
    DriverUnavailable { driver: String },

    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },

    /// Statement rejected or failed in the driver
    #[error("statement error: {message}")]
    Statement {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<ErrorSource>,
    },

    /// Record serialization failed
    #[error("unable to add batch statement: {message}")]
    Bind { message: String },

    /// Batch execution failed and the transaction was rolled back
    #[error("unable to execute batch [length: {message_length}][stmts: {attempted}]: {message}")]
    BatchExecution {
        /// Statements pending in the failed batch
        attempted: u64,
        /// Statements added over the writer's lifetime
        total: u64,
        /// Length of the untruncated driver message
        message_length: usize,
        /// Driver message excerpt
        message: String,
    },

    /// Commit failed and the transaction was rolled back
    #[error("unable to commit batch [length: {message_length}][stmts: {attempted}]: {message}")]
    Commit {
        attempted: u64,
        message_length: usize,
        message: String,
    },

    /// Closing the connection failed
    #[error("unable to close connection: {message}")]
    ConnectionClose { message: String },

    /// Table creation failed
    #[error("unable to create table: {table}: {message}")]
    Create { table: String, message: String },

    /// Table drop failed
    #[error("unable to drop table: {table}: {message}")]
    Drop { table: String, message: String },

    /// Table still missing after initialization
    #[error("sink initialization failed for table {table}: {message}")]
    SinkInit { table: String, message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Operation not permitted in the writer's state
    #[error("illegal state: {message}")]
    IllegalState { message: String },
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::DriverUnavailable { .. } => ErrorKind::DriverUnavailable,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Statement { .. } => ErrorKind::Statement,
            Self::Bind { .. } => ErrorKind::Bind,
            Self::BatchExecution { .. } => ErrorKind::BatchExecution,
            Self::Commit { .. } => ErrorKind::Commit,
            Self::ConnectionClose { .. } => ErrorKind::ConnectionClose,
            Self::Create { .. } => ErrorKind::Create,
            Self::Drop { .. } => ErrorKind::Drop,
            Self::SinkInit { .. } => ErrorKind::SinkInit,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::IllegalState { .. } => ErrorKind::IllegalState,
        }
    }

    /// Statement count attached to batch and commit failures
    pub fn attempted(&self) -> Option<u64> {
        match self {
            Self::BatchExecution { attempted, .. } | Self::Commit { attempted, .. } => {
                Some(*attempted)
            }
            _ => None,
        }
    }

    /// Message without the variant prefix.
    ///
    /// Driver errors surface their raw text here, which is what batch and
    /// commit failures excerpt.
    pub fn message(&self) -> String {
        match self {
            Self::InvalidArgument { message }
            | Self::Connection { message, .. }
            | Self::Statement { message, .. }
            | Self::Bind { message }
            | Self::BatchExecution { message, .. }
            | Self::Commit { message, .. }
            | Self::ConnectionClose { message }
            | Self::Create { message, .. }
            | Self::Drop { message, .. }
            | Self::SinkInit { message, .. }
            | Self::Configuration { message }
            | Self::IllegalState { message } => message.clone(),
            Self::DriverUnavailable { driver } => format!("unable to load driver: {}", driver),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Create a statement error
    pub fn statement(message: impl Into<String>) -> Self {
        Self::Statement {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a statement error with SQL
    pub fn statement_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Statement {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a bind error
    pub fn bind(message: impl Into<String>) -> Self {
        Self::Bind {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an illegal state error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Build a batch failure from the driver error, keeping a bounded excerpt
    pub(crate) fn batch_execution(attempted: u64, total: u64, cause: &Error) -> Self {
        let (message_length, message) = excerpt(&cause.message());
        Self::BatchExecution {
            attempted,
            total,
            message_length,
            message,
        }
    }

    /// Build a commit failure from the driver error, keeping a bounded excerpt
    pub(crate) fn commit(attempted: u64, cause: &Error) -> Self {
        let (message_length, message) = excerpt(&cause.message());
        Self::Commit {
            attempted,
            message_length,
            message,
        }
    }
}

/// Character length of `message` and its first [`MAX_MESSAGE_EXCERPT`] characters
pub fn excerpt(message: &str) -> (usize, String) {
    let length = message.chars().count();
    (length, message.chars().take(MAX_MESSAGE_EXCERPT).collect())
}
