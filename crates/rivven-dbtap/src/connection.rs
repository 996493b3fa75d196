//! Connection traits for rivven-dbtap
//!
//! Core abstractions implemented by drivers:
//! - Connection: a single session with explicit transaction control
//! - PreparedStatement: a parameterized statement executed in batches
//! - ConnectionConfigurer: hook run on every freshly opened connection
//!
//! Both traits take `&mut self`; a connection has exactly one owner at a
//! time and is never shared between tasks.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::types::{Row, Value};

/// A connection to a database
#[async_trait]
pub trait Connection: Send {
    /// Enable or disable autocommit. Connections handed out by
    /// [`ConnectionFactory`](crate::driver::ConnectionFactory) always have it
    /// disabled.
    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;

    /// Whether autocommit is enabled
    fn auto_commit(&self) -> bool;

    /// Execute a statement that modifies data or schema, returns affected row count
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Execute a query that returns rows
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Prepare a statement for repeated batch execution
    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Commit the current transaction
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction
    async fn rollback(&mut self) -> Result<()>;

    /// Close the connection. Uncommitted work is discarded by the database.
    async fn close(&mut self) -> Result<()>;
}

/// A prepared statement
#[async_trait]
pub trait PreparedStatement: Send {
    /// Get the SQL string
    fn sql(&self) -> &str;

    /// Execute the statement once per parameter set, in order, in the
    /// connection's current transaction. Returns affected counts per set.
    async fn execute_batch(&mut self, batch: &[Vec<Value>]) -> Result<Vec<u64>>;

    /// Release the statement
    async fn close(&mut self) -> Result<()>;
}

/// Hook applied to every connection after it is opened and autocommit is
/// turned off.
#[async_trait]
pub trait ConnectionConfigurer: Send + Sync {
    /// Configure the session
    async fn configure(&self, conn: &mut dyn Connection) -> Result<()>;
}

/// Configurer running a fixed list of session statements
/// (`SET search_path TO staging`, `SET lock_timeout = '5s'`, ...)
#[derive(Debug, Clone, Default)]
pub struct InitStatements {
    statements: Vec<String>,
}

impl InitStatements {
    /// Create from a list of statements
    pub fn new<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ConnectionConfigurer for InitStatements {
    async fn configure(&self, conn: &mut dyn Connection) -> Result<()> {
        for sql in &self.statements {
            conn.execute(sql).await?;
        }
        Ok(())
    }
}

/// A string that never shows up in logs or serialized config.
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Create a new sensitive string from any string-like value
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// Expose the secret value.
    ///
    /// Use sparingly - only when the actual value is needed (e.g., for authentication).
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Always serializes redacted
impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

/// Where and how to connect. Immutable once built.
#[derive(Clone)]
pub struct ConnectionConfig {
    url: String,
    driver: String,
    username: Option<String>,
    password: Option<SensitiveString>,
}

impl ConnectionConfig {
    /// Create configuration for a connection URL and a registered driver id
    pub fn new(url: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            driver: driver.into(),
            username: None,
            password: None,
        }
    }

    /// Set the user name
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<SensitiveString>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Connection URL as given
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Driver id
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// User name, if set separately from the URL
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Password, if set separately from the URL
    pub fn password(&self) -> Option<&SensitiveString> {
        self.password.as_ref()
    }

    /// The URL with any embedded password replaced, safe for logs
    pub fn redacted_url(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("***"));
                }
                parsed.to_string()
            }
            Err(_) if self.url.contains('@') => "***".to_string(),
            Err(_) => self.url.clone(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.redacted_url())
            .field("driver", &self.driver)
            .field("username", &self.username)
            .field("password", &self.password)
            .finish()
    }
}
