//! PostgreSQL driver
//!
//! tokio-postgres has no session autocommit switch, so it is emulated: with
//! autocommit off the first statement after a commit or rollback opens a
//! transaction with `BEGIN`. `?` placeholders are rewritten to `$n` at
//! prepare time.

use async_trait::async_trait;
use bytes::BytesMut;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, PreparedStatement};
use crate::dialect::{PostgresDialect, SqlDialect};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type PgParam = Box<dyn ToSql + Sync + Send>;

/// NULL that binds to a parameter of any type
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Convert a Value to a tokio-postgres parameter
fn value_to_sql(value: &Value) -> PgParam {
    match value {
        Value::Null => Box::new(SqlNull),
        Value::Bool(b) => Box::new(*b),
        Value::Int16(n) => Box::new(*n),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float32(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::Decimal(d) => Box::new(*d),
        Value::String(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(*t),
        Value::DateTime(dt) => Box::new(*dt),
        Value::DateTimeTz(dt) => Box::new(*dt),
        Value::Uuid(u) => Box::new(*u),
        Value::Json(j) => Box::new(j.clone()),
    }
}

fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let values = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect();
    Row::new(columns, values)
}

fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize, pg_type: &Type) -> Value {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a tokio_postgres::Row,
        idx: usize,
    ) -> Option<T> {
        row.try_get::<_, Option<T>>(idx).ok().flatten()
    }

    let value = match *pg_type {
        Type::BOOL => get(row, idx).map(Value::Bool),
        Type::INT2 => get(row, idx).map(Value::Int16),
        Type::INT4 => get(row, idx).map(Value::Int32),
        Type::INT8 => get(row, idx).map(Value::Int64),
        Type::FLOAT4 => get(row, idx).map(Value::Float32),
        Type::FLOAT8 => get(row, idx).map(Value::Float64),
        Type::NUMERIC => get(row, idx).map(Value::Decimal),
        Type::BYTEA => get(row, idx).map(Value::Bytes),
        Type::DATE => get(row, idx).map(Value::Date),
        Type::TIME => get(row, idx).map(Value::Time),
        Type::TIMESTAMP => get(row, idx).map(Value::DateTime),
        Type::TIMESTAMPTZ => get(row, idx).map(Value::DateTimeTz),
        Type::UUID => get(row, idx).map(Value::Uuid),
        Type::JSON | Type::JSONB => get(row, idx).map(Value::Json),
        _ => get(row, idx).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

/// Rewrite `?` placeholders to `$1, $2, ...`, leaving quoted text alone
pub fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut quote: Option<char> = None;
    let mut index = 0;

    for c in sql.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                out.push(c);
            }
            Some(_) => out.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    out.push(c);
                }
                '?' => {
                    index += 1;
                    out.push('$');
                    out.push_str(&index.to_string());
                }
                _ => out.push(c),
            },
        }
    }

    out
}

fn statement_error(e: tokio_postgres::Error, sql: &str) -> Error {
    let message = e
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| e.to_string());
    Error::Statement {
        message,
        sql: Some(sql.to_string()),
        source: Some(Arc::new(e)),
    }
}

/// Transaction state shared by a connection and its statements
#[derive(Debug, Default)]
struct Session {
    auto_commit: AtomicBool,
    in_transaction: AtomicBool,
}

impl Session {
    async fn begin_if_needed(&self, client: &tokio_postgres::Client) -> Result<()> {
        if self.auto_commit.load(Ordering::Acquire) || self.in_transaction.load(Ordering::Acquire) {
            return Ok(());
        }
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| statement_error(e, "BEGIN"))?;
        self.in_transaction.store(true, Ordering::Release);
        Ok(())
    }

    async fn end(&self, client: &tokio_postgres::Client, sql: &'static str) -> Result<()> {
        if !self.in_transaction.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        client
            .batch_execute(sql)
            .await
            .map_err(|e| statement_error(e, sql))
    }
}

/// PostgreSQL connection
pub struct PgConnection {
    client: Option<Arc<tokio_postgres::Client>>,
    session: Arc<Session>,
}

impl PgConnection {
    /// Wrap a connected client. Autocommit starts enabled.
    pub fn new(client: tokio_postgres::Client) -> Self {
        let session = Session::default();
        session.auto_commit.store(true, Ordering::Release);
        Self {
            client: Some(Arc::new(client)),
            session: Arc::new(session),
        }
    }

    fn client(&self) -> Result<&Arc<tokio_postgres::Client>> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::connection("connection is closed"))
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            let client = Arc::clone(self.client()?);
            self.session.end(&client, "COMMIT").await?;
        }
        self.session.auto_commit.store(enabled, Ordering::Release);
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.session.auto_commit.load(Ordering::Acquire)
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let client = self.client()?;
        self.session.begin_if_needed(client).await?;
        client
            .execute(sql, &[])
            .await
            .map_err(|e| statement_error(e, sql))
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let client = self.client()?;
        self.session.begin_if_needed(client).await?;
        let rows = client
            .query(sql, &[])
            .await
            .map_err(|e| statement_error(e, sql))?;
        Ok(rows.iter().map(pg_row_to_row).collect())
    }

    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let client = self.client()?;
        let pg_sql = rewrite_placeholders(sql);
        let statement = client
            .prepare(&pg_sql)
            .await
            .map_err(|e| statement_error(e, sql))?;

        Ok(Box::new(PgPreparedStatement {
            client: Some(Arc::clone(client)),
            session: Arc::clone(&self.session),
            statement,
            sql: sql.to_string(),
        }))
    }

    async fn commit(&mut self) -> Result<()> {
        let client = self.client()?;
        self.session.end(client, "COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        let client = self.client()?;
        self.session.end(client, "ROLLBACK").await
    }

    async fn close(&mut self) -> Result<()> {
        if self.client.take().is_some() && self.session.in_transaction.load(Ordering::Acquire) {
            debug!("Closing connection with an open transaction");
        }
        Ok(())
    }
}

/// PostgreSQL prepared statement
pub struct PgPreparedStatement {
    client: Option<Arc<tokio_postgres::Client>>,
    session: Arc<Session>,
    statement: tokio_postgres::Statement,
    sql: String,
}

#[async_trait]
impl PreparedStatement for PgPreparedStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn execute_batch(&mut self, batch: &[Vec<Value>]) -> Result<Vec<u64>> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::statement_with_sql("statement is closed", &self.sql))?;
        self.session.begin_if_needed(client).await?;

        let mut counts = Vec::with_capacity(batch.len());
        for params in batch {
            let boxed: Vec<PgParam> = params.iter().map(value_to_sql).collect();
            let refs: Vec<&(dyn ToSql + Sync)> = boxed
                .iter()
                .map(|b| b.as_ref() as &(dyn ToSql + Sync))
                .collect();

            let affected = client
                .execute(&self.statement, &refs)
                .await
                .map_err(|e| statement_error(e, &self.sql))?;
            counts.push(affected);
        }
        Ok(counts)
    }

    async fn close(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }
}

/// tokio-postgres backed driver, registered as `postgres`
#[derive(Debug, Clone, Copy, Default)]
pub struct PgDriver;

#[async_trait]
impl Driver for PgDriver {
    fn id(&self) -> &str {
        "postgres"
    }

    fn dialect(&self) -> Arc<dyn SqlDialect> {
        Arc::new(PostgresDialect)
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg_config = tokio_postgres::Config::from_str(config.url())
            .map_err(|e| Error::connection_with_source("invalid connection url", e))?;
        if let Some(username) = config.username() {
            pg_config.user(username);
        }
        if let Some(password) = config.password() {
            pg_config.password(password.expose_secret());
        }

        let (client, connection) = pg_config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection error");
            }
        });

        Ok(Box::new(PgConnection::new(client)))
    }
}
