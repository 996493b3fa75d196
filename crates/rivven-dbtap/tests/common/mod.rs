//! Scriptable in-memory driver shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rivven_dbtap::connection::{Connection, ConnectionConfig, PreparedStatement};
use rivven_dbtap::driver::{ConnectionFactory, Driver};
use rivven_dbtap::error::{Error, Result};
use rivven_dbtap::table::{ColumnDef, TableDescriptor};
use rivven_dbtap::types::{Row, Value};

pub const MOCK_URL: &str = "mock://localhost/test";

/// Everything the driver saw, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open,
    AutoCommit(bool),
    Execute(String),
    Query(String),
    Prepare(String),
    Batch(usize),
    Commit,
    Rollback,
    StatementClose,
    Close,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub events: Vec<Event>,
    pub tables: HashSet<String>,
    pub rows: HashMap<String, Vec<Vec<Value>>>,
    pub batches_executed: usize,

    pub fail_connect: bool,
    pub fail_prepare: bool,
    /// Fail the n-th batch execution (1-based)
    pub fail_batch_at: Option<usize>,
    pub batch_error: String,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    pub fail_close: bool,
    pub fail_create: bool,
    pub fail_drop: bool,
}

#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str) -> Self {
        self.state.lock().tables.insert(name.to_string());
        self
    }

    pub fn configure(&self, f: impl FnOnce(&mut MockState)) {
        f(&mut self.state.lock());
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| pred(e)).count()
    }

    pub fn batches(&self) -> Vec<usize> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Batch(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    pub fn executed(&self) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Execute(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn commits(&self) -> usize {
        self.count(|e| *e == Event::Commit)
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| *e == Event::Rollback)
    }

    pub fn opens(&self) -> usize {
        self.count(|e| *e == Event::Open)
    }

    pub fn closes(&self) -> usize {
        self.count(|e| *e == Event::Close)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state.lock().tables.contains(name)
    }

    pub fn committed_rows(&self, table: &str) -> Vec<Vec<Value>> {
        self.state
            .lock()
            .rows
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn factory(&self) -> ConnectionFactory {
        ConnectionFactory::new(
            Arc::new(self.clone()),
            ConnectionConfig::new(MOCK_URL, "mock"),
        )
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn id(&self) -> &str {
        "mock"
    }

    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut state = self.state.lock();
        if state.fail_connect {
            return Err(Error::connection("connection refused"));
        }
        state.events.push(Event::Open);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            staged: Arc::new(Mutex::new(Vec::new())),
            auto_commit: true,
            closed: false,
        }))
    }
}

type Staged = Arc<Mutex<Vec<(String, Vec<Value>)>>>;

pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
    staged: Staged,
    auto_commit: bool,
    closed: bool,
}

fn table_after<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let mut tokens = sql.split_whitespace();
    tokens.find(|t| t.eq_ignore_ascii_case(keyword))?;
    tokens
        .next()
        .map(|t| t.trim_end_matches(|c| c == ';' || c == '('))
}

impl MockConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        self.ensure_open()?;
        self.state.lock().events.push(Event::AutoCommit(enabled));
        self.auto_commit = enabled;
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.events.push(Event::Execute(sql.to_string()));

        if sql.starts_with("CREATE TABLE") {
            let table = table_after(sql, "TABLE").unwrap_or_default().to_string();
            if state.fail_create {
                return Err(Error::statement_with_sql("permission denied for schema", sql));
            }
            if !state.tables.insert(table.clone()) {
                return Err(Error::statement_with_sql(
                    format!("relation \"{}\" already exists", table),
                    sql,
                ));
            }
        } else if sql.starts_with("DROP TABLE") {
            let table = table_after(sql, "TABLE").unwrap_or_default().to_string();
            if state.fail_drop {
                return Err(Error::statement_with_sql("lock timeout", sql));
            }
            if !state.tables.remove(&table) {
                return Err(Error::statement_with_sql(
                    format!("table \"{}\" does not exist", table),
                    sql,
                ));
            }
            state.rows.remove(&table);
        }
        Ok(0)
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.events.push(Event::Query(sql.to_string()));

        let table = table_after(sql, "FROM").unwrap_or_default();
        if !state.tables.contains(table) {
            return Err(Error::statement_with_sql(
                format!("relation \"{}\" does not exist", table),
                sql,
            ));
        }

        let rows = state
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|values| {
                        let columns = (0..values.len()).map(|i| format!("c{}", i)).collect();
                        Row::new(columns, values.clone())
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.events.push(Event::Prepare(sql.to_string()));
        if state.fail_prepare {
            return Err(Error::statement_with_sql("syntax error at or near \"INTO\"", sql));
        }

        Ok(Box::new(MockStatement {
            state: Arc::clone(&self.state),
            staged: Arc::clone(&self.staged),
            table: table_after(sql, "INTO").unwrap_or_default().to_string(),
            sql: sql.to_string(),
        }))
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.fail_commit {
            return Err(Error::statement("could not serialize access due to concurrent update"));
        }
        state.events.push(Event::Commit);
        for (table, values) in self.staged.lock().drain(..) {
            state.rows.entry(table).or_default().push(values);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.events.push(Event::Rollback);
        self.staged.lock().clear();
        if state.fail_rollback {
            return Err(Error::connection("connection reset by peer"));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.events.push(Event::Close);
        self.closed = true;
        self.staged.lock().clear();
        if state.fail_close {
            return Err(Error::connection("socket already closed"));
        }
        Ok(())
    }
}

pub struct MockStatement {
    state: Arc<Mutex<MockState>>,
    staged: Staged,
    table: String,
    sql: String,
}

#[async_trait]
impl PreparedStatement for MockStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn execute_batch(&mut self, batch: &[Vec<Value>]) -> Result<Vec<u64>> {
        let mut state = self.state.lock();
        state.batches_executed += 1;
        if state.fail_batch_at == Some(state.batches_executed) {
            let message = if state.batch_error.is_empty() {
                "duplicate key value violates unique constraint".to_string()
            } else {
                state.batch_error.clone()
            };
            return Err(Error::statement_with_sql(message, self.sql.clone()));
        }
        state.events.push(Event::Batch(batch.len()));

        let mut staged = self.staged.lock();
        for values in batch {
            staged.push((self.table.clone(), values.clone()));
        }
        Ok(vec![1; batch.len()])
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().events.push(Event::StatementClose);
        Ok(())
    }
}

pub fn users() -> TableDescriptor {
    TableDescriptor::new("users").with_columns([
        ColumnDef::new("id", "INT"),
        ColumnDef::new("name", "VARCHAR(50)"),
    ])
}

pub fn user(id: i64, name: &str) -> Vec<Value> {
    vec![Value::from(id), Value::from(name)]
}
