//! SQL dialect abstraction for rivven-dbtap
//!
//! Only the statements whose shape differs between vendors live here. The
//! INSERT, CREATE TABLE and DROP TABLE shapes are portable and are rendered
//! by [`QueryBuilder`](crate::query::QueryBuilder) and
//! [`TableDescriptor`](crate::table::TableDescriptor).

use std::sync::Arc;

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Zero-row probe that succeeds iff `table` exists
    fn table_exists_sql(&self, table: &str) -> String;
}

/// ANSI fallback, used when a driver does not name its dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericDialect;

impl SqlDialect for GenericDialect {
    fn name(&self) -> &'static str {
        "Generic"
    }

    fn table_exists_sql(&self, table: &str) -> String {
        format!("SELECT 1 FROM {} WHERE 1 = 0", table)
    }
}

/// PostgreSQL dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn table_exists_sql(&self, table: &str) -> String {
        format!("SELECT 1 FROM {} LIMIT 0", table)
    }
}

/// MySQL dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn table_exists_sql(&self, table: &str) -> String {
        format!("SELECT 1 FROM {} LIMIT 0", table)
    }
}

/// SQL Server dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn table_exists_sql(&self, table: &str) -> String {
        format!("SELECT TOP 0 1 FROM {}", table)
    }
}

/// Get a dialect by name
pub fn dialect_for(name: &str) -> Arc<dyn SqlDialect> {
    match name.to_lowercase().as_str() {
        "postgres" | "postgresql" => Arc::new(PostgresDialect),
        "mysql" | "mariadb" => Arc::new(MySqlDialect),
        "sqlserver" | "mssql" => Arc::new(SqlServerDialect),
        _ => Arc::new(GenericDialect),
    }
}
