//! Table descriptors and the DDL they render

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A column definition used for `CREATE TABLE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// SQL type, possibly with modifiers (`VARCHAR(50)`, `INT NOT NULL`)
    #[serde(rename = "type")]
    pub sql_type: String,
    /// Optional size appended as `TYPE(size)`
    #[serde(default)]
    pub size: Option<u32>,
}

impl ColumnDef {
    /// Create a column definition
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            size: None,
        }
    }

    /// Set the size
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Render as `name TYPE[(size)]`
    pub fn to_sql(&self) -> String {
        match self.size {
            Some(size) => format!("{} {}({})", self.name, self.sql_type, size),
            None => format!("{} {}", self.name, self.sql_type),
        }
    }
}

/// Static description of a sink table.
///
/// A descriptor without columns describes an existing table that can only be
/// appended to; it cannot render a `CREATE TABLE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    table_name: String,
    columns: Vec<ColumnDef>,
    primary_keys: Vec<String>,
}

impl TableDescriptor {
    /// Descriptor for an existing table with unknown columns
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            columns: Vec::new(),
            primary_keys: Vec::new(),
        }
    }

    /// Add a column definition
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Replace the column definitions
    pub fn with_columns(mut self, columns: impl IntoIterator<Item = ColumnDef>) -> Self {
        self.columns = columns.into_iter().collect();
        self
    }

    /// Set the primary key columns. Duplicates are dropped, order is kept.
    pub fn with_primary_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys.clear();
        for key in keys {
            let key = key.into();
            if !self.primary_keys.contains(&key) {
                self.primary_keys.push(key);
            }
        }
        self
    }

    /// Table name
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Column definitions
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Primary key column names
    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    /// Whether the descriptor carries column definitions
    pub fn has_columns(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Column names in declaration order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// `CREATE TABLE` statement, or `None` for append-only descriptors
    pub fn create_table_sql(&self) -> Option<String> {
        if self.columns.is_empty() {
            return None;
        }

        let mut defs: Vec<String> = self.columns.iter().map(ColumnDef::to_sql).collect();
        if !self.primary_keys.is_empty() {
            defs.push(format!("PRIMARY KEY ({})", self.primary_keys.join(", ")));
        }

        Some(format!("CREATE TABLE {} ({})", self.table_name, defs.join(", ")))
    }

    /// `DROP TABLE` statement
    pub fn drop_table_sql(&self) -> String {
        format!("DROP TABLE {}", self.table_name)
    }

    /// Check internal consistency: primary keys must name declared columns.
    pub fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(Error::invalid_argument("table name may not be empty"));
        }

        if self.columns.is_empty() {
            return Ok(());
        }

        for key in &self.primary_keys {
            if !self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(key)) {
                return Err(Error::invalid_argument(format!(
                    "primary key '{}' is not a column of {}",
                    key, self.table_name
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TableDescriptor{{table={}, columns={}, primary_keys=[{}]}}",
            self.table_name,
            self.columns.len(),
            self.primary_keys.join(",")
        )
    }
}
