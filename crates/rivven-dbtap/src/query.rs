//! INSERT statement construction
//!
//! The writer prepares exactly one statement per task: an INSERT with one
//! positional `?` placeholder per field. Drivers that use another placeholder
//! syntax translate at prepare time.

use crate::error::{Error, Result};

/// Builds the parameterized INSERT used by a [`BatchWriter`](crate::writer::BatchWriter)
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryBuilder;

impl QueryBuilder {
    /// Build `INSERT INTO <table> [(<c1>,...)] VALUES (?,...);`
    ///
    /// `field_names` of `None` is a caller bug and fails with
    /// `InvalidArgument`. When the first name is `None` the column list is
    /// omitted so the database applies declaration order; the placeholder
    /// count always equals `field_names.len()`.
    ///
    /// ```
    /// use rivven_dbtap::query::QueryBuilder;
    ///
    /// let sql = QueryBuilder::build("logs", Some(&[None::<String>][..])).unwrap();
    /// assert_eq!(sql, "INSERT INTO logs VALUES (?);");
    ///
    /// let fields = [Some("id"), Some("name")];
    /// let sql = QueryBuilder::build("users", Some(&fields[..])).unwrap();
    /// assert_eq!(sql, "INSERT INTO users (id,name) VALUES (?,?);");
    /// ```
    pub fn build<S: AsRef<str>>(table: &str, field_names: Option<&[Option<S>]>) -> Result<String> {
        let field_names =
            field_names.ok_or_else(|| Error::invalid_argument("field names may not be null"))?;

        let mut query = String::with_capacity(32 + table.len() + field_names.len() * 16);
        query.push_str("INSERT INTO ");
        query.push_str(table);

        if let Some(Some(_)) = field_names.first() {
            let columns: Vec<&str> = field_names
                .iter()
                .map(|f| f.as_ref().map_or("NULL", |name| name.as_ref()))
                .collect();
            query.push_str(" (");
            query.push_str(&columns.join(","));
            query.push(')');
        }

        query.push_str(" VALUES (");
        query.push_str(&vec!["?"; field_names.len()].join(","));
        query.push_str(");");

        Ok(query)
    }

    /// Build from a plain list of column names
    pub fn build_for_columns(table: &str, columns: &[&str]) -> String {
        let fields: Vec<Option<&str>> = columns.iter().copied().map(Some).collect();
        // A present list never fails.
        Self::build(table, Some(fields.as_slice())).unwrap_or_default()
    }
}

/// Count `?` placeholders outside quoted literals and identifiers
pub fn placeholder_count(sql: &str) -> usize {
    let mut count = 0;
    let mut quote: Option<char> = None;

    for c in sql.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '?' => count += 1,
                _ => {}
            },
        }
    }

    count
}
