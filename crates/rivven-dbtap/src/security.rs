//! Identifier and type-name validation for rivven-dbtap.
//!
//! Table names, column names and column types are interpolated into DDL and
//! INSERT statements verbatim, so configuration loading runs them through
//! these checks before a [`SinkAdapter`](crate::sink::SinkAdapter) is built.

use crate::error::Error;

/// Validate a single SQL identifier (column, primary key, table part).
///
/// - Must not be empty
/// - Maximum 255 characters
/// - Must start with ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters and underscores
///
/// # Examples
///
/// ```
/// use rivven_dbtap::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("users").is_ok());
/// assert!(validate_sql_identifier("_private").is_ok());
///
/// assert!(validate_sql_identifier("x; DROP TABLE users--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("123abc").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > 255 {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max 255)",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    Ok(())
}

/// Validate a possibly schema-qualified table name (`table`, `schema.table`
/// or `catalog.schema.table`).
///
/// ```
/// use rivven_dbtap::security::validate_table_name;
///
/// assert!(validate_table_name("public.users").is_ok());
/// assert!(validate_table_name("public..users").is_err());
/// assert!(validate_table_name("a.b.c.d").is_err());
/// ```
pub fn validate_table_name(name: &str) -> crate::Result<()> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 3 {
        return Err(Error::config(format!(
            "Invalid table name '{}': at most catalog.schema.table",
            name
        )));
    }
    parts.into_iter().try_for_each(validate_sql_identifier)
}

/// Validate a SQL type name for safe interpolation into DDL statements.
///
/// Allows letters, digits, underscores, parentheses, commas, spaces, single
/// quotes and periods, which covers `VARCHAR(50)`, `DECIMAL(10,2)`,
/// `INT NOT NULL` and `ENUM('a','b')`. Everything else is rejected.
///
/// ```
/// use rivven_dbtap::security::validate_sql_type_name;
///
/// assert!(validate_sql_type_name("VARCHAR(255)").is_ok());
/// assert!(validate_sql_type_name("INT NOT NULL").is_ok());
/// assert!(validate_sql_type_name("INT; DROP TABLE users--").is_err());
/// ```
pub fn validate_sql_type_name(type_name: &str) -> crate::Result<()> {
    if type_name.is_empty() {
        return Err(Error::config("SQL type name cannot be empty"));
    }

    if type_name.len() > 255 {
        return Err(Error::config(format!(
            "SQL type name too long: {} chars (max 255)",
            type_name.len()
        )));
    }

    for c in type_name.chars() {
        if !(c.is_ascii_alphanumeric() || matches!(c, '_' | '(' | ')' | ',' | ' ' | '\'' | '.')) {
            return Err(Error::config(format!(
                "Invalid SQL type name '{}': contains invalid character '{}'",
                type_name, c
            )));
        }
    }

    Ok(())
}
