//! Record to statement-parameter binding
//!
//! A [`StatementBinder`] turns one record into the ordered parameter set of
//! the writer's INSERT. Closures `Fn(&R, &mut Parameters) -> Result<()>` are
//! binders too.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Highest parameter position a statement may bind (PostgreSQL wire limit)
pub const MAX_PARAMETERS: usize = u16::MAX as usize;

/// Ordered parameter values for one statement execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    values: Vec<Value>,
}

impl Parameters {
    /// Empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty parameter set with room for `capacity` values
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    /// Append the next positional value
    pub fn push(&mut self, value: impl Into<Value>) {
        self.values.push(value.into());
    }

    /// Set the value at a 1-based position, padding skipped positions with NULL
    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        if index == 0 {
            return Err(Error::bind("parameter index is 1-based"));
        }
        if index > MAX_PARAMETERS {
            return Err(Error::bind(format!(
                "parameter index {} exceeds the limit of {}",
                index, MAX_PARAMETERS
            )));
        }
        if self.values.len() < index {
            self.values.resize(index, Value::Null);
        }
        self.values[index - 1] = value.into();
        Ok(())
    }

    /// Number of bound values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if nothing is bound
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bound values in order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume into the bound values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Binds records of type `R` to statement parameters
pub trait StatementBinder<R: ?Sized>: Send + Sync {
    /// Bind `record` into `params`
    fn bind(&self, record: &R, params: &mut Parameters) -> Result<()>;
}

impl<R, F> StatementBinder<R> for F
where
    R: ?Sized,
    F: Fn(&R, &mut Parameters) -> Result<()> + Send + Sync,
{
    fn bind(&self, record: &R, params: &mut Parameters) -> Result<()> {
        self(record, params)
    }
}

/// Binds a slice of values positionally
#[derive(Debug, Clone, Copy, Default)]
pub struct ValuesBinder;

impl StatementBinder<[Value]> for ValuesBinder {
    fn bind(&self, record: &[Value], params: &mut Parameters) -> Result<()> {
        for value in record {
            params.push(value.clone());
        }
        Ok(())
    }
}

impl StatementBinder<Vec<Value>> for ValuesBinder {
    fn bind(&self, record: &Vec<Value>, params: &mut Parameters) -> Result<()> {
        StatementBinder::<[Value]>::bind(self, record.as_slice(), params)
    }
}

/// Binds a [`Row`] by column name, in a fixed field order
#[derive(Debug, Clone)]
pub struct RowBinder {
    fields: Vec<String>,
}

impl RowBinder {
    /// Bind the named fields in order. Missing columns are a bind error.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl StatementBinder<Row> for RowBinder {
    fn bind(&self, record: &Row, params: &mut Parameters) -> Result<()> {
        for field in &self.fields {
            let value = record
                .get_by_name(field)
                .ok_or_else(|| Error::bind(format!("row has no column '{}'", field)))?;
            params.push(value.clone());
        }
        Ok(())
    }
}

/// Absent keys bind as NULL
impl StatementBinder<HashMap<String, Value>> for RowBinder {
    fn bind(&self, record: &HashMap<String, Value>, params: &mut Parameters) -> Result<()> {
        for field in &self.fields {
            params.push(record.get(field).cloned().unwrap_or(Value::Null));
        }
        Ok(())
    }
}

/// Binds JSON objects by key, in a fixed field order.
///
/// Absent keys and JSON `null` bind as SQL NULL; nested objects and arrays
/// bind as JSON values.
#[derive(Debug, Clone)]
pub struct JsonBinder {
    fields: Vec<String>,
}

impl JsonBinder {
    /// Bind the named keys in order
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl StatementBinder<serde_json::Value> for JsonBinder {
    fn bind(&self, record: &serde_json::Value, params: &mut Parameters) -> Result<()> {
        let object = record
            .as_object()
            .ok_or_else(|| Error::bind("record is not a JSON object"))?;

        for field in &self.fields {
            params.push(object.get(field).map_or(Value::Null, Value::from_json));
        }
        Ok(())
    }
}
