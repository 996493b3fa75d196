//! YAML configuration for a table sink
//!
//! ```yaml
//! connection:
//!   url: postgres://db.internal:5432/warehouse
//!   driver: postgres
//!   username: etl
//!   password: ${DB_PASSWORD}
//! table:
//!   name: public.users
//!   columns:
//!     - { name: id, type: BIGINT NOT NULL }
//!     - { name: name, type: VARCHAR, size: 50 }
//!   primary_keys: [id]
//! batch_size: 500
//! sink_mode: keep
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are replaced from the environment before
//! parsing. An unset variable without a default expands to an empty string.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use validator::Validate;

use crate::connection::{ConnectionConfig, InitStatements, SensitiveString};
use crate::driver::{ConnectionFactory, DriverRegistry};
use crate::error::{Error, Result};
use crate::lifecycle::SinkMode;
use crate::security::{validate_sql_identifier, validate_sql_type_name, validate_table_name};
use crate::sink::SinkAdapter;
use crate::table::{ColumnDef, TableDescriptor};

/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Replace `${VAR}` and `${VAR:-default}` with values from the environment
pub fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let default = caps.get(2).map(|m| m.as_str());
            std::env::var(&caps[1]).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .into_owned()
}

/// Connection settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConnectionSection {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub url: String,

    /// Registered driver id
    #[validate(length(min = 1))]
    pub driver: String,

    /// User name, if not part of the URL
    #[serde(default)]
    pub username: Option<String>,

    /// Password, if not part of the URL
    #[serde(default)]
    pub password: Option<SensitiveString>,

    /// Statements run on every new connection (`SET search_path TO staging`)
    #[serde(default)]
    pub init_statements: Vec<String>,
}

/// Target table
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TableSection {
    /// Table name, optionally schema-qualified
    #[validate(length(min = 1))]
    pub name: String,

    /// Column definitions. Empty for append-only use of an existing table.
    #[serde(default)]
    pub columns: Vec<ColumnDef>,

    /// Primary key columns
    #[serde(default)]
    pub primary_keys: Vec<String>,
}

/// Table sink configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TapConfig {
    /// Connection settings
    #[validate(nested)]
    pub connection: ConnectionSection,

    /// Target table
    #[validate(nested)]
    pub table: TableSection,

    /// INSERT field names; defaults to the table's column names.
    /// A leading `null` omits the column list.
    #[serde(default)]
    pub field_names: Option<Vec<Option<String>>>,

    /// Statements per batch (default: 1000)
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 100000))]
    pub batch_size: u32,

    /// Table policy at job start (default: append)
    #[serde(default)]
    pub sink_mode: SinkMode,
}

fn default_batch_size() -> u32 {
    1000
}

impl TapConfig {
    /// Expand environment variables, then parse and validate YAML
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let expanded = expand_env_vars(yaml);
        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| Error::config(format!("invalid YAML: {}", e)))?;
        config.validate_all()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("unable to read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&yaml)
    }

    /// Field validation plus identifier and sink-mode checks
    pub fn validate_all(&self) -> Result<()> {
        self.validate().map_err(|e| Error::config(e.to_string()))?;

        validate_table_name(&self.table.name)?;
        for column in &self.table.columns {
            validate_sql_identifier(&column.name)?;
            validate_sql_type_name(&column.sql_type)?;
        }
        for key in &self.table.primary_keys {
            validate_sql_identifier(key)?;
        }
        if let Some(names) = &self.field_names {
            for name in names.iter().flatten() {
                validate_sql_identifier(name)?;
            }
        }

        if self.sink_mode != SinkMode::Append && self.table.columns.is_empty() {
            return Err(Error::config(format!(
                "sink_mode {} requires table.columns",
                self.sink_mode
            )));
        }

        self.descriptor().validate()
    }

    /// Connection configuration
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(&self.connection.url, &self.connection.driver);
        if let Some(username) = &self.connection.username {
            config = config.with_username(username);
        }
        if let Some(password) = &self.connection.password {
            config = config.with_password(password.clone());
        }
        config
    }

    /// Table descriptor
    pub fn descriptor(&self) -> TableDescriptor {
        TableDescriptor::new(&self.table.name)
            .with_columns(self.table.columns.iter().cloned())
            .with_primary_keys(self.table.primary_keys.iter().cloned())
    }

    /// Resolve the driver and build the sink
    pub fn into_sink(self, registry: &DriverRegistry) -> Result<SinkAdapter> {
        self.validate_all()?;

        let mut factory = ConnectionFactory::resolve(registry, self.connection_config())?;
        if !self.connection.init_statements.is_empty() {
            factory = factory.with_configurer(Arc::new(InitStatements::new(
                self.connection.init_statements.iter().cloned(),
            )));
        }

        let batch_size = NonZeroUsize::new(self.batch_size as usize)
            .ok_or_else(|| Error::config("batch_size must be positive"))?;

        let mut builder = SinkAdapter::builder(factory, Arc::new(self.descriptor()))
            .sink_mode(self.sink_mode)
            .batch_size(batch_size);
        if let Some(names) = self.field_names {
            builder = builder.field_names(names);
        }
        builder.build()
    }
}
