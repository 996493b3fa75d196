//! Driver registry and connection factory
//!
//! Drivers are looked up by id in an explicit [`DriverRegistry`]. Embedders
//! either pass a registry around or [`install`] one process-wide; nothing is
//! registered as a side effect of a lookup.
//!
//! ```rust,ignore
//! use rivven_dbtap::driver::{self, DriverRegistry};
//! use std::sync::Arc;
//!
//! let mut registry = DriverRegistry::new();
//! registry.register(Arc::new(rivven_dbtap::postgres::PgDriver));
//! driver::install(registry)?;
//! ```

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionConfigurer};
use crate::dialect::{GenericDialect, SqlDialect};
use crate::error::{Error, Result};

/// A database driver
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registry id (`postgres`, `mysql`, ...)
    fn id(&self) -> &str;

    /// Dialect used for vendor-specific probes
    fn dialect(&self) -> Arc<dyn SqlDialect> {
        Arc::new(GenericDialect)
    }

    /// Open a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;
}

/// Registry of available drivers
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its id, replacing any previous entry
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        let id = driver.id().to_string();
        if self.drivers.insert(id.clone(), driver).is_some() {
            debug!(driver = %id, "Replaced registered driver");
        }
    }

    /// Builder-style [`register`](Self::register)
    pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.register(driver);
        self
    }

    /// Get a driver by id
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Driver>> {
        self.drivers.get(id)
    }

    /// Get a driver by id or fail with `DriverUnavailable`
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Driver>> {
        self.drivers
            .get(id)
            .cloned()
            .ok_or_else(|| Error::DriverUnavailable {
                driver: id.to_string(),
            })
    }

    /// Check if a driver is registered
    pub fn contains(&self, id: &str) -> bool {
        self.drivers.contains_key(id)
    }

    /// Registered driver ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered drivers
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.ids())
            .finish()
    }
}

static GLOBAL_REGISTRY: RwLock<Option<Arc<DriverRegistry>>> = parking_lot::const_rwlock(None);

/// Install the process-wide registry. Fails if one is already installed.
pub fn install(registry: DriverRegistry) -> Result<()> {
    let mut slot = GLOBAL_REGISTRY.write();
    if slot.is_some() {
        return Err(Error::illegal_state("a driver registry is already installed"));
    }
    info!(drivers = ?registry.ids(), "Installed driver registry");
    *slot = Some(Arc::new(registry));
    Ok(())
}

/// Remove the process-wide registry, returning it if one was installed.
pub fn uninstall() -> Option<Arc<DriverRegistry>> {
    GLOBAL_REGISTRY.write().take()
}

/// The process-wide registry, if installed
pub fn global() -> Option<Arc<DriverRegistry>> {
    GLOBAL_REGISTRY.read().clone()
}

/// Opens connections for one resolved driver and configuration.
///
/// Connections come back with autocommit disabled and the optional
/// [`ConnectionConfigurer`] already applied.
#[derive(Clone)]
pub struct ConnectionFactory {
    driver: Arc<dyn Driver>,
    config: ConnectionConfig,
    configurer: Option<Arc<dyn ConnectionConfigurer>>,
}

impl ConnectionFactory {
    /// Resolve `config.driver()` against `registry`
    pub fn resolve(registry: &DriverRegistry, config: ConnectionConfig) -> Result<Self> {
        let driver = registry.resolve(config.driver())?;
        Ok(Self::new(driver, config))
    }

    /// Resolve against the process-wide registry
    pub fn resolve_global(config: ConnectionConfig) -> Result<Self> {
        let registry = global().ok_or_else(|| Error::DriverUnavailable {
            driver: config.driver().to_string(),
        })?;
        Self::resolve(&registry, config)
    }

    /// Create from an already resolved driver
    pub fn new(driver: Arc<dyn Driver>, config: ConnectionConfig) -> Self {
        Self {
            driver,
            config,
            configurer: None,
        }
    }

    /// Run `configurer` on every opened connection
    pub fn with_configurer(mut self, configurer: Arc<dyn ConnectionConfigurer>) -> Self {
        self.configurer = Some(configurer);
        self
    }

    /// Connection configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Id of the resolved driver
    pub fn driver_id(&self) -> &str {
        self.driver.id()
    }

    /// Dialect of the resolved driver
    pub fn dialect(&self) -> Arc<dyn SqlDialect> {
        self.driver.dialect()
    }

    /// Open a connection with autocommit disabled
    pub async fn open(&self) -> Result<Box<dyn Connection>> {
        let url = self.config.redacted_url();

        let mut conn = self.driver.connect(&self.config).await.map_err(|e| {
            Error::connection_with_source(format!("unable to open connection: {}", url), e)
        })?;

        if let Err(e) = conn.set_auto_commit(false).await {
            close_quietly(conn.as_mut()).await;
            return Err(Error::connection_with_source(
                format!("unable to disable autocommit: {}", url),
                e,
            ));
        }

        if let Some(configurer) = &self.configurer {
            if let Err(e) = configurer.configure(conn.as_mut()).await {
                close_quietly(conn.as_mut()).await;
                return Err(Error::connection_with_source(
                    format!("unable to configure connection: {}", url),
                    e,
                ));
            }
        }

        info!(driver = %self.driver.id(), url = %url, "Opened connection");
        Ok(conn)
    }
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("driver", &self.driver.id())
            .field("config", &self.config)
            .field("configurer", &self.configurer.is_some())
            .finish()
    }
}

/// Close a connection on an error path, logging instead of failing
pub(crate) async fn close_quietly(conn: &mut dyn Connection) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "Failed to close connection");
    }
}
