//! Connector: one database instance, many native connections.
//!
//! The connector opens the database once with the configured engine options,
//! installs extensions and runs the startup SQL before any user query. Every
//! session then gets its own native connection cloned from the root one, so
//! all sessions see the same (possibly in-memory) database.

use std::sync::{Arc, Mutex};

use duckdb::{Config, Connection};
use tracing::{debug, info, instrument};

use crate::config::ConnectorConfig;
use crate::engine::tracker::{ResourceKind, ResourceSnapshot, ResourceTracker};
use crate::error::DriverError;
use crate::progress::ProgressMonitor;
use crate::session::Session;

/// Shared handle to one configured database. Cheap to clone; `Send + Sync`.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

/// State shared between a connector and the sessions it produced.
///
/// Sessions hold an `Arc` to this so the root connection (and with it the
/// database instance) stays open until the last session is gone.
pub(crate) struct ConnectorInner {
    config: ConnectorConfig,
    connection_init_sql: String,
    pub(crate) progress: ProgressMonitor,
    pub(crate) resources: ResourceTracker,
    root: Mutex<Connection>,
}

impl Connector {
    /// Open the database described by `config`.
    ///
    /// Any failure here (bad option, extension that cannot be loaded, startup
    /// SQL error) is reported as [`DriverError::Config`].
    #[instrument(skip(config), fields(path = %config.path, options = config.options.len()))]
    pub fn open(config: ConnectorConfig) -> Result<Self, DriverError> {
        config.validate()?;

        let engine_config = engine_config(&config)?;
        let root = if config.is_in_memory() {
            Connection::open_in_memory_with_flags(engine_config)
        } else {
            Connection::open_with_flags(config.path.trim(), engine_config)
        }
        .map_err(|err| DriverError::Config(format!("failed to open database: {err}")))?;

        let extension_sql = config.extension_sql();
        if !extension_sql.is_empty() {
            info!(extensions = ?config.extensions, "loading extensions");
            root.execute_batch(&extension_sql).map_err(|err| {
                DriverError::Config(format!("failed to load extensions: {err}"))
            })?;
        }

        let connection_init_sql = config.connection_init_sql();
        if !connection_init_sql.is_empty() {
            info!("running connection init SQL:\n{}", connection_init_sql);
            root.execute_batch(&connection_init_sql)
                .map_err(|err| DriverError::Config(format!("init SQL failed: {err}")))?;
        }

        info!(
            in_memory = config.is_in_memory(),
            "connector opened"
        );

        Ok(Self {
            inner: Arc::new(ConnectorInner {
                config,
                connection_init_sql,
                progress: ProgressMonitor::new(),
                resources: ResourceTracker::default(),
                root: Mutex::new(root),
            }),
        })
    }

    /// Open a new session on a fresh native connection.
    ///
    /// Safe to call from many threads at once; each call yields an
    /// independent session.
    #[instrument(skip(self))]
    pub fn new_session(&self) -> Result<Session, DriverError> {
        let conn = {
            let root = self
                .inner
                .root
                .lock()
                .map_err(|_| DriverError::Internal("root connection mutex poisoned".to_string()))?;
            root.try_clone().map_err(DriverError::Connection)?
        };

        if !self.inner.connection_init_sql.is_empty() {
            conn.execute_batch(&self.inner.connection_init_sql)
                .map_err(|err| {
                    DriverError::Config(format!("connection init SQL failed: {err}"))
                })?;
        }

        let guard = self.inner.resources.acquire(ResourceKind::Session);
        let session = Session::new(conn, Arc::clone(&self.inner), guard);
        debug!(session_id = %session.id(), "opened native connection");
        Ok(session)
    }

    /// Completion of the most recent long-running operation, `0.0` when idle.
    ///
    /// Advisory only: it never blocks and has no ordering relationship with
    /// the operation finishing.
    pub fn progress(&self) -> f64 {
        self.inner.progress.current()
    }

    /// Live native resources handed out by this connector.
    pub fn resources(&self) -> ResourceSnapshot {
        self.inner.resources.snapshot()
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }
}

fn engine_config(config: &ConnectorConfig) -> Result<Config, DriverError> {
    let mut engine = Config::default()
        .enable_autoload_extension(true)
        .map_err(|err| DriverError::Config(format!("invalid engine configuration: {err}")))?;
    for (name, value) in &config.options {
        engine = engine.with(name, value).map_err(|err| {
            DriverError::Config(format!("invalid engine option `{name}` = `{value}`: {err}"))
        })?;
    }
    Ok(engine)
}
