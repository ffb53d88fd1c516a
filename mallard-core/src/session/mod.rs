//! Session management module.
//!
//! This module provides:
//! - `Session`: one native connection plus its transaction state
//! - `StatementHandle`: prepared statements bound to a session
//! - `RowCursor` / `Row`: forward-only results with typed extraction
//!
//! Outside an explicit transaction the engine commits every statement on its
//! own; sessions do not emulate any other auto-commit behavior.

mod cursor;
pub mod id;
mod lease;
mod row;
mod statement;

pub use cursor::RowCursor;
pub use id::{SessionId, StatementId};
pub use row::{Column, FromRow, FromValue, Row};
pub use statement::{StatementHandle, StatementState};

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use duckdb::types::Value;
use duckdb::{params_from_iter, Connection};
use tracing::{debug, info, instrument, warn};

use crate::config::is_identifier;
use crate::engine::connector::ConnectorInner;
use crate::engine::tracker::{ResourceGuard, ResourceKind, ResourceTracker};
use crate::error::{DriverError, QueryContext};
use crate::progress::ProgressMonitor;
use crate::session::cursor::run_query;
use crate::session::id::StatementIdGenerator;
use crate::session::lease::{Fence, Lease};
use crate::sql_parser::ParsedStatement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    None,
    Active,
    Committing,
    RollingBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::None => "none",
            TransactionState::Active => "active",
            TransactionState::Committing => "committing",
            TransactionState::RollingBack => "rolling back",
        };
        f.write_str(name)
    }
}

/// A client session with its own native connection.
///
/// Operations are serialized through a session-local mutex, so a session may
/// be shared by reference but only one call reaches the engine at a time.
/// Lock order is transaction state first, then connection.
pub struct Session {
    conn: Mutex<Option<Connection>>,
    id: SessionId,
    tx_state: Mutex<TransactionState>,
    lease: Arc<Lease>,
    statement_ids: StatementIdGenerator,
    _guard: ResourceGuard,
    connector: Arc<ConnectorInner>,
}

impl Session {
    pub(crate) fn new(
        conn: Connection,
        connector: Arc<ConnectorInner>,
        guard: ResourceGuard,
    ) -> Self {
        let id = SessionId::new();
        info!(session_id = %id, "session opened");
        Self {
            conn: Mutex::new(Some(conn)),
            id,
            tx_state: Mutex::new(TransactionState::None),
            lease: Lease::new(),
            statement_ids: StatementIdGenerator::new(),
            _guard: guard,
            connector,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Run a statement that returns no result set; returns the affected row count.
    #[instrument(skip(self, params), fields(session_id = %self.id, sql = %sql, param_count = params.len()))]
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, DriverError> {
        self.check_sql(sql)?;
        let affected = self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).query_context("prepare", sql)?;
            check_param_count(stmt.parameter_count(), params.len())?;
            stmt.execute(params_from_iter(params.iter()))
                .query_context("execute", sql)
        })?;
        debug!(affected, "executed statement");
        Ok(affected)
    }

    /// Run several `;`-separated statements without parameters or results.
    #[instrument(skip(self), fields(session_id = %self.id, sql = %sql))]
    pub fn execute_batch(&self, sql: &str) -> Result<(), DriverError> {
        self.check_sql(sql)?;
        self.with_conn(|conn| conn.execute_batch(sql).query_context("execute batch", sql))?;
        debug!("executed batch");
        Ok(())
    }

    /// Run a query, substituting `?` placeholders left to right.
    #[instrument(skip(self, params), fields(session_id = %self.id, sql = %sql, param_count = params.len()))]
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<RowCursor, DriverError> {
        self.check_sql(sql)?;
        let progress = self.connector.progress.start();
        let output = self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).query_context("prepare", sql)?;
            check_param_count(stmt.parameter_count(), params.len())?;
            run_query(&mut stmt, params, sql)
        })?;

        Ok(RowCursor::new(
            output,
            vec![self.fence()],
            None,
            progress,
            self.resources().acquire(ResourceKind::Cursor),
        ))
    }

    /// First row of a query, or [`DriverError::NoRows`].
    pub fn query_row(&self, sql: &str, params: &[Value]) -> Result<Row, DriverError> {
        self.query(sql, params)?
            .next_row()?
            .ok_or(DriverError::NoRows)
    }

    /// Prepare `sql` for repeated execution.
    ///
    /// Discovers the parameter count, and for plain SELECTs the result
    /// columns, without running the statement.
    #[instrument(skip(self), fields(session_id = %self.id, sql = %sql))]
    pub fn prepare(&self, sql: &str) -> Result<StatementHandle<'_>, DriverError> {
        StatementHandle::prepare(self, sql)
    }

    /// Cheap liveness check against the native connection.
    pub fn ping(&self) -> Result<(), DriverError> {
        const PING: &str = "SELECT 1";
        self.with_conn(|conn| conn.execute_batch(PING).query_context("ping", PING))
    }

    /// Current value of an engine setting, e.g. `access_mode` or `threads`.
    pub fn current_setting(&self, name: &str) -> Result<Value, DriverError> {
        if !is_identifier(name) {
            return Err(DriverError::UnsupportedParameter(format!(
                "invalid setting name `{name}`"
            )));
        }
        self.query_row(&format!("SELECT current_setting('{name}')"), &[])?
            .get::<Value>(0)
    }

    pub fn transaction_state(&self) -> Result<TransactionState, DriverError> {
        Ok(*self.lock_tx()?)
    }

    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn begin_transaction(&self) -> Result<(), DriverError> {
        const BEGIN: &str = "BEGIN TRANSACTION";
        let mut state = self.lock_tx()?;
        if *state != TransactionState::None {
            return Err(DriverError::State(format!(
                "cannot begin a transaction while one is {}",
                *state
            )));
        }
        self.with_conn(|conn| conn.execute_batch(BEGIN).query_context("begin", BEGIN))?;
        *state = TransactionState::Active;
        debug!("transaction started");
        Ok(())
    }

    /// Commit the active transaction.
    ///
    /// If the engine rejects the commit it has already rolled the
    /// transaction back, so the session returns to no transaction either way.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn commit(&self) -> Result<(), DriverError> {
        self.finish_transaction(TransactionState::Committing, "commit", "COMMIT")
    }

    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn rollback(&self) -> Result<(), DriverError> {
        self.finish_transaction(TransactionState::RollingBack, "rollback", "ROLLBACK")
    }

    fn finish_transaction(
        &self,
        transition: TransactionState,
        operation: &'static str,
        sql: &str,
    ) -> Result<(), DriverError> {
        let mut state = self.lock_tx()?;
        if *state != TransactionState::Active {
            return Err(DriverError::State(format!(
                "cannot {operation}: no active transaction"
            )));
        }
        *state = transition;
        let result = self.with_conn(|conn| conn.execute_batch(sql).query_context(operation, sql));
        *state = TransactionState::None;
        result?;
        debug!(operation, "transaction finished");
        Ok(())
    }

    /// Close the session, rolling back any transaction still open.
    ///
    /// Release errors are logged, never returned. Dropping the session does
    /// the same.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.lease.close() {
            return;
        }

        let state = self
            .tx_state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let open_transaction = *state != TransactionState::None;
        *state = TransactionState::None;

        let conn = self
            .conn
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(conn) = conn else {
            return;
        };

        if open_transaction {
            warn!(session_id = %self.id, "closing session with an open transaction; rolling back");
            if let Err(err) = conn.execute_batch("ROLLBACK") {
                warn!(session_id = %self.id, error = %err, "rollback on close failed");
            }
        }
        if let Err((_conn, err)) = conn.close() {
            warn!(session_id = %self.id, error = %err, "failed to close native connection");
        }
        info!(session_id = %self.id, "session closed");
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| DriverError::Internal("connection mutex poisoned".to_string()))?;
        let conn = guard.as_ref().ok_or(DriverError::UseAfterClose("session"))?;
        f(conn)
    }

    fn lock_tx(&self) -> Result<MutexGuard<'_, TransactionState>, DriverError> {
        self.tx_state
            .lock()
            .map_err(|_| DriverError::Internal("transaction state mutex poisoned".to_string()))
    }

    /// Reject SQL the adapter must not pass through, and classify the rest.
    ///
    /// Transaction control has to go through `begin_transaction`, `commit`
    /// and `rollback` so the tracked state stays truthful.
    pub(crate) fn check_sql(&self, sql: &str) -> Result<Option<ParsedStatement>, DriverError> {
        if sql.contains('\0') {
            return Err(DriverError::UnsupportedParameter(
                "SQL contains null bytes".to_string(),
            ));
        }
        let parsed = ParsedStatement::parse(sql);
        if parsed
            .as_ref()
            .is_some_and(ParsedStatement::is_transaction_control)
        {
            return Err(DriverError::State(
                "use begin_transaction, commit or rollback for transaction control".to_string(),
            ));
        }
        Ok(parsed)
    }

    pub(crate) fn fence(&self) -> Fence {
        self.lease.fence()
    }

    pub(crate) fn next_statement_id(&self) -> StatementId {
        self.statement_ids.next()
    }

    pub(crate) fn resources(&self) -> &ResourceTracker {
        &self.connector.resources
    }

    pub(crate) fn progress_monitor(&self) -> &ProgressMonitor {
        &self.connector.progress
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.lease.is_closed())
            .finish_non_exhaustive()
    }
}

pub(crate) fn check_param_count(expected: usize, actual: usize) -> Result<(), DriverError> {
    if expected != actual {
        return Err(DriverError::ParamCount { expected, actual });
    }
    Ok(())
}
