//! Reusable prepared statements bound to one session.

use std::fmt;
use std::sync::Arc;

use duckdb::types::Value;
use duckdb::{params_from_iter, Connection};
use tracing::{debug, instrument, warn};

use crate::engine::tracker::{ResourceGuard, ResourceKind};
use crate::error::{DriverError, QueryContext};
use crate::session::cursor::{run_query, QueryOutput, RowCursor};
use crate::session::id::StatementId;
use crate::session::lease::Lease;
use crate::session::row::{columns_from_schema, Column};
use crate::session::{check_param_count, Session};
use crate::sql_parser::ParsedStatement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// Being prepared; never observed on a handle returned to the caller.
    Created,
    Prepared,
    Executing,
    Exhausted,
    Closed,
}

impl fmt::Display for StatementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementState::Created => "created",
            StatementState::Prepared => "prepared",
            StatementState::Executing => "executing",
            StatementState::Exhausted => "exhausted",
            StatementState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A prepared statement owned by a [`Session`].
///
/// The native statement lives in the session connection's statement cache,
/// keyed by SQL text, so re-executing never re-parses. Borrowing the session
/// means a handle can never outlive it.
pub struct StatementHandle<'s> {
    id: StatementId,
    session: &'s Session,
    sql: String,
    param_count: usize,
    columns: Option<Arc<[Column]>>,
    produces_rows: bool,
    lease: Arc<Lease>,
    guard: Option<ResourceGuard>,
}

impl<'s> StatementHandle<'s> {
    pub(crate) fn prepare(session: &'s Session, sql: &str) -> Result<Self, DriverError> {
        let parsed = session.check_sql(sql)?;
        let id = session.next_statement_id();
        debug!(statement_id = %id, state = %StatementState::Created, "preparing statement");

        let (param_count, columns) = session.with_conn(|conn| {
            let param_count = conn
                .prepare_cached(sql)
                .query_context("prepare", sql)?
                .parameter_count();
            let columns = match &parsed {
                Some(parsed) if parsed.is_select() => discover_columns(conn, sql, param_count),
                _ => None,
            };
            Ok((param_count, columns))
        })?;

        let handle = Self {
            id,
            session,
            sql: sql.to_string(),
            param_count,
            columns,
            produces_rows: parsed.as_ref().map_or(true, ParsedStatement::is_query),
            lease: Lease::new(),
            guard: Some(session.resources().acquire(ResourceKind::Statement)),
        };
        debug!(
            statement_id = %handle.id,
            param_count,
            column_count = handle.columns.as_ref().map(|c| c.len()),
            "statement prepared"
        );
        Ok(handle)
    }

    pub fn id(&self) -> StatementId {
        self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Result columns discovered at prepare time.
    ///
    /// `None` when the statement produces no rows, or when the shape could
    /// not be determined without running it; the cursor then reports the
    /// columns it actually got.
    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    pub fn state(&self) -> StatementState {
        if self.lease.is_closed() {
            StatementState::Closed
        } else if self.lease.epoch() == 0 {
            StatementState::Prepared
        } else if self.lease.is_exhausted() {
            StatementState::Exhausted
        } else {
            StatementState::Executing
        }
    }

    /// Bind `params` positionally and run the statement.
    ///
    /// Every successful call starts a new execution: cursors returned by
    /// earlier calls fail with [`DriverError::UseAfterClose`] from now on.
    #[instrument(
        skip(self, params),
        fields(statement_id = %self.id, sql = %self.sql, param_count = params.len())
    )]
    pub fn bind_and_execute(&self, params: &[Value]) -> Result<RowCursor, DriverError> {
        self.ensure_open()?;
        check_param_count(self.param_count, params.len())?;

        let progress = self.session.progress_monitor().start();
        let output = self.session.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(&self.sql)
                .query_context("prepare", &self.sql)?;
            if self.produces_rows {
                run_query(&mut stmt, params, &self.sql)
            } else {
                let affected = stmt
                    .execute(params_from_iter(params.iter()))
                    .query_context("execute", &self.sql)?;
                debug!(affected, "executed prepared statement");
                Ok(QueryOutput::empty())
            }
        })?;

        // A failed run leaves the previous execution and its cursors alone.
        let execution = self.lease.renew();
        Ok(RowCursor::new(
            output,
            vec![self.session.fence(), execution.clone()],
            Some(execution),
            progress,
            self.session.resources().acquire(ResourceKind::Cursor),
        ))
    }

    /// Run the statement for its side effects and return the affected row count.
    #[instrument(
        skip(self, params),
        fields(statement_id = %self.id, sql = %self.sql, param_count = params.len())
    )]
    pub fn execute(&self, params: &[Value]) -> Result<usize, DriverError> {
        self.ensure_open()?;
        check_param_count(self.param_count, params.len())?;

        let affected = self.session.with_conn(|conn| {
            conn.prepare_cached(&self.sql)
                .query_context("prepare", &self.sql)?
                .execute(params_from_iter(params.iter()))
                .query_context("execute", &self.sql)
        })?;
        self.lease.renew().mark_exhausted();
        debug!(affected, "executed prepared statement");
        Ok(affected)
    }

    /// Release the native statement. Calling it again is a no-op.
    ///
    /// The session's statement cache is flushed as a whole; other open
    /// handles re-prepare transparently on their next execution.
    pub fn close(&mut self) {
        if !self.lease.close() {
            return;
        }
        self.guard = None;
        let flushed = self.session.with_conn(|conn| {
            conn.flush_prepared_statement_cache();
            Ok(())
        });
        if let Err(err) = flushed {
            warn!(statement_id = %self.id, error = %err, "failed to release prepared statement");
        }
        debug!(statement_id = %self.id, "statement closed");
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.lease.is_closed() {
            return Err(DriverError::UseAfterClose("statement handle"));
        }
        Ok(())
    }
}

impl Drop for StatementHandle<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for StatementHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementHandle")
            .field("id", &self.id)
            .field("sql", &self.sql)
            .field("param_count", &self.param_count)
            .field("state", &self.state())
            .finish()
    }
}

/// Result shape of a SELECT without producing any rows.
///
/// The statement is wrapped in `LIMIT 0` and run with NULL parameters. The
/// closing parenthesis goes on its own line so a trailing `--` comment
/// cannot swallow it. Returns `None` if the engine rejects the wrapped form.
fn discover_columns(conn: &Connection, sql: &str, param_count: usize) -> Option<Arc<[Column]>> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let wrapped = format!("SELECT * FROM ({trimmed}\n) LIMIT 0");
    let nulls: Vec<Value> = (0..param_count).map(|_| Value::Null).collect();

    let schema = conn
        .prepare(&wrapped)
        .and_then(|mut stmt| {
            let arrow = stmt.query_arrow(params_from_iter(nulls.iter()))?;
            Ok(arrow.get_schema())
        });
    match schema {
        Ok(schema) => Some(columns_from_schema(&schema)),
        Err(err) => {
            debug!(error = %err, "schema discovery skipped");
            None
        }
    }
}
