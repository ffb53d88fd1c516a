use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to open connection: {0}")]
    Connection(#[source] duckdb::Error),
    #[error("{operation} failed for `{sql}`: {source}")]
    Query {
        operation: &'static str,
        sql: String,
        #[source]
        source: duckdb::Error,
    },
    #[error("statement expects {expected} parameters but {actual} were supplied")]
    ParamCount { expected: usize, actual: usize },
    #[error("row has {actual} columns but {expected} were requested")]
    ColumnCount { expected: usize, actual: usize },
    #[error("column `{column}` holds {actual}, cannot read it as {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: String,
    },
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("invalid transaction state: {0}")]
    State(String),
    #[error("{0} used after close")]
    UseAfterClose(&'static str),
    #[error("query returned no rows")]
    NoRows,
    #[error("unsupported parameter: {0}")]
    UnsupportedParameter(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DriverError {
    /// Whether the caller may reasonably retry the failed call as-is.
    ///
    /// Only native connection failures qualify; everything else is either a
    /// caller contract violation or an engine verdict on the SQL itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::Connection(_))
    }
}

/// Attach the failing operation and statement text to engine errors.
pub(crate) trait QueryContext<T> {
    fn query_context(self, operation: &'static str, sql: &str) -> Result<T, DriverError>;
}

impl<T> QueryContext<T> for Result<T, duckdb::Error> {
    fn query_context(self, operation: &'static str, sql: &str) -> Result<T, DriverError> {
        self.map_err(|source| DriverError::Query {
            operation,
            sql: sql.to_string(),
            source,
        })
    }
}
