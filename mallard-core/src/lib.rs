//! Session-oriented client adapter over the embedded DuckDB engine.
//!
//! A [`Connector`] opens one database and hands out [`Session`]s, each on its
//! own native connection. Sessions run SQL directly or through reusable
//! [`StatementHandle`]s, and results are read through forward-only
//! [`RowCursor`]s with typed column extraction.

pub mod config;
pub mod engine;
pub mod error;
pub mod progress;
pub mod session;
pub mod sql_parser;
pub mod types;

pub use config::ConnectorConfig;
pub use duckdb::types::Value;
pub use engine::{Connector, ResourceSnapshot};
pub use error::DriverError;
pub use progress::ProgressMonitor;
pub use session::{
    Column, FromRow, FromValue, Row, RowCursor, Session, SessionId, StatementHandle,
    StatementId, StatementState, TransactionState,
};
pub use types::date_to_value;
