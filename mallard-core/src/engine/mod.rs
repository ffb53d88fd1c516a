//! Engine module - database instance and native resource accounting.
//!
//! This module provides:
//! - `Connector`: one configured database, producing sessions
//! - `ResourceSnapshot`: live native connections, statements and cursors

pub(crate) mod connector;
pub(crate) mod tracker;

pub use connector::Connector;
pub use tracker::ResourceSnapshot;
