//! Dialect-agnostic query building and statement execution.
//!
//! A [`QueryBuilder`] accumulates clauses and renders them through the
//! [`Client`] it was created with; the client executes the SQL and exposes
//! administrative operations for its engine.

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod logger;
pub mod query;

pub use db::{builder, connect, Capability, Client, ClientParams, ConnectionConfig, Engine, QueryArgs};
pub use error::{ClientError, LoggerError, RenderError};
pub use query::{Clause, Dialect, InsertRow, QueryBuilder, SqlValue};
