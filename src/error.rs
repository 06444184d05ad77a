use thiserror::Error;

use crate::db::client::Capability;
use crate::db::connection::Engine;
use crate::db::query::StructuredError;
use crate::query::StatementKind;

/// Query state combinations a dialect cannot express.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    #[error("nothing to render: no table and no columns selected")]
    EmptyQuery,

    #[error("{0} statement requires a table")]
    MissingTable(StatementKind),

    #[error("conflicting statement modes: {}", join_kinds(.0))]
    ConflictingModes(Vec<StatementKind>),

    #[error("insert row {0} has no columns")]
    EmptyInsertRow(usize),

    #[error("insert row {0} does not match the columns of the first row")]
    InconsistentInsertRow(usize),
}

fn join_kinds(kinds: &[StatementKind]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// The adapter does not provide this capability.
    #[error("{capability} is not implemented for {engine}")]
    NotImplemented {
        capability: Capability,
        engine: Engine,
    },

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("{0}")]
    Execution(StructuredError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no running query for tab {0}")]
    NoRunningQuery(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// True when the failure means "unsupported on this engine" rather than a
    /// runtime error.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, ClientError::NotImplemented { .. })
    }

    /// Engine diagnostics, if the failure came from executing a statement.
    pub fn structured(&self) -> Option<&StructuredError> {
        match self {
            ClientError::Execution(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for ClientError {
    fn from(err: rusqlite::Error) -> Self {
        ClientError::Execution(StructuredError::from_sqlite_error(&err, ""))
    }
}

/// Failures inside a query log sink. Never surfaced to callers of `run`.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("query log channel is closed")]
    ChannelClosed,

    #[error("query log sink failed: {0}")]
    Sink(String),
}
