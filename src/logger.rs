//! Statement logging hook.
//!
//! Every statement a client executes is handed to a [`QueryLogger`] together
//! with the client's correlation id. The default logger strips comments,
//! collapses whitespace and forwards the result to a [`LogSink`] chosen when
//! the client is constructed. Logging is fire-and-forget: failures and panics
//! inside a logger are contained by [`dispatch`] and never reach the caller.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, LazyLock, Mutex};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::LoggerError;

/// Target identifier of the host event channel that receives query logs.
pub const QUERY_LOG_TARGET: &str = "query-log";

/// A quoted literal or identifier (kept), or a run of whitespace and comments
/// (collapsed to one space).
static SANITIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)('(?:[^']|'')*'|"(?:[^"]|"")*"|`[^`]*`)|(?:\s|/\*.*?\*/|--[^\r\n]*)+"#)
        .expect("unable to compile sanitize regex")
});

/// Remove `/* */` and `--` comments and collapse whitespace runs to one space.
/// Quoted literals and identifiers are left untouched.
pub fn sanitize_sql(sql: &str) -> String {
    SANITIZE_RE
        .replace_all(sql, |caps: &regex::Captures<'_>| match caps.get(1) {
            Some(quoted) => quoted.as_str().to_string(),
            None => " ".to_string(),
        })
        .trim()
        .to_string()
}

/// Receives every executed statement.
pub trait QueryLogger: Send + Sync {
    fn log(&self, sql: &str, uid: &str) -> Result<(), LoggerError>;
}

impl<F> QueryLogger for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn log(&self, sql: &str, uid: &str) -> Result<(), LoggerError> {
        self(sql, uid);
        Ok(())
    }
}

/// Invoke a logger, containing any error or panic it raises.
pub fn dispatch(logger: &dyn QueryLogger, sql: &str, uid: &str) {
    match catch_unwind(AssertUnwindSafe(|| logger.log(sql, uid))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(uid, error = %e, "query logger failed"),
        Err(_) => warn!(uid, "query logger panicked"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryLogEntry {
    pub uid: String,
    pub sql: String,
    pub date: DateTime<Utc>,
}

/// Event delivered to a host channel.
#[derive(Debug, Clone, Serialize)]
pub struct HostEvent {
    pub target: &'static str,
    pub payload: QueryLogEntry,
}

/// Destination of sanitized log entries.
pub trait LogSink: Send + Sync {
    fn emit(&self, entry: QueryLogEntry) -> Result<(), LoggerError>;
}

/// Writes entries as `tracing` events under the `polysql::query` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, entry: QueryLogEntry) -> Result<(), LoggerError> {
        info!(
            target: "polysql::query",
            uid = %entry.uid,
            date = %entry.date.to_rfc3339(),
            "{}",
            entry.sql
        );
        Ok(())
    }
}

/// Forwards entries to an interactive host over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl LogSink for ChannelSink {
    fn emit(&self, entry: QueryLogEntry) -> Result<(), LoggerError> {
        self.tx
            .send(HostEvent {
                target: QUERY_LOG_TARGET,
                payload: entry,
            })
            .map_err(|_| LoggerError::ChannelClosed)
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct CollectorSink {
    entries: Mutex<Vec<QueryLogEntry>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<QueryLogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl LogSink for CollectorSink {
    fn emit(&self, entry: QueryLogEntry) -> Result<(), LoggerError> {
        self.entries
            .lock()
            .map_err(|e| LoggerError::Sink(e.to_string()))?
            .push(entry);
        Ok(())
    }
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn emit(&self, entry: QueryLogEntry) -> Result<(), LoggerError> {
        (**self).emit(entry)
    }
}

/// Discards entries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _entry: QueryLogEntry) -> Result<(), LoggerError> {
        Ok(())
    }
}

/// Sanitizes statements and forwards them to a sink.
#[derive(Clone)]
pub struct DefaultLogger {
    sink: Arc<dyn LogSink>,
}

impl DefaultLogger {
    pub fn new(sink: impl LogSink + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn tracing() -> Self {
        Self::new(TracingSink)
    }

    pub fn null() -> Self {
        Self::new(NullSink)
    }
}

impl Default for DefaultLogger {
    fn default() -> Self {
        Self::tracing()
    }
}

impl std::fmt::Debug for DefaultLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultLogger").finish_non_exhaustive()
    }
}

impl QueryLogger for DefaultLogger {
    fn log(&self, sql: &str, uid: &str) -> Result<(), LoggerError> {
        self.sink.emit(QueryLogEntry {
            uid: uid.to_string(),
            sql: sanitize_sql(sql),
            date: Utc::now(),
        })
    }
}
