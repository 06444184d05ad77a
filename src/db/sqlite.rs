//! SQLite adapter.
//!
//! One connection guarded by a mutex; every statement runs on tokio's
//! blocking pool. Cancellation interrupts the connection, but only when the
//! statement holding it belongs to the requested tab.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection, InterruptHandle, OpenFlags, Statement};
use tracing::{debug, info};

use crate::db::client::{Client, QueryArgs};
use crate::db::connection::{ClientParams, ConnectionConfig, Engine};
use crate::db::query::{CellValue, ColumnInfo, QueryResult, StructuredError};
use crate::db::schema::{Collation, DbConfig, ObjectRef, Variable};
use crate::error::ClientError;
use crate::logger::{dispatch, QueryLogger};
use crate::query::{Dialect, QueryState};

const DIALECT: Dialect = Dialect::Sqlite;

/// Pragmas reported by `get_variables`.
const VARIABLE_PRAGMAS: &[&str] = &[
    "application_id",
    "auto_vacuum",
    "busy_timeout",
    "cache_size",
    "encoding",
    "foreign_keys",
    "journal_mode",
    "page_size",
    "synchronous",
    "temp_store",
    "user_version",
    "wal_autocheckpoint",
];

pub struct SqliteClient {
    uid: String,
    config: ConnectionConfig,
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    /// Tab whose statement currently holds the connection.
    current_tab: Arc<Mutex<Option<String>>>,
    logger: Arc<dyn QueryLogger>,
}

impl SqliteClient {
    pub async fn open(params: ClientParams) -> Result<Self, ClientError> {
        let config = params.connection.clone();
        let path = config
            .path
            .clone()
            .ok_or_else(|| ClientError::Config("sqlite connections require a path".to_string()))?;

        let flags = if config.readonly {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::default()
        };

        let open_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || Connection::open_with_flags(open_path, flags))
            .await
            .map_err(|e| ClientError::Connection(format!("sqlite open task failed: {}", e)))?
            .map_err(|e| {
                ClientError::Connection(format!("Failed to open sqlite database {}: {}", path, e))
            })?;

        info!(uid = %params.uid, path = %path, readonly = config.readonly, "opened sqlite database");
        Ok(Self {
            uid: params.uid.clone(),
            logger: params.logger(),
            interrupt: Arc::new(conn.get_interrupt_handle()),
            conn: Arc::new(Mutex::new(conn)),
            current_tab: Arc::new(Mutex::new(None)),
            config,
        })
    }

    /// First column of every row.
    async fn first_column(&self, sql: &str) -> Result<Vec<CellValue>, ClientError> {
        let result = self.raw(sql, &QueryArgs::default()).await?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }
}

/// Clears the current tab when the statement finishes.
struct CurrentTab<'a>(&'a Mutex<Option<String>>);

impl<'a> CurrentTab<'a> {
    fn set(slot: &'a Mutex<Option<String>>, tab: Option<String>) -> Self {
        if let Ok(mut current) = slot.lock() {
            *current = tab;
        }
        CurrentTab(slot)
    }
}

impl Drop for CurrentTab<'_> {
    fn drop(&mut self) {
        if let Ok(mut current) = self.0.lock() {
            *current = None;
        }
    }
}

#[async_trait]
impl Client for SqliteClient {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn uid(&self) -> &str {
        &self.uid
    }

    fn get_sql(&self, state: &QueryState) -> Result<String, ClientError> {
        Ok(DIALECT.render(state)?)
    }

    async fn raw(&self, sql: &str, args: &QueryArgs) -> Result<QueryResult, ClientError> {
        dispatch(&*self.logger, sql, &self.uid);
        if let Some(schema) = &args.schema {
            debug!(schema = %schema, "sqlite has no session schema, ignoring");
        }

        let conn = Arc::clone(&self.conn);
        let current_tab = Arc::clone(&self.current_tab);
        let tab = args.tab_uid.clone();
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| ClientError::Connection("sqlite connection poisoned".to_string()))?;
            let _current = CurrentTab::set(&current_tab, tab);
            run_script(&conn, &sql)
        })
        .await
        .map_err(|e| ClientError::Connection(format!("sqlite task failed: {}", e)))?
    }

    async fn get_db_config(&self) -> Result<DbConfig, ClientError> {
        Ok(DbConfig {
            engine: Engine::Sqlite,
            host: None,
            port: None,
            database: "main".to_string(),
            username: None,
            path: self.config.path.clone(),
            server_version: Some(rusqlite::version().to_string()),
            readonly: self.config.readonly,
        })
    }

    async fn drop_schema(&self, name: &str) -> Result<(), ClientError> {
        self.raw(&format!("DETACH DATABASE {}", DIALECT.quote(name)), &QueryArgs::default())
            .await
            .map(|_| ())
    }

    async fn get_table_ddl(&self, table: &ObjectRef) -> Result<String, ClientError> {
        let schema = if table.schema.is_empty() {
            "main"
        } else {
            table.schema.as_str()
        };
        let sql = format!(
            "SELECT sql FROM {}.sqlite_master WHERE type IN ('table', 'view') AND name = {}",
            DIALECT.quote(schema),
            DIALECT.string_literal(&table.name)
        );
        match self.first_column(&sql).await?.into_iter().next() {
            Some(CellValue::Text(ddl)) => Ok(format!("{};\n", ddl)),
            _ => Err(ClientError::Execution(StructuredError::from_string(format!(
                "table {}.{} does not exist",
                schema, table.name
            )))),
        }
    }

    async fn get_collations(&self) -> Result<Vec<Collation>, ClientError> {
        let result = self
            .raw("PRAGMA collation_list", &QueryArgs::default())
            .await?;
        let name_idx = result.column_index("name").unwrap_or(1);
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.get(name_idx))
            .map(|cell| {
                let name = cell.display();
                Collation {
                    is_default: name.eq_ignore_ascii_case("BINARY"),
                    charset: None,
                    name,
                }
            })
            .collect())
    }

    async fn get_variables(&self) -> Result<Vec<Variable>, ClientError> {
        let mut variables = Vec::with_capacity(VARIABLE_PRAGMAS.len());
        for pragma in VARIABLE_PRAGMAS {
            let value = self
                .first_column(&format!("PRAGMA {}", pragma))
                .await?
                .into_iter()
                .next()
                .map(|cell| cell.display())
                .unwrap_or_default();
            variables.push(Variable {
                name: pragma.to_string(),
                value,
                description: None,
            });
        }
        Ok(variables)
    }

    async fn kill_tab_query(&self, tab_uid: &str) -> Result<(), ClientError> {
        // hold the slot so no other tab's statement can start before the interrupt
        let current = self
            .current_tab
            .lock()
            .map_err(|_| ClientError::Connection("sqlite tab registry poisoned".to_string()))?;
        if current.as_deref() != Some(tab_uid) {
            return Err(ClientError::NoRunningQuery(tab_uid.to_string()));
        }
        debug!(tab_uid, "interrupting sqlite statement");
        self.interrupt.interrupt();
        Ok(())
    }
}

/// Run every statement of `sql` in order and return the result of the last
/// one. Execution stops at the first failing statement.
fn run_script(conn: &Connection, sql: &str) -> Result<QueryResult, ClientError> {
    let start = Instant::now();
    let sql = sql.trim();
    let to_error =
        |e: rusqlite::Error| ClientError::Execution(StructuredError::from_sqlite_error(&e, sql));

    let mut batch = Batch::new(conn, sql);
    let mut last = None;
    while let Some(mut stmt) = batch.next().map_err(to_error)? {
        last = Some(run_statement(&mut stmt).map_err(to_error)?);
    }

    let mut result = last.unwrap_or_else(QueryResult::empty);
    result.execution_time = start.elapsed();
    Ok(result)
}

fn run_statement(stmt: &mut Statement<'_>) -> rusqlite::Result<QueryResult> {
    let start = Instant::now();
    if stmt.column_count() == 0 {
        let affected = stmt.execute([])?;
        return Ok(QueryResult::affected(affected as u64, start.elapsed()));
    }

    let columns: Vec<ColumnInfo> = stmt
        .columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.decl_type().unwrap_or("")))
        .collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(cell_value(row.get_ref(i)?));
        }
        rows.push(values);
    }

    Ok(QueryResult::from_rows(columns, rows, start.elapsed()))
}

fn cell_value(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(i) => CellValue::Int64(i),
        ValueRef::Real(f) => CellValue::Float64(f),
        ValueRef::Text(t) => CellValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => CellValue::Bytes(b.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::ErrorCategory;
    use crate::logger::{CollectorSink, DefaultLogger};

    async fn memory_client() -> SqliteClient {
        SqliteClient::open(ClientParams::new("mem", ConnectionConfig::sqlite(":memory:")))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_raw_select_and_execute() {
        let client = memory_client().await;
        let args = QueryArgs::default();

        let created = client
            .raw("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL, data BLOB)", &args)
            .await
            .unwrap();
        assert_eq!(created.affected_rows, Some(0));

        let inserted = client
            .raw("INSERT INTO t (name, score, data) VALUES ('a', 1.5, X'00ff'), ('b', NULL, NULL)", &args)
            .await
            .unwrap();
        assert_eq!(inserted.affected_rows, Some(2));

        let result = client
            .raw("SELECT id, name, score, data FROM t ORDER BY id", &args)
            .await
            .unwrap();
        assert_eq!(result.row_count, 2);
        assert_eq!(result.columns[1].name, "name");
        assert_eq!(result.columns[1].type_name, "TEXT");
        assert_eq!(result.rows[0][0], CellValue::Int64(1));
        assert_eq!(result.rows[0][2], CellValue::Float64(1.5));
        assert_eq!(result.rows[0][3], CellValue::Bytes(vec![0x00, 0xff]));
        assert_eq!(result.rows[1][2], CellValue::Null);
    }

    #[tokio::test]
    async fn test_script_runs_every_statement() {
        let client = memory_client().await;
        let args = QueryArgs::default();

        let last = client
            .raw(
                "CREATE TABLE a (x INTEGER);\nINSERT INTO a VALUES (1);\nINSERT INTO a VALUES (2), (3);",
                &args,
            )
            .await
            .unwrap();
        assert_eq!(last.affected_rows, Some(2));

        let count = client.raw("SELECT count(*) FROM a", &args).await.unwrap();
        assert_eq!(count.rows, vec![vec![CellValue::Int64(3)]]);
    }

    #[tokio::test]
    async fn test_script_stops_at_first_failure() {
        let client = memory_client().await;
        let args = QueryArgs::default();

        let err = client
            .raw(
                "CREATE TABLE b (x INTEGER); INSERT INTO nope VALUES (1); INSERT INTO b VALUES (1)",
                &args,
            )
            .await
            .unwrap_err();
        assert!(err.structured().unwrap().message.contains("no such table"));

        let count = client.raw("SELECT count(*) FROM b", &args).await.unwrap();
        assert_eq!(count.rows, vec![vec![CellValue::Int64(0)]]);
    }

    #[tokio::test]
    async fn test_comment_only_script_is_empty_result() {
        let client = memory_client().await;
        let result = client
            .raw("-- nothing to do\n", &QueryArgs::default())
            .await
            .unwrap();
        assert!(result.columns.is_empty());
        assert_eq!(result.row_count, 0);
    }

    #[tokio::test]
    async fn test_kill_for_other_tab_leaves_statement_alone() {
        let client = memory_client().await;
        *client.current_tab.lock().unwrap() = Some("tab-a".to_string());
        assert!(matches!(
            client.kill_tab_query("tab-b").await,
            Err(ClientError::NoRunningQuery(_))
        ));
        assert_eq!(client.current_tab.lock().unwrap().as_deref(), Some("tab-a"));
    }

    #[tokio::test]
    async fn test_empty_select_keeps_columns() {
        let client = memory_client().await;
        let args = QueryArgs::default();
        client.raw("CREATE TABLE e (a INTEGER)", &args).await.unwrap();
        let result = client.raw("SELECT a FROM e", &args).await.unwrap();
        assert_eq!(result.row_count, 0);
        assert_eq!(result.columns.len(), 1);
        assert!(result.affected_rows.is_none());
    }

    #[tokio::test]
    async fn test_execution_error_is_structured() {
        let client = memory_client().await;
        let err = client
            .raw("SELECT * FROM nope", &QueryArgs::default())
            .await
            .unwrap_err();
        assert!(!err.is_not_implemented());
        let structured = err.structured().unwrap();
        assert_eq!(structured.category, ErrorCategory::Semantic);
        assert!(structured.message.contains("no such table"));
    }

    #[tokio::test]
    async fn test_raw_is_logged() {
        let sink = Arc::new(CollectorSink::new());
        let params = ClientParams::new("logged", ConnectionConfig::sqlite(":memory:"))
            .with_logger(DefaultLogger::new(Arc::clone(&sink)));
        let client = SqliteClient::open(params).await.unwrap();

        client
            .raw("SELECT 1 -- one\n", &QueryArgs::default())
            .await
            .unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sql, "SELECT 1");
        assert_eq!(entries[0].uid, "logged");
    }

    #[tokio::test]
    async fn test_table_ddl() {
        let client = memory_client().await;
        client
            .raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)", &QueryArgs::default())
            .await
            .unwrap();

        let ddl = client.get_table_ddl(&ObjectRef::new("", "users")).await.unwrap();
        assert_eq!(ddl, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);\n");

        let missing = client.get_table_ddl(&ObjectRef::new("main", "nope")).await;
        assert!(matches!(missing, Err(ClientError::Execution(_))));
    }

    #[tokio::test]
    async fn test_collations_and_variables() {
        let client = memory_client().await;

        let collations = client.get_collations().await.unwrap();
        assert!(collations.iter().any(|c| c.name == "NOCASE"));
        assert!(collations.iter().any(|c| c.name == "BINARY" && c.is_default));

        let variables = client.get_variables().await.unwrap();
        assert_eq!(variables.len(), VARIABLE_PRAGMAS.len());
        let encoding = variables.iter().find(|v| v.name == "encoding").unwrap();
        assert_eq!(encoding.value, "UTF-8");
    }

    #[tokio::test]
    async fn test_db_config() {
        let client = memory_client().await;
        let config = client.get_db_config().await.unwrap();
        assert_eq!(config.engine, Engine::Sqlite);
        assert_eq!(config.path.as_deref(), Some(":memory:"));
        assert!(config.server_version.is_some());
    }

    #[tokio::test]
    async fn test_unsupported_operations() {
        let client = memory_client().await;
        assert!(client
            .create_schema(&Default::default())
            .await
            .unwrap_err()
            .is_not_implemented());
        assert!(client
            .get_database_collation()
            .await
            .unwrap_err()
            .is_not_implemented());
    }

    #[tokio::test]
    async fn test_kill_without_running_query() {
        let client = memory_client().await;
        assert!(matches!(
            client.kill_tab_query("tab-1").await,
            Err(ClientError::NoRunningQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_kill_interrupts_running_statement() {
        let client = Arc::new(memory_client().await);
        let runner = Arc::clone(&client);
        let pending = tokio::spawn(async move {
            runner
                .raw(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                     SELECT count(*) FROM c",
                    &QueryArgs::default().tab("tab-1"),
                )
                .await
        });

        // an interrupt landing before the statement starts stepping is a no-op,
        // so keep interrupting until the statement gives up
        for _ in 0..500 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let _ = client.kill_tab_query("tab-1").await;
            if pending.is_finished() {
                break;
            }
        }
        assert!(pending.is_finished());

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.structured().unwrap().category, ErrorCategory::Execution);
    }

    #[tokio::test]
    async fn test_missing_path_is_config_error() {
        let config = ConnectionConfig {
            engine: Engine::Sqlite,
            ..Default::default()
        };
        let result = SqliteClient::open(ClientParams::new("x", config)).await;
        assert!(matches!(result, Err(ClientError::Config(_))));
    }
}
