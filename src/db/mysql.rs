//! MySQL and MariaDB adapter.
//!
//! Mirrors the PostgreSQL transport: one dedicated connection behind a mutex,
//! or a `mysql_async` pool when a pool size is configured. Statements use the
//! text protocol, so every value arrives as bytes and is decoded by column
//! type. Cancellation issues `KILL QUERY` from a separate connection.

use std::fmt::Write as _;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{Column, Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, Row, SslOpts, Value};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::db::client::{Client, QueryArgs, RunningQueries};
use crate::db::connection::{ClientParams, ConnectionConfig, Engine, SslMode};
use crate::db::query::{CellValue, ColumnInfo, QueryResult, StructuredError};
use crate::db::schema::{Collation, DbConfig, EventDefinition, ObjectRef, SchemaSpec, Variable};
use crate::db::tunnel::SshTunnel;
use crate::error::ClientError;
use crate::logger::{dispatch, QueryLogger};
use crate::query::{Dialect, QueryState};

const DIALECT: Dialect = Dialect::MySql;

/// Character set id MySQL reports for binary strings and blobs.
const BINARY_CHARSET: u16 = 63;

enum Transport {
    Direct(Mutex<Conn>),
    Pool(Pool),
}

/// A connection checked out for one statement.
enum MyConn<'a> {
    Direct(MutexGuard<'a, Conn>),
    Pooled(Conn),
}

impl Deref for MyConn<'_> {
    type Target = Conn;

    fn deref(&self) -> &Conn {
        match self {
            MyConn::Direct(conn) => conn,
            MyConn::Pooled(conn) => conn,
        }
    }
}

impl DerefMut for MyConn<'_> {
    fn deref_mut(&mut self) -> &mut Conn {
        match self {
            MyConn::Direct(conn) => conn,
            MyConn::Pooled(conn) => conn,
        }
    }
}

pub struct MySqlClient {
    uid: String,
    engine: Engine,
    config: ConnectionConfig,
    opts: Opts,
    transport: Transport,
    logger: Arc<dyn QueryLogger>,
    /// Server thread id of the connection running each tab's statement.
    running: RunningQueries<u32>,
    _tunnel: Option<SshTunnel>,
}

impl MySqlClient {
    pub async fn connect(params: ClientParams) -> Result<Self, ClientError> {
        let config = params.connection.clone();
        let timeout = config.connect_timeout();

        let (host, port, tunnel) = match &config.ssh {
            Some(ssh) => {
                let tunnel =
                    SshTunnel::open(ssh, &config.host, config.effective_port(), timeout).await?;
                ("127.0.0.1".to_string(), tunnel.local_port(), Some(tunnel))
            }
            None => (config.host.clone(), config.effective_port(), None),
        };

        let pool_size = params.effective_pool_size();
        let opts = build_opts(&config, &host, port, pool_size)?;
        let timed_out = |_| {
            ClientError::Connection(format!("Connection timed out after {}s", timeout.as_secs()))
        };
        let failed =
            |e: mysql_async::Error| ClientError::Connection(format!("Failed to connect to MySQL: {}", e));

        let transport = match pool_size {
            Some(_) => {
                let pool = Pool::new(opts.clone());
                // fail fast on bad credentials instead of at the first statement
                let conn = tokio::time::timeout(timeout, pool.get_conn())
                    .await
                    .map_err(timed_out)?
                    .map_err(failed)?;
                drop(conn);
                Transport::Pool(pool)
            }
            None => {
                let conn = tokio::time::timeout(timeout, Conn::new(opts.clone()))
                    .await
                    .map_err(timed_out)?
                    .map_err(failed)?;
                Transport::Direct(Mutex::new(conn))
            }
        };

        info!(uid = %params.uid, endpoint = %config.display_string(), "connected to MySQL");
        Ok(Self {
            uid: params.uid.clone(),
            engine: config.engine,
            logger: params.logger(),
            config,
            opts,
            transport,
            running: RunningQueries::new(),
            _tunnel: tunnel,
        })
    }

    async fn conn(&self) -> Result<MyConn<'_>, ClientError> {
        match &self.transport {
            Transport::Direct(conn) => Ok(MyConn::Direct(conn.lock().await)),
            Transport::Pool(pool) => pool
                .get_conn()
                .await
                .map(MyConn::Pooled)
                .map_err(|e| ClientError::Connection(format!("Failed to get pooled connection: {}", e))),
        }
    }

    async fn admin(&self, sql: &str) -> Result<(), ClientError> {
        self.raw(sql, &QueryArgs::default()).await.map(|_| ())
    }

    async fn query(&self, sql: &str) -> Result<QueryResult, ClientError> {
        self.raw(sql, &QueryArgs::default()).await
    }

    async fn scalar(&self, sql: &str) -> Result<String, ClientError> {
        self.query(sql)
            .await?
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(cell_text)
            .ok_or_else(|| {
                ClientError::Execution(StructuredError::from_string(format!(
                    "no value returned by {}",
                    sql
                )))
            })
    }

    async fn set_event_enabled(&self, event: &ObjectRef, enabled: bool) -> Result<(), ClientError> {
        self.admin(&format!(
            "ALTER EVENT {} {}",
            event.qualified(DIALECT),
            if enabled { "ENABLE" } else { "DISABLE" }
        ))
        .await
    }
}

#[async_trait]
impl Client for MySqlClient {
    fn engine(&self) -> Engine {
        self.engine
    }

    fn uid(&self) -> &str {
        &self.uid
    }

    fn get_sql(&self, state: &QueryState) -> Result<String, ClientError> {
        Ok(DIALECT.render(state)?)
    }

    async fn raw(&self, sql: &str, args: &QueryArgs) -> Result<QueryResult, ClientError> {
        dispatch(&*self.logger, sql, &self.uid);

        let mut conn = self.conn().await?;
        if let Some(schema) = &args.schema {
            let use_db = format!("USE {}", DIALECT.quote(schema));
            conn.query_drop(use_db.as_str())
                .await
                .map_err(|e| mysql_error(&e, &use_db))?;
        }

        let _running = args
            .tab_uid
            .as_deref()
            .map(|tab| self.running.register(tab, conn.id()));
        let result = execute_text(&mut conn, sql).await;

        if args.schema.is_some() && !self.config.database.is_empty() {
            let restore = format!("USE {}", DIALECT.quote(&self.config.database));
            if let Err(e) = conn.query_drop(restore.as_str()).await {
                warn!(error = %e, "failed to restore default database");
            }
        }
        result
    }

    async fn get_db_config(&self) -> Result<DbConfig, ClientError> {
        let version = self.scalar("SELECT VERSION()").await?;
        Ok(DbConfig {
            engine: self.engine,
            host: Some(self.config.host.clone()),
            port: Some(self.config.effective_port()),
            database: self.config.database.clone(),
            username: Some(self.config.username.clone()),
            path: None,
            server_version: Some(version),
            readonly: self.config.readonly,
        })
    }

    async fn create_schema(&self, spec: &SchemaSpec) -> Result<(), ClientError> {
        if spec.owner.is_some() {
            debug!(schema = %spec.name, "mysql databases have no owner, ignoring");
        }
        self.admin(&format!("CREATE DATABASE {}", DIALECT.quote(&spec.name)))
            .await
    }

    async fn drop_schema(&self, name: &str) -> Result<(), ClientError> {
        self.admin(&format!("DROP DATABASE {}", DIALECT.quote(name)))
            .await
    }

    async fn get_table_ddl(&self, table: &ObjectRef) -> Result<String, ClientError> {
        let result = self
            .query(&format!("SHOW CREATE TABLE {}", table.qualified(DIALECT)))
            .await?;
        let idx = result.column_index("Create Table").unwrap_or(1);
        result
            .rows
            .first()
            .and_then(|row| row.get(idx))
            .and_then(cell_text)
            .map(|ddl| format!("{};\n", ddl))
            .ok_or_else(|| {
                ClientError::Execution(StructuredError::from_string(format!(
                    "table {} does not exist",
                    table.name
                )))
            })
    }

    async fn get_database_collation(&self) -> Result<String, ClientError> {
        self.scalar("SELECT @@collation_database").await
    }

    async fn get_collations(&self) -> Result<Vec<Collation>, ClientError> {
        let result = self.query("SHOW COLLATION").await?;
        Ok(collations_from(&result))
    }

    async fn get_variables(&self) -> Result<Vec<Variable>, ClientError> {
        let result = self.query("SHOW VARIABLES").await?;
        let name_idx = result.column_index("Variable_name").unwrap_or(0);
        let value_idx = result.column_index("Value").unwrap_or(1);
        Ok(result
            .rows
            .iter()
            .map(|row| Variable {
                name: row.get(name_idx).and_then(cell_text).unwrap_or_default(),
                value: row.get(value_idx).and_then(cell_text).unwrap_or_default(),
                description: None,
            })
            .collect())
    }

    async fn get_event_info(&self, event: &ObjectRef) -> Result<EventDefinition, ClientError> {
        let schema = if event.schema.is_empty() {
            "DATABASE()".to_string()
        } else {
            DIALECT.string_literal(&event.schema)
        };
        let sql = format!(
            "SELECT EVENT_SCHEMA AS event_schema, EVENT_DEFINITION AS body, \
             EVENT_TYPE AS event_type, EXECUTE_AT AS execute_at, \
             INTERVAL_VALUE AS interval_value, INTERVAL_FIELD AS interval_field, \
             STARTS AS starts, ENDS AS ends, STATUS AS status, EVENT_COMMENT AS comment \
             FROM information_schema.EVENTS WHERE EVENT_SCHEMA = {} AND EVENT_NAME = {}",
            schema,
            DIALECT.string_literal(&event.name)
        );
        let result = self.query(&sql).await?;
        event_from(event, &result).ok_or_else(|| {
            ClientError::Execution(StructuredError::from_string(format!(
                "event {} does not exist",
                event.name
            )))
        })
    }

    async fn create_event(&self, def: &EventDefinition) -> Result<(), ClientError> {
        self.admin(&create_event_sql(def)).await
    }

    async fn alter_event(
        &self,
        original: &ObjectRef,
        def: &EventDefinition,
    ) -> Result<(), ClientError> {
        self.admin(&alter_event_sql(original, def)).await
    }

    async fn drop_event(&self, event: &ObjectRef) -> Result<(), ClientError> {
        self.admin(&format!("DROP EVENT {}", event.qualified(DIALECT)))
            .await
    }

    async fn enable_event(&self, event: &ObjectRef) -> Result<(), ClientError> {
        self.set_event_enabled(event, true).await
    }

    async fn disable_event(&self, event: &ObjectRef) -> Result<(), ClientError> {
        self.set_event_enabled(event, false).await
    }

    async fn kill_tab_query(&self, tab_uid: &str) -> Result<(), ClientError> {
        let thread_id = self
            .running
            .get(tab_uid)
            .ok_or_else(|| ClientError::NoRunningQuery(tab_uid.to_string()))?;
        debug!(tab_uid, thread_id, "killing running query");

        // the statement's own connection is busy, so the kill needs another one
        let sql = format!("KILL QUERY {}", thread_id);
        dispatch(&*self.logger, &sql, &self.uid);
        let mut killer = Conn::new(self.opts.clone())
            .await
            .map_err(|e| ClientError::Connection(format!("Failed to cancel query: {}", e)))?;
        let result = killer
            .query_drop(sql.as_str())
            .await
            .map_err(|e| mysql_error(&e, &sql));
        if let Err(e) = killer.disconnect().await {
            warn!(error = %e, "failed to close kill connection");
        }
        result
    }
}

fn build_opts(
    config: &ConnectionConfig,
    host: &str,
    port: u16,
    pool_size: Option<usize>,
) -> Result<Opts, ClientError> {
    let database = Some(config.database.clone()).filter(|db| !db.is_empty());
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(port)
        .user(Some(config.username.clone()))
        .pass(Some(config.password.clone()))
        .db_name(database)
        .ssl_opts(ssl_opts(config));

    if let Some(size) = pool_size {
        let constraints = PoolConstraints::new(1, size.max(1))
            .ok_or_else(|| ClientError::Config(format!("invalid pool size {}", size)))?;
        builder = builder.pool_opts(PoolOpts::default().with_constraints(constraints));
    }
    if config.readonly {
        builder = builder.init(vec!["SET SESSION TRANSACTION READ ONLY"]);
    }
    Ok(builder.into())
}

/// `Prefer` connects without TLS; the driver has no opportunistic mode.
fn ssl_opts(config: &ConnectionConfig) -> Option<SslOpts> {
    let opts = match config.ssl_mode {
        SslMode::Disable | SslMode::Prefer => return None,
        SslMode::Require => SslOpts::default()
            .with_danger_accept_invalid_certs(config.accept_invalid_certs)
            .with_danger_skip_domain_validation(config.accept_invalid_certs),
        SslMode::VerifyCa => SslOpts::default().with_danger_skip_domain_validation(true),
        SslMode::VerifyFull => SslOpts::default(),
    };
    Some(match &config.ca_cert_path {
        Some(path) => opts.with_root_certs(vec![PathBuf::from(path).into()]),
        None => opts,
    })
}

fn mysql_error(err: &mysql_async::Error, sql: &str) -> ClientError {
    ClientError::Execution(StructuredError::from_mysql_error(err, sql))
}

/// Run `sql` over the text protocol. For multi-statement text the first
/// result set is returned and the rest are drained.
async fn execute_text(conn: &mut Conn, sql: &str) -> Result<QueryResult, ClientError> {
    let start = Instant::now();
    let to_error = |e: mysql_async::Error| mysql_error(&e, sql);

    let result = conn.query_iter(sql).await.map_err(to_error)?;
    let columns = result.columns().filter(|columns| !columns.is_empty());
    let affected = result.affected_rows();
    let rows: Vec<Row> = result.collect_and_drop().await.map_err(to_error)?;

    let Some(columns) = columns else {
        return Ok(QueryResult::affected(affected, start.elapsed()));
    };
    let infos = columns
        .iter()
        .map(|col| ColumnInfo::new(col.name_str(), type_name(col.column_type())))
        .collect();
    let cells = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(i, col)| row.as_ref(i).map_or(CellValue::Null, |v| decode_value(v, col)))
                .collect()
        })
        .collect();
    Ok(QueryResult::from_rows(infos, cells, start.elapsed()))
}

/// `MYSQL_TYPE_NEWDECIMAL` -> `newdecimal`.
fn type_name(ty: ColumnType) -> String {
    format!("{:?}", ty)
        .trim_start_matches("MYSQL_TYPE_")
        .to_ascii_lowercase()
}

fn decode_value(value: &Value, column: &Column) -> CellValue {
    match value {
        Value::NULL => CellValue::Null,
        Value::Bytes(bytes) => decode_text(bytes, column),
        Value::Int(i) => CellValue::Int64(*i),
        Value::UInt(u) => i64::try_from(*u)
            .map(CellValue::Int64)
            .unwrap_or_else(|_| CellValue::Numeric(u.to_string())),
        Value::Float(f) => CellValue::Float32(*f),
        Value::Double(f) => CellValue::Float64(*f),
        Value::Date(year, month, day, hour, min, sec, micros) => {
            let date = NaiveDate::from_ymd_opt((*year).into(), (*month).into(), (*day).into());
            let datetime = date.and_then(|d| {
                d.and_hms_micro_opt((*hour).into(), (*min).into(), (*sec).into(), *micros)
            });
            match (column.column_type(), date, datetime) {
                (ColumnType::MYSQL_TYPE_DATE, Some(date), _) => CellValue::Date(date),
                (_, _, Some(datetime)) => CellValue::DateTime(datetime),
                // zero dates such as 0000-00-00
                _ => CellValue::Text(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, min, sec
                )),
            }
        }
        Value::Time(negative, days, hours, min, sec, micros) => {
            let time = NaiveTime::from_hms_micro_opt(
                (*hours).into(),
                (*min).into(),
                (*sec).into(),
                *micros,
            );
            match time {
                Some(time) if !*negative && *days == 0 => CellValue::Time(time),
                _ => {
                    let hours = u32::from(*hours) + days * 24;
                    let sign = if *negative { "-" } else { "" };
                    CellValue::Text(format!("{}{:02}:{:02}:{:02}", sign, hours, min, sec))
                }
            }
        }
    }
}

/// Text-protocol value, parsed according to the column type.
fn decode_text(bytes: &[u8], column: &Column) -> CellValue {
    let text = || String::from_utf8_lossy(bytes).into_owned();
    let parsed = |cell: Option<CellValue>| cell.unwrap_or_else(|| CellValue::Text(text()));

    match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => {
            let s = text();
            match s.parse::<i64>() {
                Ok(i) => CellValue::Int64(i),
                // unsigned BIGINT above i64::MAX
                Err(_) => CellValue::Numeric(s),
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT => parsed(text().parse().ok().map(CellValue::Float32)),
        ColumnType::MYSQL_TYPE_DOUBLE => parsed(text().parse().ok().map(CellValue::Float64)),
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            CellValue::Numeric(text())
        }
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => parsed(
            NaiveDate::parse_from_str(&text(), "%Y-%m-%d")
                .ok()
                .map(CellValue::Date),
        ),
        ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => parsed(
            NaiveDateTime::parse_from_str(&text(), "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(CellValue::DateTime),
        ),
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => parsed(
            NaiveTime::parse_from_str(&text(), "%H:%M:%S%.f")
                .ok()
                .map(CellValue::Time),
        ),
        ColumnType::MYSQL_TYPE_JSON => {
            parsed(serde_json::from_slice(bytes).ok().map(CellValue::Json))
        }
        ColumnType::MYSQL_TYPE_BIT => CellValue::Int64(
            bytes
                .iter()
                .fold(0i64, |acc, byte| (acc << 8) | i64::from(*byte)),
        ),
        _ if column.character_set() == BINARY_CHARSET => CellValue::Bytes(bytes.to_vec()),
        _ => CellValue::Text(text()),
    }
}

fn cell_text(cell: &CellValue) -> Option<String> {
    match cell {
        CellValue::Null => None,
        other => Some(other.display()),
    }
}

fn collations_from(result: &QueryResult) -> Vec<Collation> {
    let name_idx = result.column_index("Collation").unwrap_or(0);
    let charset_idx = result.column_index("Charset").unwrap_or(1);
    let default_idx = result.column_index("Default").unwrap_or(3);
    result
        .rows
        .iter()
        .map(|row| Collation {
            name: row.get(name_idx).and_then(cell_text).unwrap_or_default(),
            charset: row.get(charset_idx).and_then(cell_text),
            is_default: row
                .get(default_idx)
                .and_then(cell_text)
                .is_some_and(|d| d.eq_ignore_ascii_case("yes")),
        })
        .collect()
}

/// Rebuild an event definition from an `information_schema.EVENTS` row.
fn event_from(event: &ObjectRef, result: &QueryResult) -> Option<EventDefinition> {
    let row = result.rows.first()?;
    let field = |name: &str| {
        result
            .column_index(name)
            .and_then(|i| row.get(i))
            .and_then(cell_text)
    };

    let schedule = if field("event_type").as_deref() == Some("ONE TIME") {
        format!(
            "AT {}",
            DIALECT.string_literal(&field("execute_at").unwrap_or_default())
        )
    } else {
        let mut schedule = format!(
            "EVERY {} {}",
            field("interval_value").unwrap_or_default(),
            field("interval_field").unwrap_or_default()
        );
        if let Some(starts) = field("starts") {
            let _ = write!(schedule, " STARTS {}", DIALECT.string_literal(&starts));
        }
        if let Some(ends) = field("ends") {
            let _ = write!(schedule, " ENDS {}", DIALECT.string_literal(&ends));
        }
        schedule
    };

    Some(EventDefinition {
        schema: field("event_schema").unwrap_or_else(|| event.schema.clone()),
        name: event.name.clone(),
        schedule,
        body: field("body").unwrap_or_default(),
        enabled: field("status").as_deref() == Some("ENABLED"),
        comment: field("comment").filter(|c| !c.is_empty()),
    })
}

fn event_ref(def: &EventDefinition) -> ObjectRef {
    ObjectRef::new(def.schema.clone(), def.name.clone())
}

fn create_event_sql(def: &EventDefinition) -> String {
    let mut sql = format!(
        "CREATE EVENT {} ON SCHEDULE {} {}",
        event_ref(def).qualified(DIALECT),
        def.schedule,
        if def.enabled { "ENABLE" } else { "DISABLE" }
    );
    if let Some(comment) = &def.comment {
        let _ = write!(sql, " COMMENT {}", DIALECT.string_literal(comment));
    }
    let _ = write!(sql, " DO {}", def.body.trim());
    sql
}

/// Renames when the definition names a different event; an unset schema
/// keeps the original one.
fn alter_event_sql(original: &ObjectRef, def: &EventDefinition) -> String {
    let mut target = event_ref(def);
    if target.schema.is_empty() {
        target.schema = original.schema.clone();
    }

    let mut sql = format!(
        "ALTER EVENT {} ON SCHEDULE {}",
        original.qualified(DIALECT),
        def.schedule
    );
    if target != *original {
        let _ = write!(sql, " RENAME TO {}", target.qualified(DIALECT));
    }
    let _ = write!(
        sql,
        " {} COMMENT {} DO {}",
        if def.enabled { "ENABLE" } else { "DISABLE" },
        DIALECT.string_literal(def.comment.as_deref().unwrap_or("")),
        def.body.trim()
    );
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn event() -> EventDefinition {
        EventDefinition {
            schema: "shop".into(),
            name: "purge_carts".into(),
            schedule: "EVERY 1 DAY".into(),
            body: "DELETE FROM carts WHERE updated_at < NOW() - INTERVAL 7 DAY;".into(),
            enabled: true,
            comment: Some("nightly cleanup".into()),
        }
    }

    #[test]
    fn test_create_event_sql() {
        assert_eq!(
            create_event_sql(&event()),
            "CREATE EVENT `shop`.`purge_carts` ON SCHEDULE EVERY 1 DAY ENABLE \
             COMMENT 'nightly cleanup' DO DELETE FROM carts WHERE updated_at < NOW() - INTERVAL 7 DAY;"
        );
    }

    #[test]
    fn test_alter_event_sql_renames_and_disables() {
        let mut def = event();
        def.schema.clear();
        def.name = "purge_old_carts".into();
        def.enabled = false;
        def.comment = None;
        let sql = alter_event_sql(&ObjectRef::new("shop", "purge_carts"), &def);
        assert!(sql.starts_with(
            "ALTER EVENT `shop`.`purge_carts` ON SCHEDULE EVERY 1 DAY \
             RENAME TO `shop`.`purge_old_carts` DISABLE COMMENT '' DO DELETE"
        ));
    }

    #[test]
    fn test_alter_event_sql_same_name_has_no_rename() {
        let sql = alter_event_sql(&ObjectRef::new("shop", "purge_carts"), &event());
        assert!(!sql.contains("RENAME"));
        assert!(sql.contains(" ENABLE COMMENT 'nightly cleanup' DO "));
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn event_result(row: Vec<CellValue>) -> QueryResult {
        let names = [
            "event_schema",
            "body",
            "event_type",
            "execute_at",
            "interval_value",
            "interval_field",
            "starts",
            "ends",
            "status",
            "comment",
        ];
        QueryResult::from_rows(
            names.iter().map(|n| ColumnInfo::new(*n, "var_string")).collect(),
            vec![row],
            Duration::ZERO,
        )
    }

    #[test]
    fn test_event_from_recurring_row() {
        let result = event_result(vec![
            text("shop"),
            text("DELETE FROM carts"),
            text("RECURRING"),
            CellValue::Null,
            text("1"),
            text("DAY"),
            text("2024-01-01 03:00:00"),
            CellValue::Null,
            text("DISABLED"),
            text(""),
        ]);
        let def = event_from(&ObjectRef::new("", "purge_carts"), &result).unwrap();
        assert_eq!(def.schema, "shop");
        assert_eq!(def.schedule, "EVERY 1 DAY STARTS '2024-01-01 03:00:00'");
        assert!(!def.enabled);
        assert_eq!(def.comment, None);
    }

    #[test]
    fn test_event_from_one_time_row() {
        let result = event_result(vec![
            text("shop"),
            text("CALL archive()"),
            text("ONE TIME"),
            text("2030-06-01 00:00:00"),
            CellValue::Null,
            CellValue::Null,
            CellValue::Null,
            CellValue::Null,
            text("ENABLED"),
            text("archive once"),
        ]);
        let def = event_from(&ObjectRef::new("shop", "archive"), &result).unwrap();
        assert_eq!(def.schedule, "AT '2030-06-01 00:00:00'");
        assert!(def.enabled);
        assert_eq!(def.comment.as_deref(), Some("archive once"));
    }

    #[test]
    fn test_event_from_empty_result() {
        let result = QueryResult::empty();
        assert!(event_from(&ObjectRef::new("", "x"), &result).is_none());
    }

    #[test]
    fn test_collations_from_show_collation() {
        let result = QueryResult::from_rows(
            ["Collation", "Charset", "Id", "Default"]
                .iter()
                .map(|n| ColumnInfo::new(*n, "var_string"))
                .collect(),
            vec![
                vec![text("utf8mb4_0900_ai_ci"), text("utf8mb4"), CellValue::Int64(255), text("Yes")],
                vec![text("utf8mb4_bin"), text("utf8mb4"), CellValue::Int64(46), text("")],
            ],
            Duration::ZERO,
        );
        let collations = collations_from(&result);
        assert_eq!(collations.len(), 2);
        assert!(collations[0].is_default);
        assert_eq!(collations[1].charset.as_deref(), Some("utf8mb4"));
        assert!(!collations[1].is_default);
    }

    #[test]
    fn test_type_name() {
        assert_eq!(type_name(ColumnType::MYSQL_TYPE_NEWDECIMAL), "newdecimal");
        assert_eq!(type_name(ColumnType::MYSQL_TYPE_VAR_STRING), "var_string");
    }

    #[test]
    fn test_ssl_opts_per_mode() {
        let mut config = ConnectionConfig {
            engine: Engine::MySql,
            ssl_mode: SslMode::Prefer,
            ..Default::default()
        };
        assert!(ssl_opts(&config).is_none());

        config.ssl_mode = SslMode::Require;
        config.accept_invalid_certs = true;
        let opts = ssl_opts(&config).unwrap();
        assert!(opts.accept_invalid_certs());
        assert!(opts.skip_domain_validation());

        config.ssl_mode = SslMode::VerifyFull;
        let opts = ssl_opts(&config).unwrap();
        assert!(!opts.accept_invalid_certs());
        assert!(!opts.skip_domain_validation());
    }

    #[tokio::test]
    async fn test_connect_refused_reports_connection_error() {
        let config = ConnectionConfig {
            engine: Engine::MySql,
            host: "127.0.0.1".into(),
            port: Some(1),
            ssl_mode: SslMode::Disable,
            connect_timeout_secs: 2,
            ..Default::default()
        };
        let result = MySqlClient::connect(ClientParams::new("t", config)).await;
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }
}
