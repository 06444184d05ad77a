//! PostgreSQL adapter.
//!
//! Statements run either on one dedicated connection (serialized behind a
//! mutex) or on a deadpool pool when a pool size is configured. Cancellation
//! goes through the backend cancel token of whichever connection is running
//! the tab's statement.

use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use postgres_native_tls::MakeTlsConnector;
use tokio::sync::{Mutex, MutexGuard};
use tokio_postgres::types::ToSql;
use tokio_postgres::{CancelToken, NoTls, Row};
use tracing::{debug, info, warn};

use crate::db::client::{Client, QueryArgs, RunningQueries};
use crate::db::connection::{build_tls_connector, ClientParams, ConnectionConfig, Engine, SslMode};
use crate::db::query::{execute_query, QueryResult, StructuredError};
use crate::db::schema::{
    build_table_ddl, Collation, ColumnDetails, DbConfig, ObjectRef, ParameterMode,
    RoutineDefinition, RoutineParameter, SchemaChange, SchemaSpec, TriggerRef, Variable,
};
use crate::db::tunnel::SshTunnel;
use crate::error::ClientError;
use crate::logger::{dispatch, QueryLogger};
use crate::query::{Dialect, QueryState};

const DIALECT: Dialect = Dialect::Postgres;

#[derive(Clone)]
enum Tls {
    Plain,
    Native(MakeTlsConnector),
}

enum Transport {
    Direct(Mutex<tokio_postgres::Client>),
    Pool(Pool),
}

/// A connection checked out for one statement.
enum Conn<'a> {
    Direct(MutexGuard<'a, tokio_postgres::Client>),
    Pooled(deadpool_postgres::Object),
}

impl Deref for Conn<'_> {
    type Target = tokio_postgres::Client;

    fn deref(&self) -> &Self::Target {
        match self {
            Conn::Direct(client) => client,
            Conn::Pooled(object) => object,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RoutineKind {
    Function,
    TriggerFunction,
    Procedure,
}

impl RoutineKind {
    fn keyword(self) -> &'static str {
        match self {
            RoutineKind::Function | RoutineKind::TriggerFunction => "FUNCTION",
            RoutineKind::Procedure => "PROCEDURE",
        }
    }

    /// `pg_proc.prokind` value.
    fn prokind(self) -> &'static str {
        match self {
            RoutineKind::Function | RoutineKind::TriggerFunction => "f",
            RoutineKind::Procedure => "p",
        }
    }
}

pub struct PostgresClient {
    uid: String,
    config: ConnectionConfig,
    transport: Transport,
    tls: Tls,
    logger: Arc<dyn QueryLogger>,
    running: RunningQueries<CancelToken>,
    _tunnel: Option<SshTunnel>,
}

impl PostgresClient {
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

        let mut pg_config: tokio_postgres::Config = config
            .connection_string_for(&host, port)
            .parse()
            .map_err(|e| ClientError::Config(format!("invalid connection parameters: {}", e)))?;
        if config.readonly {
            pg_config.options("-c default_transaction_read_only=on");
        }

        let tls = match config.ssl_mode {
            SslMode::Disable => Tls::Plain,
            SslMode::Prefer | SslMode::Require => Tls::Native(build_tls_connector(&config, false)?),
            SslMode::VerifyCa | SslMode::VerifyFull => {
                Tls::Native(build_tls_connector(&config, true)?)
            }
        };

        let transport = match params.effective_pool_size() {
            Some(size) => Transport::Pool(build_pool(pg_config, &tls, size, timeout).await?),
            None => Transport::Direct(Mutex::new(connect_direct(&pg_config, &tls, timeout).await?)),
        };

        info!(uid = %params.uid, endpoint = %config.display_string(), "connected to PostgreSQL");
        Ok(Self {
            uid: params.uid.clone(),
            logger: params.logger(),
            config,
            transport,
            tls,
            running: RunningQueries::new(),
            _tunnel: tunnel,
        })
    }

    async fn conn(&self) -> Result<Conn<'_>, ClientError> {
        match &self.transport {
            Transport::Direct(client) => Ok(Conn::Direct(client.lock().await)),
            Transport::Pool(pool) => Ok(Conn::Pooled(pool.get().await?)),
        }
    }

    /// Catalog query with bound parameters. Logged like every other statement.
    async fn query_rows(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, ClientError> {
        dispatch(&*self.logger, sql, &self.uid);
        let conn = self.conn().await?;
        conn.query(sql, params).await.map_err(|e| pg_error(&e, sql))
    }

    /// First column of the first row.
    async fn query_scalar(&self, sql: &str) -> Result<String, ClientError> {
        let rows = self.query_rows(sql, &[]).await?;
        let row = rows.first().ok_or_else(|| {
            ClientError::Execution(StructuredError::from_string(format!(
                "no rows returned by {}",
                sql
            )))
        })?;
        row.try_get(0).map_err(|e| pg_error(&e, sql))
    }

    /// Run a statement and discard its result.
    async fn admin(&self, sql: &str) -> Result<(), ClientError> {
        self.raw(sql, &QueryArgs::default()).await.map(|_| ())
    }

    /// Run several statements in one transaction.
    async fn transaction(&self, statements: &[String]) -> Result<(), ClientError> {
        let sql = format!("BEGIN;\n{};\nCOMMIT;", statements.join(";\n"));
        dispatch(&*self.logger, &sql, &self.uid);

        let conn = self.conn().await?;
        if let Err(e) = conn.batch_execute(&sql).await {
            if let Err(rollback) = conn.batch_execute("ROLLBACK").await {
                warn!(error = %rollback, "rollback after failed transaction failed");
            }
            return Err(pg_error(&e, &sql));
        }
        Ok(())
    }

    async fn column_details(&self, table: &ObjectRef) -> Result<Vec<ColumnDetails>, ClientError> {
        let rows = self
            .query_rows(
                r#"
                SELECT
                    c.column_name::text as name,
                    c.data_type::text as data_type,
                    c.is_nullable = 'YES' as is_nullable,
                    COALESCE(tc.constraint_type = 'PRIMARY KEY', false) as is_primary_key,
                    c.column_default::text as default_value,
                    c.ordinal_position::int4 as ordinal_position
                FROM information_schema.columns c
                LEFT JOIN information_schema.key_column_usage kcu
                    ON c.table_schema = kcu.table_schema
                    AND c.table_name = kcu.table_name
                    AND c.column_name = kcu.column_name
                LEFT JOIN information_schema.table_constraints tc
                    ON kcu.constraint_name = tc.constraint_name
                    AND kcu.table_schema = tc.table_schema
                    AND tc.constraint_type = 'PRIMARY KEY'
                WHERE c.table_schema::text = $1 AND c.table_name::text = $2
                ORDER BY c.ordinal_position
                "#,
                &[&table.schema, &table.name],
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ColumnDetails {
                    name: row.try_get("name")?,
                    data_type: row.try_get("data_type")?,
                    is_nullable: row.try_get("is_nullable")?,
                    is_primary_key: row.try_get("is_primary_key")?,
                    default_value: row.try_get("default_value")?,
                    ordinal_position: row.try_get("ordinal_position")?,
                })
            })
            .collect::<Result<_, tokio_postgres::Error>>()
            .map_err(|e| pg_error(&e, ""))
    }

    async fn routine_info(
        &self,
        object: &ObjectRef,
        kind: RoutineKind,
    ) -> Result<RoutineDefinition, ClientError> {
        let schema = schema_or_public(&object.schema);
        let row = self
            .query_rows(
                r#"
                SELECT
                    p.oid,
                    pg_get_function_result(p.oid) AS returns,
                    l.lanname AS language,
                    p.prosrc AS body,
                    p.prosecdef AS security_definer,
                    obj_description(p.oid, 'pg_proc') AS comment
                FROM pg_catalog.pg_proc p
                JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
                JOIN pg_catalog.pg_language l ON l.oid = p.prolang
                WHERE n.nspname = $1 AND p.proname = $2 AND p.prokind::text = $3
                ORDER BY p.oid
                LIMIT 1
                "#,
                &[&schema, &object.name, &kind.prokind()],
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ClientError::Execution(StructuredError::from_string(format!(
                    "{} {}.{} does not exist",
                    kind.keyword().to_lowercase(),
                    schema,
                    object.name
                )))
            })?;

        let oid: u32 = row.try_get("oid").map_err(|e| pg_error(&e, ""))?;
        let specific_name = format!("{}_{}", object.name, oid);
        let params = self
            .query_rows(
                r#"
                SELECT
                    COALESCE(parameter_name::text, '') AS name,
                    data_type::text AS data_type,
                    COALESCE(parameter_mode::text, 'IN') AS mode
                FROM information_schema.parameters
                WHERE specific_schema::text = $1 AND specific_name::text = $2
                ORDER BY ordinal_position
                "#,
                &[&schema, &specific_name],
            )
            .await?;

        let parameters = params
            .iter()
            .map(|p| {
                Ok(RoutineParameter {
                    name: p.try_get("name")?,
                    data_type: p.try_get("data_type")?,
                    mode: ParameterMode::parse(p.try_get("mode")?),
                })
            })
            .collect::<Result<_, tokio_postgres::Error>>()
            .map_err(|e| pg_error(&e, ""))?;

        let read = |e: tokio_postgres::Error| pg_error(&e, "");
        Ok(RoutineDefinition {
            schema: schema.to_string(),
            name: object.name.clone(),
            parameters,
            returns: row.try_get("returns").map_err(read)?,
            language: row.try_get("language").map_err(read)?,
            body: row.try_get("body").map_err(read)?,
            security_definer: row.try_get("security_definer").map_err(read)?,
            comment: row.try_get("comment").map_err(read)?,
        })
    }

    async fn replace_routine(
        &self,
        kind: RoutineKind,
        original: &ObjectRef,
        def: &RoutineDefinition,
    ) -> Result<(), ClientError> {
        let mut statements = vec![format!(
            "DROP {} {}",
            kind.keyword(),
            original.qualified(DIALECT)
        )];
        statements.extend(routine_statements(kind, def));
        self.transaction(&statements).await
    }

    async fn create_routine_of(
        &self,
        kind: RoutineKind,
        def: &RoutineDefinition,
    ) -> Result<(), ClientError> {
        let statements = routine_statements(kind, def);
        if statements.len() == 1 {
            self.admin(&statements[0]).await
        } else {
            self.transaction(&statements).await
        }
    }

    async fn set_trigger_enabled(&self, trigger: &TriggerRef, enabled: bool) -> Result<(), ClientError> {
        let table = ObjectRef::new(schema_or_public(&trigger.schema), trigger.table.clone());
        self.admin(&format!(
            "ALTER TABLE {} {} TRIGGER {}",
            table.qualified(DIALECT),
            if enabled { "ENABLE" } else { "DISABLE" },
            DIALECT.quote(&trigger.name)
        ))
        .await
    }
}

#[async_trait]
impl Client for PostgresClient {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn uid(&self) -> &str {
        &self.uid
    }

    fn get_sql(&self, state: &QueryState) -> Result<String, ClientError> {
        Ok(DIALECT.render(state)?)
    }

    async fn raw(&self, sql: &str, args: &QueryArgs) -> Result<QueryResult, ClientError> {
        dispatch(&*self.logger, sql, &self.uid);

        let conn = self.conn().await?;
        if let Some(schema) = &args.schema {
            let set = format!("SET search_path TO {}", DIALECT.quote(schema));
            conn.batch_execute(&set).await.map_err(|e| pg_error(&e, &set))?;
        }

        let _running = args
            .tab_uid
            .as_deref()
            .map(|tab| self.running.register(tab, conn.cancel_token()));
        let result = execute_query(&conn, sql).await;

        if args.schema.is_some() {
            if let Err(e) = conn.batch_execute("RESET search_path").await {
                warn!(error = %e, "failed to reset search_path");
            }
        }
        result
    }

    async fn get_db_config(&self) -> Result<DbConfig, ClientError> {
        let version = self.query_scalar("SHOW server_version").await?;

        Ok(DbConfig {
            engine: Engine::Postgres,
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
        let mut sql = format!("CREATE SCHEMA {}", DIALECT.quote(&spec.name));
        if let Some(owner) = &spec.owner {
            sql.push_str(&format!(" AUTHORIZATION {}", DIALECT.quote(owner)));
        }
        self.admin(&sql).await
    }

    async fn alter_schema(&self, change: &SchemaChange) -> Result<(), ClientError> {
        match alter_schema_statements(change).as_slice() {
            [] => Ok(()),
            [single] => self.admin(single).await,
            statements => self.transaction(statements).await,
        }
    }

    async fn drop_schema(&self, name: &str) -> Result<(), ClientError> {
        self.admin(&format!("DROP SCHEMA {} CASCADE", DIALECT.quote(name)))
            .await
    }

    async fn get_table_ddl(&self, table: &ObjectRef) -> Result<String, ClientError> {
        let table = ObjectRef::new(schema_or_public(&table.schema), table.name.clone());
        let columns = self.column_details(&table).await?;
        if columns.is_empty() {
            return Err(ClientError::Execution(StructuredError::from_string(format!(
                "table {}.{} does not exist",
                table.schema, table.name
            ))));
        }
        Ok(build_table_ddl(DIALECT, &table, &columns))
    }

    async fn get_database_collation(&self) -> Result<String, ClientError> {
        self.query_scalar("SELECT datcollate FROM pg_database WHERE datname = current_database()")
            .await
    }

    async fn get_collations(&self) -> Result<Vec<Collation>, ClientError> {
        let sql = r#"
            SELECT
                c.collname::text AS name,
                pg_encoding_to_char(c.collencoding) AS charset,
                c.collcollate = d.datcollate AS is_default
            FROM pg_catalog.pg_collation c
            CROSS JOIN (SELECT datcollate FROM pg_database WHERE datname = current_database()) d
            ORDER BY c.collname
        "#;
        let rows = self.query_rows(sql, &[]).await?;
        rows.iter()
            .map(|row| {
                let charset: String = row.try_get("charset")?;
                Ok(Collation {
                    name: row.try_get("name")?,
                    charset: Some(charset).filter(|c| !c.is_empty()),
                    is_default: row.try_get::<_, Option<bool>>("is_default")?.unwrap_or(false),
                })
            })
            .collect::<Result<_, tokio_postgres::Error>>()
            .map_err(|e| pg_error(&e, sql))
    }

    async fn get_variables(&self) -> Result<Vec<Variable>, ClientError> {
        let sql = "SELECT name, COALESCE(setting, '') AS setting, short_desc FROM pg_settings ORDER BY name";
        let rows = self.query_rows(sql, &[]).await?;
        rows.iter()
            .map(|row| {
                Ok(Variable {
                    name: row.try_get("name")?,
                    value: row.try_get("setting")?,
                    description: row.try_get("short_desc")?,
                })
            })
            .collect::<Result<_, tokio_postgres::Error>>()
            .map_err(|e| pg_error(&e, sql))
    }

    async fn get_function_info(&self, function: &ObjectRef) -> Result<RoutineDefinition, ClientError> {
        self.routine_info(function, RoutineKind::Function).await
    }

    async fn create_function(&self, def: &RoutineDefinition) -> Result<(), ClientError> {
        self.create_routine_of(RoutineKind::Function, def).await
    }

    async fn alter_function(
        &self,
        original: &ObjectRef,
        def: &RoutineDefinition,
    ) -> Result<(), ClientError> {
        self.replace_routine(RoutineKind::Function, original, def).await
    }

    async fn drop_function(&self, function: &ObjectRef) -> Result<(), ClientError> {
        self.admin(&format!("DROP FUNCTION {}", function.qualified(DIALECT)))
            .await
    }

    async fn create_trigger_function(&self, def: &RoutineDefinition) -> Result<(), ClientError> {
        self.create_routine_of(RoutineKind::TriggerFunction, def).await
    }

    async fn alter_trigger_function(
        &self,
        original: &ObjectRef,
        def: &RoutineDefinition,
    ) -> Result<(), ClientError> {
        self.replace_routine(RoutineKind::TriggerFunction, original, def)
            .await
    }

    async fn get_routine_info(&self, routine: &ObjectRef) -> Result<RoutineDefinition, ClientError> {
        self.routine_info(routine, RoutineKind::Procedure).await
    }

    async fn create_routine(&self, def: &RoutineDefinition) -> Result<(), ClientError> {
        self.create_routine_of(RoutineKind::Procedure, def).await
    }

    async fn alter_routine(
        &self,
        original: &ObjectRef,
        def: &RoutineDefinition,
    ) -> Result<(), ClientError> {
        self.replace_routine(RoutineKind::Procedure, original, def).await
    }

    async fn drop_routine(&self, routine: &ObjectRef) -> Result<(), ClientError> {
        self.admin(&format!("DROP PROCEDURE {}", routine.qualified(DIALECT)))
            .await
    }

    async fn enable_trigger(&self, trigger: &TriggerRef) -> Result<(), ClientError> {
        self.set_trigger_enabled(trigger, true).await
    }

    async fn disable_trigger(&self, trigger: &TriggerRef) -> Result<(), ClientError> {
        self.set_trigger_enabled(trigger, false).await
    }

    async fn kill_tab_query(&self, tab_uid: &str) -> Result<(), ClientError> {
        let token = self
            .running
            .get(tab_uid)
            .ok_or_else(|| ClientError::NoRunningQuery(tab_uid.to_string()))?;
        debug!(tab_uid, "cancelling running query");

        let result = match &self.tls {
            Tls::Plain => token.cancel_query(NoTls).await,
            Tls::Native(connector) => token.cancel_query(connector.clone()).await,
        };
        result.map_err(|e| ClientError::Connection(format!("Failed to cancel query: {}", e)))
    }
}

async fn connect_direct(
    pg_config: &tokio_postgres::Config,
    tls: &Tls,
    timeout: std::time::Duration,
) -> Result<tokio_postgres::Client, ClientError> {
    let timed_out = || {
        ClientError::Connection(format!(
            "Connection timed out after {}s",
            timeout.as_secs()
        ))
    };
    let failed = |e: tokio_postgres::Error| {
        ClientError::Connection(format!("Failed to connect to PostgreSQL: {}", e))
    };

    let client = match tls {
        Tls::Plain => {
            let (client, connection) = tokio::time::timeout(timeout, pg_config.connect(NoTls))
                .await
                .map_err(|_| timed_out())?
                .map_err(failed)?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(error = %e, "PostgreSQL connection error");
                }
            });
            client
        }
        Tls::Native(connector) => {
            let (client, connection) =
                tokio::time::timeout(timeout, pg_config.connect(connector.clone()))
                    .await
                    .map_err(|_| timed_out())?
                    .map_err(failed)?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(error = %e, "PostgreSQL connection error");
                }
            });
            client
        }
    };
    Ok(client)
}

async fn build_pool(
    pg_config: tokio_postgres::Config,
    tls: &Tls,
    size: usize,
    timeout: std::time::Duration,
) -> Result<Pool, ClientError> {
    let manager_config = ManagerConfig {
        // DISCARD ALL between checkouts
        recycling_method: RecyclingMethod::Clean,
    };
    let manager = match tls {
        Tls::Plain => Manager::from_config(pg_config, NoTls, manager_config),
        Tls::Native(connector) => Manager::from_config(pg_config, connector.clone(), manager_config),
    };

    let pool = Pool::builder(manager)
        .max_size(size.max(1))
        .runtime(Runtime::Tokio1)
        .create_timeout(Some(timeout))
        .wait_timeout(Some(timeout))
        .build()
        .map_err(|e| ClientError::Connection(format!("Failed to build connection pool: {}", e)))?;

    // fail fast on bad credentials instead of at the first statement
    drop(pool.get().await?);
    Ok(pool)
}

fn pg_error(err: &tokio_postgres::Error, sql: &str) -> ClientError {
    ClientError::Execution(StructuredError::from_pg_error(err, sql))
}

fn schema_or_public(schema: &str) -> &str {
    if schema.is_empty() {
        "public"
    } else {
        schema
    }
}

/// Owner change first, since it still addresses the schema by its old name.
fn alter_schema_statements(change: &SchemaChange) -> Vec<String> {
    let mut statements = Vec::new();
    let current = DIALECT.quote(&change.name);
    if let Some(owner) = &change.new_owner {
        statements.push(format!("ALTER SCHEMA {} OWNER TO {}", current, DIALECT.quote(owner)));
    }
    if let Some(new_name) = change.new_name.as_ref().filter(|n| **n != change.name) {
        statements.push(format!("ALTER SCHEMA {} RENAME TO {}", current, DIALECT.quote(new_name)));
    }
    statements
}

/// `CREATE` statement for a routine, followed by its comment when set.
fn routine_statements(kind: RoutineKind, def: &RoutineDefinition) -> Vec<String> {
    let object = ObjectRef::new(schema_or_public(&def.schema), def.name.clone());
    let params = def
        .parameters
        .iter()
        .map(|p| {
            if p.name.is_empty() {
                format!("{} {}", p.mode.keyword(), p.data_type)
            } else {
                format!("{} {} {}", p.mode.keyword(), DIALECT.quote(&p.name), p.data_type)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let returns = match kind {
        RoutineKind::Function => def
            .returns
            .as_deref()
            .map(|r| format!(" RETURNS {}", r))
            .unwrap_or_default(),
        RoutineKind::TriggerFunction => " RETURNS trigger".to_string(),
        RoutineKind::Procedure => String::new(),
    };
    let language = if def.language.is_empty() {
        "plpgsql"
    } else {
        def.language.as_str()
    };
    let security = if def.security_definer {
        " SECURITY DEFINER"
    } else {
        ""
    };

    let mut statements = vec![format!(
        "CREATE {} {}({}){} LANGUAGE {}{} AS $body$\n{}\n$body$",
        kind.keyword(),
        object.qualified(DIALECT),
        params,
        returns,
        language,
        security,
        def.body.trim()
    )];
    if let Some(comment) = &def.comment {
        statements.push(format!(
            "COMMENT ON {} {} IS {}",
            kind.keyword(),
            object.qualified(DIALECT),
            DIALECT.string_literal(comment)
        ));
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def() -> RoutineDefinition {
        RoutineDefinition {
            schema: String::new(),
            name: "add".into(),
            parameters: vec![
                RoutineParameter {
                    name: "a".into(),
                    data_type: "integer".into(),
                    mode: ParameterMode::In,
                },
                RoutineParameter {
                    name: String::new(),
                    data_type: "integer".into(),
                    mode: ParameterMode::In,
                },
            ],
            returns: Some("integer".into()),
            language: "sql".into(),
            body: "SELECT a + $2;".into(),
            security_definer: false,
            comment: None,
        }
    }

    #[test]
    fn test_function_statement() {
        let statements = routine_statements(RoutineKind::Function, &def());
        assert_eq!(
            statements,
            vec![
                "CREATE FUNCTION \"public\".\"add\"(IN \"a\" integer, IN integer) RETURNS integer \
                 LANGUAGE sql AS $body$\nSELECT a + $2;\n$body$"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_trigger_function_forces_return_type() {
        let mut d = def();
        d.parameters.clear();
        d.language.clear();
        d.returns = Some("integer".into());
        d.comment = Some("it's a trigger".into());
        let statements = routine_statements(RoutineKind::TriggerFunction, &d);
        assert!(statements[0].contains("() RETURNS trigger LANGUAGE plpgsql AS"));
        assert_eq!(
            statements[1],
            "COMMENT ON FUNCTION \"public\".\"add\" IS 'it''s a trigger'"
        );
    }

    #[test]
    fn test_procedure_has_no_return_clause() {
        let mut d = def();
        d.schema = "ops".into();
        d.security_definer = true;
        let statements = routine_statements(RoutineKind::Procedure, &d);
        assert!(statements[0].starts_with("CREATE PROCEDURE \"ops\".\"add\"("));
        assert!(!statements[0].contains("RETURNS"));
        assert!(statements[0].contains("LANGUAGE sql SECURITY DEFINER AS"));
    }

    #[test]
    fn test_alter_schema_statements() {
        let change = SchemaChange {
            name: "sales".into(),
            new_name: Some("sales_2024".into()),
            new_owner: Some("reporting".into()),
        };
        assert_eq!(
            alter_schema_statements(&change),
            vec![
                r#"ALTER SCHEMA "sales" OWNER TO "reporting""#.to_string(),
                r#"ALTER SCHEMA "sales" RENAME TO "sales_2024""#.to_string(),
            ]
        );

        let unchanged = SchemaChange {
            name: "sales".into(),
            new_name: Some("sales".into()),
            new_owner: None,
        };
        assert!(alter_schema_statements(&unchanged).is_empty());
    }

    #[test]
    fn test_prokind() {
        assert_eq!(RoutineKind::TriggerFunction.prokind(), "f");
        assert_eq!(RoutineKind::Procedure.prokind(), "p");
    }

    #[tokio::test]
    async fn test_connect_refused_reports_connection_error() {
        let config = ConnectionConfig {
            host: "127.0.0.1".into(),
            port: Some(1),
            ssl_mode: SslMode::Disable,
            connect_timeout_secs: 2,
            ..Default::default()
        };
        let result = PostgresClient::connect(ClientParams::new("t", config)).await;
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }
}
