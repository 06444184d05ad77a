//! The contract every engine adapter implements.
//!
//! [`Client`] covers SQL rendering, raw execution and the administrative
//! capability set. Every method has a default that fails with
//! [`ClientError::NotImplemented`], so an adapter overrides exactly the subset
//! its engine supports and callers can tell "unsupported here" apart from a
//! runtime failure.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::db::connection::{ClientParams, Engine};
use crate::db::mysql::MySqlClient;
use crate::db::postgres::PostgresClient;
use crate::db::query::QueryResult;
use crate::db::schema::{
    Collation, DbConfig, EventDefinition, ObjectRef, RoutineDefinition, SchemaChange, SchemaSpec,
    TriggerRef, Variable,
};
use crate::db::sqlite::SqliteClient;
use crate::error::ClientError;
use crate::query::{QueryBuilder, QueryState};

/// Per-execution arguments passed through to the adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryArgs {
    /// Namespace to switch to before running the statement.
    pub schema: Option<String>,
    /// Registers the statement so `kill_tab_query` can cancel it.
    pub tab_uid: Option<String>,
}

impl QueryArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn tab(mut self, tab_uid: impl Into<String>) -> Self {
        self.tab_uid = Some(tab_uid.into());
        self
    }
}

/// Operations of the client contract, used to report missing capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    GetSql,
    Raw,
    GetDbConfig,
    CreateSchema,
    AlterSchema,
    DropSchema,
    GetTableDdl,
    GetDatabaseCollation,
    GetCollations,
    GetVariables,
    GetFunctionInfo,
    CreateFunction,
    AlterFunction,
    DropFunction,
    CreateTriggerFunction,
    AlterTriggerFunction,
    GetRoutineInfo,
    CreateRoutine,
    AlterRoutine,
    DropRoutine,
    GetEventInfo,
    CreateEvent,
    AlterEvent,
    DropEvent,
    EnableEvent,
    DisableEvent,
    EnableTrigger,
    DisableTrigger,
    KillTabQuery,
}

impl Capability {
    pub const ALL: [Capability; 29] = [
        Capability::GetSql,
        Capability::Raw,
        Capability::GetDbConfig,
        Capability::CreateSchema,
        Capability::AlterSchema,
        Capability::DropSchema,
        Capability::GetTableDdl,
        Capability::GetDatabaseCollation,
        Capability::GetCollations,
        Capability::GetVariables,
        Capability::GetFunctionInfo,
        Capability::CreateFunction,
        Capability::AlterFunction,
        Capability::DropFunction,
        Capability::CreateTriggerFunction,
        Capability::AlterTriggerFunction,
        Capability::GetRoutineInfo,
        Capability::CreateRoutine,
        Capability::AlterRoutine,
        Capability::DropRoutine,
        Capability::GetEventInfo,
        Capability::CreateEvent,
        Capability::AlterEvent,
        Capability::DropEvent,
        Capability::EnableEvent,
        Capability::DisableEvent,
        Capability::EnableTrigger,
        Capability::DisableTrigger,
        Capability::KillTabQuery,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::GetSql => "get_sql",
            Capability::Raw => "raw",
            Capability::GetDbConfig => "get_db_config",
            Capability::CreateSchema => "create_schema",
            Capability::AlterSchema => "alter_schema",
            Capability::DropSchema => "drop_schema",
            Capability::GetTableDdl => "get_table_ddl",
            Capability::GetDatabaseCollation => "get_database_collation",
            Capability::GetCollations => "get_collations",
            Capability::GetVariables => "get_variables",
            Capability::GetFunctionInfo => "get_function_info",
            Capability::CreateFunction => "create_function",
            Capability::AlterFunction => "alter_function",
            Capability::DropFunction => "drop_function",
            Capability::CreateTriggerFunction => "create_trigger_function",
            Capability::AlterTriggerFunction => "alter_trigger_function",
            Capability::GetRoutineInfo => "get_routine_info",
            Capability::CreateRoutine => "create_routine",
            Capability::AlterRoutine => "alter_routine",
            Capability::DropRoutine => "drop_routine",
            Capability::GetEventInfo => "get_event_info",
            Capability::CreateEvent => "create_event",
            Capability::AlterEvent => "alter_event",
            Capability::DropEvent => "drop_event",
            Capability::EnableEvent => "enable_event",
            Capability::DisableEvent => "disable_event",
            Capability::EnableTrigger => "enable_trigger",
            Capability::DisableTrigger => "disable_trigger",
            Capability::KillTabQuery => "kill_tab_query",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn not_implemented(engine: Engine, capability: Capability) -> ClientError {
    ClientError::NotImplemented { capability, engine }
}

#[async_trait]
pub trait Client: Send + Sync {
    fn engine(&self) -> Engine;

    /// Correlation id of this client, passed to the query logger.
    fn uid(&self) -> &str;

    /// Render the state into SQL for this engine.
    fn get_sql(&self, _state: &QueryState) -> Result<String, ClientError> {
        Err(not_implemented(self.engine(), Capability::GetSql))
    }

    /// Execute SQL through the bound transport.
    async fn raw(&self, _sql: &str, _args: &QueryArgs) -> Result<QueryResult, ClientError> {
        Err(not_implemented(self.engine(), Capability::Raw))
    }

    async fn get_db_config(&self) -> Result<DbConfig, ClientError> {
        Err(not_implemented(self.engine(), Capability::GetDbConfig))
    }

    async fn create_schema(&self, _spec: &SchemaSpec) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::CreateSchema))
    }

    async fn alter_schema(&self, _change: &SchemaChange) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::AlterSchema))
    }

    async fn drop_schema(&self, _name: &str) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::DropSchema))
    }

    async fn get_table_ddl(&self, _table: &ObjectRef) -> Result<String, ClientError> {
        Err(not_implemented(self.engine(), Capability::GetTableDdl))
    }

    async fn get_database_collation(&self) -> Result<String, ClientError> {
        Err(not_implemented(self.engine(), Capability::GetDatabaseCollation))
    }

    async fn get_collations(&self) -> Result<Vec<Collation>, ClientError> {
        Err(not_implemented(self.engine(), Capability::GetCollations))
    }

    async fn get_variables(&self) -> Result<Vec<Variable>, ClientError> {
        Err(not_implemented(self.engine(), Capability::GetVariables))
    }

    async fn get_function_info(&self, _function: &ObjectRef) -> Result<RoutineDefinition, ClientError> {
        Err(not_implemented(self.engine(), Capability::GetFunctionInfo))
    }

    async fn create_function(&self, _def: &RoutineDefinition) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::CreateFunction))
    }

    async fn alter_function(
        &self,
        _original: &ObjectRef,
        _def: &RoutineDefinition,
    ) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::AlterFunction))
    }

    async fn drop_function(&self, _function: &ObjectRef) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::DropFunction))
    }

    async fn create_trigger_function(&self, _def: &RoutineDefinition) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::CreateTriggerFunction))
    }

    async fn alter_trigger_function(
        &self,
        _original: &ObjectRef,
        _def: &RoutineDefinition,
    ) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::AlterTriggerFunction))
    }

    async fn get_routine_info(&self, _routine: &ObjectRef) -> Result<RoutineDefinition, ClientError> {
        Err(not_implemented(self.engine(), Capability::GetRoutineInfo))
    }

    async fn create_routine(&self, _def: &RoutineDefinition) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::CreateRoutine))
    }

    async fn alter_routine(
        &self,
        _original: &ObjectRef,
        _def: &RoutineDefinition,
    ) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::AlterRoutine))
    }

    async fn drop_routine(&self, _routine: &ObjectRef) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::DropRoutine))
    }

    async fn get_event_info(&self, _event: &ObjectRef) -> Result<EventDefinition, ClientError> {
        Err(not_implemented(self.engine(), Capability::GetEventInfo))
    }

    async fn create_event(&self, _def: &EventDefinition) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::CreateEvent))
    }

    async fn alter_event(
        &self,
        _original: &ObjectRef,
        _def: &EventDefinition,
    ) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::AlterEvent))
    }

    async fn drop_event(&self, _event: &ObjectRef) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::DropEvent))
    }

    async fn enable_event(&self, _event: &ObjectRef) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::EnableEvent))
    }

    async fn disable_event(&self, _event: &ObjectRef) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::DisableEvent))
    }

    async fn enable_trigger(&self, _trigger: &TriggerRef) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::EnableTrigger))
    }

    async fn disable_trigger(&self, _trigger: &TriggerRef) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::DisableTrigger))
    }

    /// Cancel the statement currently running for `tab_uid`.
    async fn kill_tab_query(&self, _tab_uid: &str) -> Result<(), ClientError> {
        Err(not_implemented(self.engine(), Capability::KillTabQuery))
    }
}

/// Open a client for the configured engine.
pub async fn connect(params: ClientParams) -> Result<Arc<dyn Client>, ClientError> {
    match params.engine() {
        Engine::Postgres => Ok(Arc::new(PostgresClient::connect(params).await?)),
        Engine::Sqlite => Ok(Arc::new(SqliteClient::open(params).await?)),
        Engine::MySql | Engine::Maria => Ok(Arc::new(MySqlClient::connect(params).await?)),
    }
}

/// Open a client and wrap it in a fresh builder.
pub async fn builder(params: ClientParams) -> Result<QueryBuilder, ClientError> {
    Ok(QueryBuilder::new(connect(params).await?))
}

/// Renders SQL for an engine without any transport behind it.
#[derive(Debug, Clone)]
pub struct RenderOnlyClient {
    engine: Engine,
    uid: String,
}

impl RenderOnlyClient {
    pub fn new(engine: Engine, uid: impl Into<String>) -> Self {
        Self {
            engine,
            uid: uid.into(),
        }
    }
}

impl Client for RenderOnlyClient {
    fn engine(&self) -> Engine {
        self.engine
    }

    fn uid(&self) -> &str {
        &self.uid
    }

    fn get_sql(&self, state: &QueryState) -> Result<String, ClientError> {
        Ok(self.engine.dialect().render(state)?)
    }
}

/// In-flight statements keyed by tab id, holding whatever the engine needs
/// to cancel them.
#[derive(Debug)]
pub(crate) struct RunningQueries<T> {
    next_id: AtomicU64,
    entries: Mutex<HashMap<String, (u64, T)>>,
}

impl<T: Clone> RunningQueries<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a statement; it is removed again when the guard drops.
    pub(crate) fn register(&self, tab_uid: &str, token: T) -> RunningQueryGuard<'_, T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(tab_uid.to_string(), (id, token));
        }
        RunningQueryGuard {
            registry: self,
            tab_uid: tab_uid.to_string(),
            id,
        }
    }

    pub(crate) fn get(&self, tab_uid: &str) -> Option<T> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(tab_uid).map(|(_, token)| token.clone()))
    }

    fn remove(&self, tab_uid: &str, id: u64) {
        if let Ok(mut entries) = self.entries.lock() {
            // a newer statement on the same tab replaced this entry
            if entries.get(tab_uid).map(|(current, _)| *current) == Some(id) {
                entries.remove(tab_uid);
            }
        }
    }
}

pub(crate) struct RunningQueryGuard<'a, T: Clone> {
    registry: &'a RunningQueries<T>,
    tab_uid: String,
    id: u64,
}

impl<T: Clone> Drop for RunningQueryGuard<'_, T> {
    fn drop(&mut self) {
        self.registry.remove(&self.tab_uid, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    impl Client for Bare {
        fn engine(&self) -> Engine {
            Engine::MySql
        }

        fn uid(&self) -> &str {
            "bare"
        }
    }

    #[test]
    fn test_bare_get_sql_is_not_implemented() {
        let err = Bare.get_sql(&QueryState::default()).unwrap_err();
        assert!(err.is_not_implemented());
    }

    #[tokio::test]
    async fn test_bare_contract_defaults() {
        let bare = Bare;
        let obj = ObjectRef::new("s", "f");
        let def = RoutineDefinition::default();
        let event = EventDefinition::default();
        let trigger = TriggerRef::default();

        let results = vec![
            bare.raw("SELECT 1", &QueryArgs::default()).await.map(|_| ()),
            bare.get_db_config().await.map(|_| ()),
            bare.create_schema(&SchemaSpec::default()).await,
            bare.alter_schema(&SchemaChange::default()).await,
            bare.drop_schema("s").await,
            bare.get_table_ddl(&obj).await.map(|_| ()),
            bare.get_database_collation().await.map(|_| ()),
            bare.get_collations().await.map(|_| ()),
            bare.get_variables().await.map(|_| ()),
            bare.get_function_info(&obj).await.map(|_| ()),
            bare.create_function(&def).await,
            bare.alter_function(&obj, &def).await,
            bare.drop_function(&obj).await,
            bare.create_trigger_function(&def).await,
            bare.alter_trigger_function(&obj, &def).await,
            bare.get_routine_info(&obj).await.map(|_| ()),
            bare.create_routine(&def).await,
            bare.alter_routine(&obj, &def).await,
            bare.drop_routine(&obj).await,
            bare.get_event_info(&obj).await.map(|_| ()),
            bare.create_event(&event).await,
            bare.alter_event(&obj, &event).await,
            bare.drop_event(&obj).await,
            bare.enable_event(&obj).await,
            bare.disable_event(&obj).await,
            bare.enable_trigger(&trigger).await,
            bare.disable_trigger(&trigger).await,
            bare.kill_tab_query("tab").await,
        ];

        assert_eq!(results.len() + 1, Capability::ALL.len());
        for (result, expected) in results.into_iter().zip(Capability::ALL.iter().skip(1)) {
            match result {
                Err(ClientError::NotImplemented { capability, engine }) => {
                    assert_eq!(capability, *expected);
                    assert_eq!(engine, Engine::MySql);
                }
                other => panic!("expected NotImplemented for {}, got {:?}", expected, other),
            }
        }
    }

    #[tokio::test]
    async fn test_connect_maria_uses_mysql_transport() {
        let config = crate::db::ConnectionConfig {
            engine: Engine::Maria,
            host: "127.0.0.1".into(),
            port: Some(1),
            ssl_mode: crate::db::SslMode::Disable,
            connect_timeout_secs: 2,
            ..Default::default()
        };
        let err = connect(ClientParams::new("m", config)).await.err().unwrap();
        assert!(matches!(err, ClientError::Connection(_)), "got {:?}", err);
    }

    #[test]
    fn test_render_only_client_renders_mysql() {
        let client = RenderOnlyClient::new(Engine::MySql, "r");
        let mut state = QueryState::default();
        state.from = "t".into();
        state.limit = Some(1);
        assert_eq!(client.get_sql(&state).unwrap(), "SELECT * FROM `t` LIMIT 1");
    }

    #[test]
    fn test_running_queries_guard_removes_entry() {
        let registry = RunningQueries::<u32>::new();
        {
            let _guard = registry.register("tab", 7);
            assert_eq!(registry.get("tab"), Some(7));
        }
        assert_eq!(registry.get("tab"), None);
    }

    #[test]
    fn test_running_queries_keeps_newer_entry() {
        let registry = RunningQueries::<u32>::new();
        let first = registry.register("tab", 1);
        let _second = registry.register("tab", 2);
        drop(first);
        assert_eq!(registry.get("tab"), Some(2));
    }
}
