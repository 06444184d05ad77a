//! Runs against a live MySQL or MariaDB server when `POLYSQL_TEST_MYSQL_HOST`
//! is set; every test returns early otherwise. The account needs the EVENT
//! privilege on the test database.

use std::sync::Arc;

use polysql::db::{
    ClientParams, ConnectionConfig, Engine, EventDefinition, MySqlClient, ObjectRef, QueryArgs,
    SslMode,
};
use polysql::logger::{CollectorSink, DefaultLogger};
use polysql::query::{InsertRow, QueryBuilder};
use polysql::{Capability, Client, ClientError};

fn config() -> Option<ConnectionConfig> {
    let host = std::env::var("POLYSQL_TEST_MYSQL_HOST").ok()?;
    Some(ConnectionConfig {
        engine: Engine::MySql,
        host,
        port: std::env::var("POLYSQL_TEST_MYSQL_PORT").ok().and_then(|p| p.parse().ok()),
        database: std::env::var("POLYSQL_TEST_MYSQL_DB").unwrap_or_else(|_| "test".into()),
        username: std::env::var("POLYSQL_TEST_MYSQL_USER").unwrap_or_else(|_| "root".into()),
        password: std::env::var("POLYSQL_TEST_MYSQL_PASSWORD").unwrap_or_default(),
        ssl_mode: SslMode::Disable,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_raw_and_builder_round_trip() {
    let Some(config) = config() else { return };
    let sink = Arc::new(CollectorSink::new());
    let params = ClientParams::new("my-flow", config)
        .with_logger(DefaultLogger::new(Arc::clone(&sink)));
    let client: Arc<dyn Client> = Arc::new(MySqlClient::connect(params).await.unwrap());
    let args = QueryArgs::default();

    client.raw("DROP TABLE IF EXISTS polysql_users", &args).await.unwrap();
    client
        .raw(
            "CREATE TABLE polysql_users (id INT PRIMARY KEY, name VARCHAR(40), score DECIMAL(6,2))",
            &args,
        )
        .await
        .unwrap();

    let mut qb = QueryBuilder::new(Arc::clone(&client));
    let inserted = qb
        .into_table("polysql_users")
        .insert([
            InsertRow::new().set("id", 1).set("name", "alice").set("score", 9.5),
            InsertRow::new().set("id", 2).set("name", "O'Hara").set("score", None::<f64>),
        ])
        .run(QueryArgs::default())
        .await
        .unwrap();
    assert_eq!(inserted.affected_rows, Some(2));

    let rows = client
        .raw("SELECT id, name, score FROM polysql_users ORDER BY id", &args)
        .await
        .unwrap();
    assert_eq!(rows.row_count, 2);
    assert_eq!(rows.cell(0, "id").map(|c| c.display()).as_deref(), Some("1"));
    assert_eq!(rows.cell(1, "name").map(|c| c.display()).as_deref(), Some("O'Hara"));

    let err = client.raw("SELECT * FROM polysql_missing", &args).await.unwrap_err();
    let structured = err.structured().unwrap();
    assert_eq!(structured.code, "1146");

    client.raw("DROP TABLE polysql_users", &args).await.unwrap();
    assert!(sink.entries().iter().all(|e| e.uid == "my-flow"));
}

#[tokio::test]
async fn test_event_lifecycle() {
    let Some(config) = config() else { return };
    let schema = config.database.clone();
    let client = MySqlClient::connect(ClientParams::new("my-events", config))
        .await
        .unwrap();

    let event = ObjectRef::new(schema.clone(), "polysql_tick");
    let _ = client.drop_event(&event).await;

    let def = EventDefinition {
        schema: schema.clone(),
        name: "polysql_tick".into(),
        schedule: "EVERY 1 HOUR".into(),
        body: "DO 1".into(),
        enabled: true,
        comment: Some("hourly".into()),
    };
    client.create_event(&def).await.unwrap();

    let info = client.get_event_info(&event).await.unwrap();
    assert!(info.schedule.starts_with("EVERY 1 HOUR"));
    assert!(info.enabled);
    assert_eq!(info.comment.as_deref(), Some("hourly"));

    client.disable_event(&event).await.unwrap();
    assert!(!client.get_event_info(&event).await.unwrap().enabled);
    client.enable_event(&event).await.unwrap();

    let renamed = EventDefinition {
        name: "polysql_tock".into(),
        comment: None,
        ..def
    };
    client.alter_event(&event, &renamed).await.unwrap();
    let moved = ObjectRef::new(schema, "polysql_tock");
    assert_eq!(client.get_event_info(&moved).await.unwrap().comment, None);

    client.drop_event(&moved).await.unwrap();
    assert!(client.get_event_info(&moved).await.is_err());
}

#[tokio::test]
async fn test_routines_are_not_implemented() {
    let Some(config) = config() else { return };
    let client = MySqlClient::connect(ClientParams::new("my-caps", config))
        .await
        .unwrap();
    let err = client
        .drop_routine(&ObjectRef::new("", "anything"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::NotImplemented {
            capability: Capability::DropRoutine,
            engine: Engine::MySql
        }
    ));
}
