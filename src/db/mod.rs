pub mod client;
pub mod connection;
pub mod mysql;
pub mod postgres;
pub mod query;
pub mod schema;
pub mod sqlite;
pub mod tunnel;

pub use client::{builder, connect, Capability, Client, QueryArgs, RenderOnlyClient};
pub use connection::*;
pub use mysql::MySqlClient;
pub use postgres::PostgresClient;
pub use query::*;
pub use schema::*;
pub use sqlite::SqliteClient;
pub use tunnel::SshTunnel;
