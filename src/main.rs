use std::io::Read;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use polysql::config::AppConfig;
use polysql::db::{
    connect, ClientParams, ConnectionConfig, ConnectionStore, Engine, ObjectRef, QueryArgs,
};
use polysql::export::{self, ExportFormat};
use polysql::{Client, ClientError};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Run SQL and inspect databases through one interface for PostgreSQL and SQLite
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Use a saved connection by name
    #[arg(long = "connect", global = true)]
    connect: Option<String>,

    /// Database engine (pg, sqlite, mysql, maria)
    #[arg(long, global = true)]
    engine: Option<Engine>,

    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    #[arg(long, global = true)]
    database: Option<String>,

    #[arg(long = "user", global = true)]
    user: Option<String>,

    /// Database file for SQLite
    #[arg(long, global = true)]
    file: Option<String>,

    /// Open the connection read-only
    #[arg(long, global = true)]
    readonly: bool,

    #[arg(long = "pool-size", global = true)]
    pool_size: Option<usize>,

    #[arg(long, value_enum, default_value_t = ExportFormat::Table, global = true)]
    format: ExportFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a statement; `-` reads it from stdin
    Query {
        sql: String,
        /// Schema to run the statement in
        #[arg(long)]
        schema: Option<String>,
    },
    /// Print the CREATE TABLE statement of a table
    Ddl {
        table: String,
        #[arg(long)]
        schema: Option<String>,
    },
    /// List server variables
    Variables,
    /// List available collations
    Collations,
    /// List saved connections
    Connections,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app_config = AppConfig::load()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&app_config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store = ConnectionStore::default_location();

    if let Command::Connections = cli.command {
        let last = store.load_last();
        for c in store.load()? {
            let marker = if last.as_deref() == Some(c.name.as_str()) { "*" } else { " " };
            println!("{} {} ({}, {})", marker, c.name, c.engine, c.display_string());
        }
        return Ok(());
    }

    let connection = resolve_connection(&cli, &store)?;
    let connection_name = connection.name.clone();

    let mut params = ClientParams::new(format!("cli-{}", std::process::id()), connection);
    params.logger = Some(app_config.query_logger());
    if let Some(size) = cli.pool_size.or(app_config.pool_size) {
        params = params.with_pool_size(size);
    }

    let client = connect(params)
        .await
        .with_context(|| format!("Failed to connect to {}", connection_name))?;
    if cli.connect.is_some() {
        store.save_last(&connection_name)?;
    }

    if let Err(err) = run_command(&cli, client).await {
        let structured = err
            .downcast_ref::<ClientError>()
            .and_then(ClientError::structured);
        if let Some(structured) = structured {
            eprintln!("{}", structured.display_full());
            std::process::exit(1);
        }
        return Err(err);
    }
    Ok(())
}

async fn run_command(cli: &Cli, client: Arc<dyn Client>) -> Result<()> {
    match &cli.command {
        Command::Query { sql, schema } => {
            let sql = if sql == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("Failed to read SQL from stdin")?;
                buf
            } else {
                sql.clone()
            };
            let mut args = QueryArgs::new();
            if let Some(schema) = schema {
                args = args.schema(schema.clone());
            }
            let result = client.raw(&sql, &args).await?;
            debug!(elapsed = ?result.execution_time, rows = result.row_count, "query finished");
            print!("{}", export::render(&result, cli.format));
        }
        Command::Ddl { table, schema } => {
            let table = ObjectRef::new(schema.clone().unwrap_or_default(), table.clone());
            println!("{}", client.get_table_ddl(&table).await?);
        }
        Command::Variables => {
            for v in client.get_variables().await? {
                println!("{} = {}", v.name, v.value);
            }
        }
        Command::Collations => {
            for c in client.get_collations().await? {
                let marker = if c.is_default { " (default)" } else { "" };
                println!("{}{}", c.name, marker);
            }
        }
        Command::Connections => {}
    }
    Ok(())
}

/// Start from the saved connection (if any), then apply command-line flags.
fn resolve_connection(cli: &Cli, store: &ConnectionStore) -> Result<ConnectionConfig> {
    let mut config = match &cli.connect {
        Some(name) => match store.find(name)? {
            Some(c) => c,
            None => {
                let saved: Vec<String> = store.load()?.into_iter().map(|c| c.name).collect();
                bail!(
                    "no saved connection named {:?} (saved: {})",
                    name,
                    saved.join(", ")
                );
            }
        },
        None => match (&cli.file, cli.engine) {
            (Some(file), None | Some(Engine::Sqlite)) => ConnectionConfig::sqlite(file.clone()),
            _ => ConnectionConfig::default(),
        },
    };

    if let Some(engine) = cli.engine {
        config.engine = engine;
    }
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if cli.port.is_some() {
        config.port = cli.port;
    }
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if let Some(user) = &cli.user {
        config.username = user.clone();
    }
    if let Some(file) = &cli.file {
        config.path = Some(file.clone());
    }
    if cli.readonly {
        config.readonly = true;
    }

    if !config.engine.is_embedded() && config.password.is_empty() {
        let password_var = match config.engine {
            Engine::MySql | Engine::Maria => "MYSQL_PWD",
            _ => "PGPASSWORD",
        };
        if let Ok(pw) = std::env::var(password_var) {
            config.password = pw;
        } else {
            let prompt = format!("Password for {}: ", config.display_string());
            config.password = rpassword::read_password_from_tty(Some(&prompt))?;
        }
    }

    Ok(config)
}
