//! Objects exchanged through the administrative operations of a client.

use serde::{Deserialize, Serialize};

use crate::db::connection::Engine;
use crate::query::Dialect;

/// Connection and server details reported by `get_db_config`.
#[derive(Debug, Clone, Serialize)]
pub struct DbConfig {
    pub engine: Engine,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: String,
    pub username: Option<String>,
    pub path: Option<String>,
    pub server_version: Option<String>,
    pub readonly: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaSpec {
    pub name: String,
    pub owner: Option<String>,
}

/// Requested changes to an existing schema; unset fields stay as they are.
#[derive(Debug, Clone, Default)]
pub struct SchemaChange {
    pub name: String,
    pub new_name: Option<String>,
    pub new_owner: Option<String>,
}

/// A schema-qualified object such as a function, procedure or event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectRef {
    pub schema: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Quoted `schema.name`, or just `name` when no schema is set.
    pub fn qualified(&self, dialect: Dialect) -> String {
        if self.schema.is_empty() {
            dialect.quote(&self.name)
        } else {
            format!("{}.{}", dialect.quote(&self.schema), dialect.quote(&self.name))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerRef {
    pub schema: String,
    pub table: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collation {
    pub name: String,
    pub charset: Option<String>,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParameterMode {
    #[default]
    In,
    Out,
    InOut,
    Variadic,
}

impl ParameterMode {
    pub fn keyword(&self) -> &'static str {
        match self {
            ParameterMode::In => "IN",
            ParameterMode::Out => "OUT",
            ParameterMode::InOut => "INOUT",
            ParameterMode::Variadic => "VARIADIC",
        }
    }

    /// Parse the mode names used by `information_schema.parameters`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "OUT" => ParameterMode::Out,
            "INOUT" => ParameterMode::InOut,
            "VARIADIC" => ParameterMode::Variadic,
            _ => ParameterMode::In,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutineParameter {
    pub name: String,
    pub data_type: String,
    pub mode: ParameterMode,
}

/// A function, trigger function or procedure, as read back or to be created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutineDefinition {
    pub schema: String,
    pub name: String,
    pub parameters: Vec<RoutineParameter>,
    /// Return type; `None` for procedures.
    pub returns: Option<String>,
    pub language: String,
    pub body: String,
    pub security_definer: bool,
    pub comment: Option<String>,
}

impl RoutineDefinition {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.schema.clone(), self.name.clone())
    }
}

/// A scheduled event (MySQL family).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventDefinition {
    pub schema: String,
    pub name: String,
    /// Schedule clause, e.g. `EVERY 1 HOUR`.
    pub schedule: String,
    pub body: String,
    pub enabled: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ColumnDetails {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub default_value: Option<String>,
    pub ordinal_position: i32,
}

/// Assemble a `CREATE TABLE` statement from column metadata.
pub fn build_table_ddl(dialect: Dialect, table: &ObjectRef, columns: &[ColumnDetails]) -> String {
    let mut ddl = format!("CREATE TABLE {} (\n", table.qualified(dialect));

    for (i, col) in columns.iter().enumerate() {
        let null_str = if col.is_nullable { "" } else { " NOT NULL" };
        let default_str = col
            .default_value
            .as_ref()
            .map(|d| format!(" DEFAULT {}", d))
            .unwrap_or_default();
        let pk_str = if col.is_primary_key { " PRIMARY KEY" } else { "" };
        let comma = if i + 1 < columns.len() { "," } else { "" };

        ddl.push_str(&format!(
            "    {} {}{}{}{}{}\n",
            dialect.quote(&col.name),
            col.data_type,
            null_str,
            default_str,
            pk_str,
            comma
        ));
    }

    ddl.push_str(");\n");
    ddl
}
