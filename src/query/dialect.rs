//! SQL rendering for each engine family.
//!
//! A [`Dialect`] turns a [`QueryState`] into engine-native SQL text. The
//! families differ in identifier quoting, literal syntax and how an offset
//! without a limit is spelled; the clause layout is otherwise shared.

use std::fmt;
use std::fmt::Write as _;

use crate::error::RenderError;
use crate::query::state::{QueryState, StatementKind};
use crate::query::value::{InsertRow, SqlValue};

/// Largest row count MySQL accepts in `LIMIT`, used when only an offset is set.
const MYSQL_MAX_LIMIT: &str = "18446744073709551615";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// MySQL and MariaDB.
    MySql,
    Postgres,
    Sqlite,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::MySql => write!(f, "mysql"),
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl Dialect {
    fn quote_char(self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Postgres | Dialect::Sqlite => '"',
        }
    }

    /// Quote an identifier, doubling any embedded quote character.
    pub fn quote(self, ident: &str) -> String {
        let q = self.quote_char();
        let mut out = String::with_capacity(ident.len() + 2);
        out.push(q);
        for ch in ident.chars() {
            if ch == q {
                out.push(q);
            }
            out.push(ch);
        }
        out.push(q);
        out
    }

    /// Qualified, quoted table name for the state's schema and table.
    pub fn table_name(self, state: &QueryState) -> String {
        if state.schema().is_empty() {
            self.quote(state.from())
        } else {
            format!("{}.{}", self.quote(state.schema()), self.quote(state.from()))
        }
    }

    /// Quote a string literal.
    pub fn string_literal(self, s: &str) -> String {
        let escaped = match self {
            // MySQL treats backslash as an escape character inside literals
            Dialect::MySql => s.replace('\\', "\\\\").replace('\'', "''"),
            Dialect::Postgres | Dialect::Sqlite => s.replace('\'', "''"),
        };
        format!("'{}'", escaped)
    }

    /// Render a value as a literal of this dialect.
    pub fn literal(self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => match (self, b) {
                (Dialect::Postgres, true) => "TRUE".to_string(),
                (Dialect::Postgres, false) => "FALSE".to_string(),
                (_, true) => "1".to_string(),
                (_, false) => "0".to_string(),
            },
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) if f.is_finite() => f.to_string(),
            SqlValue::Float(f) => match self {
                Dialect::Postgres if f.is_nan() => "'NaN'".to_string(),
                Dialect::Postgres if *f > 0.0 => "'Infinity'".to_string(),
                Dialect::Postgres => "'-Infinity'".to_string(),
                _ => "NULL".to_string(),
            },
            SqlValue::Text(s) => self.string_literal(s),
            SqlValue::Bytes(bytes) => {
                let hex = bytes.iter().fold(String::new(), |mut acc, b| {
                    let _ = write!(acc, "{:02x}", b);
                    acc
                });
                match self {
                    Dialect::Postgres => format!("'\\x{}'::bytea", hex),
                    Dialect::MySql | Dialect::Sqlite => format!("X'{}'", hex),
                }
            }
            SqlValue::Raw(expr) => expr.clone(),
        }
    }

    /// Render the state into a single SQL statement.
    pub fn render(self, state: &QueryState) -> Result<String, RenderError> {
        match state.statement_kind()? {
            StatementKind::Select => self.render_select(state),
            StatementKind::Insert => self.render_insert(state),
            StatementKind::Update => self.render_update(state),
            StatementKind::Delete => self.render_delete(state),
        }
    }

    fn render_select(self, state: &QueryState) -> Result<String, RenderError> {
        if state.from().is_empty() && state.select().is_empty() {
            return Err(RenderError::EmptyQuery);
        }

        let columns = if state.select().is_empty() {
            "*".to_string()
        } else {
            state.select().join(", ")
        };

        let mut sql = format!("SELECT {}", columns);
        if !state.from().is_empty() {
            sql.push_str(" FROM ");
            sql.push_str(&self.table_name(state));
        }
        if !state.join().is_empty() {
            sql.push(' ');
            sql.push_str(&state.join().join(" "));
        }
        push_where(&mut sql, state);
        if !state.group_by().is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&state.group_by().join(", "));
        }
        if !state.order_by().is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&state.order_by().join(", "));
        }
        self.push_limit_offset(&mut sql, state.limit(), state.offset());
        Ok(sql)
    }

    fn push_limit_offset(self, sql: &mut String, limit: Option<u64>, offset: Option<u64>) {
        match (limit, offset) {
            (Some(limit), Some(offset)) => {
                let _ = write!(sql, " LIMIT {} OFFSET {}", limit, offset);
            }
            (Some(limit), None) => {
                let _ = write!(sql, " LIMIT {}", limit);
            }
            (None, Some(offset)) => {
                let _ = match self {
                    Dialect::Postgres => write!(sql, " OFFSET {}", offset),
                    Dialect::Sqlite => write!(sql, " LIMIT -1 OFFSET {}", offset),
                    Dialect::MySql => write!(sql, " LIMIT {} OFFSET {}", MYSQL_MAX_LIMIT, offset),
                };
            }
            (None, None) => {}
        }
    }

    fn render_insert(self, state: &QueryState) -> Result<String, RenderError> {
        let table = self.require_table(state, StatementKind::Insert)?;
        let rows = state.insert();
        let columns: Vec<&str> = rows[0].columns().collect();

        let mut values = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            values.push(self.render_row(i, row, &columns)?);
        }

        let quoted: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
        Ok(format!(
            "INSERT INTO {} ({}) VALUES {}",
            table,
            quoted.join(", "),
            values.join(", ")
        ))
    }

    fn render_row(self, index: usize, row: &InsertRow, columns: &[&str]) -> Result<String, RenderError> {
        if row.is_empty() {
            return Err(RenderError::EmptyInsertRow(index));
        }
        if row.len() != columns.len() {
            return Err(RenderError::InconsistentInsertRow(index));
        }
        let mut literals = Vec::with_capacity(columns.len());
        for column in columns {
            let value = row
                .get(column)
                .ok_or(RenderError::InconsistentInsertRow(index))?;
            literals.push(self.literal(value));
        }
        Ok(format!("({})", literals.join(", ")))
    }

    fn render_update(self, state: &QueryState) -> Result<String, RenderError> {
        let table = self.require_table(state, StatementKind::Update)?;
        let mut sql = format!("UPDATE {} SET {}", table, state.update().join(", "));
        push_where(&mut sql, state);
        Ok(sql)
    }

    fn render_delete(self, state: &QueryState) -> Result<String, RenderError> {
        let table = self.require_table(state, StatementKind::Delete)?;
        let mut sql = format!("DELETE FROM {}", table);
        push_where(&mut sql, state);
        Ok(sql)
    }

    fn require_table(self, state: &QueryState, kind: StatementKind) -> Result<String, RenderError> {
        if state.from().is_empty() {
            return Err(RenderError::MissingTable(kind));
        }
        Ok(self.table_name(state))
    }
}

fn push_where(sql: &mut String, state: &QueryState) {
    if !state.where_clauses().is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&state.where_clauses().join(" AND "));
    }
}
