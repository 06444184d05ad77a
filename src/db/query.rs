//! Statement results, engine diagnostics and PostgreSQL row decoding.

use std::error::Error as StdError;
use std::fmt;
use std::fmt::Write as _;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use tokio_postgres::error::{DbError, ErrorPosition};
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::{Client, Row};
use tracing::debug;
use unicode_width::UnicodeWidthStr;

use crate::error::ClientError;
use crate::query::SqlValue;

/// MySQL reports where a syntax error starts as "... at line N".
static MYSQL_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"at line (\d+)$").expect("unable to compile mysql line regex"));

/// Broad class of an engine failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed statement text
    Syntax,
    /// Unknown or ambiguous table, column or function
    Semantic,
    /// Runtime failure such as a constraint violation or division by zero
    Execution,
    /// Aborted or conflicting transaction state
    Transaction,
    Connection,
    #[default]
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Syntax => "Syntax Error",
            ErrorCategory::Semantic => "Semantic Error",
            ErrorCategory::Execution => "Execution Error",
            ErrorCategory::Transaction => "Transaction Error",
            ErrorCategory::Connection => "Connection Error",
            ErrorCategory::Unknown => "Error",
        };
        f.write_str(label)
    }
}

/// Engine-reported failure with as much diagnostic context as the engine gives.
#[derive(Debug, Clone, Default)]
pub struct StructuredError {
    pub category: ErrorCategory,
    /// ERROR, FATAL, ... as reported by the server
    pub severity: String,
    /// SQLSTATE for PostgreSQL, extended result code for SQLite
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// 1-based byte offset into the statement
    pub position: Option<u32>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub constraint: Option<String>,
    /// Server context (PL/pgSQL stack) or, for SQLite, the failing statement
    pub where_: Option<String>,
    pub line: Option<usize>,
    pub col: Option<usize>,
}

impl StructuredError {
    fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            severity: "ERROR".to_string(),
            message: message.into(),
            ..Default::default()
        }
    }

    /// A plain error without engine diagnostics.
    pub fn from_string(msg: String) -> Self {
        Self::new(ErrorCategory::Unknown, msg)
    }

    /// Convert a tokio-postgres error; `query` is used to turn the reported
    /// position into a line and column.
    pub fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Self {
        match err.as_db_error() {
            Some(db_err) => Self::from_db_error(db_err, query),
            None => {
                let category = if err.source().is_some() {
                    ErrorCategory::Connection
                } else {
                    ErrorCategory::Unknown
                };
                Self {
                    detail: err.source().map(|e| e.to_string()),
                    ..Self::new(category, err.to_string())
                }
            }
        }
    }

    fn from_db_error(db_err: &DbError, query: &str) -> Self {
        let code = db_err.code().code().to_string();
        let position = match db_err.position() {
            Some(ErrorPosition::Original(pos)) => Some(*pos),
            _ => None,
        };
        let (line, col) = match position {
            Some(pos) => line_col_at(query, pos as usize),
            None => (None, None),
        };
        let owned = |s: Option<&str>| s.map(str::to_string);

        Self {
            category: categorize_sqlstate(&code),
            severity: db_err.severity().to_string(),
            message: db_err.message().to_string(),
            detail: owned(db_err.detail()),
            hint: owned(db_err.hint()),
            position,
            schema: owned(db_err.schema()),
            table: owned(db_err.table()),
            column: owned(db_err.column()),
            constraint: owned(db_err.constraint()),
            where_: owned(db_err.where_()),
            line,
            col,
            code,
        }
    }

    /// Convert a rusqlite error, keeping the failing statement as context.
    pub fn from_sqlite_error(err: &rusqlite::Error, query: &str) -> Self {
        let mut structured = match err {
            rusqlite::Error::SqliteFailure(ffi_err, msg) => match msg {
                Some(msg) => Self::from_sqlite_code(ffi_err, msg),
                None => Self::from_sqlite_code(ffi_err, &ffi_err.to_string()),
            },
            // prepare failures; `offset` is a 0-based byte offset into `sql`
            rusqlite::Error::SqlInputError {
                error,
                msg,
                sql,
                offset,
            } => {
                let mut structured = Self::from_sqlite_code(error, msg);
                if let Ok(offset) = u32::try_from(*offset) {
                    structured.position = Some(offset + 1);
                    (structured.line, structured.col) = line_col_at(sql, offset as usize + 1);
                }
                structured
            }
            other => Self::from_string(other.to_string()),
        };
        if !query.is_empty() {
            structured.where_ = Some(query.to_string());
        }
        structured
    }

    /// Convert a mysql_async error. Server errors keep their numeric code,
    /// with the SQLSTATE in the detail.
    pub fn from_mysql_error(err: &mysql_async::Error, query: &str) -> Self {
        let mut structured = match err {
            mysql_async::Error::Server(server) => Self {
                code: server.code.to_string(),
                detail: Some(format!("SQLSTATE {}", server.state)),
                line: MYSQL_LINE_RE
                    .captures(&server.message)
                    .and_then(|caps| caps[1].parse().ok()),
                ..Self::new(
                    categorize_mysql(server.code, &server.state),
                    server.message.clone(),
                )
            },
            mysql_async::Error::Io(_) => Self::new(ErrorCategory::Connection, err.to_string()),
            other => Self::from_string(other.to_string()),
        };
        if !query.is_empty() {
            structured.where_ = Some(query.to_string());
        }
        structured
    }

    fn from_sqlite_code(ffi_err: &rusqlite::ffi::Error, message: &str) -> Self {
        Self {
            code: ffi_err.extended_code.to_string(),
            ..Self::new(categorize_sqlite(ffi_err.code, message), message)
        }
    }

    /// Multi-line report with every diagnostic field that is set.
    pub fn display_full(&self) -> String {
        let mut out = format!("{}: {}", self.category, self.message);
        if let (Some(line), Some(col)) = (self.line, self.col) {
            let _ = write!(out, "\n  at line {}, column {}", line, col);
        }
        if !self.code.is_empty() {
            let _ = write!(out, "\n  Code: {}", self.code);
        }
        for (label, value) in [("Detail", &self.detail), ("Hint", &self.hint)] {
            if let Some(value) = value {
                let _ = write!(out, "\n  {}: {}", label, value);
            }
        }
        let object: Vec<&str> = [&self.schema, &self.table, &self.column]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect();
        if !object.is_empty() {
            let _ = write!(out, "\n  Object: {}", object.join("."));
        }
        if let Some(constraint) = &self.constraint {
            let _ = write!(out, "\n  Constraint: {}", constraint);
        }
        if let Some(context) = &self.where_ {
            let _ = write!(out, "\n  Context: {}", context);
        }
        out
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Line and column (both 1-based) of a 1-based byte position.
fn line_col_at(query: &str, position: usize) -> (Option<usize>, Option<usize>) {
    let mut target = position.saturating_sub(1).min(query.len());
    while !query.is_char_boundary(target) {
        target -= 1;
    }
    let before = &query[..target];
    let line = before.matches('\n').count() + 1;
    let col = match before.rfind('\n') {
        Some(nl) => before[nl + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (Some(line), Some(col))
}

fn categorize_sqlstate(code: &str) -> ErrorCategory {
    match code.get(..2) {
        Some("42") if code == "42601" || code == "42000" => ErrorCategory::Syntax,
        Some("42") => ErrorCategory::Semantic,
        Some("22" | "23" | "53" | "54" | "55" | "57") => ErrorCategory::Execution,
        Some("25" | "40") => ErrorCategory::Transaction,
        Some("08") => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}

/// Server error numbers first; anything unlisted falls back to the SQLSTATE.
fn categorize_mysql(code: u16, state: &str) -> ErrorCategory {
    match code {
        1064 | 1149 => ErrorCategory::Syntax,
        1007 | 1008 | 1046 | 1049 | 1050 | 1051 | 1054 | 1091 | 1146 | 1304 | 1305 | 1360
        | 1537 | 1539 => ErrorCategory::Semantic,
        1048 | 1062 | 1264 | 1317 | 1364 | 1406 | 1451 | 1452 => ErrorCategory::Execution,
        1205 | 1213 | 1568 => ErrorCategory::Transaction,
        1040 | 1044 | 1045 | 1152 | 1153 | 2002 | 2003 | 2006 | 2013 => ErrorCategory::Connection,
        _ => categorize_sqlstate(state),
    }
}

/// Plain `SQLITE_ERROR` carries nothing beyond its message, so that is
/// inspected instead of the code.
fn categorize_sqlite(code: rusqlite::ErrorCode, message: &str) -> ErrorCategory {
    use rusqlite::ErrorCode;
    match code {
        ErrorCode::ConstraintViolation
        | ErrorCode::TypeMismatch
        | ErrorCode::TooBig
        | ErrorCode::DiskFull
        | ErrorCode::OutOfMemory
        | ErrorCode::OperationInterrupted
        | ErrorCode::OperationAborted => ErrorCategory::Execution,
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ErrorCategory::Transaction,
        ErrorCode::CannotOpen
        | ErrorCode::NotADatabase
        | ErrorCode::SystemIoFailure
        | ErrorCode::PermissionDenied
        | ErrorCode::ReadOnly => ErrorCategory::Connection,
        _ if message.contains("syntax error") || message.starts_with("incomplete input") => {
            ErrorCategory::Syntax
        }
        _ if message.starts_with("no such ") || message.contains("ambiguous column") => {
            ErrorCategory::Semantic
        }
        _ => ErrorCategory::Unknown,
    }
}

/// Rows and metadata returned by a statement.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<CellValue>>,
    pub row_count: usize,
    pub execution_time: Duration,
    /// Set for statements that return no columns.
    pub affected_rows: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    /// Widest display width among the name and every cell of the column.
    pub max_width: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// Arbitrary precision decimal in its canonical text form.
    Numeric(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    Array(Vec<CellValue>),
    /// A value of a type without a decoder, shown by type name.
    Unknown(String),
}

impl CellValue {
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => "NULL".to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int16(i) => i.to_string(),
            CellValue::Int32(i) => i.to_string(),
            CellValue::Int64(i) => i.to_string(),
            CellValue::Float32(f) => f.to_string(),
            CellValue::Float64(f) => f.to_string(),
            CellValue::Numeric(s) | CellValue::Text(s) | CellValue::Unknown(s) => s.clone(),
            CellValue::Bytes(b) => format!("[{} bytes]", b.len()),
            CellValue::Date(d) => d.to_string(),
            CellValue::Time(t) => t.to_string(),
            CellValue::DateTime(dt) => dt.to_string(),
            CellValue::TimestampTz(dt) => dt.to_string(),
            CellValue::Json(j) => j.to_string(),
            CellValue::Array(arr) => {
                let items: Vec<String> = arr.iter().map(CellValue::display).collect();
                format!("{{{}}}", items.join(", "))
            }
        }
    }

    pub fn display_width(&self) -> usize {
        UnicodeWidthStr::width(self.display().as_str())
    }
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: vec![],
            rows: vec![],
            row_count: 0,
            execution_time: Duration::ZERO,
            affected_rows: None,
        }
    }

    /// Result of a statement that returns no rows.
    pub fn affected(affected_rows: u64, execution_time: Duration) -> Self {
        Self {
            affected_rows: Some(affected_rows),
            execution_time,
            ..Self::empty()
        }
    }

    /// Build a row set and compute display widths.
    pub fn from_rows(
        mut columns: Vec<ColumnInfo>,
        rows: Vec<Vec<CellValue>>,
        execution_time: Duration,
    ) -> Self {
        for row in &rows {
            for (col, cell) in columns.iter_mut().zip(row) {
                col.max_width = col.max_width.max(cell.display_width());
            }
        }
        Self {
            row_count: rows.len(),
            columns,
            rows,
            execution_time,
            affected_rows: None,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Value of `column` in row `row`, if both exist.
    pub fn cell(&self, row: usize, column: &str) -> Option<&CellValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            max_width: UnicodeWidthStr::width(name.as_str()),
            name,
            type_name: type_name.into(),
        }
    }
}

impl From<&CellValue> for SqlValue {
    fn from(cell: &CellValue) -> Self {
        match cell {
            CellValue::Null => SqlValue::Null,
            CellValue::Bool(b) => SqlValue::Bool(*b),
            CellValue::Int16(i) => SqlValue::Int(i64::from(*i)),
            CellValue::Int32(i) => SqlValue::Int(i64::from(*i)),
            CellValue::Int64(i) => SqlValue::Int(*i),
            CellValue::Float32(f) => SqlValue::Float(f64::from(*f)),
            CellValue::Float64(f) => SqlValue::Float(*f),
            CellValue::Numeric(n) if n.starts_with(|c: char| c == '-' || c.is_ascii_digit()) => {
                SqlValue::Raw(n.clone())
            }
            CellValue::Text(s) => SqlValue::Text(s.clone()),
            CellValue::Bytes(b) => SqlValue::Bytes(b.clone()),
            CellValue::Json(j) => SqlValue::Text(j.to_string()),
            other => SqlValue::Text(other.display()),
        }
    }
}

/// Run one statement on a PostgreSQL connection.
///
/// The statement is prepared first; statements that describe result columns
/// are queried, everything else is executed for its affected row count.
pub async fn execute_query(client: &Client, sql: &str) -> Result<QueryResult, ClientError> {
    let start = Instant::now();
    let sql = sql.trim();
    let to_error =
        |e: tokio_postgres::Error| ClientError::Execution(StructuredError::from_pg_error(&e, sql));

    let statement = client.prepare(sql).await.map_err(to_error)?;

    if statement.columns().is_empty() {
        let affected = client.execute(&statement, &[]).await.map_err(to_error)?;
        return Ok(QueryResult::affected(affected, start.elapsed()));
    }

    let columns = statement
        .columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_().name()))
        .collect();
    let rows = client.query(&statement, &[]).await.map_err(to_error)?;
    let cells = rows.iter().map(decode_row).collect();
    Ok(QueryResult::from_rows(columns, cells, start.elapsed()))
}

fn decode_row(row: &Row) -> Vec<CellValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| decode_cell(row, i, col.type_()))
        .collect()
}

/// Undecoded wire bytes of any type.
struct RawValue<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(RawValue(raw))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn decode<'a, T: FromSql<'a>>(row: &'a Row, idx: usize, wrap: fn(T) -> CellValue) -> CellValue {
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(value)) => wrap(value),
        Ok(None) => CellValue::Null,
        Err(e) => {
            debug!(column = idx, error = %e, "failed to decode column");
            CellValue::Null
        }
    }
}

fn decode_array<'a, T: FromSql<'a>>(
    row: &'a Row,
    idx: usize,
    wrap: fn(T) -> CellValue,
) -> CellValue {
    match row.try_get::<_, Option<Vec<Option<T>>>>(idx) {
        Ok(Some(items)) => CellValue::Array(
            items
                .into_iter()
                .map(|item| item.map_or(CellValue::Null, wrap))
                .collect(),
        ),
        Ok(None) => CellValue::Null,
        Err(e) => {
            debug!(column = idx, error = %e, "failed to decode array column");
            CellValue::Null
        }
    }
}

fn decode_cell(row: &Row, idx: usize, pg_type: &Type) -> CellValue {
    match *pg_type {
        Type::BOOL => decode(row, idx, CellValue::Bool),
        Type::INT2 => decode(row, idx, CellValue::Int16),
        Type::INT4 => decode(row, idx, CellValue::Int32),
        Type::INT8 => decode(row, idx, CellValue::Int64),
        Type::OID => decode(row, idx, |v: u32| CellValue::Int64(i64::from(v))),
        Type::FLOAT4 => decode(row, idx, CellValue::Float32),
        Type::FLOAT8 => decode(row, idx, CellValue::Float64),
        Type::NUMERIC => decode::<RawValue>(row, idx, |raw| match decode_numeric(raw.0) {
            Some(n) => CellValue::Numeric(n),
            None => CellValue::Unknown("<numeric>".to_string()),
        }),
        Type::TEXT | Type::VARCHAR | Type::NAME | Type::CHAR | Type::BPCHAR => {
            decode(row, idx, CellValue::Text)
        }
        Type::BYTEA => decode(row, idx, CellValue::Bytes),
        Type::DATE => decode(row, idx, CellValue::Date),
        Type::TIME => decode(row, idx, CellValue::Time),
        Type::TIMESTAMP => decode(row, idx, CellValue::DateTime),
        Type::TIMESTAMPTZ => decode(row, idx, CellValue::TimestampTz),
        Type::JSON | Type::JSONB => decode(row, idx, CellValue::Json),
        Type::BOOL_ARRAY => decode_array(row, idx, CellValue::Bool),
        Type::INT2_ARRAY => decode_array(row, idx, CellValue::Int16),
        Type::INT4_ARRAY => decode_array(row, idx, CellValue::Int32),
        Type::INT8_ARRAY => decode_array(row, idx, CellValue::Int64),
        Type::FLOAT8_ARRAY => decode_array(row, idx, CellValue::Float64),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => {
            decode_array(row, idx, CellValue::Text)
        }
        _ => decode_other(row, idx, pg_type),
    }
}

fn decode_other(row: &Row, idx: usize, pg_type: &Type) -> CellValue {
    match row.try_get::<_, Option<RawValue<'_>>>(idx) {
        Ok(Some(raw)) => match (pg_type.kind(), std::str::from_utf8(raw.0)) {
            // enum labels travel as plain text
            (Kind::Enum(_), Ok(label)) => CellValue::Text(label.to_string()),
            _ => CellValue::Unknown(format!("<{}>", pg_type.name())),
        },
        _ => CellValue::Null,
    }
}

/// Text form of a value in the binary `numeric` wire format: a header of
/// digit count, weight, sign and display scale followed by base-10000 digits.
fn decode_numeric(raw: &[u8]) -> Option<String> {
    let word = |i: usize| {
        raw.get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
    };
    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);

    match sign {
        0x0000 | 0x4000 => {}
        0xC000 => return Some("NaN".to_string()),
        0xD000 => return Some("Infinity".to_string()),
        0xF000 => return Some("-Infinity".to_string()),
        _ => return None,
    }

    let digits: Vec<u16> = (0..ndigits).map(|i| word(4 + i)).collect::<Option<_>>()?;
    // digit i carries 10000^(weight - i)
    let digit_at = |exp: i32| -> u16 {
        usize::try_from(weight - exp)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        let _ = write!(out, "{}", digit_at(weight));
        for exp in (0..weight).rev() {
            let _ = write!(out, "{:04}", digit_at(exp));
        }
    }

    if dscale > 0 {
        let mut frac = String::new();
        let mut exp = -1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit_at(exp));
            exp -= 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Some(out)
}
