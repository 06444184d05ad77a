//! Rendering a [`QueryResult`] for output.

use unicode_width::UnicodeWidthStr;

use crate::db::{CellValue, ObjectRef, QueryResult};
use crate::error::RenderError;
use crate::query::{Dialect, InsertRow, QueryState, SqlValue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    #[default]
    Table,
    Csv,
    Tsv,
    Json,
}

/// Render `result` in the given format.
pub fn render(result: &QueryResult, format: ExportFormat) -> String {
    match format {
        ExportFormat::Table => to_text_table(result),
        ExportFormat::Csv => to_csv(result),
        ExportFormat::Tsv => to_tsv(result),
        ExportFormat::Json => to_json(result),
    }
}

pub fn to_csv(result: &QueryResult) -> String {
    delimited(result, ",", csv_escape)
}

/// Tab-separated rows; tabs and newlines inside values become spaces.
pub fn to_tsv(result: &QueryResult) -> String {
    delimited(result, "\t", |field: &str| field.replace(['\t', '\n'], " "))
}

fn delimited(result: &QueryResult, separator: &str, field: impl Fn(&str) -> String) -> String {
    let join = |fields: Vec<String>| fields.join(separator) + "\n";

    let mut output = join(result.columns.iter().map(|c| field(&c.name)).collect());
    for row in &result.rows {
        output += &join(row.iter().map(|cell| field(&cell_to_plain(cell))).collect());
    }
    output
}

/// Rows as a JSON array of objects keyed by column name.
pub fn to_json(result: &QueryResult) -> String {
    let objects: Vec<serde_json::Value> = result
        .rows
        .iter()
        .map(|row| {
            let object: serde_json::Map<String, serde_json::Value> = result
                .columns
                .iter()
                .map(|c| c.name.clone())
                .zip(row.iter().map(cell_to_json))
                .collect();
            serde_json::Value::Object(object)
        })
        .collect();

    serde_json::to_string_pretty(&objects).unwrap_or_else(|_| String::from("[]"))
}

/// A boxed plain-text table, or the affected row count for statements that
/// returned no columns.
pub fn to_text_table(result: &QueryResult) -> String {
    if result.columns.is_empty() {
        return match result.affected_rows {
            Some(n) => format!("{} row(s) affected\n", n),
            None => "OK\n".to_string(),
        };
    }

    let widths: Vec<usize> = result.columns.iter().map(|c| c.max_width).collect();
    let separator = {
        let dashes: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
        format!("+{}+\n", dashes.join("+"))
    };

    let mut output = separator.clone();
    let header: Vec<String> = result.columns.iter().map(|c| c.name.clone()).collect();
    output.push_str(&table_line(&header, &widths));
    output.push_str(&separator);
    for row in &result.rows {
        let cells: Vec<String> = row.iter().map(CellValue::display).collect();
        output.push_str(&table_line(&cells, &widths));
    }
    output.push_str(&separator);
    output.push_str(&format!(
        "({} row{})\n",
        result.row_count,
        if result.row_count == 1 { "" } else { "s" }
    ));
    output
}

fn table_line(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let cell = cell.replace('\n', " ");
            let pad = width.saturating_sub(UnicodeWidthStr::width(cell.as_str()));
            format!(" {}{} ", cell, " ".repeat(pad))
        })
        .collect();
    format!("|{}|\n", padded.join("|"))
}

/// One `INSERT` statement per row, rendered for `dialect`.
///
/// Returns an empty string for results without rows or columns.
pub fn to_sql_insert(
    result: &QueryResult,
    table: &ObjectRef,
    dialect: Dialect,
) -> Result<String, RenderError> {
    if result.rows.is_empty() || result.columns.is_empty() {
        return Ok(String::new());
    }

    let mut output = String::new();
    for row in &result.rows {
        let insert: InsertRow = result
            .columns
            .iter()
            .zip(row)
            .map(|(col, cell)| (col.name.clone(), SqlValue::from(cell)))
            .collect();
        let state = QueryState {
            schema: table.schema.clone(),
            from: table.name.clone(),
            insert: vec![insert],
            ..Default::default()
        };
        output.push_str(&dialect.render(&state)?);
        output.push_str(";\n");
    }

    Ok(output)
}

fn cell_to_plain(cell: &CellValue) -> String {
    if let CellValue::Null = cell {
        String::new()
    } else {
        cell.display()
    }
}

fn cell_to_json(cell: &CellValue) -> serde_json::Value {
    use serde_json::Value;

    match cell {
        CellValue::Null => Value::Null,
        CellValue::Bool(v) => Value::from(*v),
        CellValue::Int16(v) => Value::from(*v),
        CellValue::Int32(v) => Value::from(*v),
        CellValue::Int64(v) => Value::from(*v),
        CellValue::Float32(v) => Value::from(*v),
        CellValue::Float64(v) => Value::from(*v),
        CellValue::Json(v) => v.clone(),
        CellValue::Array(items) => items.iter().map(cell_to_json).collect(),
        other => Value::String(other.display()),
    }
}

/// Quote a CSV field when it contains a separator, quote or line break.
fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}
