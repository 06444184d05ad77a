use std::fmt;

use crate::error::RenderError;
use crate::query::value::InsertRow;

/// The statement a query state renders to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Select => write!(f, "SELECT"),
            StatementKind::Insert => write!(f, "INSERT"),
            StatementKind::Update => write!(f, "UPDATE"),
            StatementKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// Accumulated fluent-builder state for one statement.
///
/// Only the builder mutates it; renderers read it through the getters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub(crate) schema: String,
    pub(crate) select: Vec<String>,
    pub(crate) from: String,
    pub(crate) where_: Vec<String>,
    pub(crate) group_by: Vec<String>,
    pub(crate) order_by: Vec<String>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) join: Vec<String>,
    pub(crate) update: Vec<String>,
    pub(crate) insert: Vec<InsertRow>,
    pub(crate) delete: bool,
}

impl QueryState {
    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn select(&self) -> &[String] {
        &self.select
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn where_clauses(&self) -> &[String] {
        &self.where_
    }

    pub fn group_by(&self) -> &[String] {
        &self.group_by
    }

    pub fn order_by(&self) -> &[String] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn join(&self) -> &[String] {
        &self.join
    }

    pub fn update(&self) -> &[String] {
        &self.update
    }

    pub fn insert(&self) -> &[InsertRow] {
        &self.insert
    }

    pub fn is_delete(&self) -> bool {
        self.delete
    }

    /// True when nothing has been accumulated since construction or reset.
    pub fn is_default(&self) -> bool {
        *self == QueryState::default()
    }

    /// Resolve which statement this state describes.
    ///
    /// Delete, insert and update are mutually exclusive; populating more than
    /// one of them is rejected rather than resolved by precedence.
    pub fn statement_kind(&self) -> Result<StatementKind, RenderError> {
        let mut modes = Vec::new();
        if self.delete {
            modes.push(StatementKind::Delete);
        }
        if !self.insert.is_empty() {
            modes.push(StatementKind::Insert);
        }
        if !self.update.is_empty() {
            modes.push(StatementKind::Update);
        }

        match modes.len() {
            0 => Ok(StatementKind::Select),
            1 => Ok(modes[0]),
            _ => Err(RenderError::ConflictingModes(modes)),
        }
    }
}
