use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column values of a row keyed by column name, in column name order.
pub type Attributes = BTreeMap<String, Cell>;

/// A single column value produced by the mapping layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("null"),
            Cell::Bool(value) => write!(f, "{value}"),
            Cell::I64(value) => write!(f, "{value}"),
            Cell::F64(value) => write!(f, "{value}"),
            Cell::String(value) => write!(f, "{value:?}"),
            Cell::Timestamp(value) => write!(f, "{}", value.to_rfc3339()),
            Cell::Json(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::I64(value)
    }
}

impl From<i32> for Cell {
    fn from(value: i32) -> Self {
        Cell::I64(value.into())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::F64(value)
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(value: DateTime<Utc>) -> Self {
        Cell::Timestamp(value)
    }
}

impl From<serde_json::Value> for Cell {
    fn from(value: serde_json::Value) -> Self {
        Cell::Json(value)
    }
}

impl<T> From<Option<T>> for Cell
where
    T: Into<Cell>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}
