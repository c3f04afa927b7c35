//! Value and result types exchanged with drivers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A database value passed as a parameter or read from a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    DateTimeUtc(DateTime<Utc>),
    Json(serde_json::Value),
}

/// A row from a query result
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// Column metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    /// Database-specific type name
    pub data_type: String,
}

/// Rows returned by a query
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub id: Uuid,
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            id: Uuid::new_v4(),
            columns: Vec::new(),
            rows: Vec::new(),
            execution_time_ms: 0,
        }
    }

    /// Result with a single unnamed column and one row per value
    pub fn single_column(values: Vec<Value>) -> Self {
        Self {
            columns: vec![ColumnMeta::default()],
            rows: values.into_iter().map(|v| Row::new(vec![v])).collect(),
            ..Self::empty()
        }
    }
}

/// Outcome of a data-modifying statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    pub affected_rows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_column_result() {
        let result = QueryResult::single_column(vec![Value::Int64(1), Value::Null]);
        assert_eq!(result.columns.len(), 1);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].values, vec![Value::Int64(1)]);
        assert!(QueryResult::empty().rows.is_empty());
    }
}
