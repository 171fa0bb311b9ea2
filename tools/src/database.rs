//! Database Query Tool
//!
//! Read-only SQL over a SQLite database. Only `SELECT` and `WITH`
//! statements are accepted, and results are capped so a runaway query
//! cannot flood the run record. The demo database ships two small
//! tables, `customers` and `sales`, matching the workbench dataset.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::debug;

use runbook_core::context::ExecutionContext;
use runbook_core::registry::{ResolvedInputs, Tool, ToolCategory, ToolError};

const MAX_ROWS: usize = 100;

const DEMO_SCHEMA: &str = "
CREATE TABLE customers (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    segment TEXT NOT NULL,
    total_spend REAL NOT NULL
);
INSERT INTO customers (name, email, segment, total_spend) VALUES
    ('Avery Chen', 'avery@northwind.example', 'enterprise', 48200.0),
    ('Riley Park', 'riley@fabrikam.example', 'enterprise', 31500.0),
    ('Sam Okafor', 'sam@contoso.example', 'smb', 9100.5),
    ('Jordan Blake', 'jordan@adventure.example', 'consumer', 740.25);
CREATE TABLE sales (
    day TEXT NOT NULL,
    amount REAL NOT NULL
);
INSERT INTO sales (day, amount) VALUES
    ('2025-08-19', 1200.0),
    ('2025-08-20', 1450.0);
";

/// Runs read-only queries against a SQLite database
pub struct QueryDatabaseTool {
    connection: Mutex<Connection>,
}

impl QueryDatabaseTool {
    /// Open an existing database file.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("failed to open database {}", db_path.as_ref().display()))?;
        Ok(QueryDatabaseTool {
            connection: Mutex::new(conn),
        })
    }

    /// In-memory database seeded with the demo dataset.
    pub fn demo() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open demo database")?;
        conn.execute_batch(DEMO_SCHEMA)
            .context("failed to seed demo database")?;
        Ok(QueryDatabaseTool {
            connection: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl Tool for QueryDatabaseTool {
    fn id(&self) -> &str {
        "query_database"
    }

    fn description(&self) -> &str {
        "Run a read-only SQL query against the SQLite database"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Database
    }

    async fn invoke(
        &self,
        inputs: &ResolvedInputs,
        _ctx: &ExecutionContext,
    ) -> Result<Value, ToolError> {
        let query = inputs.require_str("query")?;
        let head = query
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_uppercase();
        if head != "SELECT" && head != "WITH" {
            return Err(ToolError::InvalidInput {
                name: "query".to_string(),
                reason: format!("only read queries are allowed, got '{head}'"),
            });
        }
        debug!("query_database: {query}");

        let conn = self
            .connection
            .lock()
            .map_err(|e| ToolError::Failed(format!("database lock poisoned: {e}")))?;
        let mut stmt = conn
            .prepare(query)
            .map_err(|e| ToolError::Failed(format!("query failed: {e}")))?;
        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let mut rows = stmt
            .query([])
            .map_err(|e| ToolError::Failed(format!("query failed: {e}")))?;
        let mut data = Vec::new();
        let mut truncated = false;
        while let Some(row) = rows
            .next()
            .map_err(|e| ToolError::Failed(format!("query failed: {e}")))?
        {
            if data.len() == MAX_ROWS {
                truncated = true;
                break;
            }
            let mut object = serde_json::Map::new();
            for (i, column) in columns.iter().enumerate() {
                let value = row
                    .get_ref(i)
                    .map_err(|e| ToolError::Failed(format!("query failed: {e}")))?;
                object.insert(column.clone(), column_value(value));
            }
            data.push(Value::Object(object));
        }

        Ok(json!({
            "status": "success",
            "data": data,
            "row_count": data.len(),
            "truncated": truncated,
            "database": "SQLite",
        }))
    }
}

fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(r) => serde_json::Number::from_f64(r)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Value::String(String::from_utf8_lossy(blob).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_input(sql: &str) -> ResolvedInputs {
        let mut inputs = ResolvedInputs::new();
        inputs.push("query", json!(sql));
        inputs
    }

    #[tokio::test]
    async fn test_select_over_demo_data() {
        let tool = QueryDatabaseTool::demo().unwrap();
        let out = tool
            .invoke(
                &query_input(
                    "SELECT name, segment, total_spend FROM customers ORDER BY total_spend DESC",
                ),
                &ExecutionContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(out["status"], json!("success"));
        assert_eq!(out["row_count"], json!(4));
        assert_eq!(out["truncated"], json!(false));
        assert_eq!(out["data"][0]["name"], json!("Avery Chen"));
        assert_eq!(out["data"][0]["total_spend"], json!(48200.0));
        assert_eq!(out["data"][3]["segment"], json!("consumer"));
    }

    #[tokio::test]
    async fn test_writes_are_rejected() {
        let tool = QueryDatabaseTool::demo().unwrap();
        for sql in [
            "INSERT INTO customers (name, email, segment, total_spend) VALUES ('x', 'x', 'x', 0)",
            "DELETE FROM customers",
            "update customers set name = 'x'",
            "DROP TABLE customers",
        ] {
            let err = tool
                .invoke(&query_input(sql), &ExecutionContext::new())
                .await
                .unwrap_err();
            assert!(
                matches!(err, ToolError::InvalidInput { ref name, .. } if name == "query"),
                "{sql} should have been rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_with_clause_counts_as_read() {
        let tool = QueryDatabaseTool::demo().unwrap();
        let out = tool
            .invoke(
                &query_input(
                    "WITH spend AS (SELECT SUM(total_spend) AS total FROM customers) \
                     SELECT total FROM spend",
                ),
                &ExecutionContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(out["data"][0]["total"], json!(89540.75));
    }

    #[tokio::test]
    async fn test_row_cap_marks_truncation() {
        let tool = QueryDatabaseTool::demo().unwrap();
        let out = tool
            .invoke(
                &query_input(
                    "WITH RECURSIVE cnt(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM cnt WHERE x < 150) \
                     SELECT x FROM cnt",
                ),
                &ExecutionContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(out["row_count"], json!(100));
        assert_eq!(out["truncated"], json!(true));
    }

    #[tokio::test]
    async fn test_bad_sql_fails_invocation() {
        let tool = QueryDatabaseTool::demo().unwrap();
        let err = tool
            .invoke(
                &query_input("SELECT nothing FROM nowhere"),
                &ExecutionContext::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(message) if message.contains("query failed")));
    }

    #[tokio::test]
    async fn test_missing_query_input() {
        let tool = QueryDatabaseTool::demo().unwrap();
        let err = tool
            .invoke(&ResolvedInputs::new(), &ExecutionContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MissingInput { name } if name == "query"));
    }
}
