//! Data Summarization Tool
//!
//! Summarizes tabular data handed to it by an earlier step, or falls back
//! to a canned demo dataset when invoked against a named source. The demo
//! dataset mirrors the two-day sales figures the workbench ships with.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use runbook_core::context::ExecutionContext;
use runbook_core::registry::{ResolvedInputs, Tool, ToolCategory, ToolError};

/// Produces row and column statistics over tabular data
///
/// Accepts either a `data` input (CSV-ish text, a row array, or a
/// database result carrying a `data` array) or a `source` name. When
/// neither is given the execution context's `uploaded_file` parameter
/// stands in for `source`.
pub struct SummarizeDataTool;

#[async_trait]
impl Tool for SummarizeDataTool {
    fn id(&self) -> &str {
        "summarize_data"
    }

    fn description(&self) -> &str {
        "Summarize tabular data: row counts, columns, and numeric totals"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Data
    }

    async fn invoke(
        &self,
        inputs: &ResolvedInputs,
        ctx: &ExecutionContext,
    ) -> Result<Value, ToolError> {
        if let Some(data) = inputs.get("data") {
            return summarize_payload(data).ok_or_else(|| ToolError::InvalidInput {
                name: "data".to_string(),
                reason: "expected text, a row array, or a result carrying a data array"
                    .to_string(),
            });
        }

        let source = inputs
            .get_str("source")
            .or_else(|| ctx.param_str("uploaded_file"))
            .ok_or_else(|| ToolError::MissingInput {
                name: "data".to_string(),
            })?;
        debug!("Summarizing demo dataset for source: {source}");
        Ok(demo_summary(source))
    }
}

fn summarize_payload(data: &Value) -> Option<Value> {
    match data {
        Value::String(text) => Some(summarize_text(text)),
        Value::Array(rows) => Some(summarize_rows(rows)),
        // Database results wrap their rows in a `data` field
        Value::Object(fields) => fields
            .get("data")
            .and_then(Value::as_array)
            .map(|rows| summarize_rows(rows)),
        _ => None,
    }
}

/// First non-empty line is the header, every later non-empty line a record.
fn summarize_text(text: &str) -> Value {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    let columns: Vec<String> = match lines.next() {
        Some(header) => header.split(',').map(|field| field.trim().to_string()).collect(),
        None => Vec::new(),
    };
    if columns.is_empty() {
        return json!({"summary": "no data", "records": 0, "columns": []});
    }
    let records = lines.count();
    json!({
        "summary": format!(
            "{records} records with {} columns ({})",
            columns.len(),
            columns.join(", ")
        ),
        "records": records,
        "columns": columns,
    })
}

fn summarize_rows(rows: &[Value]) -> Value {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for row in rows {
        if let Value::Object(fields) = row {
            for (name, value) in fields {
                if let Some(number) = value.as_f64() {
                    *totals.entry(name.clone()).or_insert(0.0) += number;
                }
            }
        }
    }

    let totals_text = totals
        .iter()
        .map(|(name, total)| format!("{name}={total}"))
        .collect::<Vec<_>>()
        .join(", ");
    let summary = if totals_text.is_empty() {
        format!("{} rows", rows.len())
    } else {
        format!("{} rows (totals: {totals_text})", rows.len())
    };
    json!({"summary": summary, "rows": rows.len(), "totals": totals})
}

fn demo_summary(source: &str) -> Value {
    let rows = vec![
        json!({"date": "2025-08-19", "sales": 1200}),
        json!({"date": "2025-08-20", "sales": 1450}),
    ];
    let total: i64 = rows.iter().filter_map(|row| row["sales"].as_i64()).sum();
    json!({
        "summary": format!("Total sales: {total} (from {} days)", rows.len()),
        "raw": rows,
        "source": source,
    })
}
