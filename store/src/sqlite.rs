//! SQLite-backed run and plan persistence
//!
//! Run records are stored normalized: one row per run, one row per
//! appended step result, one row per rollback entry. Step result and
//! rollback rows are append-only, enforced with schema triggers so the
//! rule holds even for writers that bypass this module. Timestamps are
//! RFC 3339 text, which sorts correctly as strings.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use runbook_core::clarification::Clarification;
use runbook_core::context::ExecutionContext;
use runbook_core::plan::{Plan, Step};
use runbook_core::run::{
    RollbackEntry, RunRecord, RunStatus, SkippedUndo, StepResult, StepStatus,
};
use runbook_core::store::{
    PlanStore, PlanSummary, RunFilter, RunStore, RunSummary, StoreError,
};

/// Owns the database connection and hands out store handles that share
/// it
pub struct SqliteDatabase {
    connection: Arc<Mutex<Connection>>,
    db_path: String,
}

impl SqliteDatabase {
    /// Create or open a database at the given path.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let path = db_path.as_ref().to_string_lossy().to_string();
        info!("Opening run database at {path}");
        let conn = Connection::open(&path)
            .map_err(|e| StoreError::Backend(format!("failed to open database: {e}")))?;
        Self::from_connection(conn, path)
    }

    /// Create a private in-memory database. Used by tests and ephemeral
    /// sessions that still want trigger enforcement.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Backend(format!("failed to open database: {e}")))?;
        Self::from_connection(conn, ":memory:".to_string())
    }

    fn from_connection(conn: Connection, path: String) -> Result<Self, StoreError> {
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(|e| StoreError::Backend(format!("failed to enable foreign keys: {e}")))?;
        conn.busy_timeout(std::time::Duration::from_secs(30))
            .map_err(|e| StoreError::Backend(format!("failed to set busy timeout: {e}")))?;

        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
            db_path: path,
        })
    }

    pub fn database_path(&self) -> &str {
        &self.db_path
    }

    /// Run store handle sharing this database's connection.
    pub fn run_store(&self) -> SqliteRunStore {
        SqliteRunStore {
            connection: Arc::clone(&self.connection),
        }
    }

    /// Plan store handle sharing this database's connection.
    pub fn plan_store(&self) -> SqlitePlanStore {
        SqlitePlanStore {
            connection: Arc::clone(&self.connection),
        }
    }

    /// Create tables, indexes, and the append-only triggers.
    pub async fn initialize_schema(&self) -> Result<(), StoreError> {
        info!("Initializing run store schema");
        let conn = lock(&self.connection)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                plan_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN (
                    'pending', 'running', 'completed', 'failed',
                    'awaiting_clarification', 'rolled_back'
                )),
                context_json TEXT NOT NULL CHECK (json_valid(context_json)),
                clarification_json TEXT NOT NULL CHECK (json_valid(clarification_json)),
                rollback_points INTEGER NOT NULL DEFAULT 0
            );",
            [],
        )
        .map_err(|e| StoreError::Backend(format!("failed to create runs table: {e}")))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS step_results (
                run_id TEXT NOT NULL REFERENCES runs (run_id),
                step_index INTEGER NOT NULL CHECK (step_index >= 0),
                tool_id TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN (
                    'success', 'error', 'awaiting_clarification'
                )),
                data_json TEXT NOT NULL CHECK (json_valid(data_json)),
                timestamp TEXT NOT NULL,
                PRIMARY KEY (run_id, step_index, status)
            );",
            [],
        )
        .map_err(|e| StoreError::Backend(format!("failed to create step_results table: {e}")))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rollback_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES runs (run_id),
                target_step_index INTEGER NOT NULL CHECK (target_step_index >= 0),
                reason TEXT NOT NULL,
                undone_json TEXT NOT NULL CHECK (json_valid(undone_json)),
                skipped_json TEXT NOT NULL CHECK (json_valid(skipped_json)),
                partial INTEGER NOT NULL CHECK (partial IN (0, 1)),
                timestamp TEXT NOT NULL
            );",
            [],
        )
        .map_err(|e| {
            StoreError::Backend(format!("failed to create rollback_entries table: {e}"))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS plans (
                plan_id TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                created_at TEXT NOT NULL,
                steps_json TEXT NOT NULL CHECK (json_valid(steps_json)),
                step_count INTEGER NOT NULL CHECK (step_count >= 0)
            );",
            [],
        )
        .map_err(|e| StoreError::Backend(format!("failed to create plans table: {e}")))?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_runs_plan ON runs (plan_id);",
            "CREATE INDEX IF NOT EXISTS idx_runs_status ON runs (status);",
            "CREATE INDEX IF NOT EXISTS idx_runs_created ON runs (created_at);",
            "CREATE INDEX IF NOT EXISTS idx_results_run ON step_results (run_id);",
            "CREATE INDEX IF NOT EXISTS idx_rollbacks_run ON rollback_entries (run_id);",
            "CREATE INDEX IF NOT EXISTS idx_plans_created ON plans (created_at);",
        ] {
            conn.execute(statement, [])
                .map_err(|e| StoreError::Backend(format!("failed to create index: {e}")))?;
        }

        // Appended history is immutable
        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS step_results_no_update
             BEFORE UPDATE ON step_results
             BEGIN
                 SELECT RAISE(ABORT, 'step results are append-only');
             END;",
            [],
        )
        .map_err(|e| StoreError::Backend(format!("failed to create trigger: {e}")))?;

        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS step_results_no_delete
             BEFORE DELETE ON step_results
             BEGIN
                 SELECT RAISE(ABORT, 'step results are append-only');
             END;",
            [],
        )
        .map_err(|e| StoreError::Backend(format!("failed to create trigger: {e}")))?;

        // Executed results carry gap-free increasing indices; awaiting
        // markers are exempt because the real result lands at the same
        // index after resume
        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS step_results_in_order
             BEFORE INSERT ON step_results
             WHEN NEW.status != 'awaiting_clarification'
             BEGIN
                 SELECT RAISE(ABORT, 'executed step results must append in order')
                 WHERE NEW.step_index != (
                     SELECT COUNT(*) FROM step_results
                     WHERE run_id = NEW.run_id
                       AND status != 'awaiting_clarification'
                 );
             END;",
            [],
        )
        .map_err(|e| StoreError::Backend(format!("failed to create trigger: {e}")))?;

        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS rollback_entries_no_update
             BEFORE UPDATE ON rollback_entries
             BEGIN
                 SELECT RAISE(ABORT, 'rollback entries are append-only');
             END;",
            [],
        )
        .map_err(|e| StoreError::Backend(format!("failed to create trigger: {e}")))?;

        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS rollback_entries_no_delete
             BEFORE DELETE ON rollback_entries
             BEGIN
                 SELECT RAISE(ABORT, 'rollback entries are append-only');
             END;",
            [],
        )
        .map_err(|e| StoreError::Backend(format!("failed to create trigger: {e}")))?;

        drop(conn);
        info!("Run store schema initialized");
        Ok(())
    }
}

/// Run persistence over the shared connection
pub struct SqliteRunStore {
    connection: Arc<Mutex<Connection>>,
}

/// Plan persistence over the shared connection
pub struct SqlitePlanStore {
    connection: Arc<Mutex<Connection>>,
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create_run(&self, record: &RunRecord) -> Result<(), StoreError> {
        debug!("Creating run record: {}", record.id);
        let context_json = serde_json::to_string(&record.context)?;
        let clarification_json = serde_json::to_string(&record.clarification)?;

        let conn = lock(&self.connection)?;
        let tx = conn.unchecked_transaction().map_err(map_sqlite)?;
        tx.execute(
            "INSERT INTO runs (run_id, plan_id, created_at, status, context_json,
                               clarification_json, rollback_points)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                record.id.to_string(),
                record.plan_id.to_string(),
                record.created_at.to_rfc3339(),
                record.status.as_str(),
                context_json,
                clarification_json,
                record.rollback_points
            ],
        )
        .map_err(map_sqlite)?;
        for result in &record.step_results {
            insert_result(&tx, record.id, result)?;
        }
        tx.commit().map_err(map_sqlite)?;
        Ok(())
    }

    async fn append_result(&self, run_id: Uuid, result: &StepResult) -> Result<(), StoreError> {
        debug!(
            "Appending step result: run {run_id}, step {}, {}",
            result.step_index,
            result.status.as_str()
        );
        let conn = lock(&self.connection)?;
        if !run_exists(&conn, run_id)? {
            return Err(StoreError::NotFound(run_id));
        }
        insert_result(&conn, run_id, result)
    }

    async fn set_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), StoreError> {
        let conn = lock(&self.connection)?;
        let updated = conn
            .execute(
                "UPDATE runs SET status = ?2 WHERE run_id = ?1;",
                params![run_id.to_string(), status.as_str()],
            )
            .map_err(map_sqlite)?;
        if updated == 0 {
            return Err(StoreError::NotFound(run_id));
        }
        Ok(())
    }

    async fn set_clarification(
        &self,
        run_id: Uuid,
        clarification: &Clarification,
    ) -> Result<(), StoreError> {
        let clarification_json = serde_json::to_string(clarification)?;
        let conn = lock(&self.connection)?;
        let updated = conn
            .execute(
                "UPDATE runs SET clarification_json = ?2 WHERE run_id = ?1;",
                params![run_id.to_string(), clarification_json],
            )
            .map_err(map_sqlite)?;
        if updated == 0 {
            return Err(StoreError::NotFound(run_id));
        }
        Ok(())
    }

    async fn set_context(
        &self,
        run_id: Uuid,
        context: &ExecutionContext,
    ) -> Result<(), StoreError> {
        let context_json = serde_json::to_string(context)?;
        let conn = lock(&self.connection)?;
        let updated = conn
            .execute(
                "UPDATE runs SET context_json = ?2 WHERE run_id = ?1;",
                params![run_id.to_string(), context_json],
            )
            .map_err(map_sqlite)?;
        if updated == 0 {
            return Err(StoreError::NotFound(run_id));
        }
        Ok(())
    }

    async fn append_rollback(
        &self,
        run_id: Uuid,
        entry: &RollbackEntry,
    ) -> Result<(), StoreError> {
        debug!("Appending rollback entry: run {run_id}");
        let undone_json = serde_json::to_string(&entry.undone)?;
        let skipped_json = serde_json::to_string(&entry.skipped)?;

        let conn = lock(&self.connection)?;
        let tx = conn.unchecked_transaction().map_err(map_sqlite)?;
        let updated = tx
            .execute(
                "UPDATE runs SET rollback_points = rollback_points + 1 WHERE run_id = ?1;",
                params![run_id.to_string()],
            )
            .map_err(map_sqlite)?;
        if updated == 0 {
            return Err(StoreError::NotFound(run_id));
        }
        tx.execute(
            "INSERT INTO rollback_entries (run_id, target_step_index, reason, undone_json,
                                           skipped_json, partial, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                run_id.to_string(),
                entry.target_step_index as i64,
                entry.reason,
                undone_json,
                skipped_json,
                entry.partial,
                entry.timestamp.to_rfc3339()
            ],
        )
        .map_err(map_sqlite)?;
        tx.commit().map_err(map_sqlite)?;
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<RunRecord, StoreError> {
        let conn = lock(&self.connection)?;

        let row = conn
            .query_row(
                "SELECT plan_id, created_at, status, context_json, clarification_json,
                        rollback_points
                 FROM runs WHERE run_id = ?1;",
                params![run_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, u32>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(map_sqlite)?
            .ok_or(StoreError::NotFound(run_id))?;

        let mut stmt = conn
            .prepare(
                "SELECT step_index, tool_id, status, data_json, timestamp
                 FROM step_results
                 WHERE run_id = ?1 AND status != 'awaiting_clarification'
                 ORDER BY step_index ASC;",
            )
            .map_err(map_sqlite)?;
        let result_rows = stmt
            .query_map(params![run_id.to_string()], result_row)
            .map_err(map_sqlite)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite)?;
        drop(stmt);

        let mut stmt = conn
            .prepare(
                "SELECT target_step_index, reason, undone_json, skipped_json, partial, timestamp
                 FROM rollback_entries WHERE run_id = ?1 ORDER BY id ASC;",
            )
            .map_err(map_sqlite)?;
        let rollback_rows = stmt
            .query_map(params![run_id.to_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(map_sqlite)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite)?;
        drop(stmt);
        drop(conn);

        let (plan_id, created_at, status, context_json, clarification_json, rollback_points) = row;

        let step_results = result_rows
            .into_iter()
            .map(build_step_result)
            .collect::<Result<Vec<_>, _>>()?;
        let rollbacks = rollback_rows
            .into_iter()
            .map(
                |(target, reason, undone_json, skipped_json, partial, timestamp)| {
                    Ok(RollbackEntry {
                        target_step_index: target as usize,
                        reason,
                        undone: parse_json("rollback undone list", &undone_json)?,
                        skipped: parse_json::<Vec<SkippedUndo>>(
                            "rollback skipped list",
                            &skipped_json,
                        )?,
                        partial,
                        timestamp: parse_timestamp(&timestamp)?,
                    })
                },
            )
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(RunRecord {
            id: run_id,
            plan_id: parse_uuid(&plan_id)?,
            created_at: parse_timestamp(&created_at)?,
            status: parse_status(&status)?,
            context: parse_json("execution context", &context_json)?,
            clarification: parse_json("clarification", &clarification_json)?,
            step_results,
            rollbacks,
            rollback_points,
        })
    }

    async fn list(&self, filter: &RunFilter) -> Result<Vec<RunSummary>, StoreError> {
        let mut sql = String::from(
            "SELECT run_id, plan_id, created_at, status, clarification_json, rollback_points,
                    (SELECT COUNT(*) FROM step_results
                     WHERE step_results.run_id = runs.run_id
                       AND step_results.status != 'awaiting_clarification') AS steps_recorded
             FROM runs",
        );
        let mut clauses = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(plan_id) = filter.plan_id {
            args.push(plan_id.to_string());
            clauses.push(format!("plan_id = ?{}", args.len()));
        }
        if let Some(status) = filter.status {
            args.push(status.as_str().to_string());
            clauses.push(format!("status = ?{}", args.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = lock(&self.connection)?;
        let mut stmt = conn.prepare(&sql).map_err(map_sqlite)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })
            .map_err(map_sqlite)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite)?;
        drop(stmt);
        drop(conn);

        rows.into_iter()
            .map(
                |(run_id, plan_id, created_at, status, clarification_json, points, steps)| {
                    let clarification: Clarification =
                        parse_json("clarification", &clarification_json)?;
                    Ok(RunSummary {
                        id: parse_uuid(&run_id)?,
                        plan_id: parse_uuid(&plan_id)?,
                        created_at: parse_timestamp(&created_at)?,
                        status: parse_status(&status)?,
                        steps_recorded: steps as usize,
                        rollback_points: points,
                        pending_since: clarification.pending_since(),
                    })
                },
            )
            .collect()
    }

    async fn audit(&self, run_id: Uuid) -> Result<Vec<StepResult>, StoreError> {
        let conn = lock(&self.connection)?;
        if !run_exists(&conn, run_id)? {
            return Err(StoreError::NotFound(run_id));
        }

        let mut stmt = conn
            .prepare(
                "SELECT step_index, tool_id, status, data_json, timestamp
                 FROM step_results WHERE run_id = ?1 ORDER BY rowid ASC;",
            )
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map(params![run_id.to_string()], result_row)
            .map_err(map_sqlite)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite)?;
        drop(stmt);
        drop(conn);

        rows.into_iter().map(build_step_result).collect()
    }
}

#[async_trait]
impl PlanStore for SqlitePlanStore {
    async fn put(&self, plan: &Plan) -> Result<(), StoreError> {
        debug!("Storing plan: {}", plan.id);
        let steps_json = serde_json::to_string(&plan.steps)?;
        let conn = lock(&self.connection)?;
        // Plans are immutable; re-storing the same id is a no-op
        conn.execute(
            "INSERT INTO plans (plan_id, query, created_at, steps_json, step_count)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (plan_id) DO NOTHING;",
            params![
                plan.id.to_string(),
                plan.query,
                plan.created_at.to_rfc3339(),
                steps_json,
                plan.step_count() as i64
            ],
        )
        .map_err(map_sqlite)?;
        Ok(())
    }

    async fn get(&self, plan_id: Uuid) -> Result<Plan, StoreError> {
        let conn = lock(&self.connection)?;
        let row = conn
            .query_row(
                "SELECT query, created_at, steps_json FROM plans WHERE plan_id = ?1;",
                params![plan_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(map_sqlite)?
            .ok_or(StoreError::NotFound(plan_id))?;
        drop(conn);

        let (query, created_at, steps_json) = row;
        let steps: Vec<Step> = parse_json("plan steps", &steps_json)?;
        Plan::with_id(plan_id, query, parse_timestamp(&created_at)?, steps)
            .map_err(|e| StoreError::Corrupt(format!("stored plan invalid: {e}")))
    }

    async fn list(&self) -> Result<Vec<PlanSummary>, StoreError> {
        let conn = lock(&self.connection)?;
        let mut stmt = conn
            .prepare(
                "SELECT plan_id, query, created_at, step_count
                 FROM plans ORDER BY created_at DESC;",
            )
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(map_sqlite)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sqlite)?;
        drop(stmt);
        drop(conn);

        rows.into_iter()
            .map(|(plan_id, query, created_at, step_count)| {
                Ok(PlanSummary {
                    id: parse_uuid(&plan_id)?,
                    query,
                    created_at: parse_timestamp(&created_at)?,
                    step_count: step_count as usize,
                })
            })
            .collect()
    }
}

fn lock(connection: &Arc<Mutex<Connection>>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    connection
        .lock()
        .map_err(|e| StoreError::Backend(format!("connection lock poisoned: {e}")))
}

fn insert_result(conn: &Connection, run_id: Uuid, result: &StepResult) -> Result<(), StoreError> {
    let data_json = serde_json::to_string(&result.data)?;
    conn.execute(
        "INSERT INTO step_results (run_id, step_index, tool_id, status, data_json, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            run_id.to_string(),
            result.step_index as i64,
            result.tool_id,
            result.status.as_str(),
            data_json,
            result.timestamp.to_rfc3339()
        ],
    )
    .map_err(map_sqlite)?;
    Ok(())
}

fn run_exists(conn: &Connection, run_id: Uuid) -> Result<bool, StoreError> {
    conn.query_row(
        "SELECT 1 FROM runs WHERE run_id = ?1;",
        params![run_id.to_string()],
        |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
    .map_err(map_sqlite)
}

type ResultRow = (i64, String, String, String, String);

fn result_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok((
        row.get::<_, i64>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, String>(3)?,
        row.get::<_, String>(4)?,
    ))
}

fn build_step_result(row: ResultRow) -> Result<StepResult, StoreError> {
    let (step_index, tool_id, status, data_json, timestamp) = row;
    let status = StepStatus::parse(&status)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown step status '{status}'")))?;
    Ok(StepResult {
        step_index: step_index as usize,
        tool_id,
        status,
        data: parse_json::<Value>("step result data", &data_json)?,
        timestamp: parse_timestamp(&timestamp)?,
    })
}

/// Constraint failures (including trigger aborts) are append conflicts;
/// everything else is a backend fault.
fn map_sqlite(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{text}': {e}")))
}

fn parse_uuid(text: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(text).map_err(|e| StoreError::Corrupt(format!("bad uuid '{text}': {e}")))
}

fn parse_status(text: &str) -> Result<RunStatus, StoreError> {
    RunStatus::parse(text)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown run status '{text}'")))
}

fn parse_json<T: DeserializeOwned>(what: &str, text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Corrupt(format!("bad {what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbook_core::clarification::ClarificationKind;
    use runbook_core::plan::{InputValue, StepInput};
    use runbook_core::run::{FailureKind, SkipReason, StepFailure};
    use serde_json::json;
    use tempfile::NamedTempFile;

    async fn database() -> SqliteDatabase {
        let db = SqliteDatabase::in_memory().unwrap();
        db.initialize_schema().await.unwrap();
        db
    }

    fn full_record() -> RunRecord {
        let context = ExecutionContext::new()
            .with_param("uploaded_file", json!("leads.csv"))
            .with_grant(1, json!(true));
        let mut record = RunRecord::new(Uuid::new_v4(), context);
        record.status = RunStatus::RolledBack;
        record.clarification = Clarification::pending(
            1,
            ClarificationKind::Authorization,
            "email credentials?",
        );
        record.step_results = vec![
            StepResult::success(0, "query_database", json!({"rows": [1, 2]})),
            StepResult::success(1, "send_email", json!("sent")),
        ];
        record.rollbacks = vec![RollbackEntry {
            target_step_index: 0,
            reason: "operator request".to_string(),
            undone: vec![1],
            skipped: vec![SkippedUndo {
                step_index: 1,
                tool_id: "send_email".to_string(),
                reason: SkipReason::Irreversible,
            }],
            partial: true,
            timestamp: Utc::now(),
        }];
        record.rollback_points = 1;
        record
    }

    #[tokio::test]
    async fn test_create_and_get_full_record() {
        let db = database().await;
        let store = db.run_store();
        let record = full_record();
        store.create_run(&record).await.unwrap();

        let fetched = store.get(record.id).await.unwrap();
        // Timestamps survive the RFC 3339 round trip at reduced precision,
        // so compare fields rather than whole records
        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.plan_id, record.plan_id);
        assert_eq!(fetched.status, record.status);
        assert_eq!(fetched.context, record.context);
        assert_eq!(fetched.clarification.pending_step(), Some(1));
        assert_eq!(fetched.rollback_points, 1);
        assert_eq!(fetched.step_results.len(), 2);
        assert_eq!(fetched.step_results[1].data, json!("sent"));
        assert_eq!(fetched.rollbacks.len(), 1);
        assert_eq!(fetched.rollbacks[0].undone, vec![1]);
        assert!(fetched.rollbacks[0].partial);

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.get(missing).await,
            Err(StoreError::NotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let db = database().await;
        let store = db.run_store();
        let record = RunRecord::new(Uuid::new_v4(), ExecutionContext::new());
        store.create_run(&record).await.unwrap();
        assert!(matches!(
            store.create_run(&record).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_append_order_enforced_by_trigger() {
        let db = database().await;
        let store = db.run_store();
        let record = RunRecord::new(Uuid::new_v4(), ExecutionContext::new());
        store.create_run(&record).await.unwrap();

        store
            .append_result(record.id, &StepResult::success(0, "echo", json!(1)))
            .await
            .unwrap();
        // Duplicate executed index
        assert!(matches!(
            store
                .append_result(record.id, &StepResult::success(0, "echo", json!(1)))
                .await,
            Err(StoreError::Conflict(_))
        ));
        // Gap
        assert!(matches!(
            store
                .append_result(record.id, &StepResult::success(2, "echo", json!(1)))
                .await,
            Err(StoreError::Conflict(_))
        ));
        store
            .append_result(record.id, &StepResult::success(1, "echo", json!(2)))
            .await
            .unwrap();

        let fetched = store.get(record.id).await.unwrap();
        assert_eq!(fetched.step_results.len(), 2);
        assert_eq!(fetched.next_step_index(), 2);
    }

    #[tokio::test]
    async fn test_history_rows_cannot_be_edited() {
        let db = database().await;
        let store = db.run_store();
        let record = RunRecord::new(Uuid::new_v4(), ExecutionContext::new());
        store.create_run(&record).await.unwrap();
        store
            .append_result(record.id, &StepResult::success(0, "echo", json!(1)))
            .await
            .unwrap();

        // Straight to the connection, bypassing the store API
        let conn = store.connection.lock().unwrap();
        let update = conn.execute("UPDATE step_results SET data_json = '{}';", []);
        assert!(update.unwrap_err().to_string().contains("append-only"));
        let delete = conn.execute("DELETE FROM step_results;", []);
        assert!(delete.unwrap_err().to_string().contains("append-only"));
    }

    #[tokio::test]
    async fn test_awaiting_marker_is_audit_only() {
        let db = database().await;
        let store = db.run_store();
        let record = RunRecord::new(Uuid::new_v4(), ExecutionContext::new());
        store.create_run(&record).await.unwrap();

        store
            .append_result(record.id, &StepResult::success(0, "query_database", json!([])))
            .await
            .unwrap();
        store
            .append_result(
                record.id,
                &StepResult::awaiting(
                    1,
                    "send_email",
                    ClarificationKind::Authorization,
                    "credentials?",
                ),
            )
            .await
            .unwrap();

        let fetched = store.get(record.id).await.unwrap();
        assert_eq!(fetched.step_results.len(), 1);

        let audit = store.audit(record.id).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[1].status, StepStatus::AwaitingClarification);

        // The real result lands at the suspended index after resume
        store
            .append_result(record.id, &StepResult::success(1, "send_email", json!("sent")))
            .await
            .unwrap();
        let audit = store.audit(record.id).await.unwrap();
        assert_eq!(audit.len(), 3);
        let fetched = store.get(record.id).await.unwrap();
        assert_eq!(fetched.step_results.len(), 2);
    }

    #[tokio::test]
    async fn test_status_clarification_context_updates() {
        let db = database().await;
        let store = db.run_store();
        let record = RunRecord::new(Uuid::new_v4(), ExecutionContext::new());
        store.create_run(&record).await.unwrap();

        store
            .set_status(record.id, RunStatus::Running)
            .await
            .unwrap();
        let clarification =
            Clarification::pending(0, ClarificationKind::Approval, "send it?");
        store
            .set_clarification(record.id, &clarification)
            .await
            .unwrap();
        let context = ExecutionContext::new().with_grant(0, json!(true));
        store.set_context(record.id, &context).await.unwrap();

        let fetched = store.get(record.id).await.unwrap();
        assert_eq!(fetched.status, RunStatus::Running);
        assert_eq!(fetched.clarification.pending_step(), Some(0));
        assert!(fetched.context.has_grant(0));

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.set_status(missing, RunStatus::Failed).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback_append_bumps_count() {
        let db = database().await;
        let store = db.run_store();
        let record = RunRecord::new(Uuid::new_v4(), ExecutionContext::new());
        store.create_run(&record).await.unwrap();

        let entry = RollbackEntry {
            target_step_index: 0,
            reason: "test".to_string(),
            undone: vec![2, 1],
            skipped: vec![],
            partial: false,
            timestamp: Utc::now(),
        };
        store.append_rollback(record.id, &entry).await.unwrap();
        store.append_rollback(record.id, &entry).await.unwrap();

        let fetched = store.get(record.id).await.unwrap();
        assert_eq!(fetched.rollback_points, 2);
        assert_eq!(fetched.rollbacks.len(), 2);
        assert_eq!(fetched.rollbacks[0].undone, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_list_filters_and_ordering() {
        let db = database().await;
        let store = db.run_store();
        let plan_id = Uuid::new_v4();

        let mut first = RunRecord::new(plan_id, ExecutionContext::new());
        first.created_at = Utc::now() - chrono::Duration::seconds(60);
        first.status = RunStatus::Completed;
        let mut second = RunRecord::new(plan_id, ExecutionContext::new());
        second.status = RunStatus::AwaitingClarification;
        second.clarification =
            Clarification::pending(0, ClarificationKind::Authorization, "creds?");
        let mut other = RunRecord::new(Uuid::new_v4(), ExecutionContext::new());
        other.created_at = Utc::now() - chrono::Duration::seconds(30);

        store.create_run(&first).await.unwrap();
        store.create_run(&second).await.unwrap();
        store.create_run(&other).await.unwrap();

        let all = store.list(&RunFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[2].id, first.id);
        assert!(all[0].pending_since.is_some());
        assert!(all[2].pending_since.is_none());

        let by_plan = store
            .list(&RunFilter {
                plan_id: Some(plan_id),
                ..RunFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_plan.len(), 2);

        let suspended = store
            .list(&RunFilter {
                status: Some(RunStatus::AwaitingClarification),
                ..RunFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(suspended.len(), 1);
        assert_eq!(suspended[0].id, second.id);

        let limited = store
            .list(&RunFilter {
                limit: Some(2),
                ..RunFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_plan_round_trip_and_idempotent_put() {
        let db = database().await;
        let store = db.plan_store();
        let plan = Plan::new(
            "query the database and email the result",
            vec![
                Step::new(
                    "query customers",
                    "query_database",
                    vec![StepInput::new("query", InputValue::literal("SELECT 1"))],
                    "rows",
                ),
                Step::new(
                    "email the rows",
                    "send_email",
                    vec![StepInput::new("body", InputValue::step_output(0))],
                    "delivery",
                )
                .with_requires_auth(true),
            ],
        )
        .unwrap();

        store.put(&plan).await.unwrap();
        store.put(&plan).await.unwrap();

        let fetched = store.get(plan.id).await.unwrap();
        assert_eq!(fetched.id, plan.id);
        assert_eq!(fetched.query, plan.query);
        assert_eq!(fetched.steps, plan.steps);

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].step_count, 2);

        assert!(matches!(
            store.get(Uuid::new_v4()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reopen_preserves_state() {
        let file = NamedTempFile::new().unwrap();
        let record = {
            let db = SqliteDatabase::new(file.path()).unwrap();
            db.initialize_schema().await.unwrap();
            let store = db.run_store();
            let record = RunRecord::new(Uuid::new_v4(), ExecutionContext::new());
            store.create_run(&record).await.unwrap();
            store
                .append_result(record.id, &StepResult::success(0, "echo", json!("hello")))
                .await
                .unwrap();
            store
                .set_status(record.id, RunStatus::Completed)
                .await
                .unwrap();
            record
        };

        let db = SqliteDatabase::new(file.path()).unwrap();
        db.initialize_schema().await.unwrap();
        let fetched = db.run_store().get(record.id).await.unwrap();
        assert_eq!(fetched.status, RunStatus::Completed);
        assert_eq!(fetched.step_results.len(), 1);
        assert_eq!(fetched.step_results[0].data, json!("hello"));
    }

    #[tokio::test]
    async fn test_failure_payload_round_trips() {
        let db = database().await;
        let store = db.run_store();
        let record = RunRecord::new(Uuid::new_v4(), ExecutionContext::new());
        store.create_run(&record).await.unwrap();

        let failure = StepFailure::new(FailureKind::ToolNotFound, "tool 'x' is not registered");
        store
            .append_result(record.id, &StepResult::failure(0, "x", &failure))
            .await
            .unwrap();

        let fetched = store.get(record.id).await.unwrap();
        assert_eq!(
            fetched.step_results[0].failure_kind(),
            Some(FailureKind::ToolNotFound)
        );
    }
}
