//! CLI mode dispatch
//!
//! Dispatches to the CLI mode handlers:
//! - serve: HTTP API server
//! - plan: generate and store a plan
//! - run / resume / rollback: drive a run through its lifecycle
//! - history / show / audit: inspect recorded runs
//! - tools: list the registry

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use runbook_api::{ApiConfig, ApiServer, ApiState};
use runbook_core::clarification::{Clarification, Resolution};
use runbook_core::config::{ConfigManager, RunbookConfig};
use runbook_core::context::ExecutionContext;
use runbook_core::engine::Engine;
use runbook_core::planner::Planner;
use runbook_core::registry::ToolRegistry;
use runbook_core::rollback::RollbackManager;
use runbook_core::run::{RunRecord, RunStatus, StepStatus};
use runbook_core::store::{
    MemoryPlanStore, MemoryRunStore, PlanStore, RunFilter, RunStore,
};
use runbook_store::SqliteDatabase;
use runbook_tools::{default_registry, TemplatePlanner};

use crate::cli::{Args, Error, Mode, Result, EXIT_FAILURE, EXIT_STORE_ERROR, EXIT_SUCCESS};

/// Exit code wrapper for CLI operations
pub type ExitCode = i32;

/// Engine, stores, and planner wired per the loaded config
struct Components {
    registry: Arc<ToolRegistry>,
    runs: Arc<dyn RunStore>,
    plans: Arc<dyn PlanStore>,
    engine: Arc<Engine>,
    rollback: Arc<RollbackManager>,
    planner: Arc<dyn Planner>,
}

/// Run CLI mode and return exit code
///
/// This is the main entry point for CLI mode dispatch.
/// Called from main() after argument parsing.
pub async fn run_cli_mode(args: Args) -> ExitCode {
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_FAILURE;
        }
    };

    let components = match build_components(&config).await {
        Ok(components) => components,
        Err(e) => {
            eprintln!("Error: {}", e);
            return match e {
                Error::Store(_) => EXIT_STORE_ERROR,
                _ => EXIT_FAILURE,
            };
        }
    };

    let mode = args.mode.clone().unwrap_or(Mode::Serve);

    match run_mode(mode, &args, &config, components).await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            match e {
                Error::Store(_) => EXIT_STORE_ERROR,
                _ => EXIT_FAILURE,
            }
        }
    }
}

/// Load configuration from the explicit path or the platform default.
fn load_config(path: Option<&str>) -> Result<RunbookConfig> {
    let manager = match path {
        Some(path) => ConfigManager::with_path(path)?,
        None => ConfigManager::new()?,
    };
    manager.validate_config()?;
    Ok(manager.get_config().clone())
}

/// Build the engine stack on the configured store.
async fn build_components(config: &RunbookConfig) -> Result<Components> {
    let registry = Arc::new(default_registry()?);

    let (runs, plans): (Arc<dyn RunStore>, Arc<dyn PlanStore>) = match &config.store.path {
        Some(path) => {
            let database = SqliteDatabase::new(path)?;
            database.initialize_schema().await?;
            (
                Arc::new(database.run_store()),
                Arc::new(database.plan_store()),
            )
        }
        None => (MemoryRunStore::shared(), MemoryPlanStore::shared()),
    };

    let engine = Arc::new(Engine::new(
        Arc::clone(&registry),
        Arc::clone(&runs),
        Arc::clone(&plans),
    ));
    let rollback = Arc::new(RollbackManager::new(
        Arc::clone(&registry),
        Arc::clone(&runs),
        engine.locks(),
    ));
    let planner: Arc<dyn Planner> = Arc::new(TemplatePlanner::new(Arc::clone(&registry)));

    Ok(Components {
        registry,
        runs,
        plans,
        engine,
        rollback,
        planner,
    })
}

/// Run specific CLI mode
async fn run_mode(
    mode: Mode,
    args: &Args,
    config: &RunbookConfig,
    components: Components,
) -> Result<()> {
    match mode {
        Mode::Serve => run_serve_mode(config, components).await,
        Mode::Plan { query } => run_plan_mode(&components, &query, args).await,
        Mode::Run { plan_id } => run_run_mode(&components, &plan_id, args).await,
        Mode::Resume { run_id } => run_resume_mode(&components, &run_id, args).await,
        Mode::Rollback { run_id } => run_rollback_mode(&components, &run_id, args).await,
        Mode::History => run_history_mode(&components, config, args).await,
        Mode::Show { run_id } => run_show_mode(&components, &run_id, args).await,
        Mode::Audit { run_id } => run_audit_mode(&components, &run_id, args).await,
        Mode::Tools => run_tools_mode(&components, args),
    }
}

/// Run serve mode: hand the engine stack to the HTTP server
async fn run_serve_mode(config: &RunbookConfig, components: Components) -> Result<()> {
    let api_config = ApiConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };
    let state = ApiState {
        engine: components.engine,
        rollback: components.rollback,
        planner: components.planner,
        registry: components.registry,
        runs: components.runs,
        plans: components.plans,
        stale_after_secs: config.clarification_stale_after_secs,
    };

    ApiServer::new(api_config, state).start().await?;
    Ok(())
}

/// Run plan mode: generate a plan from a query and store it
async fn run_plan_mode(components: &Components, query: &str, args: &Args) -> Result<()> {
    let plan = components
        .planner
        .generate(query, args.file_ref.as_deref())
        .await?;
    components.plans.put(&plan).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Plan {} ({} steps)", plan.id, plan.step_count());
    for (index, step) in plan.steps.iter().enumerate() {
        let auth = if step.requires_auth {
            " [requires approval]"
        } else {
            ""
        };
        println!(
            "  {}. {} -> {} via {}{}",
            index, step.task, step.output_name, step.tool_id, auth
        );
    }
    println!("Execute with: runbook run {}", plan.id);
    Ok(())
}

/// Run run mode: execute a stored plan with the given context
async fn run_run_mode(components: &Components, plan_id: &str, args: &Args) -> Result<()> {
    let plan_id = parse_uuid(plan_id)?;

    let mut context = ExecutionContext::new();
    for (name, value) in &args.params {
        context = context.with_param(name, param_value(value));
    }
    for step in &args.grants {
        context = context.with_grant(*step, Value::Bool(true));
    }

    let record = components.engine.run_stored(plan_id, context).await?;
    print_record(&record, args.json)
}

/// Run resume mode: settle a pending clarification
async fn run_resume_mode(components: &Components, run_id: &str, args: &Args) -> Result<()> {
    let run_id = parse_uuid(run_id)?;
    let resolution = if args.deny {
        Resolution::Deny {
            reason: args.reason.clone(),
        }
    } else {
        Resolution::Approve { value: None }
    };

    let record = components.engine.resume(run_id, resolution).await?;
    print_record(&record, args.json)
}

/// Run rollback mode: undo recorded effects back to a target step
async fn run_rollback_mode(components: &Components, run_id: &str, args: &Args) -> Result<()> {
    let run_id = parse_uuid(run_id)?;
    let target = args.target.ok_or_else(|| {
        Error::MissingArgument("rollback mode requires --target <step-index>".to_string())
    })?;
    let reason = args
        .reason
        .clone()
        .unwrap_or_else(|| "requested via cli".to_string());

    let record = components.rollback.rollback(run_id, target, reason).await?;
    print_record(&record, args.json)
}

/// Run history mode: list recorded runs
async fn run_history_mode(
    components: &Components,
    config: &RunbookConfig,
    args: &Args,
) -> Result<()> {
    let mut filter = RunFilter::default();
    if let Some(status) = &args.status {
        filter.status = Some(
            RunStatus::parse(status)
                .ok_or_else(|| Error::InvalidArgs(format!("Unknown status: {}", status)))?,
        );
    }
    filter.limit = args.limit;

    let summaries = components.runs.list(&filter).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }
    for summary in &summaries {
        let mut line = format!(
            "{}  {:<22}  {} steps  {}",
            summary.id,
            summary.status.as_str(),
            summary.steps_recorded,
            summary.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(since) = summary.pending_since {
            line.push_str(&format!(
                "  awaiting since {}",
                since.format("%Y-%m-%d %H:%M:%S")
            ));
            if is_stale(since, config.clarification_stale_after_secs) {
                line.push_str(" (stale)");
            }
        }
        println!("{}", line);
    }
    Ok(())
}

/// Run show mode: print one run record
async fn run_show_mode(components: &Components, run_id: &str, args: &Args) -> Result<()> {
    let run_id = parse_uuid(run_id)?;
    let record = components.runs.get(run_id).await?;
    print_record(&record, args.json)
}

/// Run audit mode: print every appended row, markers included
async fn run_audit_mode(components: &Components, run_id: &str, args: &Args) -> Result<()> {
    let run_id = parse_uuid(run_id)?;
    let rows = components.runs.audit(run_id).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Audit trail for run {} ({} rows)", run_id, rows.len());
    for row in &rows {
        println!(
            "  {}  step {}  {:<22}  {}",
            row.timestamp.format("%Y-%m-%d %H:%M:%S"),
            row.step_index,
            row.status.as_str(),
            row.tool_id
        );
    }
    Ok(())
}

/// Run tools mode: list the registry with capability flags
fn run_tools_mode(components: &Components, args: &Args) -> Result<()> {
    let specs = components.registry.specs();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }

    for spec in &specs {
        let mut flags = Vec::new();
        if spec.requires_auth {
            flags.push("requires approval");
        }
        if spec.reversible {
            flags.push("reversible");
        }
        let suffix = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "{:<22} {:<10} {}{}",
            spec.id,
            spec.category.as_str(),
            spec.description,
            suffix
        );
    }
    Ok(())
}

/// Print a run record, either as pretty JSON or as a short human summary.
fn print_record(record: &RunRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    println!("Run {} [{}]", record.id, record.status.as_str());
    for result in &record.step_results {
        if result.status == StepStatus::Error {
            let message = result
                .data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown failure");
            println!(
                "  step {} {} ({}): {}",
                result.step_index,
                result.status.as_str(),
                result.tool_id,
                message
            );
        } else {
            println!(
                "  step {} {} ({})",
                result.step_index,
                result.status.as_str(),
                result.tool_id
            );
        }
    }
    if let Clarification::Pending { question, .. } = &record.clarification {
        println!("  awaiting: {}", question);
        println!("  settle with: runbook resume {} [--deny]", record.id);
    }
    if record.status == RunStatus::Completed {
        if let Some(output) = record.output_summary() {
            println!("  output: {}", output);
        }
    }
    for entry in &record.rollbacks {
        let partial = if entry.partial { " (partial)" } else { "" };
        println!(
            "  rollback to step {}: {} undone, {} skipped{}",
            entry.target_step_index,
            entry.undone.len(),
            entry.skipped.len(),
            partial
        );
    }
    Ok(())
}

fn parse_uuid(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| Error::InvalidArgs(format!("Invalid id '{}': {}", text, e)))
}

/// CLI parameter values that parse as JSON become typed values;
/// everything else stays a string.
fn param_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn is_stale(since: chrono::DateTime<Utc>, stale_after_secs: Option<u64>) -> bool {
    match stale_after_secs {
        Some(secs) => {
            let threshold = chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX));
            Utc::now() - since > threshold
        }
        None => false,
    }
}
