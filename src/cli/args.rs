//! CLI argument parsing
//!
//! Parses command-line arguments:
//! - Modes: serve, plan, run, resume, rollback, history, show, audit, tools
//! - Options: --config, --file-ref, --param, --grant, --deny, --reason,
//!   --target, --status, --limit, --json, --version, --help

use crate::cli::{Error, Result};

/// Parsed CLI arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    /// CLI mode (or None for the default server mode)
    pub mode: Option<Mode>,

    /// Config file path (explicitly set or None for the platform default)
    pub config: Option<String>,

    /// Data source reference handed to the planner (plan mode)
    pub file_ref: Option<String>,

    /// Context parameters as name/value pairs (run mode)
    pub params: Vec<(String, String)>,

    /// Step indices granted up front (run mode)
    pub grants: Vec<usize>,

    /// Deny instead of approve (resume mode)
    pub deny: bool,

    /// Reason text (resume denial, rollback)
    pub reason: Option<String>,

    /// Rollback target step index (rollback mode)
    pub target: Option<usize>,

    /// Status filter (history mode)
    pub status: Option<String>,

    /// Row limit (history mode)
    pub limit: Option<usize>,

    /// JSON output flag
    pub json: bool,

    /// Show version and exit
    pub show_version: bool,

    /// Show help and exit
    pub show_help: bool,
}

/// CLI modes
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    /// Start the HTTP API server
    Serve,

    /// Generate a plan from a natural-language query
    Plan { query: String },

    /// Execute a stored plan
    Run { plan_id: String },

    /// Resume a suspended run
    Resume { run_id: String },

    /// Roll a run back to a target step
    Rollback { run_id: String },

    /// List recent runs
    History,

    /// Show one run record
    Show { run_id: String },

    /// Show the full appended history of a run
    Audit { run_id: String },

    /// List registered tools
    Tools,
}

/// Parse CLI arguments from std::env::args()
///
/// Grammar:
/// ```text
/// runbook [options] <mode> [mode-args]
///
/// MODES:
///   (no mode)         serve
///   serve             start the HTTP API server
///   plan <query>      generate and store a plan
///   run <plan-id>     execute a stored plan
///   resume <run-id>   resume a suspended run
///   rollback <run-id> roll back recorded effects (requires --target)
///   history           list recent runs
///   show <run-id>     show a run record
///   audit <run-id>    show the run's appended history
///   tools             list registered tools
/// ```
pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    let mut iter = args.into_iter();
    let _program = iter.next(); // Skip program name

    let mut args_out = Args {
        mode: None,
        config: None,
        file_ref: None,
        params: Vec::new(),
        grants: Vec::new(),
        deny: false,
        reason: None,
        target: None,
        status: None,
        limit: None,
        json: false,
        show_version: false,
        show_help: false,
    };

    let mut positional = Vec::new();

    // First pass: collect flags and positional args
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--version" | "-v" => {
                args_out.show_version = true;
            }
            "--help" | "-h" => {
                args_out.show_help = true;
            }
            "--json" => {
                args_out.json = true;
            }
            "--deny" => {
                args_out.deny = true;
            }
            "--config" => {
                let path = iter.next().ok_or_else(|| {
                    Error::MissingArgument("--config requires a path".to_string())
                })?;
                args_out.config = Some(path);
            }
            "--file-ref" => {
                let path = iter.next().ok_or_else(|| {
                    Error::MissingArgument("--file-ref requires a path".to_string())
                })?;
                args_out.file_ref = Some(path);
            }
            "--param" => {
                let pair = iter.next().ok_or_else(|| {
                    Error::MissingArgument("--param requires name=value".to_string())
                })?;
                let (name, value) = pair.split_once('=').ok_or_else(|| {
                    Error::InvalidArgs(format!("--param expects name=value, got '{}'", pair))
                })?;
                args_out.params.push((name.to_string(), value.to_string()));
            }
            "--grant" => {
                let index = iter.next().ok_or_else(|| {
                    Error::MissingArgument("--grant requires a step index".to_string())
                })?;
                let index = index.parse().map_err(|_| {
                    Error::InvalidArgs(format!("--grant expects a step index, got '{}'", index))
                })?;
                args_out.grants.push(index);
            }
            "--reason" => {
                let text = iter.next().ok_or_else(|| {
                    Error::MissingArgument("--reason requires text".to_string())
                })?;
                args_out.reason = Some(text);
            }
            "--target" => {
                let index = iter.next().ok_or_else(|| {
                    Error::MissingArgument("--target requires a step index".to_string())
                })?;
                let index = index.parse().map_err(|_| {
                    Error::InvalidArgs(format!("--target expects a step index, got '{}'", index))
                })?;
                args_out.target = Some(index);
            }
            "--status" => {
                let status = iter.next().ok_or_else(|| {
                    Error::MissingArgument("--status requires a run status".to_string())
                })?;
                args_out.status = Some(status);
            }
            "--limit" => {
                let limit = iter.next().ok_or_else(|| {
                    Error::MissingArgument("--limit requires a count".to_string())
                })?;
                let limit = limit.parse().map_err(|_| {
                    Error::InvalidArgs(format!("--limit expects a count, got '{}'", limit))
                })?;
                args_out.limit = Some(limit);
            }
            arg if arg.starts_with("--") => {
                return Err(Error::InvalidArgs(format!("Unknown option: {}", arg)));
            }
            other => {
                positional.push(other.to_string());
            }
        }
    }

    // Second pass: parse mode from positional args
    if !positional.is_empty() {
        args_out.mode = Some(parse_mode(&mut positional.into_iter())?);
    }

    Ok(args_out)
}

/// Parse mode from positional arguments
fn parse_mode<I: Iterator<Item = String>>(iter: &mut I) -> Result<Mode> {
    let first = iter
        .next()
        .ok_or_else(|| Error::InvalidArgs("Expected mode argument".to_string()))?;

    match first.as_str() {
        "serve" => Ok(Mode::Serve),
        "plan" => {
            // plan mode joins the remaining args into the query
            let query_parts: Vec<_> = iter.collect();
            if query_parts.is_empty() {
                return Err(Error::MissingArgument(
                    "plan mode requires a query".to_string(),
                ));
            }
            Ok(Mode::Plan {
                query: query_parts.join(" "),
            })
        }
        "run" => Ok(Mode::Run {
            plan_id: required_id(iter, "run mode requires a plan id")?,
        }),
        "resume" => Ok(Mode::Resume {
            run_id: required_id(iter, "resume mode requires a run id")?,
        }),
        "rollback" => Ok(Mode::Rollback {
            run_id: required_id(iter, "rollback mode requires a run id")?,
        }),
        "history" => Ok(Mode::History),
        "show" => Ok(Mode::Show {
            run_id: required_id(iter, "show mode requires a run id")?,
        }),
        "audit" => Ok(Mode::Audit {
            run_id: required_id(iter, "audit mode requires a run id")?,
        }),
        "tools" => Ok(Mode::Tools),
        other => Err(Error::UnknownMode(other.to_string())),
    }
}

fn required_id<I: Iterator<Item = String>>(iter: &mut I, message: &str) -> Result<String> {
    iter.next()
        .ok_or_else(|| Error::MissingArgument(message.to_string()))
}
