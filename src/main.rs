//! Runbook CLI
//!
//! Front end for the plan lifecycle engine: generate plans from
//! natural-language queries, execute and resume runs, roll back
//! recorded effects, inspect history, and serve the HTTP API.

use runbook::cli::{parse_args, run_cli_mode};

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let args: Vec<String> = std::env::args().collect();

    let parsed = match parse_args(args) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Handle --version flag
    if parsed.show_version {
        println!("Runbook v{}", env!("CARGO_PKG_VERSION"));
        return;
    }

    // Handle --help flag
    if parsed.show_help {
        print_help();
        return;
    }

    init_tracing();

    let exit_code = run_cli_mode(parsed).await;
    std::process::exit(exit_code);
}

/// Log to stderr, filtered by RUNBOOK_LOG (default: info).
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("RUNBOOK_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print help message
fn print_help() {
    println!("Runbook v{} - Plan Lifecycle Engine", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("    runbook [options] [mode] [mode-args]");
    println!();
    println!("MODES:");
    println!("    (none)             Serve mode (default)");
    println!("    serve              Start the HTTP API server");
    println!("    plan <query>       Generate a plan from a natural-language query");
    println!("    run <plan-id>      Execute a stored plan");
    println!("    resume <run-id>    Resume a suspended run (approves unless --deny)");
    println!("    rollback <run-id>  Undo recorded effects (--target required)");
    println!("    history            List recent runs");
    println!("    show <run-id>      Show a run record");
    println!("    audit <run-id>     Show the run's full appended history");
    println!("    tools              List registered tools");
    println!();
    println!("OPTIONS:");
    println!("    --config <path>    Config file (default: platform config dir)");
    println!("    --file-ref <path>  Data source reference (plan mode)");
    println!("    --param <k=v>      Context parameter, repeatable (run mode)");
    println!("    --grant <n>        Pre-approve step n, repeatable (run mode)");
    println!("    --deny             Deny instead of approve (resume mode)");
    println!("    --reason <text>    Reason for a denial or rollback");
    println!("    --target <n>       Rollback target step index");
    println!("    --status <s>       Filter history by run status");
    println!("    --limit <n>        Limit history rows");
    println!("    --json             Output JSON (for scripting)");
    println!("    --version          Show version information");
    println!("    --help             Show this help message");
    println!();
    println!("EXAMPLES:");
    println!("    runbook plan email the sales report to the team");
    println!("    runbook --param recipient=ops@example.com run <plan-id>");
    println!("    runbook resume <run-id>");
    println!("    runbook --deny --reason \"wrong recipient\" resume <run-id>");
    println!("    runbook --target 0 rollback <run-id>");
    println!("    runbook --status awaiting_clarification history");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUNBOOK_LOG                Log filter (default: info)");
    println!("    RUNBOOK_STORE_PATH         SQLite database path override");
    println!("    RUNBOOK_API_HOST           API bind host override");
    println!("    RUNBOOK_API_PORT           API bind port override");
}
