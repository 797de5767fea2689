use std::env;

use color_eyre::Result;
use gitdeps_core::{
    sync_dependencies, CommandStatus, Config, ExecutionOutcome, SyncContext, SyncError, SyncReport,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "gitdeps=info,gitdeps_core=info,gitdeps_domain=info";

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let (outcome, report) = match Config::from_env() {
        Ok(config) => run(&config),
        Err(err) => (ExecutionOutcome::from(&SyncError::Configuration(err)), None),
    };
    emit_output(&outcome, report.as_ref())?;

    let code = outcome.exit_code();
    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing() {
    let filter = env::var("GITDEPS_LOG")
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run(config: &Config) -> (ExecutionOutcome, Option<SyncReport>) {
    match sync_dependencies(config, &SyncContext::new()) {
        Ok(report) => {
            let details = serde_json::to_value(&report).unwrap_or_default();
            let outcome = ExecutionOutcome::success(summarize(&report), details);
            (outcome, Some(report))
        }
        Err(err) => {
            tracing::error!(code = err.code(), "{err}");
            (ExecutionOutcome::from(&err), None)
        }
    }
}

/// One line per file a dry run would touch.
fn planned_changes(report: &SyncReport) -> Vec<String> {
    if !report.dry_run {
        return Vec::new();
    }
    let added = report.added.iter().map(|name| format!("Added: {name}"));
    let updated = report.updated.iter().map(|name| format!("Updated: {name}"));
    let removed = report.removed.iter().map(|name| format!("Removed: {name}"));
    added.chain(updated).chain(removed).collect()
}

fn summarize(report: &SyncReport) -> String {
    let mut message = if report.dry_run {
        format!(
            "dry run: {} to add, {} to update, {} to remove",
            report.added.len(),
            report.updated.len(),
            report.removed.len()
        )
    } else if report.is_noop() {
        "dependencies are up to date".to_string()
    } else {
        format!(
            "synced {} files from {} packs ({:.1} MiB), removed {}",
            report.files_downloaded,
            report.packs_downloaded,
            report.bytes_downloaded as f64 / (1024.0 * 1024.0),
            report.removed.len()
        )
    };
    if !report.modified_kept.is_empty() {
        message.push_str(&format!(
            "; kept {} locally modified files",
            report.modified_kept.len()
        ));
    }
    message
}

fn json_output() -> bool {
    env::var("GITDEPS_JSON").is_ok_and(|raw| {
        matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn emit_output(outcome: &ExecutionOutcome, report: Option<&SyncReport>) -> Result<()> {
    if json_output() {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    for line in report.map(planned_changes).unwrap_or_default() {
        println!("{line}");
    }
    match outcome.status {
        CommandStatus::Ok => println!("gitdeps ▸ {}", outcome.message),
        CommandStatus::UserError | CommandStatus::Failure => {
            eprintln!("gitdeps ▸ {}", outcome.message);
        }
    }
    Ok(())
}
