use std::path::Path;

use anyhow::Result;

use progress::redact::redact_path;
use pywarden_core::RuntimeStatus;

use crate::context::CliContext;

pub async fn execute(ctx: &CliContext, json: bool) -> Result<()> {
    let status = ctx.manager.get_status().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

pub async fn ensure(ctx: &CliContext) -> Result<()> {
    ctx.manager.ensure_ready(&ctx.progress()).await?;
    let status = ctx.manager.get_status().await;
    print_status(&status);
    Ok(())
}

fn print_status(status: &RuntimeStatus) {
    let state = if status.is_ready() { "ready" } else { "not ready" };
    println!("Runtime: {state}");
    println!(
        "Package tool: {}",
        describe(status.tool_available, status.tool_version.as_deref(), status.tool_path.as_deref())
    );
    println!(
        "Interpreter: {}",
        describe(
            status.interpreter_installed,
            status.interpreter_version.as_deref(),
            status.interpreter_path.as_deref()
        )
    );
    println!(
        "Environment: {}",
        describe(status.environment_exists, None, status.environment_path.as_deref())
    );
}

fn describe(present: bool, version: Option<&str>, path: Option<&Path>) -> String {
    let mut line = if present { "ok".to_string() } else { "missing".to_string() };
    if let Some(version) = version {
        line.push_str(&format!(" {version}"));
    }
    if let Some(path) = path {
        line.push_str(&format!(" ({})", redact_path(path)));
    }
    line
}
