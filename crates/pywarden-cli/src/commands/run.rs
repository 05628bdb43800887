use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use pywarden_core::{ConsumerId, ExecutionOptions, ExecutionResult, OutputStream};
use runtime_manager::ConsumerEnvironment;

use crate::context::CliContext;
use crate::ExecArgs;

pub enum RunTarget {
    Script { script: PathBuf, args: Vec<String> },
    Code(String),
}

pub async fn execute(ctx: &CliContext, exec: ExecArgs, target: RunTarget) -> Result<()> {
    let options = prepare(ctx, exec).await?;
    let result = match &target {
        RunTarget::Script { script, args } => {
            ctx.manager.run_script(script, args, &options).await?
        }
        RunTarget::Code(code) => ctx.manager.run_code(code, &options).await?,
    };
    finish(&result)
}

pub async fn spawn(
    ctx: &CliContext,
    exec: ExecArgs,
    script: PathBuf,
    args: Vec<String>,
) -> Result<()> {
    let options = prepare(ctx, exec).await?;
    let mut handle = ctx.manager.spawn_long(&script, &args, &options).await?;
    eprintln!(
        "Started {} (run {}, pid {})",
        script.display(),
        handle.run_id(),
        handle.pid().map(|pid| pid.to_string()).unwrap_or_else(|| "?".to_string())
    );

    let finished = tokio::select! {
        status = handle.wait() => Some(status),
        _ = tokio::signal::ctrl_c() => None,
    };
    let status = match finished {
        Some(status) => status.context("wait for process")?,
        None => {
            tracing::info!(run_id = %handle.run_id(), "interrupted, stopping process");
            handle.kill().await.context("stop process")?;
            handle.wait().await.context("wait for process")?
        }
    };
    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}

/// Readies the runtime and, when the consumer brings a manifest, its own
/// virtual environment.
async fn prepare(ctx: &CliContext, mut exec: ExecArgs) -> Result<ExecutionOptions> {
    let progress = ctx.progress();
    let requirements = exec.requirements.take();
    let mut options = build_options(exec)?;
    match (options.consumer.clone(), requirements) {
        (Some(consumer), Some(manifest)) => {
            let env = ctx
                .manager
                .resolve_consumer_environment(&consumer, Some(&manifest), &progress)
                .await?;
            apply_environment(&mut options, &env);
        }
        _ => ctx.manager.ensure_ready(&progress).await?,
    }
    Ok(options)
}

fn apply_environment(options: &mut ExecutionOptions, env: &ConsumerEnvironment) {
    options.interpreter_override = Some(env.interpreter.clone());
    options.environment_override = Some(env.environment.clone());
    options.consumer = None;
    let mut search_paths = env.search_paths.clone();
    search_paths.append(&mut options.extra_search_paths);
    options.extra_search_paths = search_paths;
}

fn build_options(exec: ExecArgs) -> Result<ExecutionOptions> {
    let mut options = ExecutionOptions::default().with_output_callback(forward_output);
    if let Some(consumer) = exec.consumer {
        let consumer: ConsumerId = consumer.parse()?;
        options = options.with_consumer(consumer);
    }
    if let Some(cwd) = exec.cwd {
        options = options.with_working_directory(cwd);
    }
    if let Some(ms) = exec.timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    for (key, value) in exec.env {
        options = options.with_env(key, value);
    }
    options.extra_search_paths = exec.search_paths;
    Ok(options)
}

fn forward_output(chunk: &str, stream: OutputStream) {
    match stream {
        OutputStream::Stdout => {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(chunk.as_bytes());
            let _ = out.flush();
        }
        OutputStream::Stderr => {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(chunk.as_bytes());
            let _ = err.flush();
        }
    }
}

/// Output was already streamed; only the outcome is left to report.
fn finish(result: &ExecutionResult) -> Result<()> {
    if result.success {
        return Ok(());
    }
    if let Some(error) = &result.error {
        eprintln!("pywarden: {error}");
    }
    std::process::exit(result.exit_code.filter(|code| *code != 0).unwrap_or(1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_args_map_onto_options() {
        let exec = ExecArgs {
            consumer: Some("tool-a".to_string()),
            cwd: Some(PathBuf::from("/work")),
            timeout_ms: Some(250),
            env: vec![("MODE".to_string(), "fast".to_string())],
            search_paths: vec![PathBuf::from("/extra")],
            requirements: None,
        };
        let options = build_options(exec).unwrap();
        assert_eq!(options.consumer.unwrap().as_str(), "tool-a");
        assert_eq!(options.working_directory, Some(PathBuf::from("/work")));
        assert_eq!(options.timeout, Some(Duration::from_millis(250)));
        assert_eq!(
            options.environment_variables.get("MODE").map(String::as_str),
            Some("fast")
        );
        assert_eq!(options.extra_search_paths, vec![PathBuf::from("/extra")]);
        assert!(options.output_callback.is_some());
    }

    #[test]
    fn invalid_consumer_is_rejected() {
        let exec = ExecArgs {
            consumer: Some("../escape".to_string()),
            ..ExecArgs::default()
        };
        assert!(build_options(exec).is_err());
    }

    #[test]
    fn own_environment_replaces_the_consumer_search_path() {
        let exec = ExecArgs {
            consumer: Some("tool-a".to_string()),
            search_paths: vec![PathBuf::from("/extra")],
            ..ExecArgs::default()
        };
        let mut options = build_options(exec).unwrap();
        let env = ConsumerEnvironment {
            consumer_id: "tool-a".parse().unwrap(),
            interpreter: PathBuf::from("/data/tool-envs/tool-a/.venv/bin/python"),
            environment: PathBuf::from("/data/tool-envs/tool-a/.venv"),
            search_paths: Vec::new(),
        };
        apply_environment(&mut options, &env);

        assert!(options.consumer.is_none());
        assert_eq!(options.interpreter_override, Some(env.interpreter.clone()));
        assert_eq!(options.environment_override, Some(env.environment.clone()));
        assert_eq!(options.extra_search_paths, vec![PathBuf::from("/extra")]);
    }
}
