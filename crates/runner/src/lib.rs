use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use pywarden_core::paths::env_interpreter;
use pywarden_core::{ExecutionOptions, ExecutionResult, OutputStream, RunId, RuntimeError};

pub mod capture;
pub mod command;
pub mod env;
pub mod lifecycle;

use capture::{spawn_tee, take_buffer, SharedBuffer};
use command::{Invocation, RunnerCommand};
pub use lifecycle::ProcessHandle;
use lifecycle::{drain, DRAIN_GRACE};

/// Runs scripts, inline code and long-lived processes against one
/// environment, with per-consumer isolated directories on the search path.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    environment: PathBuf,
    isolated_root: PathBuf,
    default_timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub fn new(environment: impl Into<PathBuf>, isolated_root: impl Into<PathBuf>) -> Self {
        Self {
            environment: environment.into(),
            isolated_root: isolated_root.into(),
            default_timeout: None,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn environment(&self) -> &Path {
        &self.environment
    }

    pub fn interpreter(&self) -> PathBuf {
        env_interpreter(&self.environment)
    }

    /// Search-path entries an execution with `options` gets ahead of any
    /// inherited `PYTHONPATH`.
    pub fn search_paths(&self, options: &ExecutionOptions) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(consumer) = &options.consumer {
            paths.push(self.isolated_root.join(consumer.as_str()));
        }
        paths.extend(options.extra_search_paths.iter().cloned());
        paths
    }

    pub fn build_command(
        &self,
        invocation: &Invocation,
        options: &ExecutionOptions,
    ) -> Result<RunnerCommand, String> {
        let environment = options
            .environment_override
            .clone()
            .unwrap_or_else(|| self.environment.clone());
        let interpreter = options
            .interpreter_override
            .clone()
            .unwrap_or_else(|| env_interpreter(&environment));

        let mut command = RunnerCommand::new(interpreter, invocation);
        command.working_directory = options.working_directory.clone();
        command.env = env::child_env(
            &options.environment_variables,
            &environment,
            &self.search_paths(options),
            std::env::var_os(env::PYTHONPATH),
        )
        .map_err(|err| format!("invalid search path: {err}"))?;
        Ok(command)
    }

    pub async fn run_script(
        &self,
        script: &Path,
        args: &[String],
        options: &ExecutionOptions,
    ) -> ExecutionResult {
        let invocation = Invocation::Script {
            path: script.to_path_buf(),
            args: args.to_vec(),
        };
        self.run(invocation, options).await
    }

    pub async fn run_code(&self, code: &str, options: &ExecutionOptions) -> ExecutionResult {
        let invocation = Invocation::Inline {
            code: code.to_string(),
        };
        self.run(invocation, options).await
    }

    async fn run(&self, invocation: Invocation, options: &ExecutionOptions) -> ExecutionResult {
        let run_id = RunId::new();
        let span = tracing::info_span!("run", %run_id);
        async move {
            let command = match self.build_command(&invocation, options) {
                Ok(command) => command,
                Err(message) => {
                    tracing::warn!(%message, "execution rejected");
                    return ExecutionResult::failed(message, String::new(), String::new());
                }
            };
            let timeout = options.timeout.or(self.default_timeout);
            tracing::info!(command = %command.display(), ?timeout, "starting execution");

            let mut cmd = command.to_command();
            cmd.stdin(Stdio::null()).kill_on_drop(true);
            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(err) => {
                    tracing::warn!(error = %err, "spawn failed");
                    return ExecutionResult::failed(
                        format!("failed to start {}: {err}", command.executable.display()),
                        String::new(),
                        String::new(),
                    );
                }
            };

            let stdout_buf = SharedBuffer::default();
            let stderr_buf = SharedBuffer::default();
            let callback = options.output_callback.clone();
            let mut readers = Vec::with_capacity(2);
            if let Some(stdout) = child.stdout.take() {
                readers.push(spawn_tee(
                    stdout,
                    OutputStream::Stdout,
                    Some(Arc::clone(&stdout_buf)),
                    callback.clone(),
                ));
            }
            if let Some(stderr) = child.stderr.take() {
                readers.push(spawn_tee(
                    stderr,
                    OutputStream::Stderr,
                    Some(Arc::clone(&stderr_buf)),
                    callback,
                ));
            }

            let completion = async {
                let status = child.wait().await;
                for reader in readers.iter_mut() {
                    let _ = reader.await;
                }
                status
            };
            let outcome = match timeout {
                Some(limit) => tokio::time::timeout(limit, completion).await.map_err(|_| limit),
                None => Ok(completion.await),
            };

            let result = match outcome {
                Ok(Ok(status)) => ExecutionResult::exited(
                    status.code(),
                    take_buffer(&stdout_buf),
                    take_buffer(&stderr_buf),
                ),
                Ok(Err(err)) => ExecutionResult::failed(
                    format!("failed to wait for process: {err}"),
                    take_buffer(&stdout_buf),
                    take_buffer(&stderr_buf),
                ),
                Err(limit) => {
                    if let Err(err) = child.kill().await {
                        tracing::warn!(error = %err, "failed to kill timed out process");
                    }
                    drain(&mut readers, DRAIN_GRACE).await;
                    ExecutionResult::failed(
                        format!("timed out after {} ms", limit.as_millis()),
                        take_buffer(&stdout_buf),
                        take_buffer(&stderr_buf),
                    )
                }
            };
            tracing::info!(
                success = result.success,
                code = ?result.exit_code,
                error = result.error.as_deref().unwrap_or(""),
                "execution finished"
            );
            result
        }
        .instrument(span)
        .await
    }

    /// Starts a long-running script and returns once the child exists.
    pub fn spawn_long(
        &self,
        script: &Path,
        args: &[String],
        options: &ExecutionOptions,
    ) -> Result<ProcessHandle, RuntimeError> {
        let run_id = RunId::new();
        let invocation = Invocation::Script {
            path: script.to_path_buf(),
            args: args.to_vec(),
        };
        let command = self
            .build_command(&invocation, options)
            .map_err(RuntimeError::Spawn)?;

        let mut cmd = command.to_command();
        cmd.stdin(Stdio::piped());
        let mut child = cmd.spawn().map_err(|err| {
            RuntimeError::Spawn(format!("{}: {err}", command.executable.display()))
        })?;
        tracing::info!(
            %run_id,
            pid = ?child.id(),
            command = %command.display(),
            "spawned long-running process"
        );

        let mut forwarders = Vec::new();
        if let Some(callback) = &options.output_callback {
            if let Some(stdout) = child.stdout.take() {
                let callback = Some(Arc::clone(callback));
                forwarders.push(spawn_tee(stdout, OutputStream::Stdout, None, callback));
            }
            if let Some(stderr) = child.stderr.take() {
                let callback = Some(Arc::clone(callback));
                forwarders.push(spawn_tee(stderr, OutputStream::Stderr, None, callback));
            }
        }
        Ok(ProcessHandle::new(run_id, child, forwarders))
    }
}
