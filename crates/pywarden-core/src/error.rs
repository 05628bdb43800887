use std::fmt;

use thiserror::Error;

/// Longest stderr excerpt carried inside an error, in bytes.
pub const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    Interpreter,
    Environment,
}

/// Infrastructure failures of the runtime subsystem.
///
/// Execution failures (a script exiting non-zero, a spawn error, a timeout)
/// are not represented here; they are reported through `ExecutionResult`.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("package tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("{step} failed ({}): {stderr_tail}", exit_label(.code))]
    Provisioning {
        step: ProvisionStep,
        code: Option<i32>,
        stderr_tail: String,
    },
    #[error("dependency install into {target} failed ({}): {stderr_tail}", exit_label(.code))]
    DependencyInstall {
        target: String,
        code: Option<i32>,
        stderr_tail: String,
    },
    #[error("package listing failed ({}): {stderr_tail}", exit_label(.code))]
    Query {
        code: Option<i32>,
        stderr_tail: String,
    },
    #[error("failed to start process: {0}")]
    Spawn(String),
    #[error("invalid consumer id: {0}")]
    InvalidConsumer(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("runtime initialization aborted: {0}")]
    Aborted(String),
}

impl RuntimeError {
    /// True for failures that cannot be fixed by retrying (the tool is missing).
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RuntimeError::ToolUnavailable(_))
    }

    pub fn io(context: impl fmt::Display, err: std::io::Error) -> Self {
        RuntimeError::Io(format!("{context}: {err}"))
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        RuntimeError::Io(err.to_string())
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ProvisionStep::Interpreter => "interpreter install",
            ProvisionStep::Environment => "environment creation",
        };
        write!(f, "{value}")
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code: {code}"),
        None => "no exit code".to_string(),
    }
}

/// Keeps the last `STDERR_TAIL_BYTES` of captured stderr, unmodified apart
/// from trailing whitespace, cutting on a char boundary.
pub fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim_end();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
