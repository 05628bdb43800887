use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::ConsumerId;

/// Readiness snapshot, recomputed on every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub tool_available: bool,
    pub tool_version: Option<String>,
    pub tool_path: Option<PathBuf>,
    pub interpreter_installed: bool,
    pub interpreter_version: Option<String>,
    pub interpreter_path: Option<PathBuf>,
    pub environment_exists: bool,
    pub environment_path: Option<PathBuf>,
}

impl RuntimeStatus {
    pub fn is_ready(&self) -> bool {
        self.tool_available && self.interpreter_installed && self.environment_exists
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        };
        write!(f, "{value}")
    }
}

/// Live output sink. Called from the pipe reader task for every decoded chunk.
pub type OutputCallback = Arc<dyn Fn(&str, OutputStream) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ExecutionOptions {
    pub working_directory: Option<PathBuf>,
    pub environment_variables: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    pub output_callback: Option<OutputCallback>,
    pub interpreter_override: Option<PathBuf>,
    pub environment_override: Option<PathBuf>,
    /// Consumer whose isolated directory is added to the module search path.
    pub consumer: Option<ConsumerId>,
    pub extra_search_paths: Vec<PathBuf>,
}

impl ExecutionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_variables.insert(key.into(), value.into());
        self
    }

    pub fn with_consumer(mut self, consumer: ConsumerId) -> Self {
        self.consumer = Some(consumer);
        self
    }

    pub fn with_output_callback(
        mut self,
        callback: impl Fn(&str, OutputStream) + Send + Sync + 'static,
    ) -> Self {
        self.output_callback = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for ExecutionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionOptions")
            .field("working_directory", &self.working_directory)
            .field("environment_variables", &self.environment_variables)
            .field("timeout", &self.timeout)
            .field("output_callback", &self.output_callback.is_some())
            .field("interpreter_override", &self.interpreter_override)
            .field("environment_override", &self.environment_override)
            .field("consumer", &self.consumer)
            .field("extra_search_paths", &self.extra_search_paths)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// `None` when the process never reported an exit code (spawn failure, killed).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Spawn-level failure or timeout only; a non-zero exit leaves this empty.
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn exited(exit_code: Option<i32>, stdout: String, stderr: String) -> Self {
        Self {
            success: exit_code == Some(0),
            exit_code,
            stdout,
            stderr,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, stdout: String, stderr: String) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout,
            stderr,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_follows_exit_code() {
        assert!(ExecutionResult::exited(Some(0), String::new(), String::new()).success);
        let failed = ExecutionResult::exited(Some(3), String::new(), "boom".into());
        assert!(!failed.success);
        assert!(failed.error.is_none());
        assert!(!ExecutionResult::exited(None, String::new(), String::new()).success);
    }

    #[test]
    fn spawn_failure_has_no_exit_code() {
        let result = ExecutionResult::failed("no such file", String::new(), String::new());
        assert_eq!(result.exit_code, None);
        assert_eq!(result.error.as_deref(), Some("no such file"));
    }

    #[test]
    fn status_ready_requires_all_three() {
        let mut status = RuntimeStatus {
            tool_available: true,
            interpreter_installed: true,
            ..RuntimeStatus::default()
        };
        assert!(!status.is_ready());
        status.environment_exists = true;
        assert!(status.is_ready());
    }
}
