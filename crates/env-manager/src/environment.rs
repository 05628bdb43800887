use std::path::{Path, PathBuf};

use progress::{ProgressReporter, Stage};
use pywarden_core::error::stderr_tail;
use pywarden_core::paths::env_interpreter;
use pywarden_core::{ProvisionStep, RuntimeError};

use crate::interpreter::INSTALL_DIR_ENV;
use crate::process::{run_tool, ToolCommand};

/// Creates the shared virtual environment on top of the managed interpreter.
#[derive(Debug, Clone)]
pub struct EnvironmentProvisioner {
    tool: PathBuf,
    interpreter_dir: PathBuf,
    env_dir: PathBuf,
    version: String,
}

impl EnvironmentProvisioner {
    pub fn new(
        tool: impl Into<PathBuf>,
        interpreter_dir: impl Into<PathBuf>,
        env_dir: impl Into<PathBuf>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            interpreter_dir: interpreter_dir.into(),
            env_dir: env_dir.into(),
            version: version.into(),
        }
    }

    pub fn env_dir(&self) -> &Path {
        &self.env_dir
    }

    pub fn interpreter(&self) -> PathBuf {
        env_interpreter(&self.env_dir)
    }

    /// An environment exists once its interpreter executable does; a bare
    /// directory left behind by an interrupted run does not count.
    pub fn exists(&self) -> bool {
        self.interpreter().is_file()
    }

    pub async fn ensure_environment(
        &self,
        progress: &ProgressReporter,
    ) -> Result<(), RuntimeError> {
        if self.exists() {
            tracing::debug!(env = %self.env_dir.display(), "shared environment already present");
            progress.done(Stage::Venv, "Virtual environment already present");
            return Ok(());
        }
        if let Some(parent) = self.env_dir.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                RuntimeError::io(format!("create data dir {}", parent.display()), err)
            })?;
        }

        progress.report(Stage::Venv, "Creating virtual environment", Some(0));
        let command = ToolCommand::new(&self.tool, Stage::Venv)
            .arg("venv")
            .arg(&self.env_dir)
            .arg("--python")
            .arg(&self.version)
            .env(INSTALL_DIR_ENV, &self.interpreter_dir)
            .stderr_only();
        let output = run_tool(&command, progress, None)
            .await
            .map_err(|err| RuntimeError::Provisioning {
                step: ProvisionStep::Environment,
                code: None,
                stderr_tail: format!("{}: {err}", command.display()),
            })?;

        if !output.success() || !self.exists() {
            tracing::error!(
                env = %self.env_dir.display(),
                code = ?output.code,
                "environment creation failed"
            );
            return Err(RuntimeError::Provisioning {
                step: ProvisionStep::Environment,
                code: output.code,
                stderr_tail: stderr_tail(&output.stderr),
            });
        }
        progress.done(Stage::Venv, "Virtual environment ready");
        Ok(())
    }
}
