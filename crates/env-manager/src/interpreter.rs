use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use progress::{ProgressEvent, ProgressReporter, Stage};
use pywarden_core::error::stderr_tail;
use pywarden_core::{ProvisionStep, RuntimeError};

use crate::process::{run_tool, ToolCommand};

pub const INSTALL_DIR_ENV: &str = "UV_PYTHON_INSTALL_DIR";
const INSTALL_PREFIX: &str = "cpython-";

/// Installs the managed interpreter into a private directory.
#[derive(Debug, Clone)]
pub struct InterpreterInstaller {
    tool: PathBuf,
    install_dir: PathBuf,
    version: String,
}

impl InterpreterInstaller {
    pub fn new(
        tool: impl Into<PathBuf>,
        install_dir: impl Into<PathBuf>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            install_dir: install_dir.into(),
            version: version.into(),
        }
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_installed(&self) -> bool {
        is_version_installed(&self.install_dir, &self.version)
    }

    /// No-op when a matching interpreter is already present.
    pub async fn ensure_installed(&self, progress: &ProgressReporter) -> Result<(), RuntimeError> {
        if self.is_installed() {
            tracing::debug!(version = %self.version, "interpreter already installed");
            progress.done(Stage::Install, format!("Python {} already installed", self.version));
            return Ok(());
        }
        std::fs::create_dir_all(&self.install_dir).map_err(|err| {
            RuntimeError::io(
                format!("create interpreter dir {}", self.install_dir.display()),
                err,
            )
        })?;

        progress.report(Stage::Download, format!("Installing Python {}", self.version), Some(0));
        let command = ToolCommand::new(&self.tool, Stage::Install)
            .args(["python", "install"])
            .arg(&self.version)
            .env(INSTALL_DIR_ENV, &self.install_dir);
        let output = run_tool(&command, progress, Some(classify_install_line))
            .await
            .map_err(|err| RuntimeError::Provisioning {
                step: ProvisionStep::Interpreter,
                code: None,
                stderr_tail: format!("{}: {err}", command.display()),
            })?;

        if !output.success() {
            tracing::error!(
                version = %self.version,
                code = ?output.code,
                "interpreter install failed"
            );
            return Err(RuntimeError::Provisioning {
                step: ProvisionStep::Interpreter,
                code: output.code,
                stderr_tail: stderr_tail(&output.stderr),
            });
        }
        progress.done(Stage::Install, format!("Python {} installed", self.version));
        Ok(())
    }
}

/// Maps interpreter install chatter to the download/install checkpoints.
pub fn classify_install_line(line: &str) -> Option<ProgressEvent> {
    if line.contains("Downloading") || line.contains("Fetching") {
        return Some(ProgressEvent::new(Stage::Download, line, Some(30)));
    }
    if line.contains("Installing") || line.contains("Unpacking") || line.contains("Extracting") {
        return Some(ProgressEvent::new(Stage::Install, line, Some(70)));
    }
    None
}

/// Directory names of installed interpreters (`cpython-3.12.8-linux-x86_64-gnu`, …).
pub fn installed_versions(install_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(install_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir() || entry.path_is_symlink())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| name.starts_with(INSTALL_PREFIX))
        .collect();
    names.sort();
    names
}

pub fn is_version_installed(install_dir: &Path, version: &str) -> bool {
    installed_versions(install_dir)
        .iter()
        .any(|name| matches_version(name, version))
}

/// `3.12` matches `cpython-3.12.8-…` and `cpython-3.12-…`, never `cpython-3.120…`.
fn matches_version(dir_name: &str, version: &str) -> bool {
    let Some(rest) = dir_name.strip_prefix(INSTALL_PREFIX) else {
        return false;
    };
    let Some(after) = rest.strip_prefix(version) else {
        return false;
    };
    after.is_empty() || after.starts_with('.') || after.starts_with('-') || after.starts_with('+')
}

/// Full version of an installed interpreter, taken from its directory name.
pub fn installed_full_version(install_dir: &Path, version: &str) -> Option<String> {
    installed_versions(install_dir)
        .into_iter()
        .filter(|name| matches_version(name, version))
        .max()
        .and_then(|name| {
            name.strip_prefix(INSTALL_PREFIX)
                .and_then(|rest| rest.split('-').next())
                .map(str::to_string)
        })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn classifier_maps_known_phrases() {
        let download = classify_install_line("Downloading cpython-3.12.8 (17.2MiB)").unwrap();
        assert_eq!(
            (download.stage, download.percent),
            (Stage::Download, Some(30))
        );
        let fetch = classify_install_line("Fetching requested Python...").unwrap();
        assert_eq!(fetch.stage, Stage::Download);
        let install = classify_install_line("Installing Python 3.12.8").unwrap();
        assert_eq!((install.stage, install.percent), (Stage::Install, Some(70)));
        assert!(classify_install_line("Searching for Python versions").is_none());
    }

    #[test]
    fn detects_installed_versions_by_directory_name() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_version_installed(dir.path(), "3.12"));

        fs::create_dir_all(dir.path().join("cpython-3.120.0-linux-x86_64-gnu")).unwrap();
        fs::create_dir_all(dir.path().join(".lock")).unwrap();
        assert!(!is_version_installed(dir.path(), "3.12"));

        fs::create_dir_all(dir.path().join("cpython-3.12.8-linux-x86_64-gnu")).unwrap();
        assert!(is_version_installed(dir.path(), "3.12"));
        assert!(is_version_installed(dir.path(), "3.12.8"));
        assert!(!is_version_installed(dir.path(), "3.11"));
        assert_eq!(
            installed_full_version(dir.path(), "3.12").as_deref(),
            Some("3.12.8")
        );
    }

    #[test]
    fn plain_files_do_not_count_as_installs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cpython-3.12.8.tar.gz"), b"partial").unwrap();
        assert!(!is_version_installed(dir.path(), "3.12"));
    }

    #[test]
    fn missing_install_dir_means_not_installed() {
        assert!(installed_versions(Path::new("/definitely/not/here")).is_empty());
    }

    #[tokio::test]
    async fn unstartable_tool_is_an_interpreter_provisioning_error() {
        let dir = tempfile::tempdir().unwrap();
        let installer = InterpreterInstaller::new(dir.path().join("no-uv"), dir.path(), "3.12");
        let err = installer
            .ensure_installed(&ProgressReporter::none())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Provisioning {
                step: ProvisionStep::Interpreter,
                code: None,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn install_emits_checkpoints_and_is_idempotent() {
        let fixture = crate::fake_tool::FakeTool::new();
        let install_dir = fixture.root().join("python-runtime");
        let installer = InterpreterInstaller::new(fixture.tool_path(), &install_dir, "3.12");
        assert!(!installer.is_installed());

        let (reporter, mut rx) = ProgressReporter::channel();
        installer.ensure_installed(&reporter).await.unwrap();
        installer.ensure_installed(&reporter).await.unwrap();
        drop(reporter);

        assert!(installer.is_installed());
        assert_eq!(fixture.count_invocations("python install"), 1);

        let mut stages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if event.percent.is_some() {
                stages.push((event.stage, event.percent));
            }
        }
        assert!(stages.contains(&(Stage::Download, Some(30))));
        assert_eq!(stages.last(), Some(&(Stage::Install, Some(100))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_install_carries_exit_code_and_stderr() {
        let fixture = crate::fake_tool::FakeTool::builder().fail_python_install().build();
        let installer = InterpreterInstaller::new(
            fixture.tool_path(),
            fixture.root().join("python-runtime"),
            "3.12",
        );
        let err = installer
            .ensure_installed(&ProgressReporter::none())
            .await
            .unwrap_err();
        match err {
            RuntimeError::Provisioning {
                step,
                code,
                stderr_tail,
            } => {
                assert_eq!(step, ProvisionStep::Interpreter);
                assert_eq!(code, Some(2));
                assert!(stderr_tail.contains("failed to download"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!installer.is_installed());
    }
}
