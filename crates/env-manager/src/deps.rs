use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use walkdir::WalkDir;

use progress::{ProgressReporter, Stage};
use pywarden_core::error::stderr_tail;
use pywarden_core::RuntimeError;

use crate::process::{run_tool, ToolCommand};

pub const VIRTUAL_ENV: &str = "VIRTUAL_ENV";
const LIST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub verbose: bool,
    pub index_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    Names(Vec<String>),
    Manifest(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallTarget {
    /// Into the installer's virtual environment itself.
    Shared,
    /// Into a plain directory that is later put on the module search path.
    Isolated(PathBuf),
}

/// Installs and lists packages, always resolving against one virtual
/// environment: the shared one, or a consumer's own.
#[derive(Debug, Clone)]
pub struct DependencyInstaller {
    tool: PathBuf,
    env_dir: PathBuf,
    options: InstallOptions,
}

impl DependencyInstaller {
    pub fn new(
        tool: impl Into<PathBuf>,
        env_dir: impl Into<PathBuf>,
        options: InstallOptions,
    ) -> Self {
        Self {
            tool: tool.into(),
            env_dir: env_dir.into(),
            options,
        }
    }

    pub async fn install(
        &self,
        target: &InstallTarget,
        source: &PackageSource,
        progress: &ProgressReporter,
    ) -> Result<(), RuntimeError> {
        match source {
            PackageSource::Names(names) if names.is_empty() => {
                tracing::debug!(target = %self.label(target), "no packages requested");
                return Ok(());
            }
            PackageSource::Names(names) => validate_names(names, self.label(target))?,
            PackageSource::Manifest(path) => {
                if !path.is_file() {
                    return Err(RuntimeError::Io(format!(
                        "requirements manifest {} does not exist",
                        path.display()
                    )));
                }
            }
        }
        if let InstallTarget::Isolated(dir) = target {
            std::fs::create_dir_all(dir).map_err(|err| {
                RuntimeError::io(format!("create isolated dir {}", dir.display()), err)
            })?;
        }

        progress.report(Stage::Deps, describe_source(source), Some(0));
        let command = ToolCommand::new(&self.tool, Stage::Deps)
            .args(build_install_args(target, source, &self.options))
            .env(VIRTUAL_ENV, &self.env_dir);
        let output = run_tool(&command, progress, None)
            .await
            .map_err(|err| RuntimeError::DependencyInstall {
                target: self.label(target),
                code: None,
                stderr_tail: format!("{}: {err}", command.display()),
            })?;

        if !output.success() {
            tracing::error!(
                target = %self.label(target),
                code = ?output.code,
                "dependency install failed"
            );
            return Err(RuntimeError::DependencyInstall {
                target: self.label(target),
                code: output.code,
                stderr_tail: stderr_tail(&output.stderr),
            });
        }
        progress.done(Stage::Deps, "Dependencies installed");
        Ok(())
    }

    fn label(&self, target: &InstallTarget) -> String {
        match target {
            InstallTarget::Shared => format!("environment {}", self.env_dir.display()),
            InstallTarget::Isolated(dir) => dir.display().to_string(),
        }
    }

    /// Package names in the environment, in tool order.
    pub async fn list_shared(&self) -> Result<Vec<String>, RuntimeError> {
        let mut cmd = Command::new(&self.tool);
        cmd.args(["pip", "list", "--format=freeze"])
            .env(VIRTUAL_ENV, &self.env_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(LIST_TIMEOUT, cmd.output()).await {
            Ok(result) => result.map_err(|err| RuntimeError::Query {
                code: None,
                stderr_tail: format!("{}: {err}", self.tool.display()),
            })?,
            Err(_) => {
                return Err(RuntimeError::Query {
                    code: None,
                    stderr_tail: format!("timed out after {} ms", LIST_TIMEOUT.as_millis()),
                })
            }
        };
        if !output.status.success() {
            return Err(RuntimeError::Query {
                code: output.status.code(),
                stderr_tail: stderr_tail(&String::from_utf8_lossy(&output.stderr)),
            });
        }
        Ok(parse_freeze(&String::from_utf8_lossy(&output.stdout)))
    }
}

pub fn build_install_args(
    target: &InstallTarget,
    source: &PackageSource,
    options: &InstallOptions,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["pip".into(), "install".into()];
    if options.verbose {
        args.push("--verbose".into());
    }
    if let Some(index_url) = &options.index_url {
        args.push("--index-url".into());
        args.push(index_url.into());
    }
    if let InstallTarget::Isolated(dir) = target {
        args.push("--target".into());
        args.push(dir.into());
    }
    match source {
        PackageSource::Names(names) => args.extend(names.iter().map(OsString::from)),
        PackageSource::Manifest(path) => {
            args.push("-r".into());
            args.push(path.into());
        }
    }
    args
}

fn validate_names(names: &[String], target: String) -> Result<(), RuntimeError> {
    for name in names {
        if name.trim().is_empty() || name.starts_with('-') {
            return Err(RuntimeError::DependencyInstall {
                target,
                code: None,
                stderr_tail: format!("invalid package specifier {name:?}"),
            });
        }
    }
    Ok(())
}

fn describe_source(source: &PackageSource) -> String {
    match source {
        PackageSource::Names(names) => format!("Installing {}", names.join(", ")),
        PackageSource::Manifest(path) => format!("Installing from {}", path.display()),
    }
}

/// Package names from `name==version` and `name @ url` lines; blanks,
/// comments and editable installs are skipped.
pub fn parse_freeze(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .filter_map(|line| {
            line.split_once("==")
                .or_else(|| line.split_once(" @ "))
                .map(|(name, _)| name.trim().to_string())
        })
        .collect()
}

/// Package names of the distributions found in an isolated directory,
/// sorted and deduplicated. A missing directory lists as empty.
pub fn list_isolated(dir: &Path) -> Vec<String> {
    let packages: BTreeSet<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| entry.file_name().to_str().and_then(parse_metadata_dir))
        .collect();
    packages.into_iter().collect()
}

/// `requests_toolbelt-1.0.0.dist-info` → `requests-toolbelt`.
fn parse_metadata_dir(name: &str) -> Option<String> {
    let stem = name
        .strip_suffix(".dist-info")
        .or_else(|| name.strip_suffix(".egg-info"))?;
    // egg-info names may carry a `-py3.12` suffix after the version.
    let (package, version) = stem.split_once('-')?;
    if package.is_empty() || !version.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some(package.replace('_', "-"))
}
