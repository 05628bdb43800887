use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use pywarden_core::config::{Config, ConfigPaths, Packaging};
use pywarden_core::RuntimeError;

use crate::process::query_version;

pub const TOOL_DIR_NAME: &str = "uv";

#[cfg(windows)]
pub const TOOL_EXECUTABLE: &str = "uv.exe";
#[cfg(not(windows))]
pub const TOOL_EXECUTABLE: &str = "uv";

/// Where to look for the package tool, in decreasing precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolLocation {
    Explicit(PathBuf),
    Packaged { resources_dir: PathBuf },
    Development { resources_dir: PathBuf },
    System,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolAvailability {
    pub available: bool,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ToolLocator {
    location: ToolLocation,
    version_timeout: Duration,
}

impl ToolLocator {
    pub fn new(location: ToolLocation, version_timeout: Duration) -> Self {
        Self {
            location,
            version_timeout,
        }
    }

    pub fn from_config(config: &Config, paths: &ConfigPaths) -> Self {
        let location = match config.tool_path(paths) {
            Some(path) => ToolLocation::Explicit(path),
            None => match config.tool.packaging {
                Packaging::System => ToolLocation::System,
                Packaging::Packaged => ToolLocation::Packaged {
                    resources_dir: resources_dir_or_default(config, paths),
                },
                Packaging::Development => ToolLocation::Development {
                    resources_dir: resources_dir_or_default(config, paths),
                },
            },
        };
        Self::new(location, Duration::from_millis(config.tool.version_timeout_ms))
    }

    pub fn location(&self) -> &ToolLocation {
        &self.location
    }

    pub fn version_timeout(&self) -> Duration {
        self.version_timeout
    }

    /// Candidate executable path. Purely a filesystem computation; nothing runs.
    pub fn resolve_path(&self) -> Option<PathBuf> {
        match &self.location {
            ToolLocation::Explicit(path) => Some(path.clone()),
            ToolLocation::Packaged { resources_dir } => {
                Some(resources_dir.join(TOOL_DIR_NAME).join(TOOL_EXECUTABLE))
            }
            ToolLocation::Development { resources_dir } => Some(
                resources_dir
                    .join(TOOL_DIR_NAME)
                    .join(platform_dir())
                    .join(TOOL_EXECUTABLE),
            ),
            ToolLocation::System => which::which(TOOL_EXECUTABLE).ok(),
        }
    }

    /// Never fails; an unusable tool is reported as unavailable.
    pub async fn locate(&self) -> ToolAvailability {
        let Some(path) = self.resolve_path() else {
            tracing::debug!(location = ?self.location, "package tool not found");
            return ToolAvailability::default();
        };
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "package tool path does not exist");
            return ToolAvailability {
                available: false,
                version: None,
                path: Some(path),
            };
        }
        let version = query_version(&path, self.version_timeout).await;
        ToolAvailability {
            available: version.is_some(),
            version,
            path: Some(path),
        }
    }

    /// Like [`locate`](Self::locate) but turns unavailability into an error.
    pub async fn require(&self) -> Result<PathBuf, RuntimeError> {
        let availability = self.locate().await;
        match (availability.available, availability.path) {
            (true, Some(path)) => {
                tracing::info!(
                    path = %path.display(),
                    version = availability.version.as_deref().unwrap_or("unknown"),
                    "package tool available"
                );
                Ok(path)
            }
            (_, Some(path)) if !path.is_file() => Err(RuntimeError::ToolUnavailable(format!(
                "{TOOL_EXECUTABLE} was not found at {} ({})",
                path.display(),
                self.describe()
            ))),
            (_, Some(path)) => Err(RuntimeError::ToolUnavailable(format!(
                "{} did not answer a version check",
                path.display()
            ))),
            (_, None) => Err(RuntimeError::ToolUnavailable(format!(
                "{TOOL_EXECUTABLE} was not found ({})",
                self.describe()
            ))),
        }
    }

    fn describe(&self) -> String {
        match &self.location {
            ToolLocation::Explicit(path) => format!("explicit path {}", path.display()),
            ToolLocation::Packaged { resources_dir } => {
                format!("packaged resources {}", resources_dir.display())
            }
            ToolLocation::Development { resources_dir } => {
                format!("development resources {}", resources_dir.display())
            }
            ToolLocation::System => "searched PATH".to_string(),
        }
    }
}

fn resources_dir_or_default(config: &Config, paths: &ConfigPaths) -> PathBuf {
    if let Some(dir) = config.resources_dir(paths) {
        return dir;
    }
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    exe_dir.join("resources")
}

/// Subdirectory naming the bundled build for this OS/architecture.
pub fn platform_dir() -> &'static str {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("windows", _) => "win-x64",
        ("macos", "aarch64") => "darwin-arm64",
        ("macos", _) => "darwin-x64",
        _ => "linux-x64",
    }
}
