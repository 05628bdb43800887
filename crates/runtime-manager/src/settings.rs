use std::path::PathBuf;
use std::time::Duration;

use env_manager::{InstallOptions, ToolLocation, ToolLocator};
use pywarden_core::config::{
    Config, ConfigPaths, DEFAULT_PYTHON_VERSION, DEFAULT_VERSION_TIMEOUT_MS,
};
use pywarden_core::RuntimeLayout;

/// Everything a [`RuntimeManager`](crate::RuntimeManager) needs, resolved up front.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub layout: RuntimeLayout,
    pub python_version: String,
    pub locator: ToolLocator,
    pub install: InstallOptions,
    pub default_timeout: Option<Duration>,
}

impl ManagerSettings {
    /// Defaults for a data root and an explicit tool path.
    pub fn new(data_dir: impl Into<PathBuf>, tool: impl Into<PathBuf>) -> Self {
        Self {
            layout: RuntimeLayout::under(data_dir),
            python_version: DEFAULT_PYTHON_VERSION.to_string(),
            locator: ToolLocator::new(
                ToolLocation::Explicit(tool.into()),
                Duration::from_millis(DEFAULT_VERSION_TIMEOUT_MS),
            ),
            install: InstallOptions {
                verbose: true,
                index_url: None,
            },
            default_timeout: None,
        }
    }

    pub fn from_config(config: &Config, paths: &ConfigPaths) -> Self {
        Self {
            layout: config.layout(paths),
            python_version: config.runtime.python_version.trim().to_string(),
            locator: ToolLocator::from_config(config, paths),
            install: InstallOptions {
                verbose: config.install.verbose,
                index_url: config.install.index_url.clone(),
            },
            default_timeout: config.execution.default_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn with_python_version(mut self, version: impl Into<String>) -> Self {
        self.python_version = version.into();
        self
    }
}
