use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::paths::{expand_path_template, RuntimeLayout};

pub const DEFAULT_PYTHON_VERSION: &str = "3.12";
pub const DEFAULT_VERSION_TIMEOUT_MS: u64 = 5_000;
pub const RECORDS_FILE: &str = "tool-envs.json";

pub const ENV_DATA_DIR: &str = "PYWARDEN_DATA_DIR";
pub const ENV_TOOL_PATH: &str = "PYWARDEN_UV";
pub const ENV_PYTHON_VERSION: &str = "PYWARDEN_PYTHON_VERSION";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub tool: ToolConfig,
    pub install: InstallConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub python_version: String,
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub path: Option<String>,
    pub packaging: Packaging,
    pub resources_dir: Option<String>,
    pub version_timeout_ms: u64,
}

/// Where the package tool executable is expected to live.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Packaging {
    /// Search `PATH`.
    System,
    /// `<resources>/uv/uv`
    Packaged,
    /// `<resources>/uv/<platform>/uv`
    Development,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    pub verbose: bool,
    pub index_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub default_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub records_path: PathBuf,
}

impl Config {
    pub fn default_config() -> Self {
        Self {
            runtime: RuntimeConfig {
                python_version: DEFAULT_PYTHON_VERSION.to_string(),
                data_dir: None,
            },
            tool: ToolConfig {
                path: None,
                packaging: Packaging::System,
                resources_dir: None,
                version_timeout_ms: DEFAULT_VERSION_TIMEOUT_MS,
            },
            install: InstallConfig {
                verbose: true,
                index_url: None,
            },
            execution: ExecutionConfig {
                default_timeout_ms: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let output = toml::to_string_pretty(self).context("render config TOML")?;
        Ok(output)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config at {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    /// Loads the config file if present, otherwise the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default_config());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        let contents = self.to_toml_string()?;
        fs::write(path, contents).with_context(|| format!("write config at {}", path.display()))?;
        Ok(())
    }

    /// Applies `PYWARDEN_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.runtime.data_dir = Some(value);
        }
        if let Some(value) = lookup(ENV_TOOL_PATH).filter(|v| !v.is_empty()) {
            self.tool.path = Some(value);
        }
        if let Some(value) = lookup(ENV_PYTHON_VERSION).filter(|v| !v.is_empty()) {
            self.runtime.python_version = value;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let version = self.runtime.python_version.trim();
        if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit() || c == '.') {
            anyhow::bail!(crate::error::RuntimeError::InvalidConfig(format!(
                "runtime.python_version must look like 3.12, got {:?}",
                self.runtime.python_version
            )));
        }
        if self.tool.version_timeout_ms == 0 {
            anyhow::bail!(crate::error::RuntimeError::InvalidConfig(
                "tool.version_timeout_ms must be greater than zero".to_string()
            ));
        }
        Ok(())
    }

    pub fn layout(&self, paths: &ConfigPaths) -> RuntimeLayout {
        let data_dir = match &self.runtime.data_dir {
            Some(template) => expand_path_template(template, paths),
            None => paths.data_dir.clone(),
        };
        RuntimeLayout::under(data_dir)
    }

    pub fn resources_dir(&self, paths: &ConfigPaths) -> Option<PathBuf> {
        self.tool
            .resources_dir
            .as_ref()
            .map(|template| expand_path_template(template, paths))
    }

    pub fn tool_path(&self, paths: &ConfigPaths) -> Option<PathBuf> {
        self.tool
            .path
            .as_ref()
            .map(|template| expand_path_template(template, paths))
    }
}

impl ConfigPaths {
    pub fn resolve() -> Result<Self> {
        let project_dirs = ProjectDirs::from("io", "pywarden", "pywarden")
            .ok_or_else(|| anyhow::anyhow!("unable to determine project directories"))?;
        let config_dir = project_dirs.config_dir();
        let data_dir = project_dirs.data_dir();
        Ok(Self {
            config_path: config_dir.join("config.toml"),
            data_dir: data_dir.to_path_buf(),
            records_path: data_dir.join(RECORDS_FILE),
        })
    }
}
