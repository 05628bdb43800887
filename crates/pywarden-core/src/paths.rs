use std::path::{Path, PathBuf};

use crate::config::ConfigPaths;
use crate::ids::ConsumerId;

pub const INTERPRETER_DIR_NAME: &str = "python-runtime";
pub const SHARED_ENV_DIR_NAME: &str = "python-venv";
pub const ISOLATED_ROOT_NAME: &str = "tool-packages";
pub const TOOL_ENVS_ROOT_NAME: &str = "tool-envs";
pub const TOOL_ENV_VENV_NAME: &str = ".venv";
pub const TOOL_ENV_META_NAME: &str = "meta.json";

/// On-disk layout of everything the runtime manager provisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    pub data_dir: PathBuf,
    pub interpreter_dir: PathBuf,
    pub shared_env_dir: PathBuf,
    pub isolated_root: PathBuf,
    /// Per-consumer virtual environments, one directory per consumer.
    pub tool_envs_root: PathBuf,
}

impl RuntimeLayout {
    pub fn under(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            interpreter_dir: data_dir.join(INTERPRETER_DIR_NAME),
            shared_env_dir: data_dir.join(SHARED_ENV_DIR_NAME),
            isolated_root: data_dir.join(ISOLATED_ROOT_NAME),
            tool_envs_root: data_dir.join(TOOL_ENVS_ROOT_NAME),
            data_dir,
        }
    }

    pub fn shared_interpreter(&self) -> PathBuf {
        env_interpreter(&self.shared_env_dir)
    }

    pub fn isolated_dir(&self, consumer: &ConsumerId) -> PathBuf {
        self.isolated_root.join(consumer.as_str())
    }

    /// `tool-envs/<consumer>`, holding the venv and its metadata.
    pub fn tool_env_root(&self, consumer: &ConsumerId) -> PathBuf {
        self.tool_envs_root.join(consumer.as_str())
    }

    pub fn tool_env_dir(&self, consumer: &ConsumerId) -> PathBuf {
        self.tool_env_root(consumer).join(TOOL_ENV_VENV_NAME)
    }

    pub fn tool_env_meta(&self, consumer: &ConsumerId) -> PathBuf {
        self.tool_env_root(consumer).join(TOOL_ENV_META_NAME)
    }

    pub fn tool_env_interpreter(&self, consumer: &ConsumerId) -> PathBuf {
        env_interpreter(&self.tool_env_dir(consumer))
    }
}

/// Interpreter executable inside a virtual environment.
pub fn env_interpreter(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts").join("python.exe")
    } else {
        env_dir.join("bin").join("python")
    }
}

pub fn expand_path_template(template: &str, paths: &ConfigPaths) -> PathBuf {
    let home_dir = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
    let replaced = template
        .replace("${HOME}", &home_dir)
        .replace("${DATA_DIR}", &paths.data_dir.to_string_lossy())
        .replace(
            "${CONFIG_DIR}",
            &paths
                .config_path
                .parent()
                .unwrap_or(&paths.data_dir)
                .to_string_lossy(),
        );
    PathBuf::from(replaced)
}
