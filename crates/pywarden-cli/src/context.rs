use std::path::PathBuf;

use anyhow::{Context, Result};

use progress::{human, json, ProgressEvent, ProgressReporter};
use pywarden_core::config::{Config, ConfigPaths, RECORDS_FILE};
use runtime_manager::{ManagerSettings, RuntimeManager};

/// Loaded configuration plus the manager built from it.
pub struct CliContext {
    pub paths: ConfigPaths,
    pub config_path: PathBuf,
    pub config: Config,
    pub manager: RuntimeManager,
    json_progress: bool,
}

impl CliContext {
    pub fn load(config_path: Option<PathBuf>, json_progress: bool) -> Result<Self> {
        let paths = ConfigPaths::resolve()?;
        let config_path = config_path.unwrap_or_else(|| paths.config_path.clone());
        let mut config = Config::load_or_default(&config_path)
            .with_context(|| format!("load config {}", config_path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        let manager = RuntimeManager::new(ManagerSettings::from_config(&config, &paths));
        Ok(Self {
            paths,
            config_path,
            config,
            manager,
            json_progress,
        })
    }

    /// Record store next to the runtime it describes, so a data dir
    /// override moves both.
    pub fn records_path(&self) -> PathBuf {
        if self.config.runtime.data_dir.is_none() {
            return self.paths.records_path.clone();
        }
        self.manager.layout().data_dir.join(RECORDS_FILE)
    }

    /// Progress goes to stderr so stdout stays usable for command output.
    pub fn progress(&self) -> ProgressReporter {
        if self.json_progress {
            ProgressReporter::new(|event: ProgressEvent| {
                eprintln!("{}", json::render_json(&event))
            })
        } else {
            ProgressReporter::new(|event: ProgressEvent| {
                eprintln!("{}", human::render_line(&event))
            })
        }
    }
}
