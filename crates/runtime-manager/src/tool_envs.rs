//! Per-consumer virtual environments under `tool-envs/<id>/`.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use env_manager::{DependencyInstaller, EnvironmentProvisioner, InstallTarget, PackageSource};
use progress::ProgressReporter;
use pywarden_core::paths::TOOL_ENV_VENV_NAME;
use pywarden_core::store::manifest_digest;
use pywarden_core::{ConsumerId, RuntimeError, ToolEnvironmentRecord};

use crate::RuntimeManager;

impl RuntimeManager {
    pub fn has_tool_env(&self, consumer: &ConsumerId) -> bool {
        self.settings.layout.tool_env_interpreter(consumer).is_file()
    }

    /// The consumer's `meta.json`. Unreadable metadata counts as absent.
    pub fn tool_env_record(&self, consumer: &ConsumerId) -> Option<ToolEnvironmentRecord> {
        let path = self.settings.layout.tool_env_meta(consumer);
        match ToolEnvironmentRecord::load(&path) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "ignoring tool environment metadata");
                None
            }
        }
    }

    /// Consumers with their own virtual environment, sorted.
    pub fn list_tool_envs(&self) -> Vec<ConsumerId> {
        let mut consumers: Vec<ConsumerId> = WalkDir::new(&self.settings.layout.tool_envs_root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_dir())
            .filter(|entry| entry.path().join(TOOL_ENV_VENV_NAME).is_dir())
            .filter_map(|entry| entry.file_name().to_str().and_then(|name| name.parse().ok()))
            .collect();
        consumers.sort();
        consumers
    }

    /// Deletes the consumer's virtual environment and metadata. Returns
    /// whether anything existed.
    pub fn remove_tool_env(&self, consumer: &ConsumerId) -> Result<bool, RuntimeError> {
        let root = self.settings.layout.tool_env_root(consumer);
        if !root.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&root)
            .map_err(|err| RuntimeError::io(format!("remove {}", root.display()), err))?;
        tracing::info!(consumer = %consumer, "removed tool environment");
        Ok(true)
    }

    /// True when syncing to `manifest` would recreate the environment. A
    /// missing manifest never needs a sync.
    pub fn needs_tool_env_setup(&self, consumer: &ConsumerId, manifest: &Path) -> bool {
        if !manifest.is_file() {
            return false;
        }
        if !self.has_tool_env(consumer) {
            return true;
        }
        let Some(record) = self.tool_env_record(consumer) else {
            return true;
        };
        match manifest_digest(manifest) {
            Ok(digest) => !record.is_current(&self.settings.python_version, Some(&digest)),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "could not hash manifest");
                true
            }
        }
    }

    /// Creates the consumer's virtual environment if needed and syncs it to
    /// `manifest`. The environment is recreated when the interpreter version
    /// changed, or when a manifest is given whose contents differ from the
    /// last sync. A manifest path that does not exist is ignored.
    pub async fn ensure_tool_env(
        &self,
        consumer: &ConsumerId,
        manifest: Option<&Path>,
        progress: &ProgressReporter,
    ) -> Result<ToolEnvironmentRecord, RuntimeError> {
        let tool = self.ready_tool(progress).await?;
        self.sync_tool_env(&tool, consumer, manifest, progress).await
    }

    pub async fn install_tool_env_packages(
        &self,
        consumer: &ConsumerId,
        names: &[String],
        progress: &ProgressReporter,
    ) -> Result<ToolEnvironmentRecord, RuntimeError> {
        let tool = self.ready_tool(progress).await?;
        let record = self.sync_tool_env(&tool, consumer, None, progress).await?;
        self.tool_env_installer(tool, consumer)
            .install(
                &InstallTarget::Shared,
                &PackageSource::Names(names.to_vec()),
                progress,
            )
            .await?;
        Ok(record)
    }

    /// Like [`ensure_tool_env`](Self::ensure_tool_env), but the manifest
    /// must exist.
    pub async fn install_tool_env_requirements(
        &self,
        consumer: &ConsumerId,
        manifest: &Path,
        progress: &ProgressReporter,
    ) -> Result<ToolEnvironmentRecord, RuntimeError> {
        if !manifest.is_file() {
            return Err(RuntimeError::Io(format!(
                "requirements manifest {} does not exist",
                manifest.display()
            )));
        }
        self.ensure_tool_env(consumer, Some(manifest), progress).await
    }

    /// Packages installed in the consumer's virtual environment; empty when
    /// it has none.
    pub async fn list_tool_env_packages(
        &self,
        consumer: &ConsumerId,
    ) -> Result<Vec<String>, RuntimeError> {
        if !self.has_tool_env(consumer) {
            return Ok(Vec::new());
        }
        let tool = self.ready_tool(&ProgressReporter::none()).await?;
        self.tool_env_installer(tool, consumer).list_shared().await
    }

    fn tool_env_installer(&self, tool: PathBuf, consumer: &ConsumerId) -> DependencyInstaller {
        DependencyInstaller::new(
            tool,
            self.settings.layout.tool_env_dir(consumer),
            self.settings.install.clone(),
        )
    }

    async fn sync_tool_env(
        &self,
        tool: &Path,
        consumer: &ConsumerId,
        manifest: Option<&Path>,
        progress: &ProgressReporter,
    ) -> Result<ToolEnvironmentRecord, RuntimeError> {
        let layout = &self.settings.layout;
        let version = &self.settings.python_version;
        let manifest = manifest.filter(|path| {
            let exists = path.is_file();
            if !exists {
                tracing::warn!(manifest = %path.display(), "requirements manifest not found");
            }
            exists
        });
        let digest = manifest
            .map(|path| manifest_digest(path).map_err(|err| RuntimeError::Io(format!("{err:#}"))))
            .transpose()?;

        let root = layout.tool_env_root(consumer);
        let venv = layout.tool_env_dir(consumer);
        let provisioner =
            EnvironmentProvisioner::new(tool, &layout.interpreter_dir, &venv, version);
        let previous = self.tool_env_record(consumer);

        if provisioner.exists() {
            let recorded_version = previous.as_ref().map(|r| r.interpreter_version.as_str());
            let recorded_digest = previous.as_ref().and_then(|r| r.requirements_digest.as_deref());
            let version_changed = recorded_version.is_some_and(|v| v != version.as_str());
            let manifest_changed = digest.is_some() && recorded_digest != digest.as_deref();
            if version_changed || manifest_changed {
                tracing::info!(
                    consumer = %consumer,
                    version_changed,
                    manifest_changed,
                    "recreating tool environment"
                );
                std::fs::remove_dir_all(&root)
                    .map_err(|err| RuntimeError::io(format!("remove {}", root.display()), err))?;
            }
        }

        let created = !provisioner.exists();
        if created {
            std::fs::create_dir_all(&root).map_err(|err| {
                RuntimeError::io(format!("create tool env dir {}", root.display()), err)
            })?;
            provisioner.ensure_environment(progress).await?;
            if let Some(path) = manifest {
                self.tool_env_installer(tool.to_path_buf(), consumer)
                    .install(
                        &InstallTarget::Shared,
                        &PackageSource::Manifest(path.to_path_buf()),
                        progress,
                    )
                    .await?;
            }
        }

        let digest = match digest {
            Some(digest) => Some(digest),
            None if created => None,
            None => previous.and_then(|r| r.requirements_digest),
        };
        let record = ToolEnvironmentRecord::new(consumer.clone(), venv, version.as_str(), digest);
        record
            .save(&layout.tool_env_meta(consumer))
            .map_err(|err| RuntimeError::Io(format!("{err:#}")))?;
        Ok(record)
    }
}
