//! Façade over provisioning and execution with single-flight initialization.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use walkdir::WalkDir;

use env_manager::interpreter::{installed_full_version, is_version_installed};
use env_manager::process::query_version;
use env_manager::{
    DependencyInstaller, EnvironmentProvisioner, InstallTarget, InterpreterInstaller, PackageSource,
};
use progress::{ProgressReporter, Stage};
use pywarden_core::store::manifest_digest;
use pywarden_core::{
    ConsumerId, ExecutionOptions, ExecutionResult, RuntimeError, RuntimeLayout, RuntimeStatus,
    ToolEnvironmentRecord,
};
use runner::{ProcessExecutor, ProcessHandle};

pub mod settings;
pub mod state;
mod tool_envs;

pub use settings::ManagerSettings;
pub use state::InitPhase;
use state::{Acquired, InitCell, InitResult};

/// Interpreter, environment and search path a consumer's worker should use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerEnvironment {
    pub consumer_id: ConsumerId,
    pub interpreter: PathBuf,
    pub environment: PathBuf,
    pub search_paths: Vec<PathBuf>,
}

impl ConsumerEnvironment {
    /// Execution options that run against this environment.
    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            interpreter_override: Some(self.interpreter.clone()),
            environment_override: Some(self.environment.clone()),
            extra_search_paths: self.search_paths.clone(),
            ..ExecutionOptions::default()
        }
    }
}

pub struct RuntimeManager {
    settings: ManagerSettings,
    init: Arc<InitCell>,
}

impl RuntimeManager {
    pub fn new(settings: ManagerSettings) -> Self {
        Self {
            settings,
            init: Arc::new(InitCell::new()),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.settings.layout
    }

    pub fn phase(&self) -> InitPhase {
        self.init.phase()
    }

    /// Fresh readiness snapshot. Reads only; nothing is created or installed.
    pub async fn get_status(&self) -> RuntimeStatus {
        let layout = &self.settings.layout;
        let version = &self.settings.python_version;
        let tool = self.settings.locator.locate().await;

        let interpreter_installed = is_version_installed(&layout.interpreter_dir, version);
        let env_interpreter = layout.shared_interpreter();
        let environment_exists = env_interpreter.is_file();

        let mut interpreter_version = None;
        if environment_exists {
            interpreter_version =
                query_version(&env_interpreter, self.settings.locator.version_timeout()).await;
        }
        if interpreter_version.is_none() && interpreter_installed {
            interpreter_version = installed_full_version(&layout.interpreter_dir, version);
        }

        RuntimeStatus {
            tool_available: tool.available,
            tool_version: tool.version,
            tool_path: tool.path,
            interpreter_installed,
            interpreter_version,
            interpreter_path: environment_exists.then(|| env_interpreter.clone()),
            environment_exists,
            environment_path: environment_exists.then(|| layout.shared_env_dir.clone()),
        }
    }

    /// Drives tool check, interpreter install and environment creation once.
    /// Concurrent callers share the chain in flight; only the caller that
    /// started it receives the full event stream, the others just the final
    /// install and venv events.
    pub async fn ensure_ready(&self, progress: &ProgressReporter) -> Result<(), RuntimeError> {
        self.ready_tool(progress).await.map(|_| ())
    }

    async fn ready_tool(&self, progress: &ProgressReporter) -> InitResult {
        loop {
            let mut started = false;
            let acquired = self.init.acquire(|generation| {
                started = true;
                self.start_chain(generation, progress)
            });
            let tool = match acquired {
                Acquired::Ready(tool) => {
                    if !self.settings.layout.shared_interpreter().is_file() {
                        tracing::warn!(
                            env = %self.settings.layout.shared_env_dir.display(),
                            "shared environment disappeared, provisioning again"
                        );
                        self.init.invalidate();
                        continue;
                    }
                    tool
                }
                Acquired::Pending(future) => future.await?,
            };
            // The chain's own events went to whoever started it.
            if !started {
                self.report_ready(progress);
            }
            return Ok(tool);
        }
    }

    fn report_ready(&self, progress: &ProgressReporter) {
        let version = &self.settings.python_version;
        progress.done(Stage::Install, format!("Python {version} ready"));
        progress.done(Stage::Venv, "Virtual environment ready");
    }

    fn start_chain(
        &self,
        generation: u64,
        progress: &ProgressReporter,
    ) -> futures::future::BoxFuture<'static, InitResult> {
        let settings = self.settings.clone();
        let progress = progress.clone();
        let cell = Arc::clone(&self.init);
        let task = tokio::spawn(async move {
            let result = initialize(&settings, &progress).await;
            cell.settle(generation, &result);
            result
        });
        let cell = Arc::clone(&self.init);
        async move {
            match task.await {
                Ok(result) => result,
                Err(err) => {
                    let result = Err(RuntimeError::Aborted(err.to_string()));
                    cell.settle(generation, &result);
                    result
                }
            }
        }
        .boxed()
    }

    fn dependency_installer(&self, tool: PathBuf) -> DependencyInstaller {
        DependencyInstaller::new(
            tool,
            &self.settings.layout.shared_env_dir,
            self.settings.install.clone(),
        )
    }

    fn executor(&self) -> ProcessExecutor {
        ProcessExecutor::new(
            &self.settings.layout.shared_env_dir,
            &self.settings.layout.isolated_root,
        )
        .with_default_timeout(self.settings.default_timeout)
    }

    pub async fn install_shared(
        &self,
        names: &[String],
        progress: &ProgressReporter,
    ) -> Result<(), RuntimeError> {
        let tool = self.ready_tool(progress).await?;
        self.dependency_installer(tool)
            .install(
                &InstallTarget::Shared,
                &PackageSource::Names(names.to_vec()),
                progress,
            )
            .await
    }

    pub async fn install_isolated(
        &self,
        consumer: &ConsumerId,
        names: &[String],
        progress: &ProgressReporter,
    ) -> Result<ToolEnvironmentRecord, RuntimeError> {
        self.install_into_consumer(consumer, PackageSource::Names(names.to_vec()), None, progress)
            .await
    }

    pub async fn install_isolated_from_manifest(
        &self,
        consumer: &ConsumerId,
        manifest: &Path,
        progress: &ProgressReporter,
    ) -> Result<ToolEnvironmentRecord, RuntimeError> {
        let digest = manifest_digest(manifest)
            .map_err(|err| RuntimeError::Io(format!("{err:#}")))?;
        self.install_into_consumer(
            consumer,
            PackageSource::Manifest(manifest.to_path_buf()),
            Some(digest),
            progress,
        )
        .await
    }

    async fn install_into_consumer(
        &self,
        consumer: &ConsumerId,
        source: PackageSource,
        digest: Option<String>,
        progress: &ProgressReporter,
    ) -> Result<ToolEnvironmentRecord, RuntimeError> {
        let tool = self.ready_tool(progress).await?;
        let target_directory = self.settings.layout.isolated_dir(consumer);
        tracing::info!(
            consumer = %consumer,
            target = %target_directory.display(),
            "installing isolated packages"
        );
        // Create the directory even for an empty name list so the consumer is listed.
        std::fs::create_dir_all(&target_directory).map_err(|err| {
            RuntimeError::io(format!("create isolated dir {}", target_directory.display()), err)
        })?;
        self.dependency_installer(tool)
            .install(
                &InstallTarget::Isolated(target_directory.clone()),
                &source,
                progress,
            )
            .await?;
        Ok(ToolEnvironmentRecord::new(
            consumer.clone(),
            target_directory,
            &self.settings.python_version,
            digest,
        ))
    }

    pub async fn list_shared(&self) -> Result<Vec<String>, RuntimeError> {
        let tool = self.ready_tool(&ProgressReporter::none()).await?;
        self.dependency_installer(tool).list_shared().await
    }

    /// Structural scan of the consumer's directory; never provisions anything.
    pub fn list_isolated(&self, consumer: &ConsumerId) -> Result<Vec<String>, RuntimeError> {
        Ok(env_manager::list_isolated(
            &self.settings.layout.isolated_dir(consumer),
        ))
    }

    pub fn list_consumers(&self) -> Vec<ConsumerId> {
        let mut consumers: Vec<ConsumerId> = WalkDir::new(&self.settings.layout.isolated_root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_dir())
            .filter_map(|entry| entry.file_name().to_str().and_then(|name| name.parse().ok()))
            .collect();
        consumers.sort();
        consumers
    }

    /// Deletes the consumer's isolated directory. Returns whether one existed.
    pub fn remove_isolated(&self, consumer: &ConsumerId) -> Result<bool, RuntimeError> {
        let dir = self.settings.layout.isolated_dir(consumer);
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)
            .map_err(|err| RuntimeError::io(format!("remove {}", dir.display()), err))?;
        tracing::info!(consumer = %consumer, "removed isolated directory");
        Ok(true)
    }

    /// True when a manifest install would change anything: no record yet, the
    /// recorded directory is gone, a different interpreter version, or
    /// different manifest contents. A missing manifest never needs an install.
    pub fn needs_isolated_install(
        &self,
        record: Option<&ToolEnvironmentRecord>,
        manifest: &Path,
    ) -> bool {
        if !manifest.is_file() {
            return false;
        }
        let Some(record) = record else {
            return true;
        };
        if !record.target_directory.is_dir() {
            tracing::debug!(
                consumer = %record.consumer_id,
                target = %record.target_directory.display(),
                "recorded isolated dir is gone"
            );
            return true;
        }
        match manifest_digest(manifest) {
            Ok(digest) => !record.is_current(&self.settings.python_version, Some(&digest)),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "could not hash manifest");
                true
            }
        }
    }

    /// Where a consumer's worker should run. With an existing manifest the
    /// consumer gets its own virtual environment, synced to the manifest;
    /// otherwise the shared environment with its isolated directory on the
    /// search path.
    pub async fn resolve_consumer_environment(
        &self,
        consumer: &ConsumerId,
        manifest: Option<&Path>,
        progress: &ProgressReporter,
    ) -> Result<ConsumerEnvironment, RuntimeError> {
        let layout = &self.settings.layout;
        if let Some(manifest) = manifest.filter(|path| path.is_file()) {
            let record = self.ensure_tool_env(consumer, Some(manifest), progress).await?;
            return Ok(ConsumerEnvironment {
                consumer_id: consumer.clone(),
                interpreter: layout.tool_env_interpreter(consumer),
                environment: record.target_directory,
                search_paths: Vec::new(),
            });
        }

        self.ready_tool(progress).await?;
        let consumer_dir = layout.isolated_dir(consumer);
        std::fs::create_dir_all(&consumer_dir).map_err(|err| {
            RuntimeError::io(format!("create isolated dir {}", consumer_dir.display()), err)
        })?;
        Ok(ConsumerEnvironment {
            consumer_id: consumer.clone(),
            interpreter: layout.shared_interpreter(),
            environment: layout.shared_env_dir.clone(),
            search_paths: vec![consumer_dir],
        })
    }

    /// `Err` only when the runtime could not be made ready; execution
    /// failures are reported inside the `ExecutionResult`.
    pub async fn run_script(
        &self,
        script: &Path,
        args: &[String],
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult, RuntimeError> {
        self.ready_tool(&ProgressReporter::none()).await?;
        Ok(self.executor().run_script(script, args, options).await)
    }

    pub async fn run_code(
        &self,
        code: &str,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult, RuntimeError> {
        self.ready_tool(&ProgressReporter::none()).await?;
        Ok(self.executor().run_code(code, options).await)
    }

    pub async fn spawn_long(
        &self,
        script: &Path,
        args: &[String],
        options: &ExecutionOptions,
    ) -> Result<ProcessHandle, RuntimeError> {
        self.ready_tool(&ProgressReporter::none()).await?;
        self.executor().spawn_long(script, args, options)
    }
}

async fn initialize(settings: &ManagerSettings, progress: &ProgressReporter) -> InitResult {
    let layout = &settings.layout;
    let tool = settings.locator.require().await?;
    InterpreterInstaller::new(&tool, &layout.interpreter_dir, &settings.python_version)
        .ensure_installed(progress)
        .await?;
    EnvironmentProvisioner::new(
        &tool,
        &layout.interpreter_dir,
        &layout.shared_env_dir,
        &settings.python_version,
    )
    .ensure_environment(progress)
    .await?;
    Ok(tool)
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{Duration, Instant};

    use env_manager::fake_tool::FakeTool;
    use progress::ProgressEvent;

    use super::*;

    fn manager(fixture: &FakeTool) -> RuntimeManager {
        RuntimeManager::new(ManagerSettings::new(
            fixture.root().join("data"),
            fixture.tool_path(),
        ))
    }

    fn consumer(name: &str) -> ConsumerId {
        ConsumerId::new(name).unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_install() {
        let fixture = FakeTool::builder().install_delay("0.3").build();
        let manager = manager(&fixture);

        let none = ProgressReporter::none();
        let calls = (0..8).map(|_| manager.ensure_ready(&none));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(fixture.count_invocations("python install"), 1);
        assert_eq!(fixture.count_invocations("venv"), 1);
        assert_eq!(manager.phase(), InitPhase::Ready);
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn ends_ready(events: &[ProgressEvent]) -> bool {
        let tail: Vec<_> = events
            .iter()
            .rev()
            .take(2)
            .map(|event| (event.stage, event.percent))
            .collect();
        tail == vec![(Stage::Venv, Some(100)), (Stage::Install, Some(100))]
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn joined_and_later_callers_get_final_events() {
        let fixture = FakeTool::builder().install_delay("0.3").build();
        let manager = manager(&fixture);
        let (first, mut first_rx) = ProgressReporter::channel();
        let (second, mut second_rx) = ProgressReporter::channel();

        let (a, b) = tokio::join!(manager.ensure_ready(&first), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            manager.ensure_ready(&second).await
        });
        a.unwrap();
        b.unwrap();

        let first_events = drain(&mut first_rx);
        let second_events = drain(&mut second_rx);
        assert!(first_events.iter().any(|e| e.stage == Stage::Download));
        assert!(second_events.iter().all(|e| e.stage != Stage::Download));
        assert!(ends_ready(&second_events), "{second_events:?}");

        let (third, mut third_rx) = ProgressReporter::channel();
        manager.ensure_ready(&third).await.unwrap();
        assert!(ends_ready(&drain(&mut third_rx)));
        assert_eq!(fixture.count_invocations("python install"), 1);
    }

    #[tokio::test]
    async fn status_has_no_side_effects() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);

        let status = manager.get_status().await;
        assert!(status.tool_available);
        assert_eq!(
            status.tool_version.as_deref(),
            Some(env_manager::fake_tool::FAKE_TOOL_VERSION)
        );
        assert!(!status.interpreter_installed);
        assert!(!status.environment_exists);
        assert!(!status.is_ready());
        assert!(!manager.layout().data_dir.exists());
        assert!(fixture.invocations().iter().all(|line| line == "--version"));
        assert_eq!(manager.phase(), InitPhase::Uninitialized);

        manager.ensure_ready(&ProgressReporter::none()).await.unwrap();
        let status = manager.get_status().await;
        assert!(status.is_ready());
        assert_eq!(status.interpreter_version.as_deref(), Some("3.12.8"));
        assert_eq!(
            status.environment_path,
            Some(manager.layout().shared_env_dir.clone())
        );
    }

    #[tokio::test]
    async fn first_caller_receives_every_stage_in_order() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        let (reporter, mut rx) = ProgressReporter::channel();
        manager.ensure_ready(&reporter).await.unwrap();
        manager
            .install_shared(&names(&["requests"]), &reporter)
            .await
            .unwrap();
        drop(reporter);

        let mut stages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if stages.last() != Some(&event.stage) {
                stages.push(event.stage);
            }
        }
        assert_eq!(stages.first(), Some(&Stage::Download));
        assert_eq!(stages.last(), Some(&Stage::Deps));
        let venv = stages.iter().position(|s| *s == Stage::Venv).unwrap();
        let install = stages.iter().position(|s| *s == Stage::Install).unwrap();
        assert!(install < venv);
    }

    #[tokio::test]
    async fn failed_initialization_is_retryable() {
        let fixture = FakeTool::builder().fail_python_install().build();
        let manager = manager(&fixture);

        let err = manager
            .ensure_ready(&ProgressReporter::none())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Provisioning { .. }));
        assert_eq!(manager.phase(), InitPhase::Uninitialized);

        fixture.heal_python_install();
        manager.ensure_ready(&ProgressReporter::none()).await.unwrap();
        assert_eq!(manager.phase(), InitPhase::Ready);
        assert_eq!(fixture.count_invocations("python install"), 2);
    }

    #[tokio::test]
    async fn missing_tool_fails_fast_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RuntimeManager::new(ManagerSettings::new(
            dir.path().join("data"),
            dir.path().join("no-such-uv"),
        ));

        let status = manager.get_status().await;
        assert!(!status.tool_available);

        let outcome = tokio::time::timeout(Duration::from_secs(5), async {
            let ready = manager.ensure_ready(&ProgressReporter::none()).await;
            let run = manager.run_code("echo hi", &ExecutionOptions::default()).await;
            let install = manager
                .install_isolated(
                    &consumer("tool-a"),
                    &names(&["rich"]),
                    &ProgressReporter::none(),
                )
                .await;
            (ready, run, install)
        })
        .await
        .expect("operations must not hang without a tool");

        assert!(outcome.0.unwrap_err().is_unavailable());
        assert!(outcome.1.unwrap_err().is_unavailable());
        assert!(outcome.2.unwrap_err().is_unavailable());
        assert_eq!(manager.phase(), InitPhase::Uninitialized);
    }

    #[tokio::test]
    async fn initialization_outlives_a_dropped_caller() {
        let fixture = FakeTool::builder().install_delay("0.5").build();
        let manager = Arc::new(manager(&fixture));

        let caller = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.ensure_ready(&ProgressReporter::none()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        caller.abort();

        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.phase() != InitPhase::Ready {
            assert!(Instant::now() < deadline, "initialization never settled");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        manager.ensure_ready(&ProgressReporter::none()).await.unwrap();
        assert_eq!(fixture.count_invocations("python install"), 1);
    }

    #[tokio::test]
    async fn vanished_environment_is_provisioned_again() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        manager.ensure_ready(&ProgressReporter::none()).await.unwrap();

        std::fs::remove_dir_all(&manager.layout().shared_env_dir).unwrap();
        let result = manager
            .run_code("echo back", &ExecutionOptions::default())
            .await
            .unwrap();
        assert!(result.stdout.contains("back"));
        assert_eq!(fixture.count_invocations("venv"), 2);
        assert_eq!(fixture.count_invocations("python install"), 1);
    }

    #[tokio::test]
    async fn isolated_installs_do_not_leak_between_consumers() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        let a = consumer("tool-a");
        let b = consumer("tool-b");

        let record_a = manager
            .install_isolated(&a, &names(&["requests"]), &ProgressReporter::none())
            .await
            .unwrap();
        manager
            .install_isolated(&b, &names(&["rich", "pyyaml"]), &ProgressReporter::none())
            .await
            .unwrap();

        assert_eq!(manager.list_isolated(&a).unwrap(), vec!["requests"]);
        assert_eq!(manager.list_isolated(&b).unwrap(), vec!["pyyaml", "rich"]);
        assert!(manager.list_shared().await.unwrap().is_empty());
        assert_eq!(record_a.consumer_id, a);
        assert_eq!(record_a.target_directory, manager.layout().isolated_dir(&a));
        assert_eq!(record_a.interpreter_version, "3.12");
        assert!(record_a.requirements_digest.is_none());
        assert_eq!(manager.list_consumers(), vec![a, b]);
    }

    #[tokio::test]
    async fn unknown_consumer_lists_empty_without_provisioning() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        assert!(manager.list_isolated(&consumer("nobody")).unwrap().is_empty());
        assert!(manager.list_consumers().is_empty());
        assert!(fixture.invocations().is_empty());
    }

    #[tokio::test]
    async fn shared_install_twice_succeeds() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        for _ in 0..2 {
            manager
                .install_shared(&names(&["requests"]), &ProgressReporter::none())
                .await
                .unwrap();
        }
        assert_eq!(manager.list_shared().await.unwrap(), vec!["requests"]);
    }

    #[tokio::test]
    async fn failed_package_install_reports_exit_code() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        let err = manager
            .install_shared(&names(&["does-not-exist"]), &ProgressReporter::none())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DependencyInstall { code: Some(1), .. }));
        // The runtime itself stays ready.
        assert_eq!(manager.phase(), InitPhase::Ready);
    }

    #[tokio::test]
    async fn manifest_record_drives_reinstall_decision() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        let a = consumer("tool-a");
        let manifest = fixture.root().join("requirements.txt");
        std::fs::write(&manifest, "requests==2.32.3\n").unwrap();

        assert!(manager.needs_isolated_install(None, &manifest));
        let record = manager
            .install_isolated_from_manifest(&a, &manifest, &ProgressReporter::none())
            .await
            .unwrap();
        assert_eq!(
            record.requirements_digest.as_ref().map(String::len),
            Some(64)
        );
        assert!(!manager.needs_isolated_install(Some(&record), &manifest));

        std::fs::write(&manifest, "requests==2.32.4\n").unwrap();
        assert!(manager.needs_isolated_install(Some(&record), &manifest));

        let other_version =
            RuntimeManager::new(manager.settings().clone().with_python_version("3.13"));
        std::fs::write(&manifest, "requests==2.32.3\n").unwrap();
        assert!(other_version.needs_isolated_install(Some(&record), &manifest));

        let missing = fixture.root().join("missing.txt");
        assert!(!manager.needs_isolated_install(Some(&record), &missing));
    }

    #[tokio::test]
    async fn vanished_isolated_dir_needs_reinstall() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        let a = consumer("tool-a");
        let manifest = fixture.root().join("requirements.txt");
        std::fs::write(&manifest, "requests==2.32.3\n").unwrap();
        let record = manager
            .install_isolated_from_manifest(&a, &manifest, &ProgressReporter::none())
            .await
            .unwrap();
        assert!(!manager.needs_isolated_install(Some(&record), &manifest));

        std::fs::remove_dir_all(manager.layout().isolated_dir(&a)).unwrap();
        assert!(manager.needs_isolated_install(Some(&record), &manifest));
    }

    #[tokio::test]
    async fn missing_manifest_is_an_io_error() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        let err = manager
            .install_isolated_from_manifest(
                &consumer("tool-a"),
                &fixture.root().join("missing.txt"),
                &ProgressReporter::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Io(_)));
    }

    #[tokio::test]
    async fn removing_a_consumer_clears_its_listing() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        let a = consumer("tool-a");
        manager
            .install_isolated(&a, &names(&["requests"]), &ProgressReporter::none())
            .await
            .unwrap();

        assert!(manager.remove_isolated(&a).unwrap());
        assert!(!manager.remove_isolated(&a).unwrap());
        assert!(manager.list_isolated(&a).unwrap().is_empty());
        assert!(manager.list_consumers().is_empty());
    }

    #[tokio::test]
    async fn run_code_prints_hi() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        let result = manager
            .run_code("echo hi", &ExecutionOptions::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.contains("hi"));
    }

    #[tokio::test]
    async fn run_script_honours_timeout() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        manager.ensure_ready(&ProgressReporter::none()).await.unwrap();
        let script = fixture.root().join("sleeper.sh");
        std::fs::write(&script, "exec sleep 10\n").unwrap();

        let options = ExecutionOptions::default().with_timeout(Duration::from_millis(400));
        let started = Instant::now();
        let result = manager.run_script(&script, &[], &options).await.unwrap();
        let elapsed = started.elapsed();

        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        assert!(result.error.unwrap().starts_with("timed out after 400"));
        assert!(elapsed >= Duration::from_millis(400));
        assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn consumer_environment_resolves_search_path() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        let a = consumer("tool-a");
        let env = manager
            .resolve_consumer_environment(&a, None, &ProgressReporter::none())
            .await
            .unwrap();
        assert_eq!(env.interpreter, manager.layout().shared_interpreter());
        assert_eq!(env.search_paths, vec![manager.layout().isolated_dir(&a)]);
        assert!(env.search_paths[0].is_dir());

        let result = manager
            .run_code("echo \"$PYTHONPATH\"", &ExecutionOptions::default().with_consumer(a))
            .await
            .unwrap();
        assert!(result
            .stdout
            .trim()
            .starts_with(&env.search_paths[0].display().to_string()));
    }

    #[tokio::test]
    async fn spawn_long_streams_until_exit() {
        let fixture = FakeTool::new();
        let manager = manager(&fixture);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let options = ExecutionOptions::default().with_output_callback(move |text, _| {
            let _ = tx.send(text.to_string());
        });
        let script = fixture.root().join("worker.sh");
        std::fs::write(&script, "echo working\n").unwrap();

        let mut handle = manager.spawn_long(&script, &[], &options).await.unwrap();
        assert!(handle.pid().is_some());
        let status = handle.wait().await.unwrap();
        assert!(status.success());

        let mut seen = String::new();
        while let Ok(chunk) = rx.try_recv() {
            seen.push_str(&chunk);
        }
        assert!(seen.contains("working"));
    }
}
