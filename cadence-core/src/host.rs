use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broadcast::{BroadcastSettings, UpdateBroadcaster};
use crate::config::{ensure_dir, CadenceConfig};
use crate::error::CadenceResult;
use crate::host_record::DiscoveryRecord;
use crate::notify::BroadcastNotifier;
use crate::plugins::{
    ChainedPluginLoader, FactoryCatalog, ManifestPluginLoader, PluginLoader, PluginRegistry,
    SandboxPool, SandboxSettings, StaticPluginLoader,
};
use crate::scheduler::{AutoStopTracker, ScheduleManager, SchedulerSettings};
use crate::services::{
    DiagnosticsService, ModuleService, PresetService, ScheduleService, SessionService,
};
use crate::session::{SessionOrchestrator, SessionTimeouts};
use crate::store::{FilePresetStore, FileScheduleStore, PresetStore, ScheduleStore};

/// Assembles a host from configuration, with overridable collaborators.
pub struct HostBuilder {
    config: CadenceConfig,
    loader: Option<Arc<dyn PluginLoader>>,
    preset_store: Option<Arc<dyn PresetStore>>,
    schedule_store: Option<Arc<dyn ScheduleStore>>,
}

impl HostBuilder {
    pub fn new(config: CadenceConfig) -> Self {
        Self {
            config,
            loader: None,
            preset_store: None,
            schedule_store: None,
        }
    }

    pub fn loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn preset_store(mut self, store: Arc<dyn PresetStore>) -> Self {
        self.preset_store = Some(store);
        self
    }

    pub fn schedule_store(mut self, store: Arc<dyn ScheduleStore>) -> Self {
        self.schedule_store = Some(store);
        self
    }

    pub fn build(self) -> CadenceResult<CadenceHost> {
        let config = self.config;
        config.validate()?;

        let root = CancellationToken::new();
        let loader = self.loader.unwrap_or_else(default_loader);
        let presets: Arc<dyn PresetStore> = match self.preset_store {
            Some(store) => store,
            None => Arc::new(FilePresetStore::new(config.host.presets_dir())),
        };
        let schedule_store: Arc<dyn ScheduleStore> = match self.schedule_store {
            Some(store) => store,
            None => Arc::new(FileScheduleStore::new(config.host.schedules_dir())),
        };

        let registry = Arc::new(
            PluginRegistry::new(loader, config.host.instances_dir())
                .with_allowed_symlinks(config.host.allowed_symlinks.clone())
                .with_root_token(root.child_token()),
        );
        let broadcaster = UpdateBroadcaster::with_root_token(
            BroadcastSettings::from(&config.broadcast),
            root.child_token(),
        );
        let orchestrator = Arc::new(SessionOrchestrator::new(
            Arc::clone(&registry),
            broadcaster.clone(),
            SessionTimeouts::from(&config.session),
        ));
        let sandbox = Arc::new(SandboxPool::new(
            Arc::clone(&registry),
            broadcaster.clone(),
            SandboxSettings::from(&config),
        ));

        let notifier = BroadcastNotifier::new();
        let auto_stop = Arc::new(AutoStopTracker::new(
            Arc::clone(&orchestrator),
            Arc::clone(&presets),
            Arc::new(notifier.clone()),
        ));
        let scheduler = Arc::new(ScheduleManager::new(
            schedule_store,
            Arc::clone(&presets),
            Arc::clone(&orchestrator),
            Arc::clone(&auto_stop),
            Arc::new(notifier.clone()),
            SchedulerSettings::from(&config.scheduler),
        ));

        Ok(CadenceHost {
            presets: PresetService::new(Arc::clone(&presets), Arc::clone(&registry)),
            sessions: SessionService::new(
                Arc::clone(&orchestrator),
                Arc::clone(&presets),
                Arc::clone(&auto_stop),
            ),
            modules: ModuleService::new(
                Arc::clone(&registry),
                Arc::clone(&orchestrator),
                Arc::clone(&sandbox),
                broadcaster.clone(),
                Arc::clone(&presets),
            ),
            schedules: ScheduleService::new(Arc::clone(&scheduler)),
            diagnostics: DiagnosticsService::new(
                Arc::clone(&registry),
                Arc::clone(&orchestrator),
                Arc::clone(&sandbox),
                broadcaster.clone(),
            ),
            config,
            root,
            registry,
            orchestrator,
            sandbox,
            scheduler,
            auto_stop,
            notifier,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// Built-in plugins first, then manifests found on the search paths.
fn default_loader() -> Arc<dyn PluginLoader> {
    let builtins: Arc<dyn PluginLoader> = Arc::new(StaticPluginLoader::builtins());
    let manifests: Arc<dyn PluginLoader> =
        Arc::new(ManifestPluginLoader::new(FactoryCatalog::with_builtins()));
    Arc::new(ChainedPluginLoader::new(vec![builtins, manifests]))
}

/// The running host: owns every component and the background loops.
pub struct CadenceHost {
    config: CadenceConfig,
    root: CancellationToken,
    registry: Arc<PluginRegistry>,
    orchestrator: Arc<SessionOrchestrator>,
    sandbox: Arc<SandboxPool>,
    scheduler: Arc<ScheduleManager>,
    auto_stop: Arc<AutoStopTracker>,
    notifier: BroadcastNotifier,
    presets: PresetService,
    sessions: SessionService,
    modules: ModuleService,
    schedules: ScheduleService,
    diagnostics: DiagnosticsService,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CadenceHost {
    pub fn builder(config: CadenceConfig) -> HostBuilder {
        HostBuilder::new(config)
    }

    pub fn build(config: CadenceConfig) -> CadenceResult<Self> {
        HostBuilder::new(config).build()
    }

    pub fn config(&self) -> &CadenceConfig {
        &self.config
    }

    pub fn presets(&self) -> &PresetService {
        &self.presets
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    pub fn modules(&self) -> &ModuleService {
        &self.modules
    }

    pub fn schedules(&self) -> &ScheduleService {
        &self.schedules
    }

    pub fn diagnostics(&self) -> &DiagnosticsService {
        &self.diagnostics
    }

    pub fn notifications(&self) -> &BroadcastNotifier {
        &self.notifier
    }

    pub fn orchestrator(&self) -> &Arc<SessionOrchestrator> {
        &self.orchestrator
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Discovers plugins, loads schedules, spawns the background loops and
    /// writes the discovery record.
    pub async fn start(&self) -> CadenceResult<()> {
        ensure_dir(&self.config.host.data_dir)?;

        let definitions = self
            .registry
            .discover(&self.config.host.plugin_search_paths())
            .await?;
        self.scheduler.load().await?;

        {
            let mut tasks = self.lock_tasks();

            let sandbox = Arc::clone(&self.sandbox);
            let cancel = self.root.child_token();
            tasks.push(tokio::spawn(async move {
                sandbox.run_eviction_loop(cancel).await;
            }));

            if self.config.scheduler.enabled {
                tasks.push(tokio::spawn(
                    Arc::clone(&self.scheduler).run_loop(self.root.child_token()),
                ));
            } else {
                info!("Scheduler disabled by configuration");
            }
        }

        DiscoveryRecord::for_current_process(
            self.config.host.bind_address.clone(),
            self.config.host.port,
        )
        .write(&self.config.host.discovery_file())
        .await?;

        info!(
            address = %self.config.listen_address(),
            plugins = definitions.len(),
            "Cadence host started"
        );
        Ok(())
    }

    /// Ends the running session, stops every loop and releases sandboxes.
    pub async fn shutdown(&self) {
        info!("Shutting down Cadence host");
        self.auto_stop.stop_tracking();

        if self.orchestrator.is_running() {
            match self.orchestrator.stop_session().await {
                Ok(report) if !report.is_clean() => {
                    warn!(
                        failures = report.failures.len(),
                        "Session stopped with plugin errors during shutdown"
                    );
                }
                Ok(_) => {}
                Err(e) => e.log(),
            }
        }

        self.root.cancel();
        let tasks: Vec<JoinHandle<()>> = self.lock_tasks().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task ended abnormally");
            }
        }

        let released = self.sandbox.clear().await;
        if released > 0 {
            info!(released, "Released sandboxes");
        }

        if let Err(e) = DiscoveryRecord::remove_if_owned(&self.config.host.discovery_file()).await
        {
            e.log();
        }
        info!("Cadence host stopped");
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfiguredPlugin, SessionPreset};
    use crate::session::SessionState;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> CadenceConfig {
        let mut config = CadenceConfig::default();
        config.host.data_dir = dir.path().to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_start_and_shutdown_lifecycle() {
        let dir = TempDir::new().unwrap();
        let host = CadenceHost::build(config(&dir)).unwrap();

        host.start().await.unwrap();
        let record_path = dir.path().join("host.json");
        assert!(record_path.exists());
        assert!(host.registry().contains("announcer"));

        let preset = host
            .presets()
            .create(
                SessionPreset::new("Focus", vec![ConfiguredPlugin::new("announcer")])
                    .with_id("focus"),
            )
            .await
            .unwrap();
        assert!(dir.path().join("presets/focus.json").exists());

        host.sessions()
            .start(&preset.id, None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(host.diagnostics().active_session_count(), 1);

        host.shutdown().await;
        assert_eq!(host.orchestrator().state(), SessionState::Idle);
        assert!(!record_path.exists());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = CadenceConfig::default();
        config.sandbox.max_sandboxes = 0;
        assert!(CadenceHost::build(config).is_err());
    }
}
