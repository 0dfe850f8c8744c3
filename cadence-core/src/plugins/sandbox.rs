use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{sandbox_key, UpdateBroadcaster};
use crate::config::CadenceConfig;
use crate::error::{CadenceError, CadenceResult};
use crate::session::LifecyclePhase;

use super::instance::PluginInstance;
use super::registry::PluginRegistry;

#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub idle_ttl: Duration,
    pub max_sandboxes: usize,
    pub sweep_interval: Duration,
    pub startup_timeout: Duration,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self::from(&CadenceConfig::default())
    }
}

impl From<&CadenceConfig> for SandboxSettings {
    fn from(config: &CadenceConfig) -> Self {
        Self {
            idle_ttl: config.sandbox.idle_ttl(),
            max_sandboxes: config.sandbox.max_sandboxes.max(1),
            sweep_interval: config.sandbox.sweep_interval(),
            startup_timeout: config.session.startup_timeout(),
        }
    }
}

struct SandboxEntry {
    instance: Arc<PluginInstance>,
    last_used: Instant,
}

/// Design-time plugin instances used to edit configuration without a session.
///
/// Entries idle longer than the TTL are swept; when the pool is full the
/// least recently used entry is evicted before a new one is inserted.
pub struct SandboxPool {
    registry: Arc<PluginRegistry>,
    broadcaster: UpdateBroadcaster,
    settings: SandboxSettings,
    entries: Mutex<HashMap<String, SandboxEntry>>,
    /// Serializes creation per module so `entries` is never held across
    /// plugin initialization.
    creating: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    changed: Notify,
}

impl SandboxPool {
    pub fn new(
        registry: Arc<PluginRegistry>,
        broadcaster: UpdateBroadcaster,
        settings: SandboxSettings,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            settings,
            entries: Mutex::new(HashMap::new()),
            creating: StdMutex::new(HashMap::new()),
            changed: Notify::new(),
        }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    /// Returns the live sandbox for `module_id`, creating and initializing
    /// one if needed.
    pub async fn get_or_create(&self, module_id: &str) -> CadenceResult<Arc<PluginInstance>> {
        if let Some(instance) = self.get(module_id).await {
            return Ok(instance);
        }

        let gate = self.creation_gate(module_id);
        let _creating = gate.lock().await;

        // Another caller may have finished while this one waited.
        if let Some(instance) = self.get(module_id).await {
            return Ok(instance);
        }

        let key = sandbox_key(module_id);
        let instance = self.registry.create_instance_with_key(module_id, &key)?;
        let cancel = instance.context().cancellation();
        let init = tokio::time::timeout(self.settings.startup_timeout, instance.initialize(cancel));
        let failure = match init.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(CadenceError::LifecycleFailure {
                plugin: module_id.to_string(),
                phase: LifecyclePhase::Initialize,
                message: e.to_string(),
            }),
            Err(_) => Some(CadenceError::LifecycleTimeout {
                plugin: module_id.to_string(),
                phase: LifecyclePhase::Initialize,
                timeout_ms: self.settings.startup_timeout.as_millis() as u64,
            }),
        };
        if let Some(error) = failure {
            instance.dispose();
            warn!(module_id = %module_id, error = %error, "Sandbox initialization failed");
            return Err(error);
        }

        let instance = Arc::new(instance);
        let mut entries = self.entries.lock().await;
        while entries.len() >= self.settings.max_sandboxes {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone());
            let Some(oldest) = oldest else { break };
            if let Some(entry) = entries.remove(&oldest) {
                debug!(module_id = %oldest, "Evicting least recently used sandbox");
                self.release(&oldest, entry);
            }
        }

        self.broadcaster.attach_instance(&key, &instance);
        entries.insert(
            module_id.to_string(),
            SandboxEntry {
                instance: Arc::clone(&instance),
                last_used: Instant::now(),
            },
        );
        drop(entries);
        self.changed.notify_one();

        info!(module_id = %module_id, "Sandbox created");
        Ok(instance)
    }

    fn creation_gate(&self, module_id: &str) -> Arc<Mutex<()>> {
        let mut creating = self
            .creating
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(creating.entry(module_id.to_string()).or_default())
    }

    pub async fn invoke_design_time_action(
        &self,
        module_id: &str,
        action_key: &str,
        cancel: CancellationToken,
    ) -> CadenceResult<()> {
        let instance = self.get_or_create(module_id).await?;
        instance.invoke_action(action_key, cancel).await
    }

    pub async fn get(&self, module_id: &str) -> Option<Arc<PluginInstance>> {
        let mut entries = self.entries.lock().await;
        entries.get_mut(module_id).map(|entry| {
            entry.last_used = Instant::now();
            Arc::clone(&entry.instance)
        })
    }

    pub async fn remove(&self, module_id: &str) -> bool {
        let removed = self.entries.lock().await.remove(module_id);
        match removed {
            Some(entry) => {
                self.release(module_id, entry);
                self.changed.notify_one();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn module_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Disposes entries idle for at least the TTL and returns how many went.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_used) >= self.settings.idle_ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(entry) = entries.remove(id) {
                self.release(id, entry);
            }
        }

        if !expired.is_empty() {
            debug!("Swept {} idle sandboxes", expired.len());
        }
        expired.len()
    }

    pub async fn next_expiry(&self) -> Option<Instant> {
        self.entries
            .lock()
            .await
            .values()
            .map(|entry| entry.last_used + self.settings.idle_ttl)
            .min()
    }

    /// Disposes every entry.
    pub async fn clear(&self) -> usize {
        let drained: Vec<(String, SandboxEntry)> = self.entries.lock().await.drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            self.release(&id, entry);
        }
        self.changed.notify_one();
        count
    }

    /// Sleeps until the earliest expiry (capped by the sweep interval), sweeps,
    /// and starts over. Pool changes wake it early.
    pub async fn run_eviction_loop(&self, cancel: CancellationToken) {
        debug!("Sandbox eviction loop started");
        loop {
            let cap = Instant::now() + self.settings.sweep_interval;
            let deadline = match self.next_expiry().await {
                Some(expiry) => expiry.min(cap),
                None => cap,
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.changed.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    self.sweep().await;
                }
            }
        }
        debug!("Sandbox eviction loop stopped");
    }

    fn release(&self, module_id: &str, entry: SandboxEntry) {
        self.broadcaster.detach(&sandbox_key(module_id));
        entry.instance.dispose();
    }
}
