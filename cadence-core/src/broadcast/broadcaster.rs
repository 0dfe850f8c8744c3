use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::BroadcastConfig;
use crate::plugins::{Action, PluginInstance, Setting, SettingChoice};

use super::sink::UpdateSink;
use super::types::{InstanceFilter, Property, PropertyUpdate, SubscriptionEnd};

#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    pub value_batch_window: Duration,
    pub choices_throttle_interval: Duration,
    pub subscriber_buffer: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self::from(&BroadcastConfig::default())
    }
}

impl From<&BroadcastConfig> for BroadcastSettings {
    fn from(config: &BroadcastConfig) -> Self {
        Self {
            value_batch_window: config.value_batch_window(),
            choices_throttle_interval: config.choices_throttle_interval(),
            subscriber_buffer: config.subscriber_buffer.max(1),
        }
    }
}

struct SubscriberEntry {
    generation: u64,
    filter: InstanceFilter,
    queue: mpsc::Sender<PropertyUpdate>,
    replaced: CancellationToken,
}

struct Inner {
    settings: BroadcastSettings,
    subscribers: DashMap<String, SubscriberEntry>,
    attachments: DashMap<String, CancellationToken>,
    generation: AtomicU64,
    root: CancellationToken,
}

/// Fans out setting and action changes of attached instances to subscribers.
///
/// Each subscriber owns a bounded queue drained by its own writer loop, so a
/// slow sink only delays itself. Value changes are coalesced over the batch
/// window; choice lists are throttled and always end on the latest list.
#[derive(Clone)]
pub struct UpdateBroadcaster {
    inner: Arc<Inner>,
}

impl UpdateBroadcaster {
    pub fn new(settings: BroadcastSettings) -> Self {
        Self::with_root_token(settings, CancellationToken::new())
    }

    /// Forwarder tasks stop when `root` is cancelled.
    pub fn with_root_token(settings: BroadcastSettings, root: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                subscribers: DashMap::new(),
                attachments: DashMap::new(),
                generation: AtomicU64::new(0),
                root,
            }),
        }
    }

    pub fn settings(&self) -> &BroadcastSettings {
        &self.inner.settings
    }

    /// Streams matching updates into `sink` until cancelled, replaced by a
    /// newer subscription with the same id, or the sink fails.
    pub async fn subscribe<S>(
        &self,
        subscriber_id: &str,
        filter: InstanceFilter,
        mut sink: S,
        cancel: CancellationToken,
    ) -> SubscriptionEnd
    where
        S: UpdateSink,
    {
        let (queue, mut rx) = mpsc::channel(self.inner.settings.subscriber_buffer);
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let replaced = CancellationToken::new();

        let previous = self.inner.subscribers.insert(
            subscriber_id.to_string(),
            SubscriberEntry {
                generation,
                filter,
                queue,
                replaced: replaced.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(subscriber_id = %subscriber_id, "Replacing existing subscription");
            previous.replaced.cancel();
        }
        debug!(subscriber_id = %subscriber_id, "Subscriber attached");

        let end = loop {
            let update = tokio::select! {
                biased;
                _ = cancel.cancelled() => break SubscriptionEnd::Cancelled,
                _ = replaced.cancelled() => break SubscriptionEnd::Replaced,
                update = rx.recv() => match update {
                    Some(update) => update,
                    None => break SubscriptionEnd::Cancelled,
                },
            };

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break SubscriptionEnd::Cancelled,
                _ = replaced.cancelled() => break SubscriptionEnd::Replaced,
                sent = sink.send(update) => sent,
            };
            if let Err(e) = sent {
                warn!(subscriber_id = %subscriber_id, error = %e, "Subscriber sink failed, unsubscribing");
                break SubscriptionEnd::SinkFailed;
            }
        };

        self.inner
            .subscribers
            .remove_if(subscriber_id, |_, entry| entry.generation == generation);
        debug!(subscriber_id = %subscriber_id, end = ?end, "Subscriber detached");
        end
    }

    /// Ends the subscription with this id, if any.
    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        self.inner.subscribers.remove(subscriber_id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Queues `update` for every matching subscriber and returns how many
    /// accepted it. A full queue drops the update for that subscriber only.
    pub fn broadcast_update(&self, update: PropertyUpdate) -> usize {
        let mut delivered = 0;
        for entry in self.inner.subscribers.iter() {
            if !entry.filter.matches(&update.instance_id) {
                continue;
            }
            match entry.queue.try_send(update.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => warn!(
                    subscriber_id = %entry.key(),
                    instance_id = %update.instance_id,
                    "Subscriber queue full, dropping update"
                ),
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    fn attachment_token(&self, instance_id: &str) -> CancellationToken {
        self.inner
            .attachments
            .entry(instance_id.to_string())
            .or_insert_with(|| self.inner.root.child_token())
            .clone()
    }

    pub fn is_attached(&self, instance_id: &str) -> bool {
        self.inner.attachments.contains_key(instance_id)
    }

    pub fn attached_count(&self) -> usize {
        self.inner.attachments.len()
    }

    pub fn attach_instance(&self, instance_id: &str, instance: &PluginInstance) {
        for setting in instance.settings() {
            self.attach_setting(instance_id, setting);
        }
        for action in instance.actions() {
            self.attach_action(instance_id, action);
        }
        debug!(
            instance_id = %instance_id,
            plugin_id = %instance.plugin_id(),
            "Instance attached to broadcaster"
        );
    }

    pub fn attach_setting(&self, instance_id: &str, setting: &Setting) {
        let token = self.attachment_token(instance_id);
        let key = setting.key().to_string();

        self.spawn_value_batcher(instance_id, setting, token.clone());

        let (id, k) = (instance_id.to_string(), key.clone());
        self.spawn_forwarder(setting.watch_label(), token.clone(), move |label| {
            PropertyUpdate::setting(&id, &k, Property::Label, json!(label))
        });

        let (id, k) = (instance_id.to_string(), key.clone());
        self.spawn_forwarder(setting.watch_visible(), token.clone(), move |visible| {
            PropertyUpdate::setting(&id, &k, Property::Visibility, json!(visible))
        });

        let (id, k) = (instance_id.to_string(), key);
        self.spawn_forwarder(setting.watch_read_only(), token.clone(), move |read_only| {
            PropertyUpdate::setting(&id, &k, Property::ReadOnly, json!(read_only))
        });

        self.spawn_choices_throttle(instance_id, setting, token);
    }

    pub fn attach_action(&self, instance_id: &str, action: &Action) {
        let token = self.attachment_token(instance_id);

        let (id, k) = (instance_id.to_string(), action.key().to_string());
        self.spawn_forwarder(action.watch_label(), token.clone(), move |label| {
            PropertyUpdate::action(&id, &k, Property::Label, json!(label))
        });

        let (id, k) = (instance_id.to_string(), action.key().to_string());
        self.spawn_forwarder(action.watch_enabled(), token, move |enabled| {
            PropertyUpdate::action(&id, &k, Property::Enabled, json!(enabled))
        });
    }

    /// Stops every forwarder of this instance. No update for it is emitted
    /// after this returns.
    pub fn detach(&self, instance_id: &str) -> bool {
        match self.inner.attachments.remove(instance_id) {
            Some((_, token)) => {
                token.cancel();
                debug!(instance_id = %instance_id, "Instance detached from broadcaster");
                true
            }
            None => false,
        }
    }

    fn spawn_forwarder<T, F>(&self, mut rx: watch::Receiver<T>, token: CancellationToken, make: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(T) -> PropertyUpdate + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    changed = rx.changed() => if changed.is_err() { break },
                }
                let value = rx.borrow_and_update().clone();
                this.broadcast_update(make(value));
            }
        });
    }

    fn spawn_value_batcher(&self, instance_id: &str, setting: &Setting, token: CancellationToken) {
        let this = self.clone();
        let setting = setting.clone();
        let instance_id = instance_id.to_string();
        let window = self.inner.settings.value_batch_window;
        let mut rx = setting.watch_value();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    changed = rx.changed() => if changed.is_err() { break },
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(window) => {}
                }
                if setting.is_closed() {
                    break;
                }
                let value = rx.borrow_and_update().clone();
                this.broadcast_update(PropertyUpdate::setting(
                    &instance_id,
                    setting.key(),
                    Property::Value,
                    json!(value),
                ));
            }
        });
    }

    fn spawn_choices_throttle(&self, instance_id: &str, setting: &Setting, token: CancellationToken) {
        let this = self.clone();
        let instance_id = instance_id.to_string();
        let key = setting.key().to_string();
        let interval = self.inner.settings.choices_throttle_interval;
        let mut rx = setting.watch_choices();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    changed = rx.changed() => if changed.is_err() { break },
                }
                let choices = rx.borrow_and_update().clone();
                this.broadcast_update(PropertyUpdate::setting(
                    &instance_id,
                    &key,
                    Property::Choices,
                    choices_value(choices),
                ));
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
    }
}

fn choices_value(choices: Option<Vec<SettingChoice>>) -> Value {
    match choices {
        Some(choices) => serde_json::to_value(choices).unwrap_or(Value::Null),
        None => Value::Null,
    }
}

impl Default for UpdateBroadcaster {
    fn default() -> Self {
        Self::new(BroadcastSettings::default())
    }
}
