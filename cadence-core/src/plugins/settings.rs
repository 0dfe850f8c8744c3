//! Reactive setting and action cells.
//!
//! Each observable property is a `tokio::sync::watch` channel owned by the
//! cell. Observers take explicit receivers and release them by dropping.
//! Once the owning instance closes a cell, every setter becomes a no-op so
//! nothing is emitted after dispose.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    #[default]
    Text,
    Password,
    Number,
    Toggle,
    Choice,
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    /// Written back into the preset.
    #[default]
    Persisted,
    /// Lives as long as the instance.
    Ephemeral,
    /// Display-only state pushed by the plugin.
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingChoice {
    pub value: String,
    pub label: String,
}

impl SettingChoice {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

struct SettingInner {
    key: String,
    description: String,
    control: ControlType,
    persistence: Persistence,
    label: watch::Sender<String>,
    visible: watch::Sender<bool>,
    read_only: watch::Sender<bool>,
    value: watch::Sender<String>,
    choices: watch::Sender<Option<Vec<SettingChoice>>>,
    closed: AtomicBool,
}

/// A live-editable plugin setting. Clones share the same cell.
#[derive(Clone)]
pub struct Setting {
    inner: Arc<SettingInner>,
}

pub struct SettingBuilder {
    key: String,
    label: String,
    description: String,
    control: ControlType,
    persistence: Persistence,
    visible: bool,
    read_only: bool,
    value: String,
    choices: Option<Vec<SettingChoice>>,
}

impl SettingBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn control(mut self, control: ControlType) -> Self {
        self.control = control;
        self
    }

    pub fn persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn choices(mut self, choices: Vec<SettingChoice>) -> Self {
        self.choices = Some(choices);
        self
    }

    pub fn build(self) -> Setting {
        Setting {
            inner: Arc::new(SettingInner {
                key: self.key,
                description: self.description,
                control: self.control,
                persistence: self.persistence,
                label: watch::Sender::new(self.label),
                visible: watch::Sender::new(self.visible),
                read_only: watch::Sender::new(self.read_only),
                value: watch::Sender::new(self.value),
                choices: watch::Sender::new(self.choices),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl Setting {
    pub fn builder(key: impl Into<String>, label: impl Into<String>) -> SettingBuilder {
        SettingBuilder {
            key: key.into(),
            label: label.into(),
            description: String::new(),
            control: ControlType::default(),
            persistence: Persistence::default(),
            visible: true,
            read_only: false,
            value: String::new(),
            choices: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }

    pub fn control(&self) -> ControlType {
        self.inner.control
    }

    pub fn persistence(&self) -> Persistence {
        self.inner.persistence
    }

    pub fn label(&self) -> String {
        self.inner.label.borrow().clone()
    }

    pub fn value(&self) -> String {
        self.inner.value.borrow().clone()
    }

    pub fn is_visible(&self) -> bool {
        *self.inner.visible.borrow()
    }

    pub fn is_read_only(&self) -> bool {
        *self.inner.read_only.borrow()
    }

    pub fn choices(&self) -> Option<Vec<SettingChoice>> {
        self.inner.choices.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns true when the stored value changed.
    pub fn set_value(&self, value: impl Into<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        let value = value.into();
        self.inner.value.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    pub fn set_label(&self, label: impl Into<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        let label = label.into();
        self.inner.label.send_if_modified(|current| {
            if *current == label {
                false
            } else {
                *current = label;
                true
            }
        })
    }

    pub fn set_visible(&self, visible: bool) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inner.visible.send_if_modified(|current| {
            let changed = *current != visible;
            *current = visible;
            changed
        })
    }

    pub fn set_read_only(&self, read_only: bool) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inner.read_only.send_if_modified(|current| {
            let changed = *current != read_only;
            *current = read_only;
            changed
        })
    }

    /// Every call emits, even with an equal list; consumers throttle.
    pub fn set_choices(&self, choices: Option<Vec<SettingChoice>>) {
        if self.is_closed() {
            return;
        }
        self.inner.choices.send_replace(choices);
    }

    pub fn watch_value(&self) -> watch::Receiver<String> {
        self.inner.value.subscribe()
    }

    pub fn watch_label(&self) -> watch::Receiver<String> {
        self.inner.label.subscribe()
    }

    pub fn watch_visible(&self) -> watch::Receiver<bool> {
        self.inner.visible.subscribe()
    }

    pub fn watch_read_only(&self) -> watch::Receiver<bool> {
        self.inner.read_only.subscribe()
    }

    pub fn watch_choices(&self) -> watch::Receiver<Option<Vec<SettingChoice>>> {
        self.inner.choices.subscribe()
    }

    pub(crate) fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn snapshot(&self) -> SettingSnapshot {
        SettingSnapshot {
            key: self.key().to_string(),
            label: self.label(),
            description: self.description().to_string(),
            control: self.control(),
            persistence: self.persistence(),
            visible: self.is_visible(),
            read_only: self.is_read_only(),
            value: self.value(),
            choices: self.choices(),
        }
    }
}

impl std::fmt::Debug for Setting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setting")
            .field("key", &self.inner.key)
            .field("control", &self.inner.control)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingSnapshot {
    pub key: String,
    pub label: String,
    pub description: String,
    pub control: ControlType,
    pub persistence: Persistence,
    pub visible: bool,
    pub read_only: bool,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<SettingChoice>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInvocation {
    pub key: String,
    pub at: DateTime<Utc>,
}

struct ActionInner {
    key: String,
    label: watch::Sender<String>,
    enabled: watch::Sender<bool>,
    invocations: broadcast::Sender<ActionInvocation>,
    closed: AtomicBool,
}

/// A button-like plugin command. Clones share the same cell.
#[derive(Clone)]
pub struct Action {
    inner: Arc<ActionInner>,
}

impl Action {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        let (invocations, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(ActionInner {
                key: key.into(),
                label: watch::Sender::new(label.into()),
                enabled: watch::Sender::new(true),
                invocations,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn disabled(self) -> Self {
        self.inner.enabled.send_replace(false);
        self
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn label(&self) -> String {
        self.inner.label.borrow().clone()
    }

    pub fn is_enabled(&self) -> bool {
        *self.inner.enabled.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn set_label(&self, label: impl Into<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        let label = label.into();
        self.inner.label.send_if_modified(|current| {
            if *current == label {
                false
            } else {
                *current = label;
                true
            }
        })
    }

    pub fn set_enabled(&self, enabled: bool) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inner.enabled.send_if_modified(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        })
    }

    pub fn watch_label(&self) -> watch::Receiver<String> {
        self.inner.label.subscribe()
    }

    pub fn watch_enabled(&self) -> watch::Receiver<bool> {
        self.inner.enabled.subscribe()
    }

    pub fn subscribe_invocations(&self) -> broadcast::Receiver<ActionInvocation> {
        self.inner.invocations.subscribe()
    }

    pub(crate) fn record_invocation(&self) {
        if self.is_closed() {
            return;
        }
        let _ = self.inner.invocations.send(ActionInvocation {
            key: self.inner.key.clone(),
            at: Utc::now(),
        });
    }

    pub(crate) fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn snapshot(&self) -> ActionSnapshot {
        ActionSnapshot {
            key: self.key().to_string(),
            label: self.label(),
            enabled: self.is_enabled(),
        }
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("key", &self.inner.key)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSnapshot {
    pub key: String,
    pub label: String,
    pub enabled: bool,
}
