pub mod builtin;
mod context;
mod instance;
mod loader;
mod manifest;
mod registry;
mod sandbox;
mod settings;
mod traits;
mod types;

pub use builtin::{is_builtin_plugin, AnnouncerPlugin, WebhookPlugin, ANNOUNCER_ID, WEBHOOK_ID};
pub use context::InstanceContext;
pub use instance::PluginInstance;
pub use loader::{
    ChainedPluginLoader, FactoryCatalog, ManifestPluginLoader, PluginLoader, StaticPluginLoader,
};
pub use manifest::{PluginManifest, PluginMetadata};
pub use registry::PluginRegistry;
pub use sandbox::{SandboxPool, SandboxSettings};
pub use settings::{
    Action, ActionInvocation, ActionSnapshot, ControlType, Persistence, Setting, SettingBuilder,
    SettingChoice, SettingSnapshot,
};
pub use traits::{DynPlugin, Plugin, PluginFactory};
pub use types::{Platform, PluginCategory, PluginDefinition, PluginDescriptor};
