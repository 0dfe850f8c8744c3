//! Built-in Plugins
//!
//! Plugins bundled with Cadence and available without a manifest.
//!
//! - [`AnnouncerPlugin`]: Logs session transitions with a configurable message
//! - [`WebhookPlugin`]: Posts session events to an HTTP endpoint

mod announcer;
mod webhook;

use std::sync::Arc;

pub use announcer::{AnnouncerPlugin, ANNOUNCER_ID};
pub use webhook::{WebhookPlugin, WEBHOOK_ID};

use super::traits::PluginFactory;
use super::types::{PluginCategory, PluginDefinition};

pub fn builtin_factories() -> Vec<(&'static str, Arc<dyn PluginFactory>)> {
    vec![
        (ANNOUNCER_ID, Arc::new(announcer::create) as Arc<dyn PluginFactory>),
        (WEBHOOK_ID, Arc::new(webhook::create) as Arc<dyn PluginFactory>),
    ]
}

pub fn builtin_definitions() -> Vec<PluginDefinition> {
    vec![
        PluginDefinition::new(
            ANNOUNCER_ID,
            "Announcer",
            Arc::new(announcer::create) as Arc<dyn PluginFactory>,
        )
        .with_description("Logs a message when sessions start and end")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_category(PluginCategory::Productivity),
        PluginDefinition::new(
            WEBHOOK_ID,
            "Webhook",
            Arc::new(webhook::create) as Arc<dyn PluginFactory>,
        )
        .with_description("Posts session events to an HTTP endpoint")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_category(PluginCategory::Communication),
    ]
}

pub fn is_builtin_plugin(id: &str) -> bool {
    matches!(id, ANNOUNCER_ID | WEBHOOK_ID)
}
