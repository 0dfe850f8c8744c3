//! Announcer Plugin
//!
//! Logs session transitions with a configurable message. Used as the
//! reference plugin for settings, choices and design-time actions.

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::CadenceResult;
use crate::models::ValidationResult;
use crate::plugins::context::InstanceContext;
use crate::plugins::settings::{Action, ControlType, Persistence, Setting, SettingChoice};
use crate::plugins::traits::Plugin;

pub const ANNOUNCER_ID: &str = "announcer";

const MAX_MESSAGE_LEN: usize = 200;

pub struct AnnouncerPlugin {
    instance_key: String,
    message: Setting,
    tone: Setting,
    repeat: Setting,
    status: Setting,
    preview: Action,
    reload_tones: Action,
}

impl AnnouncerPlugin {
    pub fn new(instance_key: impl Into<String>) -> Self {
        Self {
            instance_key: instance_key.into(),
            message: Setting::builder("message", "Message")
                .description("Text announced when the session starts")
                .default_value("Session started")
                .build(),
            tone: Setting::builder("tone", "Tone")
                .control(ControlType::Choice)
                .choices(default_tones())
                .default_value("calm")
                .build(),
            repeat: Setting::builder("repeat_on_end", "Announce on end")
                .control(ControlType::Toggle)
                .default_value("false")
                .build(),
            status: Setting::builder("status", "Status")
                .persistence(Persistence::Transient)
                .read_only(true)
                .default_value("idle")
                .build(),
            preview: Action::new("preview", "Preview announcement"),
            reload_tones: Action::new("reload_tones", "Reload tones"),
        }
    }

    fn announce(&self, event: &str) {
        info!(
            instance_id = %self.instance_key,
            tone = %self.tone.value(),
            "[{}] {}",
            event,
            self.message.value()
        );
        self.status
            .set_value(format!("{} at {}", event, Utc::now().format("%H:%M:%S")));
    }
}

fn default_tones() -> Vec<SettingChoice> {
    vec![
        SettingChoice::new("calm", "Calm"),
        SettingChoice::new("upbeat", "Upbeat"),
    ]
}

#[async_trait]
impl Plugin for AnnouncerPlugin {
    fn settings(&self) -> Vec<Setting> {
        vec![
            self.message.clone(),
            self.tone.clone(),
            self.repeat.clone(),
            self.status.clone(),
        ]
    }

    fn actions(&self) -> Vec<Action> {
        vec![self.preview.clone(), self.reload_tones.clone()]
    }

    async fn validate_settings(&self, _cancel: CancellationToken) -> CadenceResult<ValidationResult> {
        let message = self.message.value();
        if message.trim().is_empty() {
            return Ok(ValidationResult::error("Announcement is incomplete")
                .with_field_error("message", "Message must not be empty"));
        }
        if message.len() > MAX_MESSAGE_LEN {
            return Ok(ValidationResult::warning(format!(
                "Message is longer than {} characters",
                MAX_MESSAGE_LEN
            )));
        }
        let tone = self.tone.value();
        let known = self
            .tone
            .choices()
            .map(|choices| choices.iter().any(|c| c.value == tone))
            .unwrap_or(false);
        if !known {
            return Ok(ValidationResult::error("Unknown tone").with_field_error("tone", tone));
        }
        Ok(ValidationResult::ok())
    }

    async fn on_session_start(&self, _cancel: CancellationToken) -> CadenceResult<()> {
        self.announce("start");
        Ok(())
    }

    async fn on_session_end(&self, _cancel: CancellationToken) -> CadenceResult<()> {
        if self.repeat.value() == "true" {
            self.announce("end");
        } else {
            self.status.set_value("idle");
        }
        Ok(())
    }

    async fn on_action(&self, key: &str, _cancel: CancellationToken) -> CadenceResult<()> {
        match key {
            "preview" => self.announce("preview"),
            "reload_tones" => {
                let mut tones = default_tones();
                tones.push(SettingChoice::new("formal", "Formal"));
                self.tone.set_choices(Some(tones));
            }
            _ => {}
        }
        Ok(())
    }
}

pub(super) fn create(ctx: &InstanceContext) -> CadenceResult<Box<dyn Plugin>> {
    Ok(Box::new(AnnouncerPlugin::new(ctx.instance_key())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validation_rules() {
        let plugin = AnnouncerPlugin::new("a1");
        let cancel = CancellationToken::new();
        assert!(plugin.validate_settings(cancel.clone()).await.unwrap().is_ok());

        plugin.message.set_value("  ");
        let result = plugin.validate_settings(cancel.clone()).await.unwrap();
        assert!(result.is_error());
        assert!(result.field_errors.contains_key("message"));

        plugin.message.set_value("x".repeat(MAX_MESSAGE_LEN + 1));
        assert!(plugin
            .validate_settings(cancel.clone())
            .await
            .unwrap()
            .is_warning());

        plugin.message.set_value("hi");
        plugin.tone.set_value("shouting");
        assert!(plugin.validate_settings(cancel).await.unwrap().is_error());
    }

    #[tokio::test]
    async fn test_session_updates_status() {
        let plugin = AnnouncerPlugin::new("a1");
        let cancel = CancellationToken::new();

        plugin.on_session_start(cancel.clone()).await.unwrap();
        assert!(plugin.status.value().starts_with("start at"));

        plugin.on_session_end(cancel).await.unwrap();
        assert_eq!(plugin.status.value(), "idle");
    }

    #[tokio::test]
    async fn test_reload_tones_adds_choice() {
        let plugin = AnnouncerPlugin::new("a1");
        plugin
            .on_action("reload_tones", CancellationToken::new())
            .await
            .unwrap();
        let choices = plugin.tone.choices().unwrap();
        assert_eq!(choices.len(), 3);
        assert_eq!(choices[2].value, "formal");
    }
}
