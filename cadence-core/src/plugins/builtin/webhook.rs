//! Webhook Plugin
//!
//! Posts a JSON payload to a configured URL when a session starts or ends,
//! using the per-instance HTTP client.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CadenceError, CadenceResult};
use crate::models::ValidationResult;
use crate::plugins::context::InstanceContext;
use crate::plugins::settings::{Action, ControlType, Persistence, Setting, SettingChoice};
use crate::plugins::traits::Plugin;

pub const WEBHOOK_ID: &str = "webhook";

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event: &'a str,
    instance_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    source: &'static str,
}

pub struct WebhookPlugin {
    instance_key: String,
    client: reqwest::Client,
    url: Setting,
    method: Setting,
    include_timestamp: Setting,
    last_status: Setting,
    test: Action,
}

impl WebhookPlugin {
    pub fn new(instance_key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            instance_key: instance_key.into(),
            client,
            url: Setting::builder("url", "Webhook URL")
                .description("Endpoint receiving session events")
                .build(),
            method: Setting::builder("method", "HTTP method")
                .control(ControlType::Choice)
                .choices(vec![
                    SettingChoice::new("POST", "POST"),
                    SettingChoice::new("PUT", "PUT"),
                    SettingChoice::new("PATCH", "PATCH"),
                ])
                .default_value("POST")
                .build(),
            include_timestamp: Setting::builder("include_timestamp", "Include timestamp")
                .control(ControlType::Toggle)
                .default_value("true")
                .build(),
            last_status: Setting::builder("last_status", "Last delivery")
                .persistence(Persistence::Transient)
                .read_only(true)
                .build(),
            test: Action::new("test", "Send test event"),
        }
    }

    async fn send_event(&self, event: &str, cancel: CancellationToken) -> CadenceResult<()> {
        let url = self.url.value();
        if url.is_empty() {
            return Err(CadenceError::plugin("Webhook URL is not configured"));
        }

        let timestamp =
            (self.include_timestamp.value() == "true").then(|| Utc::now().to_rfc3339());
        let payload = WebhookPayload {
            event,
            instance_id: &self.instance_key,
            timestamp,
            source: "cadence",
        };

        let request = match self.method.value().as_str() {
            "PUT" => self.client.put(&url),
            "PATCH" => self.client.patch(&url),
            _ => self.client.post(&url),
        }
        .json(&payload);

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(CadenceError::plugin("Webhook request cancelled"));
            }
            response = request.send() => response?,
        };

        let status = response.status();
        self.last_status
            .set_value(format!("{} {}", status.as_u16(), event));
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CadenceError::plugin(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        debug!(instance_id = %self.instance_key, event, "Webhook delivered");
        Ok(())
    }
}

#[async_trait]
impl Plugin for WebhookPlugin {
    fn settings(&self) -> Vec<Setting> {
        vec![
            self.url.clone(),
            self.method.clone(),
            self.include_timestamp.clone(),
            self.last_status.clone(),
        ]
    }

    fn actions(&self) -> Vec<Action> {
        vec![self.test.clone()]
    }

    async fn validate_settings(&self, _cancel: CancellationToken) -> CadenceResult<ValidationResult> {
        let url = self.url.value();
        if url.is_empty() {
            return Ok(ValidationResult::error("Webhook is not configured")
                .with_field_error("url", "URL is required"));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok(ValidationResult::error("Webhook is not configured")
                .with_field_error("url", "URL must start with http:// or https://"));
        }
        if url.starts_with("http://") {
            return Ok(ValidationResult::warning("Webhook URL is not using TLS"));
        }
        Ok(ValidationResult::ok())
    }

    async fn on_session_start(&self, cancel: CancellationToken) -> CadenceResult<()> {
        self.send_event("session_started", cancel).await
    }

    async fn on_session_end(&self, cancel: CancellationToken) -> CadenceResult<()> {
        self.send_event("session_ended", cancel).await
    }

    async fn on_action(&self, key: &str, cancel: CancellationToken) -> CadenceResult<()> {
        if key == "test" {
            self.send_event("test", cancel).await?;
        }
        Ok(())
    }
}

pub(super) fn create(ctx: &InstanceContext) -> CadenceResult<Box<dyn Plugin>> {
    Ok(Box::new(WebhookPlugin::new(
        ctx.instance_key(),
        ctx.http().clone(),
    )))
}
