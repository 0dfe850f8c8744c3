//! User-facing notifications raised by background work (scheduled starts,
//! trigger failures, auto-stop expiry).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::CadenceResult;

const NOTIFICATION_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub level: NotificationLevel,
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            level: NotificationLevel::Info,
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(title, message).with_level(NotificationLevel::Info)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(title, message).with_level(NotificationLevel::Warning)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(title, message).with_level(NotificationLevel::Error)
    }

    pub fn with_level(mut self, level: NotificationLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_data<T: Serialize>(mut self, data: T) -> Self {
        self.data = serde_json::to_value(data).ok();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

/// Where a notification is meant to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    /// Transient in-app message.
    Toast,
    /// OS-level notification, used for things that happen while nobody watches.
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub channel: NotificationChannel,
    pub notification: Notification,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show_toast(&self, notification: Notification) -> CadenceResult<()>;

    async fn show_system_notification(&self, notification: Notification) -> CadenceResult<()>;
}

/// Delivers `notification` and logs instead of propagating a failure.
pub async fn notify_quietly(
    notifier: &dyn Notifier,
    channel: NotificationChannel,
    notification: Notification,
) {
    let result = match channel {
        NotificationChannel::Toast => notifier.show_toast(notification).await,
        NotificationChannel::System => notifier.show_system_notification(notification).await,
    };
    if let Err(e) = result {
        e.log();
    }
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    fn emit(channel: NotificationChannel, notification: &Notification) {
        let title = notification.title.as_str();
        let message = notification.message.as_str();
        match notification.level {
            NotificationLevel::Debug => debug!(?channel, title, "{}", message),
            NotificationLevel::Info => info!(?channel, title, "{}", message),
            NotificationLevel::Warning => warn!(?channel, title, "{}", message),
            NotificationLevel::Error => error!(?channel, title, "{}", message),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn show_toast(&self, notification: Notification) -> CadenceResult<()> {
        Self::emit(NotificationChannel::Toast, &notification);
        Ok(())
    }

    async fn show_system_notification(&self, notification: Notification) -> CadenceResult<()> {
        Self::emit(NotificationChannel::System, &notification);
        Ok(())
    }
}

/// Logs every notification and republishes it to connected clients.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<NotificationEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, channel: NotificationChannel, notification: Notification) {
        LogNotifier::emit(channel, &notification);
        // Nobody listening is fine.
        let _ = self.sender.send(NotificationEvent {
            channel,
            notification,
        });
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn show_toast(&self, notification: Notification) -> CadenceResult<()> {
        self.publish(NotificationChannel::Toast, notification);
        Ok(())
    }

    async fn show_system_notification(&self, notification: Notification) -> CadenceResult<()> {
        self.publish(NotificationChannel::System, notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_builders() {
        let n = Notification::warning("Schedule", "Retrying").with_data(3);
        assert_eq!(n.level, NotificationLevel::Warning);
        assert_eq!(n.data, Some(serde_json::json!(3)));
        assert_eq!(Notification::new("a", "b").level, NotificationLevel::Info);
    }

    #[tokio::test]
    async fn test_broadcast_notifier_republishes() {
        let notifier = BroadcastNotifier::new();
        let mut rx = notifier.subscribe();

        notify_quietly(
            &notifier,
            NotificationChannel::System,
            Notification::error("Schedule failed", "preset missing"),
        )
        .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel, NotificationChannel::System);
        assert_eq!(event.notification.title, "Schedule failed");
    }

    #[tokio::test]
    async fn test_broadcast_notifier_without_listeners() {
        let notifier = BroadcastNotifier::new();
        assert!(notifier
            .show_toast(Notification::info("Session", "started"))
            .await
            .is_ok());
    }
}
