mod common;

use std::sync::Arc;
use std::time::Duration;

use cadence_core::{
    AutoStopTracker, BroadcastNotifier, MemoryPresetStore, MemoryScheduleStore,
    NotificationChannel, NotificationEvent, PresetStore, ScheduleManager, SchedulerSettings,
    SessionService, SessionSchedule, SessionState, TriggerOutcome,
};
use chrono::Utc;
use common::{harness, preset, Fault, Harness};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const MINUTE: Duration = Duration::from_secs(60);

struct Fixture {
    h: Harness,
    presets: Arc<dyn PresetStore>,
    tracker: Arc<AutoStopTracker>,
    notifier: BroadcastNotifier,
}

fn fixture() -> Fixture {
    let h = harness(&[("a", Fault::None), ("b", Fault::None)]);
    let presets: Arc<dyn PresetStore> = Arc::new(MemoryPresetStore::with_presets([
        preset("Focus", &["a"]),
        preset("Break", &["b"]),
    ]));
    let notifier = BroadcastNotifier::new();
    let tracker = Arc::new(AutoStopTracker::new(
        Arc::clone(&h.orchestrator),
        Arc::clone(&presets),
        Arc::new(notifier.clone()),
    ));
    Fixture {
        h,
        presets,
        tracker,
        notifier,
    }
}

impl Fixture {
    async fn start(&self, preset_id: &str) -> String {
        let preset = self.presets.get_by_id(preset_id).await.unwrap().unwrap();
        self.h
            .orchestrator
            .start_session(preset, CancellationToken::new())
            .await
            .unwrap()
            .session_id
    }

    fn active_preset_id(&self) -> Option<String> {
        self.h.orchestrator.active_preset().map(|p| p.id)
    }
}

fn system_titles(rx: &mut broadcast::Receiver<NotificationEvent>) -> Vec<String> {
    let mut titles = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.channel == NotificationChannel::System {
            titles.push(event.notification.title);
        }
    }
    titles
}

mod auto_stop_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_session_stops_when_timer_expires() {
        let f = fixture();
        let mut notifications = f.notifier.subscribe();
        let session_id = f.start("focus").await;

        f.tracker
            .start_tracking(session_id.clone(), Some(30 * MINUTE), None);
        assert!(f.tracker.is_tracking());
        assert_eq!(f.tracker.tracked_session_id(), Some(session_id));
        assert_eq!(f.tracker.time_remaining(), Some(30 * MINUTE));

        tokio::time::sleep(29 * MINUTE).await;
        assert!(f.h.orchestrator.is_running());
        assert_eq!(f.tracker.time_remaining(), Some(MINUTE));

        tokio::time::sleep(2 * MINUTE).await;
        assert_eq!(f.h.orchestrator.state(), SessionState::Idle);
        assert!(!f.tracker.is_tracking());
        assert_eq!(f.tracker.time_remaining(), None);
        assert_eq!(system_titles(&mut notifications), vec!["Session ended"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_chains_into_next_preset() {
        let f = fixture();
        let mut notifications = f.notifier.subscribe();
        let session_id = f.start("focus").await;

        f.tracker
            .start_tracking(session_id.clone(), Some(MINUTE), Some("break".to_string()));
        assert_eq!(f.tracker.next_preset_id().as_deref(), Some("break"));

        tokio::time::sleep(2 * MINUTE).await;

        assert_eq!(f.active_preset_id().as_deref(), Some("break"));
        assert_ne!(
            f.h.orchestrator.active_session().unwrap().session_id,
            session_id
        );
        assert!(f.h.log.contains("a:dispose"));
        assert!(f.h.log.contains("b:start"));
        assert_eq!(
            system_titles(&mut notifications),
            vec!["Session ended", "Session started"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_next_preset_is_reported() {
        let f = fixture();
        let mut notifications = f.notifier.subscribe();
        let session_id = f.start("focus").await;

        f.tracker
            .start_tracking(session_id, Some(MINUTE), Some("gone".to_string()));
        tokio::time::sleep(2 * MINUTE).await;

        assert_eq!(f.h.orchestrator.state(), SessionState::Idle);
        assert_eq!(
            system_titles(&mut notifications),
            vec!["Session ended", "Next session failed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retracking_replaces_previous_timer() {
        let f = fixture();
        let session_id = f.start("focus").await;

        f.tracker
            .start_tracking(session_id.clone(), Some(10 * MINUTE), None);
        f.tracker
            .start_tracking(session_id, Some(60 * MINUTE), None);

        tokio::time::sleep(15 * MINUTE).await;
        assert!(f.h.orchestrator.is_running());

        tokio::time::sleep(50 * MINUTE).await;
        assert_eq!(f.h.orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_ignores_a_different_session() {
        let f = fixture();
        let first = f.start("focus").await;
        f.tracker.start_tracking(first, Some(MINUTE), None);

        // Restarted outside the tracker: the new session must survive the old timer.
        f.h.orchestrator.stop_session().await.unwrap();
        let second = f.start("focus").await;

        tokio::time::sleep(2 * MINUTE).await;

        assert_eq!(
            f.h.orchestrator.active_session().unwrap().session_id,
            second
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_duration_tracks_nothing() {
        let f = fixture();
        let session_id = f.start("focus").await;

        f.tracker
            .start_tracking(session_id, None, Some("break".to_string()));

        assert!(!f.tracker.is_tracking());
        assert!(!f.tracker.stop_tracking());
    }
}

mod session_service_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_manual_stop_cancels_auto_stop() {
        let f = fixture();
        let service = SessionService::new(
            Arc::clone(&f.h.orchestrator),
            Arc::clone(&f.presets),
            Arc::clone(&f.tracker),
        );

        service
            .start("focus", Some(10 * MINUTE), CancellationToken::new())
            .await
            .unwrap();
        let status = service.status();
        assert_eq!(status.state, SessionState::Running);
        assert_eq!(status.auto_stop_remaining_secs, Some(600));

        service.stop().await.unwrap();
        assert!(!f.tracker.is_tracking());

        // A later session must not be cut short by the cancelled timer.
        service
            .start("break", None, CancellationToken::new())
            .await
            .unwrap();
        tokio::time::sleep(20 * MINUTE).await;
        assert_eq!(f.active_preset_id().as_deref(), Some("break"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_untimed_start_clears_leftover_timer() {
        let f = fixture();
        let service = SessionService::new(
            Arc::clone(&f.h.orchestrator),
            Arc::clone(&f.presets),
            Arc::clone(&f.tracker),
        );

        service
            .start("focus", Some(10 * MINUTE), CancellationToken::new())
            .await
            .unwrap();
        // Stopping through the orchestrator leaves the timer armed.
        f.h.orchestrator.stop_session().await.unwrap();
        assert!(f.tracker.is_tracking());

        service
            .start("break", None, CancellationToken::new())
            .await
            .unwrap();
        assert!(!f.tracker.is_tracking());
        assert_eq!(service.status().auto_stop_remaining_secs, None);

        tokio::time::sleep(20 * MINUTE).await;
        assert_eq!(f.active_preset_id().as_deref(), Some("break"));
    }

    #[tokio::test]
    async fn test_unknown_preset_and_idle_stop() {
        let f = fixture();
        let service = SessionService::new(
            Arc::clone(&f.h.orchestrator),
            Arc::clone(&f.presets),
            Arc::clone(&f.tracker),
        );

        assert!(service
            .start("missing", None, CancellationToken::new())
            .await
            .is_err());
        assert!(service.stop().await.is_err());
        assert_eq!(service.status().state, SessionState::Idle);
    }
}

mod schedule_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_session_auto_stops_and_chains() {
        let f = fixture();
        let mut notifications = f.notifier.subscribe();
        let manager = ScheduleManager::new(
            Arc::new(MemoryScheduleStore::new()),
            Arc::clone(&f.presets),
            Arc::clone(&f.h.orchestrator),
            Arc::clone(&f.tracker),
            Arc::new(f.notifier.clone()),
            SchedulerSettings::default(),
        );
        let at = Utc::now() + chrono::Duration::minutes(1);
        manager
            .add_schedule(
                SessionSchedule::one_time("focus", at)
                    .with_id("morning")
                    .with_auto_stop(25)
                    .with_next_preset("break"),
            )
            .await
            .unwrap();

        let outcomes = manager
            .fire_due(at - chrono::Duration::seconds(1), at, &CancellationToken::new())
            .await;
        assert!(matches!(
            outcomes.as_slice(),
            [TriggerOutcome::Started { schedule_id, .. }] if schedule_id == "morning"
        ));
        assert_eq!(f.active_preset_id().as_deref(), Some("focus"));
        assert_eq!(f.tracker.time_remaining(), Some(25 * MINUTE));

        tokio::time::sleep(26 * MINUTE).await;

        assert_eq!(f.active_preset_id().as_deref(), Some("break"));
        assert_eq!(
            system_titles(&mut notifications),
            vec!["Scheduled session started", "Session ended", "Session started"]
        );
    }
}
