mod common;

use std::time::Duration;

use cadence_core::{
    CadenceError, ConfiguredPlugin, LifecyclePhase, SessionEvent, SessionPreset, SessionState,
};
use common::{harness, preset, Fault};
use tokio_util::sync::CancellationToken;

mod start_tests {
    use super::*;

    #[tokio::test]
    async fn test_starts_plugins_in_preset_order() {
        let h = harness(&[("a", Fault::None), ("b", Fault::None)]);

        let outcome = h
            .orchestrator
            .start_session(preset("Focus", &["a", "b"]), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.preset_id, "focus");
        assert!(outcome.warnings.is_empty());
        assert_eq!(h.orchestrator.state(), SessionState::Running);
        assert_eq!(
            h.log.entries(),
            vec![
                "a:create",
                "a:initialize",
                "a:validate",
                "a:start",
                "b:create",
                "b:initialize",
                "b:validate",
                "b:start",
            ]
        );

        let info = h.orchestrator.active_session().unwrap();
        assert_eq!(info.session_id, outcome.session_id);
        assert_eq!(info.plugins.len(), 2);
        assert!(h.broadcaster.is_attached("a-1"));
        assert!(h.broadcaster.is_attached("b-1"));
    }

    #[tokio::test]
    async fn test_configured_settings_are_applied() {
        let h = harness(&[("a", Fault::None)]);
        let mut p = preset("Focus", &["a"]);
        p.plugins[0] = p.plugins[0]
            .clone()
            .with_setting("level", "7")
            .with_setting("unknown", "ignored");

        h.orchestrator
            .start_session(p, CancellationToken::new())
            .await
            .unwrap();

        let instance = h.orchestrator.find_instance("a-1").unwrap();
        assert_eq!(instance.setting("level").unwrap().value(), "7");
        assert!(instance.setting("unknown").is_none());
    }

    #[tokio::test]
    async fn test_validation_warning_does_not_abort() {
        let h = harness(&[("a", Fault::WarnValidation), ("b", Fault::None)]);

        let outcome = h
            .orchestrator
            .start_session(preset("Focus", &["a", "b"]), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].instance_id, "a-1");
        assert_eq!(outcome.warnings[0].message, "level is unusually low");
        assert!(h.log.contains("b:start"));
        assert!(h.orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_second_start_while_running_is_rejected() {
        let h = harness(&[("a", Fault::None)]);
        let first = h
            .orchestrator
            .start_session(preset("Focus", &["a"]), CancellationToken::new())
            .await
            .unwrap();

        let err = h
            .orchestrator
            .start_session(preset("Other", &["a"]), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CadenceError::SessionAlreadyActive(ref state) if state == "running"));
        assert_eq!(
            h.orchestrator.active_session().unwrap().session_id,
            first.session_id
        );
        assert_eq!(h.orchestrator.active_preset().unwrap().id, "focus");
    }

    #[tokio::test]
    async fn test_duplicate_preset_while_running_reports_active_session() {
        let h = harness(&[("a", Fault::None)]);
        h.orchestrator
            .start_session(preset("Focus", &["a"]), CancellationToken::new())
            .await
            .unwrap();
        let duplicated = SessionPreset::new(
            "Twice",
            vec![
                ConfiguredPlugin::new("a").with_instance_id("x"),
                ConfiguredPlugin::new("a").with_instance_id("x"),
            ],
        );

        let err = h
            .orchestrator
            .start_session(duplicated, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CadenceError::SessionAlreadyActive(ref state) if state == "running"));
        assert_eq!(h.orchestrator.state(), SessionState::Running);
        assert_eq!(h.orchestrator.active_preset().unwrap().id, "focus");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_during_starting_is_rejected() {
        let h = harness(&[("a", Fault::SlowStart)]);
        let orchestrator = h.orchestrator.clone();
        let mut states = h.orchestrator.watch_state();

        let first = tokio::spawn(async move {
            orchestrator
                .start_session(preset("Focus", &["a"]), CancellationToken::new())
                .await
        });
        states
            .wait_for(|state| *state == SessionState::Starting)
            .await
            .unwrap();

        let err = h
            .orchestrator
            .start_session(preset("Other", &["a"]), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::SessionAlreadyActive(ref state) if state == "starting"));

        first.await.unwrap().unwrap();
        assert_eq!(h.orchestrator.active_preset().unwrap().id, "focus");
    }
}

mod rollback_tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_validation_rolls_back_started_plugins() {
        let h = harness(&[
            ("a", Fault::None),
            ("b", Fault::FailValidation),
            ("c", Fault::None),
        ]);
        let mut events = h.orchestrator.subscribe_events();

        let err = h
            .orchestrator
            .start_session(preset("Focus", &["a", "b", "c"]), CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            CadenceError::SessionStartFailed {
                plugin,
                instance_id,
                phase,
                reason,
            } => {
                assert_eq!(plugin, "b");
                assert_eq!(instance_id, "b-1");
                assert_eq!(phase, LifecyclePhase::Validate);
                assert!(reason.contains("token missing"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // The failing plugin never saw on_session_end; c was never created.
        assert_eq!(
            h.log.entries(),
            vec![
                "a:create",
                "a:initialize",
                "a:validate",
                "a:start",
                "b:create",
                "b:initialize",
                "b:validate",
                "b:dispose",
                "a:end",
                "a:dispose",
            ]
        );
        assert_eq!(h.orchestrator.state(), SessionState::Idle);
        assert!(h.orchestrator.active_session().is_none());
        assert_eq!(h.broadcaster.attached_count(), 0);

        match events.recv().await.unwrap() {
            SessionEvent::StartFailed {
                preset_id,
                plugin,
                phase,
                ..
            } => {
                assert_eq!(preset_id, "focus");
                assert_eq!(plugin, "b");
                assert_eq!(phase, LifecyclePhase::Validate);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_initialize_is_attributed() {
        let h = harness(&[("a", Fault::FailInitialize)]);

        let err = h
            .orchestrator
            .start_session(preset("Focus", &["a"]), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CadenceError::SessionStartFailed {
                phase: LifecyclePhase::Initialize,
                ..
            }
        ));
        assert_eq!(h.log.entries(), vec!["a:create", "a:initialize", "a:dispose"]);
    }

    #[tokio::test]
    async fn test_rollback_continues_past_end_failures() {
        let h = harness(&[
            ("a", Fault::None),
            ("b", Fault::FailEnd),
            ("c", Fault::FailStart),
        ]);

        let err = h
            .orchestrator
            .start_session(preset("Focus", &["a", "b", "c"]), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CadenceError::SessionStartFailed {
                phase: LifecyclePhase::Start,
                ..
            }
        ));
        let entries = h.log.entries();
        let tail: Vec<&str> = entries[entries.len() - 5..]
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(
            tail,
            vec!["c:dispose", "b:end", "b:dispose", "a:end", "a:dispose"]
        );
        assert_eq!(h.orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_start_times_out() {
        let h = harness(&[("a", Fault::None), ("b", Fault::HangStart)]);
        let begun = tokio::time::Instant::now();

        let err = h
            .orchestrator
            .start_session(preset("Focus", &["a", "b"]), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(begun.elapsed() >= Duration::from_secs(2));
        assert!(begun.elapsed() < Duration::from_secs(3600));
        match err {
            CadenceError::SessionStartFailed { phase, reason, .. } => {
                assert_eq!(phase, LifecyclePhase::Start);
                assert!(reason.contains("E3004"), "unexpected reason: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(h.log.contains("a:end"));
        assert!(h.log.contains("b:dispose"));
        assert_eq!(h.orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_before_create() {
        let h = harness(&[("a", Fault::None)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h
            .orchestrator
            .start_session(preset("Focus", &["a"]), cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CadenceError::SessionStartFailed {
                phase: LifecyclePhase::Create,
                ..
            }
        ));
        assert!(h.log.entries().is_empty());
        assert_eq!(h.orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_start_rolls_back() {
        let h = harness(&[("a", Fault::None), ("b", Fault::HangStart)]);
        let cancel = CancellationToken::new();
        let orchestrator = h.orchestrator.clone();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            orchestrator
                .start_session(preset("Focus", &["a", "b"]), token)
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        match err {
            CadenceError::SessionStartFailed { phase, reason, .. } => {
                assert_eq!(phase, LifecyclePhase::Start);
                assert!(reason.contains("E3006"), "unexpected reason: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(h.log.contains("a:end"));
        assert_eq!(h.orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_start_task_still_rolls_back() {
        let h = harness(&[("a", Fault::None), ("b", Fault::HangStart)]);
        let orchestrator = h.orchestrator.clone();
        let mut states = h.orchestrator.watch_state();

        let task = tokio::spawn(async move {
            orchestrator
                .start_session(preset("Focus", &["a", "b"]), CancellationToken::new())
                .await
        });
        while !h.log.contains("b:start") {
            tokio::task::yield_now().await;
        }
        assert!(h.broadcaster.is_attached("a-1"));

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        states
            .wait_for(|state| *state == SessionState::Idle)
            .await
            .unwrap();

        let entries = h.log.entries();
        assert_eq!(
            &entries[entries.len() - 3..],
            &["b:dispose", "a:end", "a:dispose"]
        );
        assert!(!h.broadcaster.is_attached("a-1"));
        assert!(!h.broadcaster.is_attached("b-1"));
        assert!(h.orchestrator.active_session().is_none());
    }
}

mod stop_tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_while_idle_fails() {
        let h = harness(&[("a", Fault::None)]);
        let err = h.orchestrator.stop_session().await.unwrap_err();
        assert!(matches!(err, CadenceError::NoActiveSession(ref state) if state == "idle"));
    }

    #[tokio::test]
    async fn test_stop_tears_down_in_reverse_order() {
        let h = harness(&[("a", Fault::None), ("b", Fault::None), ("c", Fault::None)]);
        let mut events = h.orchestrator.subscribe_events();
        let outcome = h
            .orchestrator
            .start_session(preset("Focus", &["a", "b", "c"]), CancellationToken::new())
            .await
            .unwrap();
        let instance = h.orchestrator.find_instance("b-1").unwrap();
        h.log.clear();

        let report = h.orchestrator.stop_session().await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.session_id, outcome.session_id);
        assert_eq!(
            h.log.entries(),
            vec!["c:end", "c:dispose", "b:end", "b:dispose", "a:end", "a:dispose"]
        );
        assert!(instance.is_disposed());
        assert_eq!(h.broadcaster.attached_count(), 0);
        assert_eq!(h.orchestrator.state(), SessionState::Idle);

        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Started { .. }));
        match events.recv().await.unwrap() {
            SessionEvent::Stopped {
                session_id,
                failures,
                ..
            } => {
                assert_eq!(session_id, outcome.session_id);
                assert!(failures.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_end_failures_are_reported_not_fatal() {
        let h = harness(&[("a", Fault::None), ("b", Fault::FailEnd)]);
        h.orchestrator
            .start_session(preset("Focus", &["a", "b"]), CancellationToken::new())
            .await
            .unwrap();

        let report = h.orchestrator.stop_session().await.unwrap();

        assert!(!report.is_clean());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].plugin_id, "b");
        assert_eq!(report.failures[0].instance_id, "b-1");
        assert!(h.log.contains("a:end"));
        assert!(h.log.contains("b:dispose"));
        assert_eq!(h.orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_end_is_bounded_by_shutdown_timeout() {
        let h = harness(&[("a", Fault::None), ("b", Fault::HangEnd)]);
        h.orchestrator
            .start_session(preset("Focus", &["a", "b"]), CancellationToken::new())
            .await
            .unwrap();
        let begun = tokio::time::Instant::now();

        let report = h.orchestrator.stop_session().await.unwrap();

        assert!(begun.elapsed() >= Duration::from_secs(1));
        assert!(begun.elapsed() < Duration::from_secs(60));
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].reason.contains("E3004"));
        assert!(h.log.contains("a:dispose"));
    }

    #[tokio::test]
    async fn test_session_can_restart_after_stop() {
        let h = harness(&[("a", Fault::None)]);
        let first = h
            .orchestrator
            .start_session(preset("Focus", &["a"]), CancellationToken::new())
            .await
            .unwrap();
        h.orchestrator.stop_session().await.unwrap();

        let second = h
            .orchestrator
            .start_session(preset("Focus", &["a"]), CancellationToken::new())
            .await
            .unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert!(h.orchestrator.find_instance("a-1").is_some());
    }
}
