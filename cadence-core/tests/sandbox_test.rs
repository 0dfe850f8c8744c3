mod common;

use std::sync::Arc;
use std::time::Duration;

use cadence_core::plugins::SandboxSettings;
use cadence_core::{sandbox_key, CadenceError, LifecyclePhase, SandboxPool};
use common::{harness, Fault, Harness};
use tokio_util::sync::CancellationToken;

const MODULES: [&str; 6] = ["m1", "m2", "m3", "m4", "m5", "m6"];

fn settings() -> SandboxSettings {
    SandboxSettings {
        idle_ttl: Duration::from_secs(10),
        max_sandboxes: 5,
        sweep_interval: Duration::from_secs(60),
        startup_timeout: Duration::from_secs(2),
    }
}

fn pool(h: &Harness) -> Arc<SandboxPool> {
    Arc::new(SandboxPool::new(
        Arc::clone(&h.registry),
        h.broadcaster.clone(),
        settings(),
    ))
}

fn modules() -> Vec<(&'static str, Fault)> {
    MODULES.iter().map(|id| (*id, Fault::None)).collect()
}

mod pool_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_slow_initialize_does_not_block_other_modules() {
        let h = harness(&[("m1", Fault::None), ("slow", Fault::SlowInitialize)]);
        let pool = pool(&h);
        pool.get_or_create("m1").await.unwrap();

        let creating = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get_or_create("slow").await })
        };
        let duplicate = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get_or_create("slow").await })
        };
        while !h.log.contains("slow:initialize") {
            tokio::task::yield_now().await;
        }

        let short = Duration::from_millis(10);
        let found = tokio::time::timeout(short, pool.get("m1")).await;
        assert!(matches!(found, Ok(Some(_))), "lookup waited on another module's init");
        assert_eq!(tokio::time::timeout(short, pool.len()).await.unwrap(), 1);

        let first = creating.await.unwrap().unwrap();
        let second = duplicate.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            h.log.entries().iter().filter(|e| *e == "slow:create").count(),
            1
        );
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_lookup_reuses_instance() {
        let h = harness(&modules());
        let pool = pool(&h);

        let first = pool.get_or_create("m1").await.unwrap();
        let second = pool.get_or_create("m1").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.instance_key(), "sandbox:m1");
        assert_eq!(
            h.log.entries(),
            vec!["m1:create", "m1:initialize"],
            "sandbox must initialize once and never start a session"
        );
        assert!(h.broadcaster.is_attached(&sandbox_key("m1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_evicts_least_recently_used() {
        let h = harness(&modules());
        let pool = pool(&h);

        for id in &MODULES[..5] {
            pool.get_or_create(id).await.unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        // Touching m1 makes m2 the oldest.
        assert!(pool.get("m1").await.is_some());
        tokio::time::advance(Duration::from_secs(1)).await;

        pool.get_or_create("m6").await.unwrap();

        assert_eq!(pool.len().await, 5);
        assert_eq!(pool.module_ids().await, vec!["m1", "m3", "m4", "m5", "m6"]);
        assert!(h.log.contains("m2:dispose"));
        assert!(!h.broadcaster.is_attached(&sandbox_key("m2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_disposes_idle_entries() {
        let h = harness(&modules());
        let pool = pool(&h);

        let stale = pool.get_or_create("m1").await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        pool.get_or_create("m2").await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(pool.sweep().await, 1);
        assert!(stale.is_disposed());
        assert_eq!(pool.module_ids().await, vec!["m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_loop_expires_on_ttl() {
        let h = harness(&modules());
        let pool = pool(&h);
        let cancel = CancellationToken::new();
        let runner = Arc::clone(&pool);
        let loop_cancel = cancel.clone();
        let task = tokio::spawn(async move { runner.run_eviction_loop(loop_cancel).await });

        pool.get_or_create("m1").await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(pool.is_empty().await);
        assert!(h.log.contains("m1:dispose"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_disposes_everything() {
        let h = harness(&modules());
        let pool = pool(&h);
        for id in &MODULES[..3] {
            pool.get_or_create(id).await.unwrap();
        }

        assert_eq!(pool.clear().await, 3);
        assert!(pool.is_empty().await);
        assert!(h.log.contains("m3:dispose"));
        assert_eq!(h.broadcaster.attached_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_unknown_module() {
        let h = harness(&modules());
        let pool = pool(&h);
        assert!(!pool.remove("m1").await);
        assert!(pool.get("m1").await.is_none());
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_plugin_is_not_found() {
        let h = harness(&modules());
        let pool = pool(&h);
        let err = pool.get_or_create("missing").await.unwrap_err();
        assert!(matches!(err, CadenceError::PluginNotFound(ref id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_failed_initialize_is_not_pooled() {
        let h = harness(&[("broken", Fault::FailInitialize)]);
        let pool = pool(&h);

        let err = pool.get_or_create("broken").await.unwrap_err();

        assert!(matches!(
            err,
            CadenceError::LifecycleFailure {
                phase: LifecyclePhase::Initialize,
                ..
            }
        ));
        assert!(pool.is_empty().await);
        assert!(h.log.contains("broken:dispose"));
    }
}

mod action_tests {
    use super::*;

    #[tokio::test]
    async fn test_design_time_action_runs_on_sandbox() {
        let h = harness(&modules());
        let pool = pool(&h);

        pool.invoke_design_time_action("m1", "ping", CancellationToken::new())
            .await
            .unwrap();

        assert!(h.log.contains("m1:action:ping"));
        assert!(!h.log.contains("m1:start"));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_action_is_rejected() {
        let h = harness(&modules());
        let pool = pool(&h);

        let err = pool
            .invoke_design_time_action("m1", "explode", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::ActionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_disabled_action_is_rejected() {
        let h = harness(&modules());
        let pool = pool(&h);
        let instance = pool.get_or_create("m1").await.unwrap();
        instance.action("ping").unwrap().set_enabled(false);

        let err = pool
            .invoke_design_time_action("m1", "ping", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::ActionDisabled { .. }));
        assert!(!h.log.contains("m1:action:ping"));
    }
}
