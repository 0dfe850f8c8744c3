use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{CadenceError, CadenceResult};
use crate::models::SessionSchedule;
use crate::notify::{notify_quietly, Notification, NotificationChannel, Notifier};
use crate::session::SessionOrchestrator;
use crate::store::{PresetStore, ScheduleStore};

use super::auto_stop::AutoStopTracker;
use super::next_run::{next_run, upcoming_runs};

// Upper bound on a single sleep so wall-clock jumps are noticed.
const MAX_IDLE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub retry_delay: Duration,
    pub max_trigger_attempts: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            retry_delay: config.retry_delay(),
            max_trigger_attempts: config.max_trigger_attempts.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Started {
        schedule_id: String,
        session_id: String,
    },
    RetryScheduled {
        schedule_id: String,
        attempt: u32,
        at: DateTime<Utc>,
    },
    Abandoned {
        schedule_id: String,
        reason: String,
    },
}

impl TriggerOutcome {
    pub fn schedule_id(&self) -> &str {
        match self {
            TriggerOutcome::Started { schedule_id, .. }
            | TriggerOutcome::RetryScheduled { schedule_id, .. }
            | TriggerOutcome::Abandoned { schedule_id, .. } => schedule_id,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingRetry {
    occurrence: DateTime<Utc>,
    attempts: u32,
    due: DateTime<Utc>,
}

/// Owns the schedule table and fires schedules into the session orchestrator.
pub struct ScheduleManager {
    store: Arc<dyn ScheduleStore>,
    presets: Arc<dyn PresetStore>,
    orchestrator: Arc<SessionOrchestrator>,
    auto_stop: Arc<AutoStopTracker>,
    notifier: Arc<dyn Notifier>,
    settings: SchedulerSettings,
    schedules: RwLock<HashMap<String, SessionSchedule>>,
    retries: Mutex<HashMap<String, PendingRetry>>,
    changed: Notify,
}

impl ScheduleManager {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        presets: Arc<dyn PresetStore>,
        orchestrator: Arc<SessionOrchestrator>,
        auto_stop: Arc<AutoStopTracker>,
        notifier: Arc<dyn Notifier>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            presets,
            orchestrator,
            auto_stop,
            notifier,
            settings,
            schedules: RwLock::new(HashMap::new()),
            retries: Mutex::new(HashMap::new()),
            changed: Notify::new(),
        }
    }

    pub fn auto_stop(&self) -> &Arc<AutoStopTracker> {
        &self.auto_stop
    }

    /// Replaces the in-memory table with the store's contents.
    pub async fn load(&self) -> CadenceResult<usize> {
        let stored = self.store.load_all().await?;
        let mut table = HashMap::with_capacity(stored.len());
        for schedule in stored {
            if let Err(e) = schedule.validate() {
                warn!(schedule_id = %schedule.id, error = %e, "Skipping invalid stored schedule");
                continue;
            }
            table.insert(schedule.id.clone(), schedule);
        }

        let count = table.len();
        *self.schedules.write().await = table;
        self.retries.lock().await.clear();
        self.changed.notify_one();
        info!("Loaded {} schedules", count);
        Ok(count)
    }

    pub async fn add_schedule(&self, schedule: SessionSchedule) -> CadenceResult<SessionSchedule> {
        schedule.validate()?;
        if self.schedules.read().await.contains_key(&schedule.id) {
            return Err(CadenceError::AlreadyExists(format!(
                "schedule '{}'",
                schedule.id
            )));
        }
        self.check_presets(&schedule).await?;

        self.store.save(&schedule).await?;
        self.schedules
            .write()
            .await
            .insert(schedule.id.clone(), schedule.clone());
        self.changed.notify_one();

        info!(
            schedule_id = %schedule.id,
            preset_id = %schedule.preset_id,
            "Schedule added"
        );
        Ok(schedule)
    }

    /// Replaces a schedule. Changing when it fires forgets its `last_run`.
    pub async fn update_schedule(
        &self,
        mut schedule: SessionSchedule,
    ) -> CadenceResult<SessionSchedule> {
        schedule.validate()?;
        let existing = self
            .get(&schedule.id)
            .await
            .ok_or_else(|| CadenceError::ScheduleNotFound(schedule.id.clone()))?;
        self.check_presets(&schedule).await?;

        schedule.last_run = if existing.kind == schedule.kind {
            existing.last_run
        } else {
            None
        };

        self.store.save(&schedule).await?;
        self.schedules
            .write()
            .await
            .insert(schedule.id.clone(), schedule.clone());
        self.retries.lock().await.remove(&schedule.id);
        self.changed.notify_one();

        info!(schedule_id = %schedule.id, "Schedule updated");
        Ok(schedule)
    }

    pub async fn remove_schedule(&self, id: &str) -> CadenceResult<()> {
        if self.schedules.write().await.remove(id).is_none() {
            return Err(CadenceError::ScheduleNotFound(id.to_string()));
        }
        self.retries.lock().await.remove(id);
        self.store.delete(id).await?;
        self.changed.notify_one();

        info!(schedule_id = %id, "Schedule removed");
        Ok(())
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> CadenceResult<SessionSchedule> {
        let updated = {
            let mut schedules = self.schedules.write().await;
            let schedule = schedules
                .get_mut(id)
                .ok_or_else(|| CadenceError::ScheduleNotFound(id.to_string()))?;
            schedule.enabled = enabled;
            schedule.clone()
        };
        if !enabled {
            self.retries.lock().await.remove(id);
        }
        self.store.save(&updated).await?;
        self.changed.notify_one();

        info!(schedule_id = %id, enabled, "Schedule toggled");
        Ok(updated)
    }

    pub async fn list(&self) -> Vec<SessionSchedule> {
        let mut schedules: Vec<SessionSchedule> =
            self.schedules.read().await.values().cloned().collect();
        schedules.sort_by(|a, b| a.id.cmp(&b.id));
        schedules
    }

    pub async fn get(&self, id: &str) -> Option<SessionSchedule> {
        self.schedules.read().await.get(id).cloned()
    }

    /// Upcoming occurrence of every enabled schedule, soonest first.
    pub async fn next_runs(&self, now: DateTime<Utc>) -> Vec<(SessionSchedule, DateTime<Local>)> {
        let schedules = self.schedules.read().await;
        upcoming_runs(schedules.values(), &now.with_timezone(&Local))
            .into_iter()
            .map(|(schedule, at)| (schedule.clone(), at))
            .collect()
    }

    /// Earliest instant at which something is due, including pending retries.
    pub async fn next_due(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = now.with_timezone(&Local);
        let retries = self.retries.lock().await;
        let schedules = self.schedules.read().await;

        let scheduled = schedules
            .values()
            .filter(|s| s.enabled && !retries.contains_key(&s.id))
            .filter_map(|s| next_run(s, &local))
            .map(|at| at.with_timezone(&Utc));
        let retrying = retries.values().map(|r| r.due);

        scheduled.chain(retrying).min()
    }

    /// Fires every occurrence in `[since, now]` and every retry due by `now`.
    pub async fn fire_due(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<TriggerOutcome> {
        let due = self.collect_due(since, now).await;
        let mut outcomes = Vec::with_capacity(due.len());
        for (schedule, occurrence, attempts) in due {
            if cancel.is_cancelled() {
                break;
            }
            outcomes.push(self.trigger(schedule, occurrence, attempts, now, cancel).await);
        }
        outcomes
    }

    async fn collect_due(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<(SessionSchedule, DateTime<Utc>, u32)> {
        let since_local = since.with_timezone(&Local);
        let mut retries = self.retries.lock().await;
        let schedules = self.schedules.read().await;

        let mut due: Vec<(SessionSchedule, DateTime<Utc>, u32)> = schedules
            .values()
            .filter(|s| s.enabled && !retries.contains_key(&s.id))
            .filter_map(|s| {
                next_run(s, &since_local)
                    .map(|at| at.with_timezone(&Utc))
                    .filter(|at| *at <= now)
                    .map(|at| (s.clone(), at, 0))
            })
            .collect();

        retries.retain(|id, _| {
            let keep = schedules.get(id).is_some_and(|s| s.enabled);
            if !keep {
                debug!(schedule_id = %id, "Dropping retry for a removed or disabled schedule");
            }
            keep
        });
        for (id, retry) in retries.iter() {
            if retry.due <= now {
                if let Some(schedule) = schedules.get(id) {
                    due.push((schedule.clone(), retry.occurrence, retry.attempts));
                }
            }
        }

        due.sort_by(|a, b| a.1.cmp(&b.1));
        due
    }

    async fn trigger(
        &self,
        schedule: SessionSchedule,
        occurrence: DateTime<Utc>,
        attempts: u32,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> TriggerOutcome {
        let schedule_id = schedule.id.clone();
        info!(
            schedule_id = %schedule_id,
            preset_id = %schedule.preset_id,
            occurrence = %occurrence,
            attempt = attempts + 1,
            "Firing schedule"
        );

        let preset = match self.presets.get_by_id(&schedule.preset_id).await {
            Ok(Some(preset)) => preset,
            Ok(None) => {
                let reason = CadenceError::PresetNotFound(schedule.preset_id.clone()).to_string();
                warn!(schedule_id = %schedule_id, "{}", reason);
                self.record_run(&schedule_id, occurrence).await;
                notify_quietly(
                    self.notifier.as_ref(),
                    NotificationChannel::System,
                    Notification::error("Scheduled session skipped", reason.clone()),
                )
                .await;
                return TriggerOutcome::Abandoned {
                    schedule_id,
                    reason,
                };
            }
            Err(e) => return self.trigger_failed(&schedule, occurrence, attempts, now, e).await,
        };
        let preset_name = preset.name.clone();

        match self
            .orchestrator
            .start_session(preset, cancel.child_token())
            .await
        {
            Ok(outcome) => {
                self.record_run(&schedule_id, occurrence).await;
                self.auto_stop.start_tracking(
                    outcome.session_id.clone(),
                    schedule.auto_stop_duration(),
                    schedule.next_preset_id.clone(),
                );
                notify_quietly(
                    self.notifier.as_ref(),
                    NotificationChannel::System,
                    Notification::info(
                        "Scheduled session started",
                        format!("Started '{}'", preset_name),
                    ),
                )
                .await;
                TriggerOutcome::Started {
                    schedule_id,
                    session_id: outcome.session_id,
                }
            }
            Err(e) => self.trigger_failed(&schedule, occurrence, attempts, now, e).await,
        }
    }

    async fn trigger_failed(
        &self,
        schedule: &SessionSchedule,
        occurrence: DateTime<Utc>,
        attempts: u32,
        now: DateTime<Utc>,
        error: CadenceError,
    ) -> TriggerOutcome {
        let attempt = attempts + 1;
        error.log();

        if attempt < self.settings.max_trigger_attempts {
            let retry_delay = chrono::Duration::from_std(self.settings.retry_delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
            let at = now + retry_delay;
            self.retries.lock().await.insert(
                schedule.id.clone(),
                PendingRetry {
                    occurrence,
                    attempts: attempt,
                    due: at,
                },
            );
            warn!(
                schedule_id = %schedule.id,
                attempt,
                retry_at = %at,
                "Scheduled start failed, will retry"
            );
            notify_quietly(
                self.notifier.as_ref(),
                NotificationChannel::Toast,
                Notification::warning(
                    "Scheduled session delayed",
                    format!("Start failed ({}), retrying", error),
                ),
            )
            .await;
            return TriggerOutcome::RetryScheduled {
                schedule_id: schedule.id.clone(),
                attempt,
                at,
            };
        }

        self.retries.lock().await.remove(&schedule.id);
        self.record_run(&schedule.id, occurrence).await;
        let reason = error.to_string();
        notify_quietly(
            self.notifier.as_ref(),
            NotificationChannel::System,
            Notification::error(
                "Scheduled session failed",
                format!("Gave up after {} attempts: {}", attempt, reason),
            ),
        )
        .await;
        TriggerOutcome::Abandoned {
            schedule_id: schedule.id.clone(),
            reason,
        }
    }

    async fn record_run(&self, id: &str, occurrence: DateTime<Utc>) {
        let updated = {
            let mut schedules = self.schedules.write().await;
            schedules.get_mut(id).map(|schedule| {
                schedule.last_run = Some(occurrence);
                schedule.clone()
            })
        };
        if let Some(schedule) = updated {
            if let Err(e) = self.store.save(&schedule).await {
                e.log();
            }
        }
    }

    async fn check_presets(&self, schedule: &SessionSchedule) -> CadenceResult<()> {
        let ids = std::iter::once(&schedule.preset_id).chain(schedule.next_preset_id.as_ref());
        for id in ids {
            if self.presets.get_by_id(id).await?.is_none() {
                return Err(CadenceError::PresetNotFound(id.clone()));
            }
        }
        Ok(())
    }

    /// Sleeps until the next due schedule and fires it, until `cancel` fires.
    pub async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!("Scheduler loop started");
        let mut since = Utc::now();

        loop {
            let now = Utc::now();
            let fired = self.fire_due(since, now, &cancel).await;
            if !fired.is_empty() {
                debug!(count = fired.len(), "Processed due schedules");
            }
            since = now;

            let wait = match self.next_due(now).await {
                Some(at) => (at - now).to_std().unwrap_or(Duration::ZERO).min(MAX_IDLE),
                None => MAX_IDLE,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.changed.notified() => {
                    debug!("Schedules changed, recomputing next wake");
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Scheduler loop stopped");
    }
}
