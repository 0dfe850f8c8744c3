use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, CadenceResult};
use crate::models::SessionSchedule;
use crate::scheduler::ScheduleManager;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextRun {
    pub schedule_id: String,
    pub preset_id: String,
    pub at: DateTime<Local>,
}

pub struct ScheduleService {
    manager: Arc<ScheduleManager>,
}

impl ScheduleService {
    pub fn new(manager: Arc<ScheduleManager>) -> Self {
        Self { manager }
    }

    /// Re-reads every schedule from the store.
    pub async fn reload(&self) -> CadenceResult<usize> {
        self.manager.load().await
    }

    pub async fn list(&self) -> Vec<SessionSchedule> {
        self.manager.list().await
    }

    pub async fn get(&self, id: &str) -> CadenceResult<SessionSchedule> {
        self.manager
            .get(id)
            .await
            .ok_or_else(|| CadenceError::ScheduleNotFound(id.to_string()))
    }

    pub async fn create(&self, schedule: SessionSchedule) -> CadenceResult<SessionSchedule> {
        self.manager.add_schedule(schedule).await
    }

    pub async fn update(&self, schedule: SessionSchedule) -> CadenceResult<SessionSchedule> {
        self.manager.update_schedule(schedule).await
    }

    pub async fn delete(&self, id: &str) -> CadenceResult<()> {
        self.manager.remove_schedule(id).await
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> CadenceResult<SessionSchedule> {
        self.manager.set_enabled(id, enabled).await
    }

    pub async fn next_runs(&self) -> Vec<NextRun> {
        self.next_runs_at(Utc::now()).await
    }

    pub async fn next_runs_at(&self, now: DateTime<Utc>) -> Vec<NextRun> {
        self.manager
            .next_runs(now)
            .await
            .into_iter()
            .map(|(schedule, at)| NextRun {
                schedule_id: schedule.id,
                preset_id: schedule.preset_id,
                at,
            })
            .collect()
    }
}
