use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CadenceError, CadenceResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleKind {
    OneTime {
        at: DateTime<Utc>,
    },
    /// Fires at `time_of_day` in the host's local time on each listed weekday.
    Recurring {
        time_of_day: NaiveTime,
        weekdays: Vec<Weekday>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSchedule {
    pub id: String,
    pub preset_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub kind: ScheduleKind,
    /// Occurrence time of the last fired (or abandoned) trigger.
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_stop_minutes: Option<u32>,
    #[serde(default)]
    pub next_preset_id: Option<String>,
}

fn default_true() -> bool {
    true
}

impl SessionSchedule {
    pub fn one_time(preset_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(preset_id, ScheduleKind::OneTime { at })
    }

    pub fn recurring(
        preset_id: impl Into<String>,
        time_of_day: NaiveTime,
        weekdays: Vec<Weekday>,
    ) -> Self {
        Self::new(
            preset_id,
            ScheduleKind::Recurring {
                time_of_day,
                weekdays,
            },
        )
    }

    fn new(preset_id: impl Into<String>, kind: ScheduleKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            preset_id: preset_id.into(),
            enabled: true,
            kind,
            last_run: None,
            auto_stop_minutes: None,
            next_preset_id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_auto_stop(mut self, minutes: u32) -> Self {
        self.auto_stop_minutes = Some(minutes);
        self
    }

    pub fn with_next_preset(mut self, preset_id: impl Into<String>) -> Self {
        self.next_preset_id = Some(preset_id.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self.kind, ScheduleKind::Recurring { .. })
    }

    pub fn auto_stop_duration(&self) -> Option<std::time::Duration> {
        self.auto_stop_minutes
            .map(|m| std::time::Duration::from_secs(u64::from(m) * 60))
    }

    pub fn validate(&self) -> CadenceResult<()> {
        if self.preset_id.trim().is_empty() {
            return Err(CadenceError::InvalidSchedule(
                "preset_id must not be empty".to_string(),
            ));
        }
        if let ScheduleKind::Recurring { weekdays, .. } = &self.kind {
            if weekdays.is_empty() {
                return Err(CadenceError::InvalidSchedule(
                    "recurring schedule needs at least one weekday".to_string(),
                ));
            }
        }
        if self.auto_stop_minutes == Some(0) {
            return Err(CadenceError::InvalidSchedule(
                "auto_stop_minutes must be greater than 0".to_string(),
            ));
        }
        if self.next_preset_id.is_some() && self.auto_stop_minutes.is_none() {
            return Err(CadenceError::InvalidSchedule(
                "next_preset_id requires auto_stop_minutes".to_string(),
            ));
        }
        Ok(())
    }
}
