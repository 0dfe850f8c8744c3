mod auto_stop;
mod manager;
mod next_run;

pub use auto_stop::AutoStopTracker;
pub use manager::{ScheduleManager, SchedulerSettings, TriggerOutcome};
pub use next_run::{next_run, upcoming_runs};
