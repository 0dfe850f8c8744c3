mod preset;
mod schedule;
mod validation;

pub use preset::{ConfiguredPlugin, SessionPreset};
pub use schedule::{ScheduleKind, SessionSchedule};
pub use validation::{ValidationResult, ValidationStatus};
