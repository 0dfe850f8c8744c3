//! Transport-agnostic operations exposed to clients.

mod diagnostics;
mod modules;
mod presets;
mod schedules;
mod sessions;

pub use diagnostics::{DiagnosticsService, HealthReport};
pub use modules::{ModuleService, ModuleSnapshot, ModuleTarget, WriteBack};
pub use presets::PresetService;
pub use schedules::{NextRun, ScheduleService};
pub use sessions::{SessionService, SessionStatus};
