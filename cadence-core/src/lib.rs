#![allow(
    clippy::needless_borrows_for_generic_args,
    clippy::derivable_impls,
    clippy::type_complexity,
    clippy::len_zero
)]

pub mod broadcast;
pub mod config;
pub mod error;
pub mod host;
pub mod host_record;
pub mod models;
pub mod notify;
pub mod plugins;
pub mod scheduler;
pub mod services;
pub mod session;
pub mod store;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use broadcast::{
    sandbox_key, BroadcastSettings, InstanceFilter, Property, PropertyKind, PropertyUpdate,
    SubscriptionEnd, UpdateBroadcaster, UpdateSink,
};
pub use config::{
    ensure_data_dir, get_config_dir, get_data_dir, BroadcastConfig, CadenceConfig,
    ConfigLoadError, HostConfig, LoggingConfig, SandboxConfig, SchedulerConfig, SessionConfig,
};
pub use error::{CadenceError, CadenceResult, CliErrorDisplay};
pub use host::{CadenceHost, HostBuilder};
pub use host_record::DiscoveryRecord;
pub use models::{
    ConfiguredPlugin, ScheduleKind, SessionPreset, SessionSchedule, ValidationResult,
    ValidationStatus,
};
pub use notify::{
    BroadcastNotifier, LogNotifier, Notification, NotificationChannel, NotificationEvent,
    NotificationLevel, Notifier,
};
pub use plugins::{
    Action, ControlType, InstanceContext, Persistence, Plugin, PluginCategory, PluginDefinition,
    PluginDescriptor, PluginFactory, PluginInstance, PluginLoader, PluginRegistry, SandboxPool,
    Setting, SettingChoice,
};
pub use scheduler::{next_run, AutoStopTracker, ScheduleManager, SchedulerSettings, TriggerOutcome};
pub use services::{
    DiagnosticsService, HealthReport, ModuleService, ModuleSnapshot, ModuleTarget, NextRun,
    PresetService, ScheduleService, SessionService, SessionStatus, WriteBack,
};
pub use session::{
    LifecyclePhase, SessionEvent, SessionInfo, SessionOrchestrator, SessionState, SessionTimeouts,
    StartOutcome, StopReport,
};
pub use store::{
    FilePresetStore, FileScheduleStore, MemoryPresetStore, MemoryScheduleStore, PresetStore,
    ScheduleStore,
};
