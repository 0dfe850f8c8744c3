pub mod config;
pub mod plugins;
pub mod presets;
pub mod schedules;
pub mod serve;

pub use config::{handle_config_command, ConfigCommand};
pub use plugins::{handle_plugins_command, PluginsCommand};
pub use presets::{handle_presets_command, PresetsCommand};
pub use schedules::{handle_schedules_command, SchedulesCommand};
pub use serve::handle_serve_command;
