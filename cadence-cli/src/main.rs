#![allow(clippy::needless_borrows_for_generic_args, clippy::field_reassign_with_default)]

use std::path::PathBuf;
use std::process::ExitCode;

use cadence_core::{CadenceConfig, CadenceError, CliErrorDisplay};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod output;

use commands::{
    handle_config_command, handle_plugins_command, handle_presets_command,
    handle_schedules_command, handle_serve_command, ConfigCommand, PluginsCommand, PresetsCommand,
    SchedulesCommand,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Parser)]
#[command(name = "cadence")]
#[command(version = VERSION)]
#[command(about = "Cadence - plugin-driven session host")]
#[command(long_about = r#"
Cadence runs sessions built from presets: ordered lists of plugin instances
that are validated, started and torn down together. Schedules start presets
at fixed times and can chain one session into the next.

Use 'cadence serve' to run the host, and 'cadence presets', 'cadence plugins'
or 'cadence schedules' to inspect what it will load.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Path to a configuration file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override the data directory")]
    data_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the host until interrupted")]
    Serve {
        #[arg(long, help = "Do not fire schedules")]
        no_scheduler: bool,
    },

    #[command(about = "Inspect available plugins")]
    Plugins {
        #[command(subcommand)]
        action: Option<PluginsCommand>,
    },

    #[command(about = "Inspect stored session presets")]
    Presets {
        #[command(subcommand)]
        action: Option<PresetsCommand>,
    },

    #[command(about = "Inspect stored schedules and their next runs")]
    Schedules {
        #[command(subcommand)]
        action: Option<SchedulesCommand>,
    },

    #[command(about = "Inspect the effective configuration")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommand>,
    },

    #[command(about = "Show version information")]
    Version {
        #[arg(short, long)]
        detailed: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::load_config(cli.config.as_deref(), cli.data_dir.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let serving = matches!(cli.command, Commands::Serve { .. });
    init_logging(&config, cli.verbose, serving);

    match run(cli.command, config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<CadenceError>() {
                Some(err) => eprint!("{}: {}", "Error".red().bold(), CliErrorDisplay::new(err)),
                None => eprintln!("{}: {:#}", "Error".red().bold(), e),
            }
            ExitCode::FAILURE
        }
    }
}

/// `serve` logs at the configured level; inspection commands stay quiet
/// unless `--verbose` is given.
fn init_logging(config: &CadenceConfig, verbose: bool, serving: bool) {
    let level = match (verbose, serving) {
        (true, _) => "debug",
        (false, true) => config.log_level(),
        (false, false) => "warn",
    };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));

    let (json_layer, text_layer) = if config.logging.json_format {
        (Some(fmt::layer().json().with_target(false)), None)
    } else {
        (None, Some(fmt::layer().with_target(false)))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn run(command: Commands, config: CadenceConfig) -> anyhow::Result<()> {
    match command {
        Commands::Serve { no_scheduler } => handle_serve_command(config, no_scheduler).await,
        Commands::Plugins { action } => handle_plugins_command(action, config).await,
        Commands::Presets { action } => handle_presets_command(action, config).await,
        Commands::Schedules { action } => handle_schedules_command(action, config).await,
        Commands::Config { action } => handle_config_command(action, &config),
        Commands::Version { detailed } => cmd_version(detailed),
    }
}

fn cmd_version(detailed: bool) -> anyhow::Result<()> {
    if detailed {
        println!("{}", "Cadence Version Information".cyan().bold());
        println!("{}", "═".repeat(40).dimmed());
        println!("  {:<15} {}", "Version:".bold(), VERSION);
        println!("  {:<15} {}", "Name:".bold(), NAME);
        println!("  {:<15} {}", "Core:".bold(), cadence_core::VERSION);
        println!();
        println!("  {}", "Build Information:".bold());
        println!("    Rust Edition: 2021");
        #[cfg(debug_assertions)]
        println!("    Build:        Debug");
        #[cfg(not(debug_assertions))]
        println!("    Build:        Release");
    } else {
        println!("cadence {}", VERSION);
    }

    Ok(())
}
