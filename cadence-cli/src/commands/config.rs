use cadence_core::CadenceConfig;
use clap::{Subcommand, ValueEnum};
use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Json,
    Yaml,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Print the effective configuration")]
    Show {
        #[arg(short, long, value_enum, default_value = "toml", help = "Output format")]
        format: ConfigFormat,
    },

    #[command(about = "Print the directories the host reads and writes")]
    Paths,
}

pub fn handle_config_command(
    cmd: Option<ConfigCommand>,
    config: &CadenceConfig,
) -> anyhow::Result<()> {
    match cmd.unwrap_or(ConfigCommand::Show {
        format: ConfigFormat::Toml,
    }) {
        ConfigCommand::Show { format } => {
            println!("{}", render_config(config, format)?);
            if let Err(e) = config.validate() {
                eprintln!("{} {}", "!".yellow().bold(), e.to_string().yellow());
            }
            Ok(())
        }
        ConfigCommand::Paths => cmd_config_paths(config),
    }
}

fn render_config(config: &CadenceConfig, format: ConfigFormat) -> anyhow::Result<String> {
    Ok(match format {
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    })
}

fn cmd_config_paths(config: &CadenceConfig) -> anyhow::Result<()> {
    let host = &config.host;

    println!("{}", "Cadence Paths".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<12} {}", "Data:".bold(), host.data_dir.display());
    println!("  {:<12} {}", "Presets:".bold(), host.presets_dir().display());
    println!("  {:<12} {}", "Schedules:".bold(), host.schedules_dir().display());
    println!("  {:<12} {}", "Instances:".bold(), host.instances_dir().display());
    println!("  {:<12} {}", "Discovery:".bold(), host.discovery_file().display());
    println!();
    println!("  {}", "Plugin search paths".yellow().bold());
    for path in host.plugin_search_paths() {
        let marker = if path.exists() {
            "✓".green()
        } else {
            "✗".dimmed()
        };
        println!("    {} {}", marker, path.display());
    }

    Ok(())
}
