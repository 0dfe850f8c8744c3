use cadence_core::{CadenceConfig, CadenceHost, SessionPreset};
use clap::Subcommand;
use colored::Colorize;
use comfy_table::{Cell, Color};

use crate::output::{new_table, print_structured, OutputFormat};

#[derive(Subcommand)]
pub enum PresetsCommand {
    #[command(about = "List stored presets")]
    List {
        #[arg(short, long, value_enum, default_value = "text", help = "Output format")]
        format: OutputFormat,
    },

    #[command(about = "Show a preset with its plugin instances and validation status")]
    Show {
        #[arg(help = "Preset ID")]
        id: String,

        #[arg(short, long, value_enum, default_value = "text", help = "Output format")]
        format: OutputFormat,
    },
}

pub async fn handle_presets_command(
    cmd: Option<PresetsCommand>,
    config: CadenceConfig,
) -> anyhow::Result<()> {
    let host = CadenceHost::build(config)?;
    host.registry()
        .discover(&host.config().host.plugin_search_paths())
        .await?;

    match cmd.unwrap_or(PresetsCommand::List {
        format: OutputFormat::Text,
    }) {
        PresetsCommand::List { format } => cmd_presets_list(&host, format).await,
        PresetsCommand::Show { id, format } => cmd_presets_show(&host, &id, format).await,
    }
}

async fn cmd_presets_list(host: &CadenceHost, format: OutputFormat) -> anyhow::Result<()> {
    let mut presets = host.presets().list().await?;
    presets.sort_by(|a, b| a.name.cmp(&b.name));

    if print_structured(&presets, format)? {
        return Ok(());
    }

    if presets.is_empty() {
        println!("{}", "No presets found.".yellow());
        println!(
            "  {} Presets are read from {}",
            "→".blue(),
            host.config().host.presets_dir().display()
        );
        return Ok(());
    }

    println!("{}", "Session Presets".cyan().bold());
    println!();

    let mut table = new_table(&["ID", "Name", "Plugins", "Version", "Status", "Updated"]);
    for preset in &presets {
        let status = host.presets().validate(preset);
        let status_cell = if status.is_error() {
            Cell::new(status.status.to_string()).fg(Color::Red)
        } else if status.is_warning() {
            Cell::new(status.status.to_string()).fg(Color::Yellow)
        } else {
            Cell::new(status.status.to_string()).fg(Color::Green)
        };
        table.add_row(vec![
            Cell::new(&preset.id).fg(Color::Cyan),
            Cell::new(&preset.name),
            Cell::new(plugin_summary(preset)),
            Cell::new(preset.version),
            status_cell,
            Cell::new(preset.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }
    println!("{table}");
    println!();
    println!("  {} {} preset(s)", "Total:".dimmed(), presets.len());

    Ok(())
}

async fn cmd_presets_show(host: &CadenceHost, id: &str, format: OutputFormat) -> anyhow::Result<()> {
    let preset = host.presets().get(id).await?;

    if print_structured(&preset, format)? {
        return Ok(());
    }

    let validation = host.presets().validate(&preset);

    println!("{}", preset.name.cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<12} {}", "ID:".bold(), preset.id);
    println!("  {:<12} {}", "Version:".bold(), preset.version);
    println!(
        "  {:<12} {}",
        "Created:".bold(),
        preset.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  {:<12} {}",
        "Updated:".bold(),
        preset.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if validation.is_ok() {
        println!("  {:<12} {}", "Status:".bold(), "valid".green());
    } else if validation.is_warning() {
        println!("  {:<12} {}", "Status:".bold(), validation.summary().yellow());
    } else {
        println!("  {:<12} {}", "Status:".bold(), validation.summary().red());
    }

    println!();
    println!("  {}", "Plugins (start order)".yellow().bold());
    if preset.plugins.is_empty() {
        println!("    {}", "none".dimmed());
        return Ok(());
    }

    let mut table = new_table(&["#", "Instance", "Plugin", "Name", "Settings"]);
    for (index, plugin) in preset.plugins.iter().enumerate() {
        let settings: Vec<String> = plugin
            .settings
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        let plugin_cell = if host.registry().contains(&plugin.plugin_id) {
            Cell::new(&plugin.plugin_id)
        } else {
            Cell::new(format!("{} (missing)", plugin.plugin_id)).fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(index + 1),
            Cell::new(&plugin.instance_id).fg(Color::Cyan),
            plugin_cell,
            Cell::new(plugin.display_name()),
            Cell::new(settings.join("\n")),
        ]);
    }
    println!("{table}");

    Ok(())
}

fn plugin_summary(preset: &SessionPreset) -> String {
    let ids: Vec<&str> = preset.plugins.iter().map(|p| p.plugin_id.as_str()).collect();
    if ids.is_empty() {
        "-".to_string()
    } else {
        ids.join(" → ")
    }
}
