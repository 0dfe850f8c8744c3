use cadence_core::{CadenceConfig, CadenceError, CadenceHost, ModuleTarget};
use clap::Subcommand;
use colored::Colorize;
use comfy_table::{Cell, Color};

use crate::output::{new_table, print_structured, truncate, OutputFormat};

#[derive(Subcommand)]
pub enum PluginsCommand {
    #[command(about = "List discovered plugins")]
    List {
        #[arg(short, long, value_enum, default_value = "text", help = "Output format")]
        format: OutputFormat,
    },

    #[command(about = "Show a plugin with its design-time settings and actions")]
    Info {
        #[arg(help = "Plugin ID")]
        id: String,

        #[arg(short, long, value_enum, default_value = "text", help = "Output format")]
        format: OutputFormat,
    },
}

pub async fn handle_plugins_command(
    cmd: Option<PluginsCommand>,
    config: CadenceConfig,
) -> anyhow::Result<()> {
    let host = CadenceHost::build(config)?;
    host.registry()
        .discover(&host.config().host.plugin_search_paths())
        .await?;

    let result = match cmd.unwrap_or(PluginsCommand::List {
        format: OutputFormat::Text,
    }) {
        PluginsCommand::List { format } => cmd_plugins_list(&host, format),
        PluginsCommand::Info { id, format } => cmd_plugins_info(&host, &id, format).await,
    };

    // Disposes the design-time instance `info` creates.
    host.shutdown().await;
    result
}

fn cmd_plugins_list(host: &CadenceHost, format: OutputFormat) -> anyhow::Result<()> {
    let plugins = host.modules().list_definitions();

    if print_structured(&plugins, format)? {
        return Ok(());
    }

    if plugins.is_empty() {
        println!("{}", "No plugins found.".yellow());
        return Ok(());
    }

    println!("{}", "Plugins".cyan().bold());
    println!();

    let mut table = new_table(&["ID", "Name", "Version", "Category", "Description"]);
    for plugin in &plugins {
        table.add_row(vec![
            Cell::new(&plugin.id).fg(Color::Cyan),
            Cell::new(&plugin.name),
            Cell::new(&plugin.version),
            Cell::new(plugin.category.to_string()),
            Cell::new(truncate(&plugin.description, 48)),
        ]);
    }
    println!("{table}");
    println!();
    println!("  {} {} plugin(s)", "Total:".dimmed(), plugins.len());

    Ok(())
}

async fn cmd_plugins_info(host: &CadenceHost, id: &str, format: OutputFormat) -> anyhow::Result<()> {
    let definition = host
        .registry()
        .get_definition(id)
        .ok_or_else(|| CadenceError::PluginNotFound(id.to_string()))?;
    let snapshot = host.modules().snapshot(&ModuleTarget::sandbox(id)).await?;

    if format != OutputFormat::Text {
        let value = serde_json::json!({
            "plugin": definition.descriptor(),
            "settings": snapshot.settings,
            "actions": snapshot.actions,
        });
        print_structured(&value, format)?;
        return Ok(());
    }

    println!("{}", definition.name.cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<14} {}", "ID:".bold(), definition.id);
    println!("  {:<14} {}", "Version:".bold(), definition.version);
    println!("  {:<14} {}", "Category:".bold(), definition.category);
    let platforms: Vec<String> = definition.platforms.iter().map(|p| p.to_string()).collect();
    println!("  {:<14} {}", "Platforms:".bold(), platforms.join(", "));
    if !definition.description.is_empty() {
        println!();
        println!("  {}", definition.description);
    }

    if !snapshot.settings.is_empty() {
        println!();
        println!("  {}", "Settings".yellow().bold());
        let mut table = new_table(&["Key", "Label", "Default", "Persistence", "Flags"]);
        for setting in &snapshot.settings {
            let mut flags = Vec::new();
            if setting.read_only {
                flags.push("read-only");
            }
            if !setting.visible {
                flags.push("hidden");
            }
            table.add_row(vec![
                Cell::new(&setting.key).fg(Color::Cyan),
                Cell::new(&setting.label),
                Cell::new(truncate(&setting.value, 32)),
                Cell::new(format!("{:?}", setting.persistence)),
                Cell::new(flags.join(", ")),
            ]);
        }
        println!("{table}");
    }

    if !snapshot.actions.is_empty() {
        println!();
        println!("  {}", "Actions".yellow().bold());
        for action in &snapshot.actions {
            let state = if action.enabled {
                "enabled".green()
            } else {
                "disabled".dimmed()
            };
            println!("    {} {} ({})", action.key.bold(), action.label, state);
        }
    }

    Ok(())
}
