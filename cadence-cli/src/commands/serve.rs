use cadence_core::{
    CadenceConfig, CadenceHost, NotificationEvent, NotificationLevel, SessionEvent,
};
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

pub async fn handle_serve_command(
    mut config: CadenceConfig,
    no_scheduler: bool,
) -> anyhow::Result<()> {
    if no_scheduler {
        config.scheduler.enabled = false;
    }
    config.validate()?;

    let host = CadenceHost::build(config)?;
    let mut sessions = host.sessions().events();
    let mut notifications = host.notifications().subscribe();

    host.start().await?;
    print_banner(&host);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("  {} Interrupted, shutting down...", "→".blue());
                break;
            }
            event = sessions.recv() => match event {
                Ok(event) => print_session_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Session event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            event = notifications.recv() => match event {
                Ok(event) => print_notification(&event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Notification stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    host.shutdown().await;
    println!("{} {}", "✓".green().bold(), "Cadence stopped".green());
    Ok(())
}

fn print_banner(host: &CadenceHost) {
    let config = host.config();
    let plugins = host.registry().list_definitions().len();

    println!("{}", "Cadence".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<12} {}", "Address:".bold(), config.listen_address());
    println!("  {:<12} {}", "Data dir:".bold(), config.host.data_dir.display());
    println!("  {:<12} {}", "Plugins:".bold(), plugins);
    println!(
        "  {:<12} {}",
        "Scheduler:".bold(),
        if config.scheduler.enabled {
            "enabled".green()
        } else {
            "disabled".yellow()
        }
    );
    println!();
    println!("  {}", "Press Ctrl+C to stop".dimmed());
    println!();
}

fn print_session_event(event: &SessionEvent) {
    let time = event.timestamp().format("%H:%M:%S");
    match event {
        SessionEvent::Started {
            preset_name,
            session_id,
            warnings,
            ..
        } => {
            println!(
                "  {} {} {} ({})",
                time.to_string().dimmed(),
                "▶".green().bold(),
                preset_name.bold(),
                session_id.dimmed()
            );
            if !warnings.is_empty() {
                println!("      {} {} validation warning(s)", "!".yellow(), warnings.len());
            }
        }
        SessionEvent::Stopped {
            preset_id,
            failures,
            ..
        } => {
            println!(
                "  {} {} {}",
                time.to_string().dimmed(),
                "■".blue().bold(),
                preset_id
            );
            if !failures.is_empty() {
                println!(
                    "      {} {} plugin(s) failed to stop cleanly",
                    "!".yellow(),
                    failures.len()
                );
            }
        }
        SessionEvent::StartFailed {
            preset_id,
            plugin,
            phase,
            reason,
            ..
        } => {
            println!(
                "  {} {} {} failed at '{}' during {}: {}",
                time.to_string().dimmed(),
                "✗".red().bold(),
                preset_id,
                plugin,
                phase,
                reason.red()
            );
        }
    }
}

fn print_notification(event: &NotificationEvent) {
    let n = &event.notification;
    let marker = match n.level {
        NotificationLevel::Error => "✗".red().bold(),
        NotificationLevel::Warning => "!".yellow().bold(),
        _ => "•".cyan().bold(),
    };
    println!(
        "  {} {} {}: {}",
        n.timestamp.format("%H:%M:%S").to_string().dimmed(),
        marker,
        n.title.bold(),
        n.message
    );
}
