use std::collections::HashMap;

use cadence_core::{CadenceConfig, CadenceHost, ScheduleKind, SessionSchedule};
use chrono::{DateTime, Local};
use clap::Subcommand;
use colored::Colorize;
use comfy_table::{Cell, Color};
use serde::Serialize;

use crate::output::{new_table, print_structured, OutputFormat};

#[derive(Subcommand)]
pub enum SchedulesCommand {
    #[command(about = "List schedules with their next run")]
    List {
        #[arg(short, long, help = "Include disabled schedules")]
        all: bool,

        #[arg(short, long, value_enum, default_value = "text", help = "Output format")]
        format: OutputFormat,
    },
}

#[derive(Serialize)]
struct ScheduleRow {
    #[serde(flatten)]
    schedule: SessionSchedule,
    next_run: Option<DateTime<Local>>,
}

pub async fn handle_schedules_command(
    cmd: Option<SchedulesCommand>,
    config: CadenceConfig,
) -> anyhow::Result<()> {
    let host = CadenceHost::build(config)?;
    host.schedules().reload().await?;

    match cmd.unwrap_or(SchedulesCommand::List {
        all: false,
        format: OutputFormat::Text,
    }) {
        SchedulesCommand::List { all, format } => cmd_schedules_list(&host, all, format).await,
    }
}

async fn cmd_schedules_list(
    host: &CadenceHost,
    show_all: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let next_runs: HashMap<String, DateTime<Local>> = host
        .schedules()
        .next_runs()
        .await
        .into_iter()
        .map(|run| (run.schedule_id, run.at))
        .collect();

    let mut rows: Vec<ScheduleRow> = host
        .schedules()
        .list()
        .await
        .into_iter()
        .filter(|s| show_all || s.enabled)
        .map(|schedule| {
            let next_run = next_runs.get(&schedule.id).copied();
            ScheduleRow { schedule, next_run }
        })
        .collect();
    // Soonest first, then schedules that will not fire again.
    rows.sort_by(|a, b| match (a.next_run, b.next_run) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.schedule.id.cmp(&b.schedule.id),
    });

    if print_structured(&rows, format)? {
        return Ok(());
    }

    if rows.is_empty() {
        println!("{}", "No schedules found.".yellow());
        return Ok(());
    }

    println!("{}", "Schedules".cyan().bold());
    println!();

    let mut table = new_table(&["ID", "Preset", "When", "Auto-stop", "Then", "Next run"]);
    for row in &rows {
        let s = &row.schedule;
        let id_cell = if s.enabled {
            Cell::new(&s.id).fg(Color::Cyan)
        } else {
            Cell::new(format!("{} (disabled)", s.id)).fg(Color::DarkGrey)
        };
        table.add_row(vec![
            id_cell,
            Cell::new(&s.preset_id),
            Cell::new(describe_kind(&s.kind)),
            Cell::new(
                s.auto_stop_minutes
                    .map(|m| format!("{} min", m))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(s.next_preset_id.as_deref().unwrap_or("-")),
            match row.next_run {
                Some(at) => Cell::new(at.format("%a %Y-%m-%d %H:%M").to_string()).fg(Color::Green),
                None => Cell::new("never").fg(Color::DarkGrey),
            },
        ]);
    }
    println!("{table}");
    println!();
    println!("  {} {} schedule(s)", "Total:".dimmed(), rows.len());

    Ok(())
}

fn describe_kind(kind: &ScheduleKind) -> String {
    match kind {
        ScheduleKind::OneTime { at } => {
            format!("once at {}", at.with_timezone(&Local).format("%Y-%m-%d %H:%M"))
        }
        ScheduleKind::Recurring {
            time_of_day,
            weekdays,
        } => {
            let days = if weekdays.len() == 7 {
                "daily".to_string()
            } else {
                weekdays
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            };
            format!("{} at {}", days, time_of_day.format("%H:%M"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};

    #[test]
    fn test_describe_recurring_kind() {
        let kind = ScheduleKind::Recurring {
            time_of_day: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            weekdays: vec![Weekday::Mon, Weekday::Wed],
        };
        assert_eq!(describe_kind(&kind), "Mon,Wed at 09:30");

        let daily = ScheduleKind::Recurring {
            time_of_day: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            weekdays: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
                Weekday::Sun,
            ],
        };
        assert_eq!(describe_kind(&daily), "daily at 07:00");
    }
}
