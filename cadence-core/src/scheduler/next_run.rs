use chrono::{DateTime, Datelike, Days, TimeZone, Utc};

use crate::models::{ScheduleKind, SessionSchedule};

// One week plus slack for a skipped DST day.
const RECURRING_SCAN_DAYS: u64 = 14;

/// Next occurrence of `schedule` at or after `now`, expressed in `now`'s zone.
///
/// Recurring times are interpreted as wall-clock time in that zone. A day on
/// which the configured time does not exist (DST gap) is skipped.
pub fn next_run<Tz: TimeZone>(
    schedule: &SessionSchedule,
    now: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let now_utc = now.with_timezone(&Utc);

    match &schedule.kind {
        ScheduleKind::OneTime { at } => {
            if schedule.last_run.is_none() && *at >= now_utc {
                Some(at.with_timezone(&tz))
            } else {
                None
            }
        }
        ScheduleKind::Recurring {
            time_of_day,
            weekdays,
        } => {
            if weekdays.is_empty() {
                return None;
            }

            let reference = match schedule.last_run {
                Some(last) if last > now_utc => last.with_timezone(&tz),
                _ => now.clone(),
            };
            let start = reference.date_naive();

            (0..=RECURRING_SCAN_DAYS)
                .filter_map(|offset| start.checked_add_days(Days::new(offset)))
                .filter(|date| weekdays.contains(&date.weekday()))
                .filter_map(|date| tz.from_local_datetime(&date.and_time(*time_of_day)).earliest())
                .find(|candidate| {
                    let candidate = candidate.with_timezone(&Utc);
                    candidate >= now_utc && schedule.last_run.map_or(true, |last| candidate > last)
                })
        }
    }
}

/// `next_run` for every schedule, skipping disabled ones and those with no
/// further occurrence. Sorted by time.
pub fn upcoming_runs<'a, Tz: TimeZone>(
    schedules: impl IntoIterator<Item = &'a SessionSchedule>,
    now: &DateTime<Tz>,
) -> Vec<(&'a SessionSchedule, DateTime<Tz>)> {
    let mut runs: Vec<_> = schedules
        .into_iter()
        .filter(|s| s.enabled)
        .filter_map(|s| next_run(s, now).map(|at| (s, at)))
        .collect();
    runs.sort_by(|a, b| a.1.cmp(&b.1));
    runs
}
