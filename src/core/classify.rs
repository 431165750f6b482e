#![forbid(unsafe_code)]

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::crons::CronSchedule;

const ACTIVE_WINDOW: Duration = Duration::from_secs(30 * 60);
const IDLE_WINDOW: Duration = Duration::from_secs(6 * 60 * 60);

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Idle,
    Offline,
}

#[must_use]
pub fn status_from_age(age: Duration) -> AgentStatus {
    if age < ACTIVE_WINDOW {
        AgentStatus::Active
    } else if age < IDLE_WINDOW {
        AgentStatus::Idle
    } else {
        AgentStatus::Offline
    }
}

/// Age of an epoch-millisecond timestamp relative to `now_ms`. Timestamps in
/// the future count as zero.
#[must_use]
pub fn age_since(now_ms: i64, then_ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(now_ms.saturating_sub(then_ms)).unwrap_or(0))
}

#[must_use]
pub fn now_ms() -> i64 {
    i64::try_from(time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000)
        .unwrap_or(i64::MAX)
}

// Labels for the cron expressions the scheduler actually uses.
const CRON_LABELS: &[(&str, &str)] = &[
    ("* * * * *", "cada minuto"),
    ("*/5 * * * *", "cada 5m"),
    ("*/10 * * * *", "cada 10m"),
    ("*/15 * * * *", "cada 15m"),
    ("*/30 * * * *", "cada 30m"),
    ("0 * * * *", "cada hora"),
    ("0 */2 * * *", "cada 2h"),
    ("0 */6 * * *", "cada 6h"),
    ("0 0 * * *", "00:00 diario"),
    ("0 1 * * *", "01:00 diario"),
    ("0 2 * * *", "02:00 diario"),
    ("0 3 * * *", "03:00 diario"),
    ("0 4 * * *", "04:00 diario"),
    ("0 5 * * *", "05:00 diario"),
    ("45 6 * * *", "06:45 diario"),
    ("0 8 * * *", "08:00 diario"),
    ("0 9 * * *", "09:00 diario"),
    ("0 10 * * 0", "dom 10:00"),
    ("0 17 * * 5", "vie 17:00"),
    ("0 19 * * *", "19:00 diario"),
];

#[must_use]
pub fn schedule_label(schedule: &CronSchedule) -> String {
    match (schedule.kind.as_str(), schedule.every_ms, schedule.expr.as_deref()) {
        ("interval" | "every", Some(ms), _) => interval_label(ms),
        ("cron", _, Some(expr)) => cron_label(expr),
        ("", _, _) => "—".to_owned(),
        (kind, _, _) => kind.to_owned(),
    }
}

#[must_use]
pub fn interval_label(ms: u64) -> String {
    if ms >= DAY_MS && ms % DAY_MS == 0 {
        return format!("cada {}d", ms / DAY_MS);
    }
    if ms >= HOUR_MS && ms % HOUR_MS == 0 {
        let hours = ms / HOUR_MS;
        return if hours == 1 {
            "cada hora".to_owned()
        } else {
            format!("cada {hours}h")
        };
    }
    if ms >= MINUTE_MS && ms % MINUTE_MS == 0 {
        return format!("cada {}m", ms / MINUTE_MS);
    }
    format!("{ms}ms")
}

#[must_use]
pub fn cron_label(expr: &str) -> String {
    let normalized = expr.split_whitespace().collect::<Vec<_>>().join(" ");
    CRON_LABELS
        .iter()
        .find(|(pattern, _)| *pattern == normalized)
        .map_or_else(|| expr.to_owned(), |(_, label)| (*label).to_owned())
}
