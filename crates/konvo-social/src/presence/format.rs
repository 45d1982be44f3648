//! Human-readable presence and relative-time strings.

use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};

use super::types::PresenceState;

const SECOND: i64 = 1_000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// "Now", "5m ago", "3h ago", "2d ago", "1w ago", "4mo ago", "2y ago".
///
/// Months and years are calendar-based. Timestamps in the future read as
/// "Now".
pub fn format_relative_time(then_ms: i64, now_ms: i64) -> String {
    let elapsed = now_ms.saturating_sub(then_ms);
    if elapsed < MINUTE {
        return "Now".into();
    }
    if elapsed < HOUR {
        return format!("{}m ago", elapsed / MINUTE);
    }
    if elapsed < DAY {
        return format!("{}h ago", elapsed / HOUR);
    }
    if elapsed < WEEK {
        return format!("{}d ago", elapsed / DAY);
    }
    if elapsed < 4 * WEEK {
        return format!("{}w ago", elapsed / WEEK);
    }

    // Out of chrono's range: approximate with 30-day months.
    let months = calendar_months_between(then_ms, now_ms)
        .unwrap_or(elapsed / (30 * DAY))
        .max(1);
    if months < 12 {
        format!("{months}mo ago")
    } else {
        format!("{}y ago", months / 12)
    }
}

/// Label shown next to a user's name.
pub fn format_status_time(state: Option<&PresenceState>, now_ms: i64) -> String {
    match state {
        None => "Offline".into(),
        Some(state) if state.is_online() => "Active now".into(),
        Some(state) if now_ms.saturating_sub(state.last_changed) < MINUTE => {
            "Just now".into()
        }
        Some(state) => format_relative_time(state.last_changed, now_ms),
    }
}

/// How often a label for `then_ms` needs refreshing.
pub fn update_interval(then_ms: i64, now_ms: i64) -> Duration {
    let elapsed = now_ms.saturating_sub(then_ms);
    if elapsed < MINUTE {
        Duration::from_secs(5)
    } else if elapsed < HOUR {
        Duration::from_secs(30)
    } else if elapsed < DAY {
        Duration::from_secs(5 * 60)
    } else {
        Duration::from_secs(60 * 60)
    }
}

/// Whole calendar months from `then_ms` to `now_ms`.
fn calendar_months_between(then_ms: i64, now_ms: i64) -> Option<i64> {
    let then = DateTime::<Utc>::from_timestamp_millis(then_ms)?;
    let now = DateTime::<Utc>::from_timestamp_millis(now_ms)?;

    let mut months = i64::from(now.year() - then.year()) * 12
        + i64::from(now.month()) - i64::from(then.month());
    if position_in_month(&now) < position_in_month(&then) {
        months -= 1;
    }
    Some(months.max(0))
}

fn position_in_month(at: &DateTime<Utc>) -> (u32, u32, u32, u32) {
    (at.day(), at.hour(), at.minute(), at.second())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(rfc3339: &str) -> i64 {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn relative_time_short_ranges() {
        let now = at("2024-06-15T12:00:00Z");
        assert_eq!(format_relative_time(now - 59 * SECOND, now), "Now");
        assert_eq!(format_relative_time(now + HOUR, now), "Now");
        assert_eq!(format_relative_time(now - 5 * MINUTE, now), "5m ago");
        assert_eq!(format_relative_time(now - 3 * HOUR, now), "3h ago");
        assert_eq!(format_relative_time(now - 2 * DAY, now), "2d ago");
        assert_eq!(format_relative_time(now - 15 * DAY, now), "2w ago");
    }

    #[test]
    fn relative_time_calendar_ranges() {
        let now = at("2024-06-15T12:00:00Z");
        assert_eq!(format_relative_time(at("2024-05-10T12:00:00Z"), now), "1mo ago");
        assert_eq!(format_relative_time(at("2024-02-16T12:00:00Z"), now), "3mo ago");
        assert_eq!(format_relative_time(at("2023-06-16T12:00:00Z"), now), "11mo ago");
        assert_eq!(format_relative_time(at("2023-06-15T12:00:00Z"), now), "1y ago");
        assert_eq!(format_relative_time(at("2021-01-01T00:00:00Z"), now), "3y ago");
    }

    #[test]
    fn four_weeks_within_one_calendar_month_is_one_month() {
        let now = at("2024-01-30T00:00:00Z");
        assert_eq!(format_relative_time(at("2024-01-01T00:00:00Z"), now), "1mo ago");
    }

    #[test]
    fn status_labels() {
        let now = 10 * HOUR;
        assert_eq!(format_status_time(None, now), "Offline");
        assert_eq!(
            format_status_time(Some(&PresenceState::online(0)), now),
            "Active now"
        );
        assert_eq!(
            format_status_time(Some(&PresenceState::offline(now - 30 * SECOND)), now),
            "Just now"
        );
        assert_eq!(
            format_status_time(Some(&PresenceState::offline(now - 2 * HOUR)), now),
            "2h ago"
        );
    }

    #[test]
    fn refresh_intervals() {
        let now = 100 * DAY;
        assert_eq!(update_interval(now - 10 * SECOND, now), Duration::from_secs(5));
        assert_eq!(update_interval(now - 10 * MINUTE, now), Duration::from_secs(30));
        assert_eq!(update_interval(now - 5 * HOUR, now), Duration::from_secs(300));
        assert_eq!(update_interval(now - 3 * DAY, now), Duration::from_secs(3600));
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        let now = at("2023-11-14T22:13:20Z");

        let ancient = PresenceState::offline(i64::MIN);
        assert!(format_status_time(Some(&ancient), now).ends_with("y ago"));
        assert!(format_relative_time(i64::MIN, now).ends_with("y ago"));
        assert_eq!(update_interval(i64::MIN, now), Duration::from_secs(3600));

        let far_future = PresenceState::offline(i64::MAX);
        assert_eq!(format_status_time(Some(&far_future), now), "Just now");
        assert_eq!(format_relative_time(i64::MAX, i64::MIN), "Now");
        assert_eq!(update_interval(i64::MAX, i64::MIN), Duration::from_secs(5));
    }
}
