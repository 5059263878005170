//! Maintenance-window expressions: `expr := window (';' window)*`,
//! `window := [day] 'HH:MM' '-' [day] 'HH:MM'`.

use chrono::{DateTime, NaiveTime, Timelike, Utc, Weekday};

const MINUTES_PER_DAY: i64 = 24 * 60;
const MINUTES_PER_WEEK: i64 = 7 * MINUTES_PER_DAY;

#[derive(Debug, thiserror::Error)]
#[error("invalid maintenance window expression: {0}")]
pub struct MaintenanceError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Endpoint {
    day: Option<Weekday>,
    time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Window {
    start: Endpoint,
    end: Endpoint,
}

/// A parsed, empty-means-always-open maintenance window expression.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceWindow {
    windows: Vec<Window>,
}

impl MaintenanceWindow {
    /// An empty/whitespace expression parses to the always-open window:
    /// no configured window means updates are never held back.
    pub fn parse(expr: &str) -> Result<Self, MaintenanceError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(Self::default());
        }
        let windows =
            expr.split(';').map(str::trim).filter(|s| !s.is_empty()).map(parse_window).collect::<Result<_, _>>()?;
        Ok(Self { windows })
    }

    /// Always open when there are no windows (unset expression).
    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        if self.windows.is_empty() {
            return true;
        }
        self.windows.iter().any(|w| w.contains(at))
    }
}

impl Window {
    fn contains(&self, at: DateTime<Utc>) -> bool {
        match (self.start.day, self.end.day) {
            (None, None) => contains_time_of_day(self.start.time, self.end.time, at.time()),
            _ => {
                let start_day = self.start.day.or(self.end.day).unwrap();
                let end_day = self.end.day.or(self.start.day).unwrap();
                let mut start_m = minutes_of_week(start_day, self.start.time);
                let mut end_m = minutes_of_week(end_day, self.end.time);
                if end_m <= start_m {
                    end_m += MINUTES_PER_WEEK;
                }
                let now_m = minutes_of_week(at.weekday(), at.time());
                in_range(now_m, start_m, end_m) || in_range(now_m + MINUTES_PER_WEEK, start_m, end_m)
            }
        }
    }
}

fn in_range(t: i64, start: i64, end: i64) -> bool {
    t >= start && t < end
}

/// Start inclusive, end exclusive; a same-day window with `start > end`
/// wraps past midnight.
fn contains_time_of_day(start: NaiveTime, end: NaiveTime, now: NaiveTime) -> bool {
    if start <= end { now >= start && now < end } else { now >= start || now < end }
}

fn minutes_of_week(day: Weekday, time: NaiveTime) -> i64 {
    day.num_days_from_monday() as i64 * MINUTES_PER_DAY + time.hour() as i64 * 60 + time.minute() as i64
}

fn parse_window(s: &str) -> Result<Window, MaintenanceError> {
    let (left, right) = s
        .split_once('-')
        .ok_or_else(|| MaintenanceError(format!("window {s:?} is missing the '-' separator")))?;
    Ok(Window { start: parse_endpoint(left.trim())?, end: parse_endpoint(right.trim())? })
}

fn parse_endpoint(s: &str) -> Result<Endpoint, MaintenanceError> {
    let lower = s.to_ascii_lowercase();
    let (day, rest) = strip_day_prefix(&lower)
        .map(|(day, rest)| (Some(day), rest))
        .unwrap_or((None, lower.as_str()));
    let time = NaiveTime::parse_from_str(rest.trim(), "%H:%M")
        .map_err(|_| MaintenanceError(format!("{s:?} is not a valid [day] HH:MM endpoint")))?;
    Ok(Endpoint { day, time })
}

fn strip_day_prefix(s: &str) -> Option<(Weekday, &str)> {
    const DAYS: &[(&str, Weekday)] = &[
        ("sunday", Weekday::Sun),
        ("sun", Weekday::Sun),
        ("monday", Weekday::Mon),
        ("mon", Weekday::Mon),
        ("tuesday", Weekday::Tue),
        ("tue", Weekday::Tue),
        ("wednesday", Weekday::Wed),
        ("wed", Weekday::Wed),
        ("thursday", Weekday::Thu),
        ("thu", Weekday::Thu),
        ("friday", Weekday::Fri),
        ("fri", Weekday::Fri),
        ("saturday", Weekday::Sat),
        ("sat", Weekday::Sat),
    ];
    // Longest names first so "sunday" isn't shadowed by "sun".
    DAYS.iter()
        .filter(|(name, _)| s.starts_with(name))
        .max_by_key(|(name, _)| name.len())
        .map(|(name, day)| (*day, s[name.len()..].trim_start()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn empty_expression_is_always_open() {
        let window = MaintenanceWindow::parse("  ").unwrap();
        assert!(window.is_open(at(2026, 7, 26, 3, 0)));
    }

    #[test]
    fn same_day_window_boundaries_are_start_inclusive_end_exclusive() {
        let window = MaintenanceWindow::parse("02:00-04:00").unwrap();
        assert!(window.is_open(at(2026, 7, 26, 2, 0)));
        assert!(!window.is_open(at(2026, 7, 26, 4, 0)));
        assert!(window.is_open(at(2026, 7, 26, 3, 0)));
        assert!(!window.is_open(at(2026, 7, 26, 5, 0)));
    }

    #[test]
    fn midnight_wrap_window_is_open_on_both_sides() {
        let window = MaintenanceWindow::parse("22:00-02:00").unwrap();
        assert!(window.is_open(at(2026, 7, 26, 23, 0)));
        assert!(window.is_open(at(2026, 7, 26, 1, 0)));
        assert!(!window.is_open(at(2026, 7, 26, 10, 0)));
    }

    #[test]
    fn single_named_day_window_only_opens_on_that_weekday() {
        // 2026-07-27 is a Monday.
        let window = MaintenanceWindow::parse("mon08:00-17:00").unwrap();
        assert!(window.is_open(at(2026, 7, 27, 9, 0)));
        assert!(!window.is_open(at(2026, 7, 28, 9, 0)));
    }

    #[test]
    fn cross_day_window_spans_the_days_between() {
        // 2026-07-27 Mon, 2026-07-29 Wed.
        let window = MaintenanceWindow::parse("mon22:00-wed06:00").unwrap();
        assert!(window.is_open(at(2026, 7, 27, 23, 0)));
        assert!(window.is_open(at(2026, 7, 28, 12, 0)));
        assert!(window.is_open(at(2026, 7, 29, 5, 0)));
        assert!(!window.is_open(at(2026, 7, 29, 7, 0)));
        assert!(!window.is_open(at(2026, 7, 26, 12, 0)));
    }

    #[test]
    fn multiple_windows_are_unioned() {
        let window = MaintenanceWindow::parse("02:00-04:00;14:00-15:00").unwrap();
        assert!(window.is_open(at(2026, 7, 26, 3, 0)));
        assert!(window.is_open(at(2026, 7, 26, 14, 30)));
        assert!(!window.is_open(at(2026, 7, 26, 10, 0)));
    }

    #[test]
    fn invalid_expression_is_rejected() {
        assert!(MaintenanceWindow::parse("nonsense").is_err());
        assert!(MaintenanceWindow::parse("08:00").is_err());
    }
}
