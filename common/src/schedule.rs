// Schedule parsing and fire time calculation
//
// This module implements the five-field cron syntax used by job triggers and
// the bounded forward/backward scans that locate fire instants around a
// reference time. The distance between those two instants is the schedule's
// fire interval, which the frequency policy compares against its floor.

use crate::errors::{ScanDirection, ScheduleError};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use std::fmt;
use std::str::FromStr;

/// Maximum number of calendar days searched for a fire time.
///
/// One Gregorian weekday/leap cycle: any satisfiable date and weekday
/// combination recurs within it.
pub const MAX_SCAN_DAYS: i64 = 28 * 366;

/// Accepted values of one schedule field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMatcher {
    /// `*`, every value matches
    Any,
    /// Bit set of accepted values
    Values(u64),
}

impl FieldMatcher {
    pub fn matches(&self, value: u32) -> bool {
        match self {
            FieldMatcher::Any => true,
            FieldMatcher::Values(bits) => value < 64 && bits & (1u64 << value) != 0,
        }
    }
}

struct FieldKind {
    name: &'static str,
    min: u32,
    max: u32,
    /// Day-of-week 7 is Sunday, same as 0
    fold_seven: bool,
}

impl FieldKind {
    fn normalize(&self, value: u32) -> u32 {
        if self.fold_seven && value == 7 {
            0
        } else {
            value
        }
    }
}

const MINUTE: FieldKind = FieldKind {
    name: "minute",
    min: 0,
    max: 59,
    fold_seven: false,
};
const HOUR: FieldKind = FieldKind {
    name: "hour",
    min: 0,
    max: 23,
    fold_seven: false,
};
const DAY_OF_MONTH: FieldKind = FieldKind {
    name: "day-of-month",
    min: 1,
    max: 31,
    fold_seven: false,
};
const MONTH: FieldKind = FieldKind {
    name: "month",
    min: 1,
    max: 12,
    fold_seven: false,
};
const DAY_OF_WEEK: FieldKind = FieldKind {
    name: "day-of-week",
    min: 0,
    max: 7,
    fold_seven: true,
};

/// A parsed cron-style schedule: minute, hour, day-of-month, month, day-of-week.
///
/// An instant fires when all five fields match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    expression: String,
    minute: FieldMatcher,
    hour: FieldMatcher,
    day_of_month: FieldMatcher,
    month: FieldMatcher,
    day_of_week: FieldMatcher,
}

impl ScheduleSpec {
    /// Parse a five-field expression or one of the `@` aliases
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        let expression = text.trim();
        let invalid = |reason: String| ScheduleError::InvalidExpression {
            expression: expression.to_string(),
            reason,
        };

        let expanded = if expression.starts_with('@') {
            expand_alias(expression).ok_or_else(|| invalid("unknown alias".to_string()))?
        } else {
            expression
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        Ok(Self {
            expression: expression.to_string(),
            minute: parse_field(fields[0], &MINUTE).map_err(invalid)?,
            hour: parse_field(fields[1], &HOUR).map_err(invalid)?,
            day_of_month: parse_field(fields[2], &DAY_OF_MONTH).map_err(invalid)?,
            month: parse_field(fields[3], &MONTH).map_err(invalid)?,
            day_of_week: parse_field(fields[4], &DAY_OF_WEEK).map_err(invalid)?,
        })
    }

    /// The expression this schedule was parsed from
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the given local wall-clock time matches all five fields
    pub fn matches(&self, local: &NaiveDateTime) -> bool {
        self.matches_date(local.date())
            && self.hour.matches(local.hour())
            && self.minute.matches(local.minute())
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        self.month.matches(date.month())
            && self.day_of_month.matches(date.day())
            && self
                .day_of_week
                .matches(date.weekday().num_days_from_sunday())
    }

    /// First fire instant strictly after `from`, in the time zone of `from`
    pub fn next_fire<Z: TimeZone>(&self, from: &DateTime<Z>) -> Result<DateTime<Z>, ScheduleError> {
        let tz = from.timezone();
        let start = truncate_to_minute(from.naive_local()) + Duration::minutes(1);
        let mut date = start.date();

        for offset in 0..=MAX_SCAN_DAYS {
            if self.matches_date(date) {
                let (first_hour, first_minute) = if offset == 0 {
                    (start.hour(), start.minute())
                } else {
                    (0, 0)
                };
                for hour in (first_hour..24).filter(|h| self.hour.matches(*h)) {
                    let minute_from = if hour == first_hour { first_minute } else { 0 };
                    for minute in (minute_from..60).filter(|m| self.minute.matches(*m)) {
                        let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                            continue;
                        };
                        if let Some(fire) = local_instants(&tz, &naive)
                            .into_iter()
                            .find(|instant| instant > from)
                        {
                            return Ok(fire);
                        }
                    }
                }
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        Err(self.unresolvable(ScanDirection::Forward))
    }

    /// Last fire instant strictly before `from`, in the time zone of `from`
    pub fn prev_fire<Z: TimeZone>(&self, from: &DateTime<Z>) -> Result<DateTime<Z>, ScheduleError> {
        let tz = from.timezone();
        let start = truncate_to_minute(from.naive_local());
        let mut date = start.date();

        for offset in 0..=MAX_SCAN_DAYS {
            if self.matches_date(date) {
                let (last_hour, last_minute) = if offset == 0 {
                    (start.hour(), start.minute())
                } else {
                    (23, 59)
                };
                for hour in (0..=last_hour).rev().filter(|h| self.hour.matches(*h)) {
                    let minute_to = if hour == last_hour { last_minute } else { 59 };
                    for minute in (0..=minute_to).rev().filter(|m| self.minute.matches(*m)) {
                        let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                            continue;
                        };
                        if let Some(fire) = local_instants(&tz, &naive)
                            .into_iter()
                            .rev()
                            .find(|instant| instant < from)
                        {
                            return Ok(fire);
                        }
                    }
                }
            }
            date = match date.pred_opt() {
                Some(previous) => previous,
                None => break,
            };
        }

        Err(self.unresolvable(ScanDirection::Backward))
    }

    /// Distance between the next and previous fire instants around `reference`.
    ///
    /// A reference on an exact minute is moved to the middle of that minute,
    /// so it never sits on a fire instant that both scans would exclude.
    pub fn fire_interval<Z: TimeZone>(&self, reference: &DateTime<Z>) -> Result<Duration, ScheduleError> {
        let reference = if reference.second() == 0 && reference.nanosecond() == 0 {
            reference.clone() + Duration::seconds(30)
        } else {
            reference.clone()
        };
        let next = self.next_fire(&reference)?;
        let previous = self.prev_fire(&reference)?;
        Ok(next - previous)
    }

    /// Warn about expressions that are legal but almost certainly a mistake.
    ///
    /// Returns `None` when nothing looks suspicious. A warning never makes the
    /// schedule invalid.
    pub fn check_sanity(&self) -> Option<String> {
        let every_minute = [
            self.minute,
            self.hour,
            self.day_of_month,
            self.month,
            self.day_of_week,
        ]
        .iter()
        .all(|field| *field == FieldMatcher::Any);
        if every_minute {
            return Some(format!(
                "Do you really mean \"every minute\" when you say \"{}\"?",
                self.expression
            ));
        }

        let months: Vec<u32> = (1..=12).filter(|m| self.month.matches(*m)).collect();
        let has_valid_day = |leap_year: bool| {
            months.iter().any(|&month| {
                (1..=days_in_month(month, leap_year)).any(|day| self.day_of_month.matches(day))
            })
        };

        if !has_valid_day(true) {
            return Some(format!(
                "\"{}\" will never fire: no selected day of month exists in the selected months",
                self.expression
            ));
        }
        if !has_valid_day(false) {
            return Some(format!(
                "\"{}\" only fires in leap years",
                self.expression
            ));
        }
        None
    }

    fn unresolvable(&self, direction: ScanDirection) -> ScheduleError {
        ScheduleError::Unresolvable {
            expression: self.expression.clone(),
            direction,
            days: MAX_SCAN_DAYS,
        }
    }
}

impl FromStr for ScheduleSpec {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn expand_alias(alias: &str) -> Option<&'static str> {
    match alias {
        "@yearly" | "@annually" => Some("0 0 1 1 *"),
        "@monthly" => Some("0 0 1 * *"),
        "@weekly" => Some("0 0 * * 0"),
        "@daily" | "@midnight" => Some("0 0 * * *"),
        "@hourly" => Some("0 * * * *"),
        _ => None,
    }
}

fn parse_field(field: &str, kind: &FieldKind) -> Result<FieldMatcher, String> {
    if field == "*" {
        return Ok(FieldMatcher::Any);
    }

    let mut bits = 0u64;
    for item in field.split(',') {
        if item.is_empty() {
            return Err(format!("empty list item in {} field '{}'", kind.name, field));
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(parse_step(step, kind)?)),
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (kind.min, kind.max)
        } else if let Some((low, high)) = range.split_once('-') {
            let low = parse_value(low, kind)?;
            let high = parse_value(high, kind)?;
            if low > high {
                return Err(format!("inverted {} range '{}'", kind.name, range));
            }
            (low, high)
        } else {
            let value = parse_value(range, kind)?;
            // `a/n` runs from a to the end of the field
            if step.is_some() {
                (value, kind.max)
            } else {
                (value, value)
            }
        };

        let step = step.unwrap_or(1);
        let mut value = start;
        while value <= end {
            bits |= 1u64 << kind.normalize(value);
            value += step;
        }
    }

    Ok(FieldMatcher::Values(bits))
}

fn parse_value(token: &str, kind: &FieldKind) -> Result<u32, String> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{}' is not a number in {} field", token, kind.name));
    }
    let value: u32 = token
        .parse()
        .map_err(|_| format!("'{}' is not a number in {} field", token, kind.name))?;
    if value < kind.min || value > kind.max {
        return Err(format!(
            "{} value {} out of range {}-{}",
            kind.name, value, kind.min, kind.max
        ));
    }
    Ok(value)
}

fn parse_step(token: &str, kind: &FieldKind) -> Result<u32, String> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{}' is not a valid step in {} field", token, kind.name));
    }
    match token.parse::<u32>() {
        Ok(step) if step >= 1 && step <= kind.max => Ok(step),
        _ => Err(format!(
            "{} step {} out of range 1-{}",
            kind.name, token, kind.max
        )),
    }
}

fn truncate_to_minute(local: NaiveDateTime) -> NaiveDateTime {
    local
        - Duration::seconds(i64::from(local.second()))
        - Duration::nanoseconds(i64::from(local.nanosecond()))
}

/// Instants a local wall-clock time maps to: none in a DST gap, two in a fold
fn local_instants<Z: TimeZone>(tz: &Z, naive: &NaiveDateTime) -> Vec<DateTime<Z>> {
    let mapped = tz.from_local_datetime(naive);
    match (mapped.clone().earliest(), mapped.latest()) {
        (Some(earliest), Some(latest)) if earliest != latest => vec![earliest, latest],
        (Some(earliest), _) => vec![earliest],
        _ => Vec::new(),
    }
}

fn days_in_month(month: u32, leap_year: bool) -> u32 {
    match month {
        2 if leap_year => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}
