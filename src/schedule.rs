use chrono::{Datelike, Local, Timelike, Weekday};
use serde::Serialize;
use serde_json::Value;

use crate::models::{ClassEntry, StudentContext};

pub const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

const DEFAULT_CLASS_MINUTES: u32 = 60;

pub fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Minutes past midnight of a wall-clock time.
pub fn minutes_of_day<T: Timelike>(time: &T) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Today's weekday and the current minute on the server's local clock.
pub fn local_now() -> (Weekday, u32) {
    let now = Local::now();
    (now.weekday(), minutes_of_day(&now))
}

fn parse_day(key: &str) -> Option<Weekday> {
    let key = key.trim();
    WEEK.into_iter()
        .find(|day| day_name(*day).eq_ignore_ascii_case(key))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklySchedule {
    days: [Vec<ClassEntry>; 7],
}

impl WeeklySchedule {
    pub fn from_value(value: &Value) -> Self {
        let mut schedule = Self::default();
        let Some(object) = value.as_object() else {
            return schedule;
        };

        for (key, classes) in object {
            let Some(day) = parse_day(key) else {
                continue;
            };
            let entries = classes
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter(|item| item.is_object())
                        .filter_map(|item| serde_json::from_value::<ClassEntry>(item.clone()).ok())
                        .collect()
                })
                .unwrap_or_default();
            schedule.days[day.num_days_from_monday() as usize] = entries;
        }

        schedule
    }

    pub fn classes_on(&self, day: Weekday) -> &[ClassEntry] {
        &self.days[day.num_days_from_monday() as usize]
    }

    /// The class running at `minutes` past midnight on `day`, if any.
    pub fn current_class(&self, day: Weekday, minutes: u32) -> Option<&ClassEntry> {
        self.classes_on(day).iter().find(|class| {
            class_window(class).is_some_and(|(start, end)| minutes >= start && minutes < end)
        })
    }

    /// Classes still ahead today; once today is done, every class of the
    /// next day that has any (today itself comes last in the wrap).
    pub fn upcoming(&self, today: Weekday, minutes: u32) -> Option<UpcomingClasses> {
        let remaining: Vec<ClassEntry> = self
            .classes_on(today)
            .iter()
            .filter(|class| starts_after(class, minutes))
            .cloned()
            .collect();

        if !remaining.is_empty() {
            return Some(UpcomingClasses {
                day: day_name(today),
                classes: remaining,
            });
        }

        let mut day = today;
        for _ in 0..7 {
            day = day.succ();
            let classes = self.classes_on(day);
            if !classes.is_empty() {
                return Some(UpcomingClasses {
                    day: day_name(day),
                    classes: classes.to_vec(),
                });
            }
        }
        None
    }

    /// What the counselor is told about the student's day.
    pub fn context_for(&self, today: Weekday, minutes: u32) -> StudentContext {
        let remaining: Vec<&ClassEntry> = self
            .classes_on(today)
            .iter()
            .filter(|class| starts_after(class, minutes))
            .collect();

        StudentContext {
            upcoming_classes: remaining.len(),
            next_class: remaining.first().map(|class| (*class).clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpcomingClasses {
    pub day: &'static str,
    pub classes: Vec<ClassEntry>,
}

fn starts_after(class: &ClassEntry, minutes: u32) -> bool {
    let (start, _) = split_time_range(&class.time);
    parse_time_to_minutes(start).is_some_and(|start| start > minutes)
}

/// Start and end of a class in minutes past midnight. A missing or
/// unreadable end means the class lasts an hour.
pub fn class_window(class: &ClassEntry) -> Option<(u32, u32)> {
    let (start, end) = split_time_range(&class.time);
    let start = parse_time_to_minutes(start)?;
    let end = end
        .and_then(parse_time_to_minutes)
        .unwrap_or(start.saturating_add(DEFAULT_CLASS_MINUTES));
    Some((start, end))
}

/// Split "9:00AM - 10:00AM", "09:00–10:00" or "9 to 10" into its halves.
pub fn split_time_range(range: &str) -> (&str, Option<&str>) {
    if let Some(index) = range.find(['-', '–']) {
        let separator_len = range[index..].chars().next().map_or(1, char::len_utf8);
        let end = range[index + separator_len..].trim();
        return (range[..index].trim(), (!end.is_empty()).then_some(end));
    }

    let lower = range.to_ascii_lowercase();
    if let Some(index) = lower.find(" to ") {
        let end = range[index + 4..].trim();
        return (range[..index].trim(), (!end.is_empty()).then_some(end));
    }

    (range.trim(), None)
}

/// Minutes past midnight for strings like "4:00PM", "9:30 am", "14:15",
/// "0900" or "3 pm".
pub fn parse_time_to_minutes(text: &str) -> Option<u32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];
    let hour_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let hour_digits = &rest[..hour_len];
    let mut rest = &rest[hour_len..];

    let (mut hours, mut minutes) = if hour_digits.len() >= 3 && !rest.starts_with(':') {
        let (h, m) = hour_digits.split_at(hour_digits.len() - 2);
        (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?)
    } else {
        (hour_digits.parse::<u32>().ok()?, 0)
    };

    if let Some(after_colon) = rest.strip_prefix(':') {
        let minute_len = after_colon
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(after_colon.len());
        if minute_len > 0 {
            minutes = after_colon[..minute_len].parse().ok()?;
        }
        rest = &after_colon[minute_len..];
    }

    let period = rest.trim_start().get(..2).map(str::to_ascii_lowercase);
    match period.as_deref() {
        Some("pm") if hours != 12 => hours = hours.saturating_add(12),
        Some("am") if hours == 12 => hours = 0,
        _ => {}
    }

    hours.checked_mul(60)?.checked_add(minutes)
}
