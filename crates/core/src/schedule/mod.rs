pub mod dates;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// A wall-clock time of day, carried around as `HH:MM` in messages and in
/// the calendar. Kept as hour/minute rather than `NaiveTime` because the
/// wire format is a plain string and slot math is all whole minutes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hours: u32,
    pub minutes: u32,
}

impl TimeOfDay {
    pub fn minutes_from_midnight(&self) -> u32 {
        self.hours * 60 + self.minutes
    }

    fn from_minutes(total: u32) -> Self {
        Self { hours: total / 60, minutes: total % 60 }
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hours, self.minutes)
    }
}

impl std::str::FromStr for TimeOfDay {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.trim().splitn(2, ':');
        let hours = parts
            .next()
            .and_then(|part| part.trim().parse::<u32>().ok())
            .filter(|hours| *hours < 24);
        let minutes = match parts.next() {
            Some(part) => part.trim().parse::<u32>().ok().filter(|minutes| *minutes < 60),
            None => Some(0),
        };

        match (hours, minutes) {
            (Some(hours), Some(minutes)) => Ok(Self { hours, minutes }),
            _ => Err(DomainError::UnknownVariant {
                field: "schedule.time_of_day",
                value: value.to_string(),
            }),
        }
    }
}

/// Configured attendance window: a weekday set (0 = Sunday .. 6 = Saturday,
/// matching the original deployment's convention) and a start/end time of
/// day, with a fixed slot interval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub working_days: Vec<u8>,
    pub slot_interval_minutes: u32,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start: TimeOfDay { hours: 9, minutes: 0 },
            end: TimeOfDay { hours: 18, minutes: 0 },
            working_days: vec![1, 2, 3, 4, 5, 6],
            slot_interval_minutes: 30,
        }
    }
}

impl BusinessHours {
    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        let day = date.weekday().num_days_from_sunday() as u8;
        self.working_days.contains(&day)
    }

    /// Whether a proposed appointment time falls inside the window. The end
    /// bound is exclusive: the last bookable slot starts before closing.
    pub fn contains_time(&self, time: TimeOfDay) -> bool {
        let minutes = time.minutes_from_midnight();
        minutes >= self.start.minutes_from_midnight() && minutes < self.end.minutes_from_midnight()
    }

    /// Whether the given instant is within attendance hours, for the
    /// off-hours gate. Unlike `contains_time` the end bound is inclusive:
    /// a message at closing time still gets handled.
    pub fn is_open_at(&self, now: NaiveDateTime) -> bool {
        if !self.is_working_day(now.date()) {
            return false;
        }
        let minutes = now.hour() * 60 + now.minute();
        minutes >= self.start.minutes_from_midnight() && minutes <= self.end.minutes_from_midnight()
    }

    /// Full slot grid for one day, `start..end` at the configured interval.
    pub fn slot_grid(&self) -> Vec<String> {
        let mut slots = Vec::new();
        let mut current = self.start.minutes_from_midnight();
        let end = self.end.minutes_from_midnight();
        let step = self.slot_interval_minutes.max(1);

        while current < end {
            slots.push(TimeOfDay::from_minutes(current).to_string());
            current += step;
        }

        slots
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{BusinessHours, TimeOfDay};

    fn hours() -> BusinessHours {
        BusinessHours::default()
    }

    #[test]
    fn parses_and_formats_time_of_day() {
        let time: TimeOfDay = "14:30".parse().expect("parse");
        assert_eq!(time, TimeOfDay { hours: 14, minutes: 30 });
        assert_eq!(time.to_string(), "14:30");

        let bare_hour: TimeOfDay = "9".parse().expect("parse");
        assert_eq!(bare_hour.to_string(), "09:00");
    }

    #[test]
    fn rejects_out_of_range_times() {
        assert!("25:00".parse::<TimeOfDay>().is_err());
        assert!("10:75".parse::<TimeOfDay>().is_err());
        assert!("soon".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn sunday_is_not_a_working_day_by_default() {
        // 2026-03-01 is a Sunday, 2026-03-02 a Monday.
        let sunday = NaiveDate::from_ymd_opt(2026, 3, 1).expect("date");
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).expect("date");

        assert!(!hours().is_working_day(sunday));
        assert!(hours().is_working_day(monday));
    }

    #[test]
    fn slot_grid_covers_window_at_interval() {
        let grid = hours().slot_grid();
        assert_eq!(grid.len(), 18);
        assert_eq!(grid.first().map(String::as_str), Some("09:00"));
        assert_eq!(grid.last().map(String::as_str), Some("17:30"));
    }

    #[test]
    fn booking_window_excludes_closing_time() {
        let closing: TimeOfDay = "18:00".parse().expect("parse");
        let last_slot: TimeOfDay = "17:30".parse().expect("parse");

        assert!(!hours().contains_time(closing));
        assert!(hours().contains_time(last_slot));
    }

    #[test]
    fn open_at_is_inclusive_of_closing_minute() {
        let monday_close = NaiveDate::from_ymd_opt(2026, 3, 2)
            .expect("date")
            .and_hms_opt(18, 0, 0)
            .expect("time");
        let monday_late = NaiveDate::from_ymd_opt(2026, 3, 2)
            .expect("date")
            .and_hms_opt(18, 1, 0)
            .expect("time");

        assert!(hours().is_open_at(monday_close));
        assert!(!hours().is_open_at(monday_late));
    }
}
