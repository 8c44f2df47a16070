//! Time-of-day primitives
//!
//! Pickup windows and itinerary times are minutes since midnight, rendered
//! as "HH:MM". All arithmetic stays in integer minutes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minutes in one day
pub const MINUTES_PER_DAY: u16 = 1440;

#[derive(Debug, Error, PartialEq)]
pub enum TimeParseError {
    #[error("time '{0}' is not in HH:MM format")]
    Format(String),
    #[error("time '{0}' is out of range")]
    Range(String),
}

/// Parse "HH:MM" into minutes since midnight (0..=1439)
pub fn time_str_to_minutes(value: &str) -> Result<u16, TimeParseError> {
    let (hours, minutes) = value
        .split_once(':')
        .ok_or_else(|| TimeParseError::Format(value.to_string()))?;

    if hours.len() != 2 || minutes.len() != 2 {
        return Err(TimeParseError::Format(value.to_string()));
    }

    let hours: u16 = hours
        .parse()
        .map_err(|_| TimeParseError::Format(value.to_string()))?;
    let minutes: u16 = minutes
        .parse()
        .map_err(|_| TimeParseError::Format(value.to_string()))?;

    if hours > 23 || minutes > 59 {
        return Err(TimeParseError::Range(value.to_string()));
    }

    Ok(hours * 60 + minutes)
}

/// Render minutes since midnight as "HH:MM", wrapping at midnight
pub fn minutes_to_time_str(minutes: u16) -> String {
    let wrapped = minutes % MINUTES_PER_DAY;
    format!("{:02}:{:02}", wrapped / 60, wrapped % 60)
}

/// A pickup window in minutes of day, `earliest < latest`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest: u16,
    pub latest: u16,
}

impl TimeWindow {
    pub fn new(earliest: u16, latest: u16) -> Option<Self> {
        if earliest < latest && latest < MINUTES_PER_DAY {
            Some(Self { earliest, latest })
        } else {
            None
        }
    }

    /// Parse from "HH:MM" bounds
    pub fn parse(earliest: &str, latest: &str) -> Result<Option<Self>, TimeParseError> {
        let earliest = time_str_to_minutes(earliest)?;
        let latest = time_str_to_minutes(latest)?;
        Ok(Self::new(earliest, latest))
    }

    pub fn earliest_seconds(&self) -> u32 {
        self.earliest as u32 * 60
    }

    pub fn latest_seconds(&self) -> u32 {
        self.latest as u32 * 60
    }

    pub fn contains(&self, minute_of_day: u16) -> bool {
        self.earliest <= minute_of_day && minute_of_day <= self.latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_times() {
        assert_eq!(time_str_to_minutes("00:00").unwrap(), 0);
        assert_eq!(time_str_to_minutes("08:30").unwrap(), 510);
        assert_eq!(time_str_to_minutes("23:59").unwrap(), 1439);
    }

    #[test]
    fn test_parse_rejects_bad_format() {
        assert!(matches!(
            time_str_to_minutes("8:30"),
            Err(TimeParseError::Format(_))
        ));
        assert!(matches!(
            time_str_to_minutes("0830"),
            Err(TimeParseError::Format(_))
        ));
        assert!(matches!(
            time_str_to_minutes(""),
            Err(TimeParseError::Format(_))
        ));
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        assert!(matches!(
            time_str_to_minutes("24:00"),
            Err(TimeParseError::Range(_))
        ));
        assert!(matches!(
            time_str_to_minutes("12:60"),
            Err(TimeParseError::Range(_))
        ));
    }

    #[test]
    fn test_format_times() {
        assert_eq!(minutes_to_time_str(0), "00:00");
        assert_eq!(minutes_to_time_str(510), "08:30");
        assert_eq!(minutes_to_time_str(1439), "23:59");
    }

    #[test]
    fn test_format_wraps_at_midnight() {
        assert_eq!(minutes_to_time_str(1440), "00:00");
        assert_eq!(minutes_to_time_str(1500), "01:00");
    }

    #[test]
    fn test_round_trip_whole_day() {
        for minute in 0..MINUTES_PER_DAY {
            let rendered = minutes_to_time_str(minute);
            assert_eq!(time_str_to_minutes(&rendered).unwrap(), minute);
        }
    }

    #[test]
    fn test_window_requires_order() {
        assert!(TimeWindow::new(480, 510).is_some());
        assert!(TimeWindow::new(510, 480).is_none());
        assert!(TimeWindow::new(480, 480).is_none());
    }

    #[test]
    fn test_window_parse() {
        let window = TimeWindow::parse("08:00", "08:30").unwrap().unwrap();
        assert_eq!(window.earliest, 480);
        assert_eq!(window.latest, 510);
        assert!(window.contains(480));
        assert!(window.contains(510));
        assert!(!window.contains(511));
    }
}
