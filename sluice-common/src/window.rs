//! Delivery windows: the clock-time intervals during which deferred
//! messages may leave.
//!
//! Windows are written as `"HH:MM-HH:MM"`. Both bounds are inclusive and
//! compared at minute granularity against local time. A window whose opening
//! time is later than its closing time wraps across midnight, so
//! `"22:00-06:00"` is open late at night and early in the morning.

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeWindow {
    opens_at: NaiveTime,
    closes_at: NaiveTime,
}

impl TimeWindow {
    /// Build a window from two times; seconds are discarded.
    #[must_use]
    pub fn new(opens_at: NaiveTime, closes_at: NaiveTime) -> Self {
        Self {
            opens_at: truncate_to_minute(opens_at),
            closes_at: truncate_to_minute(closes_at),
        }
    }

    #[must_use]
    pub const fn opens_at(&self) -> NaiveTime {
        self.opens_at
    }

    #[must_use]
    pub const fn closes_at(&self) -> NaiveTime {
        self.closes_at
    }

    #[must_use]
    pub fn wraps_midnight(&self) -> bool {
        self.opens_at > self.closes_at
    }

    /// Whether `now`, truncated to the minute, falls inside this window.
    #[must_use]
    pub fn contains(&self, now: NaiveTime) -> bool {
        let now = truncate_to_minute(now);

        if self.wraps_midnight() {
            now >= self.opens_at || now <= self.closes_at
        } else {
            self.opens_at <= now && now <= self.closes_at
        }
    }
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

fn parse_clock_time(part: &str, window: &str) -> Result<NaiveTime, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidWindow {
        window: window.to_string(),
        reason,
    };

    let part = part.trim();
    let bytes = part.as_bytes();
    if bytes.len() != 5
        || bytes[2] != b':'
        || !bytes[..2].iter().all(u8::is_ascii_digit)
        || !bytes[3..].iter().all(u8::is_ascii_digit)
    {
        return Err(invalid(format!("'{part}' is not in HH:MM form")));
    }

    let hour: u32 = part[..2]
        .parse()
        .map_err(|e| invalid(format!("bad hour in '{part}': {e}")))?;
    let minute: u32 = part[3..]
        .parse()
        .map_err(|e| invalid(format!("bad minute in '{part}': {e}")))?;

    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| invalid(format!("'{part}' is not a valid time of day")))
}

impl FromStr for TimeWindow {
    type Err = ConfigError;

    fn from_str(window: &str) -> Result<Self, Self::Err> {
        let (opens, closes) =
            window
                .trim()
                .split_once('-')
                .ok_or_else(|| ConfigError::InvalidWindow {
                    window: window.to_string(),
                    reason: "expected HH:MM-HH:MM".to_string(),
                })?;

        Ok(Self {
            opens_at: parse_clock_time(opens, window)?,
            closes_at: parse_clock_time(closes, window)?,
        })
    }
}

impl TryFrom<String> for TimeWindow {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeWindow> for String {
    fn from(value: TimeWindow) -> Self {
        value.to_string()
    }
}

impl Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.opens_at.format("%H:%M"),
            self.closes_at.format("%H:%M")
        )
    }
}

/// The configured set of delivery windows, evaluated disjunctively.
///
/// An empty set is never open: deferrable messages always spool and are
/// never flushed automatically.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct DeliveryWindows(Vec<TimeWindow>);

impl DeliveryWindows {
    /// Parse every window string, failing on the first malformed one.
    ///
    /// # Errors
    /// [`ConfigError::InvalidWindow`] naming the offending string
    pub fn parse<I, S>(windows: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        windows
            .into_iter()
            .map(|window| window.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// True iff at least one window contains `now`.
    #[must_use]
    pub fn is_open(&self, now: NaiveTime) -> bool {
        self.0.iter().any(|window| window.contains(now))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeWindow> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<TimeWindow>> for DeliveryWindows {
    fn from(value: Vec<TimeWindow>) -> Self {
        Self(value)
    }
}

impl TryFrom<Vec<String>> for DeliveryWindows {
    type Error = ConfigError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DeliveryWindows> for Vec<String> {
    fn from(value: DeliveryWindows) -> Self {
        value.0.iter().map(ToString::to_string).collect()
    }
}

impl Display for DeliveryWindows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(none)");
        }

        for (i, window) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            Display::fmt(window, f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    #[test]
    fn test_office_hours_bounds_are_inclusive() {
        let windows = DeliveryWindows::parse(["09:00-17:00"]).expect("valid window");

        assert!(windows.is_open(at(10, 0)));
        assert!(!windows.is_open(at(8, 59)));
        assert!(windows.is_open(at(9, 0)));
        assert!(windows.is_open(at(17, 0)));
        assert!(!windows.is_open(at(17, 1)));
    }

    #[test]
    fn test_seconds_are_ignored() {
        let windows = DeliveryWindows::parse(["09:00-17:00"]).expect("valid window");
        let late = NaiveTime::from_hms_opt(17, 0, 59).expect("valid time");
        let early = NaiveTime::from_hms_opt(8, 59, 59).expect("valid time");

        assert!(windows.is_open(late));
        assert!(!windows.is_open(early));
    }

    #[test]
    fn test_empty_set_is_never_open() {
        let windows = DeliveryWindows::default();

        for hour in 0..24 {
            assert!(!windows.is_open(at(hour, 0)));
            assert!(!windows.is_open(at(hour, 59)));
        }
    }

    #[test]
    fn test_any_window_opens_the_set() {
        let windows =
            DeliveryWindows::parse(["06:00-07:00", "12:30-13:00", "12:45-14:00"]).expect("valid");

        assert!(windows.is_open(at(6, 30)));
        assert!(windows.is_open(at(12, 50)));
        assert!(windows.is_open(at(14, 0)));
        assert!(!windows.is_open(at(8, 0)));
        assert!(!windows.is_open(at(12, 29)));
    }

    #[test]
    fn test_window_wrapping_midnight() {
        let window: TimeWindow = "22:00-06:00".parse().expect("valid window");

        assert!(window.wraps_midnight());
        assert!(window.contains(at(23, 15)));
        assert!(window.contains(at(0, 0)));
        assert!(window.contains(at(6, 0)));
        assert!(window.contains(at(22, 0)));
        assert!(!window.contains(at(6, 1)));
        assert!(!window.contains(at(12, 0)));
    }

    #[test]
    fn test_single_minute_window() {
        let window: TimeWindow = "12:00-12:00".parse().expect("valid window");

        assert!(!window.wraps_midnight());
        assert!(window.contains(at(12, 0)));
        assert!(!window.contains(at(12, 1)));
        assert!(!window.contains(at(11, 59)));
    }

    #[test]
    fn test_malformed_windows_are_rejected() {
        for input in [
            "",
            "09:00",
            "9:00-17:00",
            "09:00-17",
            "24:00-25:00",
            "09:60-10:00",
            "ab:cd-ef:gh",
            "09:00-17:00-18:00",
            "09.00-17.00",
        ] {
            let err = input.parse::<TimeWindow>();
            assert!(
                matches!(err, Err(ConfigError::InvalidWindow { .. })),
                "{input:?} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_stops_at_first_bad_window() {
        let err = DeliveryWindows::parse(["09:00-10:00", "nope"]).expect_err("invalid");
        assert!(err.to_string().contains("'nope'"));
    }

    #[test]
    fn test_whitespace_is_tolerated() {
        let window: TimeWindow = " 09:00 - 17:00 ".parse().expect("valid window");
        assert_eq!(window.to_string(), "09:00-17:00");
    }

    #[test]
    fn test_windows_deserialize_from_config_strings() {
        let windows: DeliveryWindows =
            ron::from_str(r#"["09:00-12:00", "13:00-17:00"]"#).expect("valid config");
        assert_eq!(windows.len(), 2);
        assert_eq!(windows.to_string(), "09:00-12:00, 13:00-17:00");

        let err = ron::from_str::<DeliveryWindows>(r#"["09:00-12:00", "lunch"]"#);
        assert!(err.is_err());
    }
}
