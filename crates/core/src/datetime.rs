//! Partial-precision FHIR date / dateTime values
//!
//! FHIR `date` and `dateTime` allow `YYYY`, `YYYY-MM`, `YYYY-MM-DD` and full
//! timestamps. [`FhirDateTime::parse`] keeps the precision it finds and
//! degrades to [`FhirDateTime::NA`] instead of failing.

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, SecondsFormat, Utc,
};
use chrono_tz::Tz;
use regex::Regex;
use std::cmp::Ordering;
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::FhirError;

static DATE_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<year>[0-9](?:[0-9](?:[0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(?:-(?P<month>0[1-9]|1[0-2])(?:-(?P<day>0[1-9]|[12][0-9]|3[01])(?:[\sT](?P<hours>[01][0-9]|2[0-3]):(?P<minutes>[0-5][0-9]):(?P<seconds>[0-5][0-9]|60)(?:\.(?P<fraction>[0-9]{1,9}))?(?P<zone>Z|[+-](?:(?:0[0-9]|1[0-3]):[0-5][0-9]|14:00))?)?)?)?$",
    )
    .expect("date time pattern is valid")
});

/// Precision of a parsed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Flavour {
    NA,
    Year,
    YearMonth,
    Date,
    DateTime,
}

/// A FHIR date or dateTime at the precision it was written with.
///
/// Every variant but `NA` carries `date`, a calendar projection with absent
/// month/day set to 1, for comparing values of different precisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FhirDateTime {
    NA,
    Year {
        year: i32,
        date: NaiveDate,
    },
    YearMonth {
        year: i32,
        month: u32,
        date: NaiveDate,
    },
    Date {
        year: i32,
        month: u32,
        day: u32,
        date: NaiveDate,
    },
    DateTime {
        year: i32,
        month: u32,
        day: u32,
        hours: u32,
        minutes: u32,
        seconds: u32,
        milliseconds: Option<u32>,
        /// `Z` or `±hh:mm`, as written
        time_zone: Option<String>,
        date: NaiveDate,
    },
}

impl FhirDateTime {
    /// Parse a date/dateTime string. Never fails: unusable input yields `NA`.
    pub fn parse(value: &str) -> Self {
        parse_components(value.trim()).unwrap_or(FhirDateTime::NA)
    }

    pub fn flavour(&self) -> Flavour {
        match self {
            FhirDateTime::NA => Flavour::NA,
            FhirDateTime::Year { .. } => Flavour::Year,
            FhirDateTime::YearMonth { .. } => Flavour::YearMonth,
            FhirDateTime::Date { .. } => Flavour::Date,
            FhirDateTime::DateTime { .. } => Flavour::DateTime,
        }
    }

    pub fn is_na(&self) -> bool {
        matches!(self, FhirDateTime::NA)
    }

    /// Calendar projection
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            FhirDateTime::NA => None,
            FhirDateTime::Year { date, .. }
            | FhirDateTime::YearMonth { date, .. }
            | FhirDateTime::Date { date, .. }
            | FhirDateTime::DateTime { date, .. } => Some(*date),
        }
    }

    /// Wall-clock date and time, for `DateTime` values
    pub fn naive(&self) -> Option<NaiveDateTime> {
        let FhirDateTime::DateTime {
            hours,
            minutes,
            seconds,
            milliseconds,
            date,
            ..
        } = self
        else {
            return None;
        };

        let millis = milliseconds.unwrap_or(0);
        // chrono models a leap second as 59 seconds plus >= 1000 ms
        let time = if *seconds == 60 {
            NaiveTime::from_hms_milli_opt(*hours, *minutes, 59, 1000 + millis)
        } else {
            NaiveTime::from_hms_milli_opt(*hours, *minutes, *seconds, millis)
        }?;
        Some(date.and_time(time))
    }

    /// Absolute instant, for `DateTime` values carrying a zone
    pub fn instant(&self) -> Option<DateTime<FixedOffset>> {
        let FhirDateTime::DateTime {
            time_zone: Some(zone),
            ..
        } = self
        else {
            return None;
        };
        let offset = parse_offset(zone)?;
        self.naive()?.and_local_timezone(offset).single()
    }

    /// Best-effort ordering key: instants in UTC, other values at midnight
    pub fn sort_key(&self) -> Option<NaiveDateTime> {
        if let Some(instant) = self.instant() {
            return Some(instant.naive_utc());
        }
        self.naive()
            .or_else(|| self.date().and_then(|d| d.and_hms_opt(0, 0, 0)))
    }

    /// Chronological comparison across precisions; `NA` sorts first
    pub fn cmp_chronological(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl FromStr for FhirDateTime {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(FhirDateTime::parse(s))
    }
}

impl From<Option<&str>> for FhirDateTime {
    fn from(value: Option<&str>) -> Self {
        value.map(FhirDateTime::parse).unwrap_or(FhirDateTime::NA)
    }
}

fn parse_components(value: &str) -> Option<FhirDateTime> {
    let caps = DATE_TIME_RE.captures(value)?;
    let number = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u32>().ok());

    let year: i32 = caps.name("year")?.as_str().parse().ok()?;
    let Some(month) = number("month") else {
        return Some(FhirDateTime::Year {
            year,
            date: NaiveDate::from_ymd_opt(year, 1, 1)?,
        });
    };
    let Some(day) = number("day") else {
        return Some(FhirDateTime::YearMonth {
            year,
            month,
            date: NaiveDate::from_ymd_opt(year, month, 1)?,
        });
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let Some(hours) = number("hours") else {
        return Some(FhirDateTime::Date {
            year,
            month,
            day,
            date,
        });
    };

    let milliseconds = caps.name("fraction").and_then(|m| {
        let digits = &m.as_str()[..m.as_str().len().min(3)];
        format!("{digits:0<3}").parse().ok()
    });

    Some(FhirDateTime::DateTime {
        year,
        month,
        day,
        hours,
        minutes: number("minutes")?,
        seconds: number("seconds")?,
        milliseconds,
        time_zone: caps.name("zone").map(|m| m.as_str().to_string()),
        date,
    })
}

fn parse_offset(zone: &str) -> Option<FixedOffset> {
    if zone == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = match zone.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let (hours, minutes) = zone[1..].split_once(':')?;
    let seconds = hours.parse::<i32>().ok()? * 3600 + minutes.parse::<i32>().ok()? * 60;
    FixedOffset::east_opt(sign * seconds)
}

fn is_utc(time_zone: Option<&str>) -> bool {
    match time_zone.map(str::trim) {
        None | Some("") => true,
        Some(tz) => tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z"),
    }
}

fn resolve_zone(time_zone: &str) -> Result<Tz, FhirError> {
    time_zone
        .trim()
        .parse::<Tz>()
        .map_err(|_| FhirError::InvalidTimeZone(time_zone.to_string()))
}

/// Today's date as a FHIR `date`, in UTC or in the given IANA time zone
pub fn today(time_zone: Option<&str>) -> Result<String, FhirError> {
    let now = Utc::now();
    match time_zone {
        Some(tz) if !is_utc(Some(tz)) => {
            let zone = resolve_zone(tz)?;
            Ok(now.with_timezone(&zone).format("%Y-%m-%d").to_string())
        }
        _ => Ok(now.format("%Y-%m-%d").to_string()),
    }
}

/// The current instant as a FHIR `dateTime` with millisecond precision.
///
/// Without a zone (or with `utc`/`z`) the value ends in `Z`; a named IANA
/// zone yields that zone's wall clock and its `±hh:mm` offset.
pub fn now(time_zone: Option<&str>) -> Result<String, FhirError> {
    let now = Utc::now();
    match time_zone {
        Some(tz) if !is_utc(Some(tz)) => {
            let zone = resolve_zone(tz)?;
            let local = now.with_timezone(&zone);
            let offset = local.offset().fix();
            Ok(local
                .with_timezone(&offset)
                .to_rfc3339_opts(SecondsFormat::Millis, false))
        }
        _ => Ok(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_empty_input_is_na() {
        assert_eq!(FhirDateTime::parse(""), FhirDateTime::NA);
        assert_eq!(FhirDateTime::parse("   "), FhirDateTime::NA);
        assert_eq!(FhirDateTime::from(None), FhirDateTime::NA);
    }

    #[test]
    fn test_malformed_input_is_na() {
        for value in ["0000", "2024-13", "2024-02-30", "24-03-15", "2024-03-15T25:00:00Z", "tomorrow", "2024T10:00:00"] {
            assert!(FhirDateTime::parse(value).is_na(), "{value} should be NA");
        }
    }

    #[test]
    fn test_precision_detection() {
        assert_eq!(
            FhirDateTime::parse("2024"),
            FhirDateTime::Year {
                year: 2024,
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
            }
        );
        assert_eq!(FhirDateTime::parse("2024-03").flavour(), Flavour::YearMonth);
        assert_eq!(FhirDateTime::parse("2024-03-15").flavour(), Flavour::Date);

        let FhirDateTime::DateTime {
            hours,
            minutes,
            seconds,
            milliseconds,
            time_zone,
            ..
        } = FhirDateTime::parse("2024-03-15T10:30:00Z")
        else {
            panic!("expected a dateTime");
        };
        assert_eq!((hours, minutes, seconds), (10, 30, 0));
        assert_eq!(milliseconds, None);
        assert_eq!(time_zone.as_deref(), Some("Z"));
    }

    #[test]
    fn test_fraction_and_offset() {
        let value = FhirDateTime::parse(" 2024-03-15 23:59:60.5+05:30 ");
        let FhirDateTime::DateTime {
            milliseconds,
            ref time_zone,
            ..
        } = value
        else {
            panic!("expected a dateTime");
        };
        assert_eq!(milliseconds, Some(500));
        assert_eq!(time_zone.as_deref(), Some("+05:30"));
        assert_eq!(value.instant().unwrap().offset().local_minus_utc(), 5 * 3600 + 30 * 60);

        let precise = FhirDateTime::parse("2024-03-15T10:30:00.123456789");
        assert!(matches!(precise, FhirDateTime::DateTime { milliseconds: Some(123), time_zone: None, .. }));
        assert!(precise.instant().is_none());
        assert!(precise.naive().is_some());
    }

    #[test]
    fn test_projection_matches_components() {
        let cases = [
            ("1999", (1999, 1, 1)),
            ("2001-07", (2001, 7, 1)),
            ("2020-02-29", (2020, 2, 29)),
            ("2024-12-31T23:59:59-14:00", (2024, 12, 31)),
        ];
        for (value, (y, m, d)) in cases {
            let date = FhirDateTime::parse(value).date().unwrap();
            assert_eq!((date.year(), date.month(), date.day()), (y, m, d), "{value}");
        }
    }

    #[test]
    fn test_chronological_ordering() {
        let mut values: Vec<FhirDateTime> = ["2024-03-15T10:00:00+02:00", "", "2024", "2024-03-15T09:00:00Z", "2023-12"]
            .into_iter()
            .map(FhirDateTime::parse)
            .collect();
        values.sort_by(|a, b| a.cmp_chronological(b));

        assert!(values[0].is_na());
        assert_eq!(values[1].flavour(), Flavour::YearMonth);
        assert_eq!(values[2].flavour(), Flavour::Year);
        // 10:00+02:00 is 08:00Z
        assert_eq!(values[3].instant().unwrap().hour(), 10);
        assert_eq!(values[4].instant().unwrap().hour(), 9);
    }

    #[test]
    fn test_now_utc() {
        let value = now(None).unwrap();
        assert!(value.ends_with('Z'), "{value}");
        assert_eq!(FhirDateTime::parse(&value).flavour(), Flavour::DateTime);
        assert!(now(Some("UTC")).unwrap().ends_with('Z'));
        assert_eq!(FhirDateTime::parse(&today(None).unwrap()).flavour(), Flavour::Date);
    }

    #[test]
    fn test_now_in_time_zone() {
        let value = now(Some("America/New_York")).unwrap();
        assert!(!value.ends_with('Z'), "{value}");

        let parsed = FhirDateTime::parse(&value);
        let instant = parsed.instant().expect("offset present");
        let zone: Tz = "America/New_York".parse().unwrap();
        let expected = instant.with_timezone(&zone);

        assert_eq!(instant.offset().fix(), expected.offset().fix());
        let FhirDateTime::DateTime { hours, minutes, .. } = parsed else {
            panic!("expected a dateTime");
        };
        assert_eq!((hours, minutes), (expected.hour(), expected.minute()));
    }

    #[test]
    fn test_unknown_time_zone() {
        assert_eq!(
            now(Some("Mars/Olympus_Mons")),
            Err(FhirError::InvalidTimeZone("Mars/Olympus_Mons".into()))
        );
        assert!(today(Some("Europe/Berlin")).is_ok());
    }
}
