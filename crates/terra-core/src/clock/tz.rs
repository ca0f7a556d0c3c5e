//! POSIX timezone-string parsing and offset resolution.
//!
//! The monitor stores its timezone as a POSIX `TZ` specification
//! (`STD offset [DST [offset] [,start[/time],end[/time]]]`), the same format
//! the persisted configuration carries. Daylight-saving transitions are
//! honoured when the string encodes them, including southern-hemisphere
//! rules where the DST window wraps the new year.
//!
//! Offsets in the string follow the POSIX convention (positive = west of
//! Greenwich); the parsed representation stores seconds east of UTC, the
//! sign the rest of the crate works with.

use heapless::String;
use thiserror_no_std::Error;

use super::{civil_from_days, days_from_civil, ClockError, SECS_PER_DAY};

/// Default transition time when a rule omits `/time` (02:00 local).
const DEFAULT_TRANSITION_SECS: i32 = 2 * 3600;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TzParseError {
    #[error("empty or truncated timezone string")]
    Truncated,
    #[error("malformed zone abbreviation")]
    BadAbbreviation,
    #[error("malformed offset")]
    BadOffset,
    #[error("malformed transition rule")]
    BadRule,
}

impl From<TzParseError> for ClockError {
    fn from(_: TzParseError) -> Self {
        ClockError::InvalidTz
    }
}

/// When a daylight-saving period begins or ends, in local wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `Mm.w.d` — day `d` (0 = Sunday) of week `w` (5 = last) of month `m`.
    MonthWeekDay { month: u8, week: u8, weekday: u8, time_secs: i32 },
    /// `Jn` — day-of-year 1-365, February 29 never counted.
    JulianNoLeap { day: u16, time_secs: i32 },
    /// `n` — zero-based day-of-year 0-365, February 29 counted.
    JulianLeap { day: u16, time_secs: i32 },
}

impl Transition {
    /// Seconds from local midnight of January 1 of `year` to this
    /// transition's wall-clock instant.
    fn secs_into_year(&self, year: i32) -> i64 {
        let jan1 = days_from_civil(year, 1, 1);
        match *self {
            Transition::MonthWeekDay { month, week, weekday, time_secs } => {
                let first = days_from_civil(year, month, 1);
                let first_wd = ((first + 4).rem_euclid(7)) as u8;
                let mut day = 1 + ((weekday as i64 - first_wd as i64).rem_euclid(7)) as u8;
                day += (week - 1) * 7;
                let days_in_month = month_length(year, month);
                while day > days_in_month {
                    day -= 7;
                }
                let d = days_from_civil(year, month, day);
                (d - jan1) * SECS_PER_DAY as i64 + time_secs as i64
            }
            Transition::JulianNoLeap { day, time_secs } => {
                let mut doy = day as i64 - 1;
                if is_leap_year(year) && day >= 60 {
                    doy += 1;
                }
                doy * SECS_PER_DAY as i64 + time_secs as i64
            }
            Transition::JulianLeap { day, time_secs } => {
                day as i64 * SECS_PER_DAY as i64 + time_secs as i64
            }
        }
    }
}

/// Daylight-saving portion of a timezone rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DstRule {
    pub abbreviation: String<8>,
    /// Seconds east of UTC while DST is in effect.
    pub offset_secs: i32,
    pub start: Transition,
    pub end: Transition,
}

/// A parsed POSIX timezone specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixTz {
    pub std_abbreviation: String<8>,
    /// Seconds east of UTC during standard time.
    pub std_offset_secs: i32,
    pub dst: Option<DstRule>,
}

impl PosixTz {
    /// Parse a POSIX TZ string such as `"JST-9"` or
    /// `"EST5EDT,M3.2.0,M11.1.0"`.
    pub fn parse(spec: &str) -> Result<Self, ClockError> {
        Ok(parse_inner(spec)?)
    }

    /// Offset from UTC, in seconds east, at the given UTC instant.
    pub fn offset_at(&self, utc_secs: u32) -> i32 {
        let Some(dst) = &self.dst else {
            return self.std_offset_secs;
        };

        // Work in standard local time to find the year the rules apply to.
        let std_local = utc_secs as i64 + self.std_offset_secs as i64;
        let (year, _, _) = civil_from_days(std_local.div_euclid(SECS_PER_DAY as i64));
        let year_start_local = days_from_civil(year, 1, 1) * SECS_PER_DAY as i64;

        // Transitions are expressed in wall time: start in standard time,
        // end in daylight time.
        let start_utc =
            year_start_local + dst.start.secs_into_year(year) - self.std_offset_secs as i64;
        let end_utc = year_start_local + dst.end.secs_into_year(year) - dst.offset_secs as i64;

        let t = utc_secs as i64;
        let in_dst = if start_utc <= end_utc {
            t >= start_utc && t < end_utc
        } else {
            // Southern hemisphere: DST wraps the new year.
            t >= start_utc || t < end_utc
        };

        if in_dst {
            dst.offset_secs
        } else {
            self.std_offset_secs
        }
    }
}

fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

fn month_length(year: i32, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn parse_inner(spec: &str) -> Result<PosixTz, TzParseError> {
    let bytes = spec.as_bytes();
    let mut pos = 0usize;

    let std_abbreviation = parse_abbreviation(bytes, &mut pos)?;
    // The offset after the standard name is mandatory.
    let std_west = parse_offset(bytes, &mut pos, false)?;
    let std_offset_secs = -std_west;

    if pos == bytes.len() {
        return Ok(PosixTz {
            std_abbreviation,
            std_offset_secs,
            dst: None,
        });
    }

    let dst_abbreviation = parse_abbreviation(bytes, &mut pos)?;
    // The DST offset defaults to one hour ahead of standard time.
    let dst_offset_secs = match parse_offset(bytes, &mut pos, true) {
        Ok(west) => -west,
        Err(TzParseError::Truncated) => std_offset_secs + 3600,
        Err(e) => return Err(e),
    };

    let (start, end) = if pos == bytes.len() {
        // No explicit rules: fall back to the US defaults, which is what the
        // device's C library did for bare DST names.
        (
            Transition::MonthWeekDay { month: 3, week: 2, weekday: 0, time_secs: DEFAULT_TRANSITION_SECS },
            Transition::MonthWeekDay { month: 11, week: 1, weekday: 0, time_secs: DEFAULT_TRANSITION_SECS },
        )
    } else {
        if bytes[pos] != b',' {
            return Err(TzParseError::BadRule);
        }
        pos += 1;
        let start = parse_rule(bytes, &mut pos)?;
        if pos >= bytes.len() || bytes[pos] != b',' {
            return Err(TzParseError::BadRule);
        }
        pos += 1;
        let end = parse_rule(bytes, &mut pos)?;
        if pos != bytes.len() {
            return Err(TzParseError::BadRule);
        }
        (start, end)
    };

    Ok(PosixTz {
        std_abbreviation,
        std_offset_secs,
        dst: Some(DstRule {
            abbreviation: dst_abbreviation,
            offset_secs: dst_offset_secs,
            start,
            end,
        }),
    })
}

fn parse_abbreviation(bytes: &[u8], pos: &mut usize) -> Result<String<8>, TzParseError> {
    let mut out = String::new();

    if *pos < bytes.len() && bytes[*pos] == b'<' {
        // Quoted form: <UTC+8> style, alphanumerics plus sign characters.
        *pos += 1;
        while *pos < bytes.len() && bytes[*pos] != b'>' {
            let c = bytes[*pos];
            if !(c.is_ascii_alphanumeric() || c == b'+' || c == b'-') {
                return Err(TzParseError::BadAbbreviation);
            }
            out.push(c as char).map_err(|_| TzParseError::BadAbbreviation)?;
            *pos += 1;
        }
        if *pos == bytes.len() {
            return Err(TzParseError::BadAbbreviation);
        }
        *pos += 1; // closing '>'
    } else {
        while *pos < bytes.len() && bytes[*pos].is_ascii_alphabetic() {
            out.push(bytes[*pos] as char)
                .map_err(|_| TzParseError::BadAbbreviation)?;
            *pos += 1;
        }
    }

    if out.len() < 3 {
        return Err(TzParseError::BadAbbreviation);
    }
    Ok(out)
}

/// Parse `[+|-]hh[:mm[:ss]]` and return seconds west of UTC.
/// With `optional`, a missing offset reports `Truncated` without consuming.
fn parse_offset(bytes: &[u8], pos: &mut usize, optional: bool) -> Result<i32, TzParseError> {
    let start = *pos;
    let mut sign = 1i32;
    if *pos < bytes.len() && (bytes[*pos] == b'+' || bytes[*pos] == b'-') {
        if bytes[*pos] == b'-' {
            sign = -1;
        }
        *pos += 1;
    }

    if *pos >= bytes.len() || !bytes[*pos].is_ascii_digit() {
        *pos = start;
        return Err(if optional {
            TzParseError::Truncated
        } else {
            TzParseError::BadOffset
        });
    }

    let hours = parse_number(bytes, pos, 2)?;
    if hours > 24 {
        return Err(TzParseError::BadOffset);
    }
    let mut secs = hours * 3600;

    for unit in [60, 1] {
        if *pos < bytes.len() && bytes[*pos] == b':' {
            *pos += 1;
            let part = parse_number(bytes, pos, 2)?;
            if part > 59 {
                return Err(TzParseError::BadOffset);
            }
            secs += part * unit;
        } else {
            break;
        }
    }

    Ok(sign * secs)
}

fn parse_number(bytes: &[u8], pos: &mut usize, max_digits: usize) -> Result<i32, TzParseError> {
    let mut value = 0i32;
    let mut digits = 0usize;
    while *pos < bytes.len() && bytes[*pos].is_ascii_digit() && digits < max_digits {
        value = value * 10 + (bytes[*pos] - b'0') as i32;
        *pos += 1;
        digits += 1;
    }
    if digits == 0 {
        return Err(TzParseError::BadOffset);
    }
    Ok(value)
}

fn parse_rule(bytes: &[u8], pos: &mut usize) -> Result<Transition, TzParseError> {
    if *pos >= bytes.len() {
        return Err(TzParseError::BadRule);
    }

    let rule = match bytes[*pos] {
        b'M' => {
            *pos += 1;
            let month = parse_number(bytes, pos, 2).map_err(|_| TzParseError::BadRule)?;
            expect(bytes, pos, b'.')?;
            let week = parse_number(bytes, pos, 1).map_err(|_| TzParseError::BadRule)?;
            expect(bytes, pos, b'.')?;
            let weekday = parse_number(bytes, pos, 1).map_err(|_| TzParseError::BadRule)?;
            if !(1..=12).contains(&month) || !(1..=5).contains(&week) || !(0..=6).contains(&weekday)
            {
                return Err(TzParseError::BadRule);
            }
            Transition::MonthWeekDay {
                month: month as u8,
                week: week as u8,
                weekday: weekday as u8,
                time_secs: DEFAULT_TRANSITION_SECS,
            }
        }
        b'J' => {
            *pos += 1;
            let day = parse_number(bytes, pos, 3).map_err(|_| TzParseError::BadRule)?;
            if !(1..=365).contains(&day) {
                return Err(TzParseError::BadRule);
            }
            Transition::JulianNoLeap { day: day as u16, time_secs: DEFAULT_TRANSITION_SECS }
        }
        c if c.is_ascii_digit() => {
            let day = parse_number(bytes, pos, 3).map_err(|_| TzParseError::BadRule)?;
            if day > 365 {
                return Err(TzParseError::BadRule);
            }
            Transition::JulianLeap { day: day as u16, time_secs: DEFAULT_TRANSITION_SECS }
        }
        _ => return Err(TzParseError::BadRule),
    };

    // Optional "/time" suffix overriding the 02:00 default.
    let rule = if *pos < bytes.len() && bytes[*pos] == b'/' {
        *pos += 1;
        let time_secs = parse_offset(bytes, pos, false).map_err(|_| TzParseError::BadRule)?;
        match rule {
            Transition::MonthWeekDay { month, week, weekday, .. } => {
                Transition::MonthWeekDay { month, week, weekday, time_secs }
            }
            Transition::JulianNoLeap { day, .. } => Transition::JulianNoLeap { day, time_secs },
            Transition::JulianLeap { day, .. } => Transition::JulianLeap { day, time_secs },
        }
    } else {
        rule
    };

    Ok(rule)
}

fn expect(bytes: &[u8], pos: &mut usize, c: u8) -> Result<(), TzParseError> {
    if *pos < bytes.len() && bytes[*pos] == c {
        *pos += 1;
        Ok(())
    } else {
        Err(TzParseError::BadRule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;

    fn utc_secs(year: u16, month: u8, day: u8, hour: u8) -> u32 {
        Timestamp::from_calendar(year, month, day, hour, 0, 0).secs
    }

    #[test]
    fn test_fixed_offset_east() {
        let tz = PosixTz::parse("JST-9").unwrap();
        assert_eq!(tz.std_abbreviation.as_str(), "JST");
        assert_eq!(tz.std_offset_secs, 9 * 3600);
        assert!(tz.dst.is_none());
        assert_eq!(tz.offset_at(utc_secs(2025, 7, 1, 12)), 9 * 3600);
    }

    #[test]
    fn test_us_eastern_with_rules() {
        let tz = PosixTz::parse("EST5EDT,M3.2.0,M11.1.0").unwrap();
        assert_eq!(tz.std_offset_secs, -5 * 3600);
        let dst = tz.dst.as_ref().unwrap();
        assert_eq!(dst.offset_secs, -4 * 3600);

        // January: standard time. July: daylight time.
        assert_eq!(tz.offset_at(utc_secs(2025, 1, 15, 12)), -5 * 3600);
        assert_eq!(tz.offset_at(utc_secs(2025, 7, 15, 12)), -4 * 3600);
    }

    #[test]
    fn test_dst_spring_forward_boundary() {
        let tz = PosixTz::parse("EST5EDT,M3.2.0,M11.1.0").unwrap();
        // 2025: second Sunday of March is the 9th; transition at 02:00 EST
        // which is 07:00 UTC.
        let before = utc_secs(2025, 3, 9, 6) + 3599;
        let after = utc_secs(2025, 3, 9, 7);
        assert_eq!(tz.offset_at(before), -5 * 3600);
        assert_eq!(tz.offset_at(after), -4 * 3600);
    }

    #[test]
    fn test_central_europe_with_explicit_time() {
        let tz = PosixTz::parse("CET-1CEST,M3.5.0,M10.5.0/3").unwrap();
        assert_eq!(tz.std_offset_secs, 3600);
        assert_eq!(tz.dst.as_ref().unwrap().offset_secs, 2 * 3600);
        assert_eq!(tz.offset_at(utc_secs(2025, 6, 1, 12)), 2 * 3600);
        assert_eq!(tz.offset_at(utc_secs(2025, 12, 1, 12)), 3600);
    }

    #[test]
    fn test_southern_hemisphere_wrap() {
        // New Zealand: DST from late September to early April.
        let tz = PosixTz::parse("NZST-12NZDT,M9.5.0,M4.1.0/3").unwrap();
        assert_eq!(tz.offset_at(utc_secs(2025, 1, 15, 0)), 13 * 3600);
        assert_eq!(tz.offset_at(utc_secs(2025, 6, 15, 0)), 12 * 3600);
        assert_eq!(tz.offset_at(utc_secs(2025, 12, 15, 0)), 13 * 3600);
    }

    #[test]
    fn test_quoted_abbreviation() {
        let tz = PosixTz::parse("<UTC+8>-8").unwrap();
        assert_eq!(tz.std_abbreviation.as_str(), "UTC+8");
        assert_eq!(tz.std_offset_secs, 8 * 3600);
    }

    #[test]
    fn test_dst_without_rules_uses_us_defaults() {
        let tz = PosixTz::parse("EST5EDT").unwrap();
        let dst = tz.dst.as_ref().unwrap();
        assert_eq!(
            dst.start,
            Transition::MonthWeekDay { month: 3, week: 2, weekday: 0, time_secs: 7200 }
        );
    }

    #[test]
    fn test_julian_rules() {
        let tz = PosixTz::parse("AAA0BBB,J60,J300").unwrap();
        // J60 is always March 1, even in leap years.
        assert_eq!(tz.offset_at(utc_secs(2024, 3, 2, 12)), 3600);
        assert_eq!(tz.offset_at(utc_secs(2024, 2, 28, 12)), 0);
    }

    #[test]
    fn test_invalid_strings_rejected() {
        for bad in ["", "JS", "JST", "JST-25", "EST5EDT,M13.1.0,M11.1.0", "EST5EDT,M3.2.0", "<UTC+8-8"] {
            assert!(PosixTz::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }
}
