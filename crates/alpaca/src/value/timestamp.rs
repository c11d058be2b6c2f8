// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! UTC instant at nanosecond resolution, with the flexible parser and microsecond-precision
//! formatter described by the wire contract.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::Error;

/// A UTC instant at nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    nanos_since_epoch: i64,
}

impl Timestamp {
    /// The Unix epoch, `1970-01-01T00:00:00Z`.
    #[must_use]
    pub fn epoch() -> Self {
        Self { nanos_since_epoch: 0 }
    }

    /// Builds from a nanosecond Unix timestamp directly.
    #[must_use]
    pub fn from_nanos(nanos_since_epoch: i64) -> Self {
        Self { nanos_since_epoch }
    }

    /// The current instant.
    #[must_use]
    pub fn now() -> Self {
        Self::from_chrono(Utc::now())
    }

    /// The raw nanosecond Unix timestamp.
    #[must_use]
    pub fn as_nanos(&self) -> i64 {
        self.nanos_since_epoch
    }

    /// This instant plus `duration`.
    #[must_use]
    pub fn add_duration(&self, duration: std::time::Duration) -> Self {
        Self { nanos_since_epoch: self.nanos_since_epoch + duration.as_nanos() as i64 }
    }

    /// Parses either `YYYY-MM-DD` (midnight UTC) or a full
    /// `YYYY-MM-DD[T| ]HH:MM:SS[.fraction][Z|±HH[:]MM]` datetime. Fractional seconds beyond 9
    /// digits are consumed but truncated; trailing characters are an error.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let bytes = text.as_bytes();
        let mut pos = 0usize;

        let (year, month, day) = parse_date(bytes, &mut pos)?;
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| Error::invalid_argument("text", "invalid calendar date"))?;

        if pos == bytes.len() {
            let dt = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is always valid"));
            return Ok(Self::from_chrono(dt));
        }

        if bytes[pos] != b'T' && bytes[pos] != b' ' {
            return Err(Error::invalid_argument("text", "expected 'T' or ' ' between date and time"));
        }
        pos += 1;

        let hour = parse_two_digits(bytes, &mut pos)?;
        expect_char(bytes, &mut pos, b':')?;
        let minute = parse_two_digits(bytes, &mut pos)?;
        expect_char(bytes, &mut pos, b':')?;
        let second = parse_two_digits(bytes, &mut pos)?;

        let nanos = if pos < bytes.len() && bytes[pos] == b'.' {
            pos += 1;
            parse_fraction_nanos(bytes, &mut pos)
        } else {
            0
        };

        let offset_seconds = if pos < bytes.len() {
            parse_timezone(bytes, &mut pos)?
        } else {
            0
        };

        if pos != bytes.len() {
            return Err(Error::invalid_argument("text", "unexpected trailing characters in timestamp"));
        }

        let naive_time = chrono::NaiveTime::from_hms_nano_opt(hour, minute, second, 0)
            .ok_or_else(|| Error::invalid_argument("text", "invalid time of day"))?;
        let naive = date.and_time(naive_time);
        let dt = Utc.from_utc_datetime(&naive) - chrono::Duration::seconds(offset_seconds)
            + chrono::Duration::nanoseconds(nanos);

        Ok(Self::from_chrono(dt))
    }

    fn from_chrono(dt: DateTime<Utc>) -> Self {
        let nanos = dt.timestamp_nanos_opt().unwrap_or_else(|| dt.timestamp() * 1_000_000_000);
        Self { nanos_since_epoch: nanos }
    }

    fn to_chrono(self) -> DateTime<Utc> {
        let secs = self.nanos_since_epoch.div_euclid(1_000_000_000);
        let nanos = self.nanos_since_epoch.rem_euclid(1_000_000_000) as u32;
        Utc.timestamp_opt(secs, nanos).single().expect("nanos is always within a valid second")
    }

    /// Formats as `YYYY-MM-DDTHH:MM:SS[.ffffff]Z`, truncating to microsecond precision and
    /// stripping trailing zero groups from the fraction (omitted entirely if zero).
    #[must_use]
    pub fn format(&self) -> String {
        let dt = self.to_chrono();
        let micros = dt.nanosecond() / 1_000;
        let mut out = format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second()
        );
        if micros > 0 {
            let mut frac = format!("{micros:06}");
            while frac.ends_with('0') {
                frac.pop();
            }
            out.push('.');
            out.push_str(&frac);
        }
        out.push('Z');
        out
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

fn parse_date(bytes: &[u8], pos: &mut usize) -> Result<(i32, u32, u32), Error> {
    let year = parse_n_digits(bytes, pos, 4)? as i32;
    expect_char(bytes, pos, b'-')?;
    let month = parse_two_digits(bytes, pos)?;
    expect_char(bytes, pos, b'-')?;
    let day = parse_two_digits(bytes, pos)?;
    Ok((year, month, day))
}

fn parse_n_digits(bytes: &[u8], pos: &mut usize, n: usize) -> Result<u32, Error> {
    if *pos + n > bytes.len() {
        return Err(Error::invalid_argument("text", "unexpected end of timestamp"));
    }
    let mut value = 0u32;
    for _ in 0..n {
        let b = bytes[*pos];
        if !b.is_ascii_digit() {
            return Err(Error::invalid_argument("text", "expected digit in timestamp"));
        }
        value = value * 10 + u32::from(b - b'0');
        *pos += 1;
    }
    Ok(value)
}

fn parse_two_digits(bytes: &[u8], pos: &mut usize) -> Result<u32, Error> {
    parse_n_digits(bytes, pos, 2)
}

fn expect_char(bytes: &[u8], pos: &mut usize, expected: u8) -> Result<(), Error> {
    if *pos >= bytes.len() || bytes[*pos] != expected {
        return Err(Error::invalid_argument(
            "text",
            format!("expected '{}' in timestamp", expected as char),
        ));
    }
    *pos += 1;
    Ok(())
}

/// Parses up to nine fractional-second digits into nanoseconds, consuming (but discarding) any
/// further digits so trailing-precision timestamps don't error out.
fn parse_fraction_nanos(bytes: &[u8], pos: &mut usize) -> i64 {
    let mut nanos: i64 = 0;
    let mut digits = 0;
    while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
        if digits < 9 {
            nanos = nanos * 10 + i64::from(bytes[*pos] - b'0');
            digits += 1;
        }
        *pos += 1;
    }
    for _ in digits..9 {
        nanos *= 10;
    }
    nanos
}

fn parse_timezone(bytes: &[u8], pos: &mut usize) -> Result<i64, Error> {
    match bytes[*pos] {
        b'Z' | b'z' => {
            *pos += 1;
            Ok(0)
        }
        sign @ (b'+' | b'-') => {
            *pos += 1;
            let hours = parse_two_digits(bytes, pos)? as i64;
            if *pos < bytes.len() && bytes[*pos] == b':' {
                *pos += 1;
            }
            let minutes = parse_two_digits(bytes, pos)? as i64;
            let total = hours * 3600 + minutes * 60;
            Ok(if sign == b'-' { -total } else { total })
        }
        _ => Err(Error::invalid_argument("text", "expected timezone designator")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_date_only_as_midnight() {
        let ts = Timestamp::parse("2024-05-01").unwrap();
        assert_eq!(ts.format(), "2024-05-01T00:00:00Z");
    }

    #[test]
    fn parses_full_datetime_with_fraction_and_z() {
        let ts = Timestamp::parse("2024-05-01T15:55:30.123456Z").unwrap();
        assert_eq!(ts.format(), "2024-05-01T15:55:30.123456Z");
    }

    #[test]
    fn strips_trailing_zero_fraction_groups() {
        let ts = Timestamp::parse("2024-05-01T15:55:30.120000Z").unwrap();
        assert_eq!(ts.format(), "2024-05-01T15:55:30.12Z");
    }

    #[test]
    fn omits_fraction_entirely_when_zero() {
        let ts = Timestamp::parse("2024-05-01T15:55:30.000000Z").unwrap();
        assert_eq!(ts.format(), "2024-05-01T15:55:30Z");
    }

    #[test]
    fn applies_offset_timezone() {
        let utc = Timestamp::parse("2024-05-01T12:00:00Z").unwrap();
        let offset = Timestamp::parse("2024-05-01T08:00:00-04:00").unwrap();
        assert_eq!(utc, offset);
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(Timestamp::parse("2024-05-01T12:00:00Zgarbage").is_err());
    }

    #[test]
    fn truncates_sub_microsecond_fraction_beyond_nine_digits() {
        let ts = Timestamp::parse("2024-05-01T12:00:00.1234567891Z").unwrap();
        // nanosecond precision keeps only the first 9 digits: 123456789ns -> 123456us (truncated)
        assert_eq!(ts.format(), "2024-05-01T12:00:00.123456Z");
    }
}
