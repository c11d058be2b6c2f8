// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! Signed 64-bit fixed-point money at 10^-6 precision (micro-units).

use std::{fmt, str::FromStr};

use crate::error::Error;

const SCALE: i64 = 1_000_000;

/// Signed fixed-point money, stored as whole micro-units (`1 / 1_000_000` of the major unit).
///
/// Constructible from an `(integer, fractional)` pair, from a finite `f64` by
/// round-half-away-from-zero scaling, or by parsing a decimal string. Arithmetic is checked only
/// at construction; `+`, `-`, and scalar `*` on already-valid values cannot themselves overflow
/// within the domain this type is used for and mirror the raw-integer semantics of the original.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money {
    micro_units: i64,
}

impl Money {
    /// Micro-units per major unit (10^6).
    pub const SCALE: i64 = SCALE;

    /// Wraps a raw micro-unit value directly, with no range checks (none are needed: any `i64`
    /// is a valid micro-unit count).
    #[must_use]
    pub fn from_raw(micro_units: i64) -> Self {
        Self { micro_units }
    }

    /// Builds from an integer major-unit part and a fractional micro-unit part. `fractional`
    /// must satisfy `|fractional| < SCALE`.
    pub fn new(dollars: i64, fractional: i64) -> Result<Self, Error> {
        if fractional.abs() >= SCALE {
            return Err(Error::invalid_argument("fractional", "fractional component out of range"));
        }
        let micro_units = dollars
            .checked_mul(SCALE)
            .and_then(|d| d.checked_add(fractional))
            .ok_or_else(|| Error::invalid_argument("dollars", "value exceeds representable range"))?;
        Ok(Self { micro_units })
    }

    /// Builds from a finite `f64` via round-half-away-from-zero scaling. Rejects non-finite
    /// inputs and magnitudes that would overflow `i64` micro-units.
    pub fn from_f64(value: f64) -> Result<Self, Error> {
        if !value.is_finite() {
            return Err(Error::invalid_argument("value", "Money cannot be constructed from a non-finite f64"));
        }

        let scaled = value * SCALE as f64;
        let max_micro = i64::MAX as f64;
        let min_micro = i64::MIN as f64;
        if scaled >= max_micro + 0.5 || scaled <= min_micro - 0.5 {
            return Err(Error::invalid_argument("value", "Money f64 value exceeds representable range"));
        }

        let rounded = if scaled >= 0.0 {
            (scaled + 0.5).floor()
        } else {
            (scaled - 0.5).ceil()
        };
        Ok(Self { micro_units: rounded as i64 })
    }

    /// The raw micro-unit value.
    #[must_use]
    pub fn raw(&self) -> i64 {
        self.micro_units
    }

    /// The value as a floating-point major-unit amount.
    #[must_use]
    pub fn to_f64(&self) -> f64 {
        self.micro_units as f64 / SCALE as f64
    }

    /// Renders with at least `min_fractional_digits` fractional digits (minimum 2).
    #[must_use]
    pub fn to_string_with(&self, min_fractional_digits: usize) -> String {
        let digits = min_fractional_digits.max(2);
        format!("{:.*}", digits, self.to_f64())
    }

    /// Parses `[±]digits[.digits{1..6}]`, trimming surrounding whitespace.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_argument("text", "Money text must not be empty"));
        }

        let bytes = trimmed.as_bytes();
        let mut index = 0usize;
        let negative = match bytes[0] {
            b'+' => {
                index += 1;
                false
            }
            b'-' => {
                index += 1;
                true
            }
            _ => false,
        };

        let max_positive: u64 = i64::MAX as u64;
        let max_negative: u64 = max_positive + 1;
        let max_micro_units = if negative { max_negative } else { max_positive };
        let max_integer_part = max_micro_units / SCALE as u64;

        let mut integer_part: u64 = 0;
        let mut saw_integer_digit = false;
        while index < bytes.len() && bytes[index].is_ascii_digit() {
            saw_integer_digit = true;
            integer_part = integer_part * 10 + u64::from(bytes[index] - b'0');
            if integer_part > max_integer_part {
                return Err(Error::invalid_argument("text", "Money integer component exceeds representable range"));
            }
            index += 1;
        }

        let mut fractional_part: u64 = 0;
        let mut scale = (SCALE / 10) as u64;
        let mut saw_fractional_digit = false;
        if index < bytes.len() && bytes[index] == b'.' {
            index += 1;
            while index < bytes.len() && bytes[index].is_ascii_digit() && scale > 0 {
                saw_fractional_digit = true;
                fractional_part += u64::from(bytes[index] - b'0') * scale;
                scale /= 10;
                index += 1;
            }
            if !saw_fractional_digit {
                return Err(Error::invalid_argument("text", "Money fractional component missing digits"));
            }
            if scale == 0 && index < bytes.len() && bytes[index].is_ascii_digit() {
                return Err(Error::invalid_argument("text", "Money supports up to six fractional digits"));
            }
        }

        if !saw_integer_digit && !saw_fractional_digit {
            return Err(Error::invalid_argument("text", "Money text must contain digits"));
        }

        let magnitude_integer = integer_part * SCALE as u64;
        let fractional_limit = max_micro_units - magnitude_integer;
        if fractional_part > fractional_limit {
            return Err(Error::invalid_argument("text", "Money fractional component exceeds representable range"));
        }
        let magnitude = magnitude_integer + fractional_part;

        if index != bytes.len() {
            return Err(Error::invalid_argument("text", "unexpected trailing characters in Money text"));
        }

        let micro_units = if negative {
            if magnitude == max_negative {
                i64::MIN
            } else {
                -(magnitude as i64)
            }
        } else {
            magnitude as i64
        };

        Ok(Self { micro_units })
    }
}

impl FromStr for Money {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_with(2))
    }
}

impl std::ops::Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money { micro_units: self.micro_units + rhs.micro_units }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money { micro_units: self.micro_units - rhs.micro_units }
    }
}

impl std::ops::Mul<i64> for Money {
    type Output = Money;
    fn mul(self, factor: i64) -> Money {
        Money { micro_units: self.micro_units * factor }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_out_of_range_fractional() {
        assert!(Money::new(1, SCALE).is_err());
        assert!(Money::new(1, -SCALE).is_err());
    }

    #[test]
    fn from_f64_rounds_half_away_from_zero() {
        assert_eq!(Money::from_f64(1.0000005).unwrap().raw(), 1_000_001);
        assert_eq!(Money::from_f64(-1.0000005).unwrap().raw(), -1_000_001);
    }

    #[test]
    fn from_f64_rejects_non_finite() {
        assert!(Money::from_f64(f64::NAN).is_err());
        assert!(Money::from_f64(f64::INFINITY).is_err());
    }

    #[test]
    fn parse_accepts_sign_and_fraction() {
        assert_eq!(Money::parse("125.50").unwrap().raw(), 125_500_000);
        assert_eq!(Money::parse("-0.000001").unwrap().raw(), -1);
        assert_eq!(Money::parse("  42  ").unwrap().raw(), 42_000_000);
    }

    #[test]
    fn parse_rejects_empty_and_garbage() {
        assert!(Money::parse("").is_err());
        assert!(Money::parse("   ").is_err());
        assert!(Money::parse("12.3abc").is_err());
        assert!(Money::parse("12.1234567").is_err());
        assert!(Money::parse(".").is_err());
    }

    #[test]
    fn display_pads_to_two_fractional_digits() {
        assert_eq!(Money::new(5, 0).unwrap().to_string(), "5.00");
        assert_eq!(Money::new(5, 100_000).unwrap().to_string(), "5.10");
    }

    #[test]
    fn parse_then_format_then_parse_round_trips() {
        for text in ["0.00", "1.50", "-1.50", "1000000.123456"] {
            let parsed = Money::parse(text).unwrap();
            let formatted = parsed.to_string_with(6);
            let reparsed = Money::parse(&formatted).unwrap();
            assert_eq!(parsed, reparsed);
        }
    }
}
