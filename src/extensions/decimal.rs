//! Fixed-point decimal values with four fractional digits.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use super::ExtensionParseError;

/// Number of digits kept after the decimal point.
pub const NUM_DIGITS: u32 = 4;

const SCALE: i64 = 10_i64.pow(NUM_DIGITS);

static DECIMAL_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?[0-9]+)\.([0-9]+)$").expect("decimal literal regex"));

/// A decimal number stored as an integer scaled by `10^4`.
///
/// Comparisons are exact: they operate on the scaled integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Decimal {
    value: i64,
}

impl Decimal {
    /// Build directly from the scaled representation.
    pub fn from_scaled(value: i64) -> Self {
        Self { value }
    }

    /// The value multiplied by `10^4`.
    pub fn scaled(&self) -> i64 {
        self.value
    }
}

impl FromStr for Decimal {
    type Err = ExtensionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = DECIMAL_LITERAL
            .captures(s)
            .ok_or_else(|| ExtensionParseError::DecimalFormat(s.to_string()))?;
        let (whole, fraction) = (&caps[1], &caps[2]);

        if fraction.len() > NUM_DIGITS as usize {
            return Err(ExtensionParseError::DecimalTooManyDigits(s.to_string()));
        }

        let overflow = || ExtensionParseError::DecimalOverflow(s.to_string());

        // The regex only lets digits through, so a parse failure is an overflow.
        let whole_value: i64 = whole.parse().map_err(|_| overflow())?;
        let scaled_whole = whole_value.checked_mul(SCALE).ok_or_else(overflow)?;

        let padding = NUM_DIGITS - fraction.len() as u32;
        let fraction_value: i64 = fraction.parse().map_err(|_| overflow())?;
        let scaled_fraction = fraction_value * 10_i64.pow(padding);

        let value = if whole.starts_with('-') {
            scaled_whole.checked_sub(scaled_fraction)
        } else {
            scaled_whole.checked_add(scaled_fraction)
        }
        .ok_or_else(overflow)?;

        Ok(Self { value })
    }
}

impl Display for Decimal {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let whole = self.value / SCALE;
        let fraction = (self.value % SCALE).unsigned_abs();
        let sign = if self.value < 0 && whole == 0 { "-" } else { "" };

        let digits = format!("{fraction:0width$}", width = NUM_DIGITS as usize);
        let trimmed = digits.trim_end_matches('0');
        let trimmed = if trimmed.is_empty() { "0" } else { trimmed };

        write!(f, "{sign}{whole}.{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        simple = { "1.23", 12300 },
        four_digits = { "0.0001", 1 },
        negative = { "-1.5", -15000 },
        negative_below_one = { "-0.5", -5000 },
        zero = { "0.0", 0 },
        max = { "922337203685477.5807", i64::MAX },
        min = { "-922337203685477.5808", i64::MIN },
    )]
    fn test_parse_valid(input: &str, scaled: i64) {
        let decimal: Decimal = input.parse().unwrap();
        assert_eq!(decimal.scaled(), scaled);
    }

    #[parameterized(
        five_digits = { "0.00001" },
        no_dot = { "12" },
        no_fraction = { "1." },
        no_whole = { ".5" },
        letters = { "1.2a" },
        empty = { "" },
        plus_sign = { "+1.0" },
    )]
    fn test_parse_invalid(input: &str) {
        assert!(input.parse::<Decimal>().is_err());
    }

    #[test]
    fn test_too_many_digits_error_kind() {
        let err = "0.00001".parse::<Decimal>().unwrap_err();
        assert!(matches!(err, ExtensionParseError::DecimalTooManyDigits(_)));
    }

    #[test]
    fn test_overflow_error_kind() {
        let err = "922337203685477.5808".parse::<Decimal>().unwrap_err();
        assert!(matches!(err, ExtensionParseError::DecimalOverflow(_)));
        let err = "99999999999999999999.0".parse::<Decimal>().unwrap_err();
        assert!(matches!(err, ExtensionParseError::DecimalOverflow(_)));
    }

    #[test]
    fn test_comparison_is_exact() {
        let small: Decimal = "0.0001".parse().unwrap();
        let large: Decimal = "0.9".parse().unwrap();
        assert!(small < large);

        let a: Decimal = "1.1".parse().unwrap();
        let b: Decimal = "1.1000".parse().unwrap();
        assert_eq!(a, b);
    }

    #[parameterized(
        trailing_zeros = { "1.2300", "1.23" },
        integral = { "7.0", "7.0" },
        negative_fraction = { "-0.25", "-0.25" },
        negative = { "-12.5", "-12.5" },
    )]
    fn test_display(input: &str, expected: &str) {
        let decimal: Decimal = input.parse().unwrap();
        assert_eq!(decimal.to_string(), expected);
    }
}
