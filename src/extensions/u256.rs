//! 256-bit unsigned integers.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::ExtensionParseError;

const LIMBS: usize = 4;

/// An unsigned integer in `[0, 2^256 - 1]`.
///
/// Limbs are stored most significant first, so the derived ordering is the
/// numeric ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct U256 {
    limbs: [u64; LIMBS],
}

impl U256 {
    pub const ZERO: U256 = U256 { limbs: [0; LIMBS] };
    pub const MAX: U256 = U256 {
        limbs: [u64::MAX; LIMBS],
    };

    pub fn is_zero(&self) -> bool {
        self.limbs.iter().all(|limb| *limb == 0)
    }

    /// `self * 10 + digit`, or `None` when the result leaves the range.
    fn mul10_add(&self, digit: u64) -> Option<Self> {
        let mut limbs = [0u64; LIMBS];
        let mut carry = u128::from(digit);
        for i in (0..LIMBS).rev() {
            let wide = u128::from(self.limbs[i]) * 10 + carry;
            limbs[i] = wide as u64;
            carry = wide >> 64;
        }
        (carry == 0).then_some(Self { limbs })
    }

    /// Divide by a small divisor, returning quotient and remainder.
    fn div_rem_small(&self, divisor: u64) -> (Self, u64) {
        let mut limbs = [0u64; LIMBS];
        let mut rem: u128 = 0;
        for (i, limb) in self.limbs.iter().enumerate() {
            let wide = (rem << 64) | u128::from(*limb);
            limbs[i] = (wide / u128::from(divisor)) as u64;
            rem = wide % u128::from(divisor);
        }
        (Self { limbs }, rem as u64)
    }
}

impl From<u64> for U256 {
    fn from(value: u64) -> Self {
        Self {
            limbs: [0, 0, 0, value],
        }
    }
}

impl FromStr for U256 {
    type Err = ExtensionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ExtensionParseError::U256Empty);
        }

        s.chars().try_fold(Self::ZERO, |acc, c| {
            let digit = c
                .to_digit(10)
                .ok_or_else(|| ExtensionParseError::U256Format(s.to_string()))?;
            acc.mul10_add(u64::from(digit))
                .ok_or_else(|| ExtensionParseError::U256Overflow(s.to_string()))
        })
    }
}

impl Display for U256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.is_zero() {
            return write!(f, "0");
        }

        let mut digits = Vec::new();
        let mut current = *self;
        while !current.is_zero() {
            let (quotient, rem) = current.div_rem_small(10);
            digits.push(char::from(b'0' + rem as u8));
            current = quotient;
        }
        let text: String = digits.iter().rev().collect();
        write!(f, "{text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    const MAX_TEXT: &str =
        "115792089237316195423570985008687907853269984665640564039457584007913129639935";
    const OVERFLOW_TEXT: &str =
        "115792089237316195423570985008687907853269984665640564039457584007913129639936";

    #[test]
    fn test_boundaries() {
        assert_eq!("0".parse::<U256>().unwrap(), U256::ZERO);
        assert_eq!(MAX_TEXT.parse::<U256>().unwrap(), U256::MAX);
    }

    #[test]
    fn test_rejects_two_pow_256() {
        let err = OVERFLOW_TEXT.parse::<U256>().unwrap_err();
        assert!(matches!(err, ExtensionParseError::U256Overflow(_)));
    }

    #[parameterized(
        empty = { "" },
        negative = { "-1" },
        decimal_point = { "1.0" },
        hex = { "0x10" },
        whitespace = { " 12" },
    )]
    fn test_rejects_malformed(input: &str) {
        assert!(input.parse::<U256>().is_err());
    }

    #[test]
    fn test_ordering_is_numeric() {
        let big: U256 = "100000000000000".parse().unwrap();
        let small: U256 = "2345".parse().unwrap();
        assert!(big > small);

        let above_u64: U256 = "18446744073709551616".parse().unwrap();
        assert!(above_u64 > U256::from(u64::MAX));
    }

    #[test]
    fn test_leading_zeros_are_accepted() {
        let value: U256 = "000042".parse().unwrap();
        assert_eq!(value, U256::from(42));
    }

    #[parameterized(
        zero = { "0" },
        small = { "2345" },
        above_u64 = { "18446744073709551616" },
        max = { MAX_TEXT },
    )]
    fn test_display(input: &str) {
        assert_eq!(input.parse::<U256>().unwrap().to_string(), input);
    }
}
