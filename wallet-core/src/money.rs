//! Fixed-scale decimal money type
//!
//! All amounts in the ledger are `Money`: an exact decimal with at most
//! two fractional digits. Construction that would lose precision fails
//! instead of rounding, and there is no infallible path from binary
//! floats.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Neg;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Exact monetary amount with two fractional digits.
///
/// Comparison is exact (no epsilon tolerance). The value may be negative:
/// transaction rows store signed amounts (positive = credit, negative =
/// debit); operation entry points validate sign separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(Decimal);

impl Money {
    /// Fractional digits carried by every persisted amount.
    pub const SCALE: u32 = 2;

    /// Zero amount.
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Build from an integer count of minor units (cents).
    pub fn from_minor_units(units: i64) -> Self {
        Money(Decimal::new(units, Self::SCALE))
    }

    /// Checked addition; fails with [`Error::BalanceOverflow`] instead of
    /// wrapping or panicking.
    pub fn checked_add(self, rhs: Money) -> Result<Money> {
        self.0
            .checked_add(rhs.0)
            .map(Money)
            .ok_or(Error::BalanceOverflow)
    }

    /// Checked subtraction; fails with [`Error::BalanceOverflow`] on
    /// out-of-range results.
    pub fn checked_sub(self, rhs: Money) -> Result<Money> {
        self.0
            .checked_sub(rhs.0)
            .map(Money)
            .ok_or(Error::BalanceOverflow)
    }

    /// `true` for amounts strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// `true` for amounts strictly less than zero.
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// `true` for exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Money {
    type Err = Error;

    /// Strict decimal-string parse.
    ///
    /// Rejects the formats a lenient parser would coerce: empty input,
    /// `.5` / `5.`, scientific notation, a `+` prefix, and anything with
    /// more than two fractional digits. `10.555` is an error, not
    /// `10.56`.
    fn from_str(s: &str) -> Result<Money> {
        if s.is_empty() {
            return Err(Error::InvalidAmount("amount is empty".to_string()));
        }
        let digits = s.strip_prefix('-').unwrap_or(s);
        if digits.starts_with('.') || digits.ends_with('.') {
            return Err(Error::InvalidAmount(format!(
                "malformed decimal string: {s}"
            )));
        }
        if s.contains('e') || s.contains('E') {
            return Err(Error::InvalidAmount(format!(
                "scientific notation is not accepted: {s}"
            )));
        }
        if s.starts_with('+') {
            return Err(Error::InvalidAmount(format!(
                "explicit plus sign is not accepted: {s}"
            )));
        }

        let value = Decimal::from_str(s)
            .map_err(|e| Error::InvalidAmount(format!("unparsable amount {s}: {e}")))?;

        Money::try_from(value)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = Error;

    /// Accepts only values already representable at two fractional
    /// digits.
    fn try_from(value: Decimal) -> Result<Money> {
        if value.normalize().scale() > Money::SCALE {
            return Err(Error::InvalidAmount(format!(
                "{value} carries more than {} fractional digits",
                Money::SCALE
            )));
        }
        let mut canonical = value;
        canonical.rescale(Money::SCALE);
        Ok(Money(canonical))
    }
}

impl TryFrom<f64> for Money {
    type Error = Error;

    /// Lossless-only float conversion.
    ///
    /// The full binary expansion of the float is inspected: `0.25_f64`
    /// converts, `0.1_f64` (which has no exact base-2 representation at
    /// scale 2) is rejected rather than silently rounded.
    fn try_from(value: f64) -> Result<Money> {
        let exact = Decimal::from_f64_retain(value).ok_or_else(|| {
            Error::InvalidAmount(format!("{value} is not a finite representable amount"))
        })?;
        Money::try_from(exact)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Fixed-2-decimal string, never a binary float.
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Money, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as _;
        let s = String::deserialize(deserializer)?;
        Money::from_str(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_renders_fixed_two_decimals() {
        let m = Money::from_str("100").unwrap();
        assert_eq!(m.to_string(), "100.00");

        let m = Money::from_str("10.5").unwrap();
        assert_eq!(m.to_string(), "10.50");

        let m = Money::from_str("-3.25").unwrap();
        assert!(m.is_negative());
        assert_eq!(m.to_string(), "-3.25");
    }

    #[test]
    fn rejects_excess_scale_instead_of_rounding() {
        assert!(Money::from_str("10.555").is_err());
        assert!(Money::from_str("0.001").is_err());
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(Money::from_str("").is_err());
        assert!(Money::from_str(".5").is_err());
        assert!(Money::from_str("5.").is_err());
        assert!(Money::from_str("1.5e3").is_err());
        assert!(Money::from_str("+5").is_err());
        assert!(Money::from_str("abc").is_err());
    }

    #[test]
    fn minor_units_round_trip() {
        let m = Money::from_minor_units(12345);
        assert_eq!(m.to_string(), "123.45");
        assert_eq!(m, Money::from_str("123.45").unwrap());
    }

    #[test]
    fn exact_float_converts_inexact_float_fails() {
        assert_eq!(Money::try_from(0.25_f64).unwrap().to_string(), "0.25");
        assert!(Money::try_from(0.1_f64).is_err());
        assert!(Money::try_from(f64::NAN).is_err());
    }

    #[test]
    fn arithmetic_is_exact() {
        let a = Money::from_str("0.10").unwrap();
        let b = Money::from_str("0.20").unwrap();
        let sum = a.checked_add(b).unwrap();
        assert_eq!(sum, Money::from_str("0.30").unwrap());

        let diff = sum.checked_sub(a).unwrap();
        assert_eq!(diff, b);
    }

    #[test]
    fn addition_overflow_is_an_error() {
        let max = Money(Decimal::MAX);
        assert!(max.checked_add(Money::from_minor_units(1)).is_err());
    }

    #[test]
    fn comparison_is_exact() {
        let a = Money::from_str("1.00").unwrap();
        let b = Money::from_str("1").unwrap();
        assert_eq!(a, b);
        assert!(Money::from_str("1.01").unwrap() > a);
    }

    #[test]
    fn serde_uses_fixed_decimal_strings() {
        let m = Money::from_str("42.50").unwrap();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#""42.50""#);

        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);

        let lossy: std::result::Result<Money, _> = serde_json::from_str(r#""42.505""#);
        assert!(lossy.is_err());
    }
}
