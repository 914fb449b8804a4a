//! Fixed-point decimal with 18 digits of precision
//!
//! `Dec` stores `value * 10^18` in an arbitrary precision integer so that
//! share and exchange-rate arithmetic never overflows. Every division or
//! multiplication that drops precision comes in three flavours:
//!
//! - default: round half to even (banker's rounding)
//! - `_truncate`: round toward zero
//! - `_round_up`: round away from zero
//!
//! The engine picks the flavour per call site; mixing them up changes who
//! absorbs rounding dust, so the choice is part of the ledger semantics.

use num_bigint::{BigInt, Sign};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

/// Number of decimal places
pub const PRECISION: u32 = 18;

fn precision_multiplier() -> BigInt {
    BigInt::from(10u8).pow(PRECISION)
}

fn half_precision() -> BigInt {
    BigInt::from(5u8) * BigInt::from(10u8).pow(PRECISION - 1)
}

/// Removes 18 digits of precision, rounding half to even
fn chop_precision_and_round(value: BigInt) -> BigInt {
    if value.sign() == Sign::Minus {
        return -chop_precision_and_round(-value);
    }

    let precision = precision_multiplier();
    let quo = &value / &precision;
    let rem = &value % &precision;
    let half = half_precision();

    if rem.sign() == Sign::NoSign || rem < half {
        quo
    } else if rem > half {
        quo + 1u32
    } else if (&quo % 2u32).sign() == Sign::NoSign {
        quo
    } else {
        quo + 1u32
    }
}

fn chop_precision_and_round_up(value: BigInt) -> BigInt {
    if value.sign() == Sign::Minus {
        return -chop_precision_and_round_up(-value);
    }

    let precision = precision_multiplier();
    let quo = &value / &precision;
    let rem = &value % &precision;
    if rem.sign() == Sign::NoSign {
        quo
    } else {
        quo + 1u32
    }
}

fn chop_precision_and_truncate(value: BigInt) -> BigInt {
    value / precision_multiplier()
}

/// Signed fixed-point decimal
///
/// Serialized as its decimal string so config files and stored state share
/// one representation.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dec(BigInt);

impl Dec {
    pub fn zero() -> Self {
        Self(BigInt::default())
    }

    pub fn one() -> Self {
        Self(precision_multiplier())
    }

    /// Whole number
    pub fn from_int(value: u128) -> Self {
        Self(BigInt::from(value) * precision_multiplier())
    }

    /// `numerator / denominator`, rounded half to even
    ///
    /// Returns `None` when the denominator is zero.
    pub fn from_ratio(numerator: u128, denominator: u128) -> Option<Self> {
        if denominator == 0 {
            return None;
        }
        Some(Self::from_int(numerator).quo(&Self::from_int(denominator)))
    }

    /// Decimal from a value expressed with `prec` decimal places, e.g.
    /// `with_prec(5, 1) == 0.5`
    pub fn with_prec(value: i128, prec: u32) -> Self {
        assert!(prec <= PRECISION, "precision {} exceeds {}", prec, PRECISION);
        Self(BigInt::from(value) * BigInt::from(10u8).pow(PRECISION - prec))
    }

    pub fn percent(value: u64) -> Self {
        Self::with_prec(value as i128, 2)
    }

    pub fn is_zero(&self) -> bool {
        self.0.sign() == Sign::NoSign
    }

    pub fn is_negative(&self) -> bool {
        self.0.sign() == Sign::Minus
    }

    pub fn is_positive(&self) -> bool {
        self.0.sign() == Sign::Plus
    }

    /// Multiplication, rounded half to even
    pub fn mul(&self, other: &Dec) -> Dec {
        Dec(chop_precision_and_round(&self.0 * &other.0))
    }

    /// Multiplication, truncated
    pub fn mul_truncate(&self, other: &Dec) -> Dec {
        Dec(chop_precision_and_truncate(&self.0 * &other.0))
    }

    /// Multiplication, rounded away from zero
    pub fn mul_round_up(&self, other: &Dec) -> Dec {
        Dec(chop_precision_and_round_up(&self.0 * &other.0))
    }

    /// Exact multiplication by an integer
    pub fn mul_int(&self, value: u128) -> Dec {
        Dec(&self.0 * BigInt::from(value))
    }

    /// Division, rounded half to even
    ///
    /// Panics on a zero divisor; callers check for zero first.
    pub fn quo(&self, other: &Dec) -> Dec {
        assert!(!other.is_zero(), "decimal division by zero");
        let precision = precision_multiplier();
        let scaled = &self.0 * &precision * &precision;
        Dec(chop_precision_and_round(scaled / &other.0))
    }

    /// Division, truncated
    pub fn quo_truncate(&self, other: &Dec) -> Dec {
        assert!(!other.is_zero(), "decimal division by zero");
        Dec(&self.0 * precision_multiplier() / &other.0)
    }

    /// Division, rounded away from zero
    pub fn quo_round_up(&self, other: &Dec) -> Dec {
        assert!(!other.is_zero(), "decimal division by zero");
        let scaled = &self.0 * precision_multiplier();
        let quo = &scaled / &other.0;
        let rem = &scaled % &other.0;
        if rem.sign() == Sign::NoSign {
            return Dec(quo);
        }
        if (scaled.sign() == Sign::Minus) == (other.0.sign() == Sign::Minus) {
            Dec(quo + 1u32)
        } else {
            Dec(quo - 1u32)
        }
    }

    /// Division by an integer, truncated
    pub fn quo_int(&self, value: u128) -> Dec {
        assert!(value != 0, "decimal division by zero");
        Dec(&self.0 / BigInt::from(value))
    }

    /// Integer part, rounded toward zero. Negative values truncate to zero,
    /// values beyond `u128::MAX` saturate.
    pub fn truncate_int(&self) -> u128 {
        if self.is_negative() {
            return 0;
        }
        let int = chop_precision_and_truncate(self.0.clone());
        u128::try_from(&int).unwrap_or(u128::MAX)
    }

    /// Integer part, rounded half to even
    pub fn round_int(&self) -> u128 {
        if self.is_negative() {
            return 0;
        }
        let int = chop_precision_and_round(self.0.clone());
        u128::try_from(&int).unwrap_or(u128::MAX)
    }

    /// Integer part, rounded up
    pub fn ceil_int(&self) -> u128 {
        if self.is_negative() {
            return 0;
        }
        let int = chop_precision_and_round_up(self.0.clone());
        u128::try_from(&int).unwrap_or(u128::MAX)
    }

    /// Truncated to a whole number, kept as a decimal
    pub fn truncate_dec(&self) -> Dec {
        Dec(chop_precision_and_truncate(self.0.clone()) * precision_multiplier())
    }

    pub fn abs(&self) -> Dec {
        if self.is_negative() {
            -self.clone()
        } else {
            self.clone()
        }
    }
}

impl From<u128> for Dec {
    fn from(value: u128) -> Self {
        Dec::from_int(value)
    }
}

impl Add for Dec {
    type Output = Dec;

    fn add(self, rhs: Dec) -> Dec {
        Dec(self.0 + rhs.0)
    }
}

impl<'a> Add<&'a Dec> for &'a Dec {
    type Output = Dec;

    fn add(self, rhs: &Dec) -> Dec {
        Dec(&self.0 + &rhs.0)
    }
}

impl AddAssign<&Dec> for Dec {
    fn add_assign(&mut self, rhs: &Dec) {
        self.0 += &rhs.0;
    }
}

impl Sub for Dec {
    type Output = Dec;

    fn sub(self, rhs: Dec) -> Dec {
        Dec(self.0 - rhs.0)
    }
}

impl<'a> Sub<&'a Dec> for &'a Dec {
    type Output = Dec;

    fn sub(self, rhs: &Dec) -> Dec {
        Dec(&self.0 - &rhs.0)
    }
}

impl SubAssign<&Dec> for Dec {
    fn sub_assign(&mut self, rhs: &Dec) {
        self.0 -= &rhs.0;
    }
}

impl Neg for Dec {
    type Output = Dec;

    fn neg(self) -> Dec {
        Dec(-self.0)
    }
}

impl fmt::Display for Dec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = precision_multiplier();
        let magnitude = BigInt::from_biguint(Sign::Plus, self.0.magnitude().clone());
        let int = &magnitude / &precision;
        let frac = &magnitude % &precision;
        let sign = if self.is_negative() { "-" } else { "" };
        write!(
            f,
            "{}{}.{:0>width$}",
            sign,
            int,
            frac.to_string(),
            width = PRECISION as usize
        )
    }
}

impl Serialize for Dec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Dec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseDecError {
    #[error("empty decimal string")]
    Empty,

    #[error("invalid decimal string: {0}")]
    Invalid(String),

    #[error("too many decimal places in {0}: max {PRECISION}")]
    TooPrecise(String),
}

impl FromStr for Dec {
    type Err = ParseDecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseDecError::Empty);
        }

        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (int_part, frac_part) = match body.split_once('.') {
            Some((int, frac)) => (int, frac),
            None => (body, ""),
        };

        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if int_part.is_empty() || !all_digits(int_part) || !all_digits(frac_part) {
            return Err(ParseDecError::Invalid(s.to_string()));
        }
        if body.contains('.') && frac_part.is_empty() {
            return Err(ParseDecError::Invalid(s.to_string()));
        }
        if frac_part.len() > PRECISION as usize {
            return Err(ParseDecError::TooPrecise(s.to_string()));
        }

        let combined = format!(
            "{}{:0<width$}",
            int_part,
            frac_part,
            width = PRECISION as usize
        );
        let value: BigInt = combined
            .parse()
            .map_err(|_| ParseDecError::Invalid(s.to_string()))?;

        Ok(Dec(if negative { -value } else { value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dec(s: &str) -> Dec {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(dec("1.5").to_string(), "1.500000000000000000");
        assert_eq!(dec("-0.25").to_string(), "-0.250000000000000000");
        assert_eq!(dec("7"), Dec::from_int(7));
        assert!("1.".parse::<Dec>().is_err());
        assert!("abc".parse::<Dec>().is_err());
        assert!("0.0000000000000000001".parse::<Dec>().is_err());
    }

    #[test]
    fn test_rounding_flavours() {
        let third = Dec::one().quo(&Dec::from_int(3));
        assert_eq!(third.to_string(), "0.333333333333333333");

        let two_thirds = Dec::from_int(2).quo(&Dec::from_int(3));
        assert_eq!(two_thirds.to_string(), "0.666666666666666667");
        assert_eq!(
            Dec::from_int(2).quo_truncate(&Dec::from_int(3)).to_string(),
            "0.666666666666666666"
        );
        assert_eq!(
            Dec::one().quo_round_up(&Dec::from_int(3)).to_string(),
            "0.333333333333333334"
        );
    }

    #[test]
    fn test_banker_rounding_on_exact_half() {
        // 0.5 * 10^-18 rounds down to the even neighbour
        let tiny = Dec::with_prec(1, 18);
        let half = Dec::with_prec(5, 1);
        assert_eq!(tiny.mul(&half), Dec::zero());

        let three_tiny = Dec::with_prec(3, 18);
        assert_eq!(three_tiny.mul(&half), Dec::with_prec(2, 18));
    }

    #[test]
    fn test_integer_conversions() {
        assert_eq!(dec("2.7").truncate_int(), 2);
        assert_eq!(dec("2.7").ceil_int(), 3);
        assert_eq!(dec("2.5").round_int(), 2);
        assert_eq!(dec("3.5").round_int(), 4);
        assert_eq!(dec("-1.5").truncate_int(), 0);
        assert_eq!(Dec::with_prec(5, 1).mul_int(1_000_001).truncate_int(), 500_000);
    }

    proptest! {
        #[test]
        fn prop_truncate_le_round_le_ceil(n in 0u64..u64::MAX, d in 1u64..u64::MAX) {
            let r = Dec::from_ratio(n as u128, d as u128).unwrap();
            let t = Dec::from_int(n as u128).quo_truncate(&Dec::from_int(d as u128));
            let u = Dec::from_int(n as u128).quo_round_up(&Dec::from_int(d as u128));
            prop_assert!(t <= r);
            prop_assert!(r <= u);
            prop_assert!(&u - &t <= Dec::with_prec(1, 18));
        }

        #[test]
        fn prop_parse_display_roundtrip(v in any::<i64>(), p in 0u32..=18) {
            let d = Dec::with_prec(v as i128, p);
            prop_assert_eq!(d.to_string().parse::<Dec>().unwrap(), d);
        }
    }
}
