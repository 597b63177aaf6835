// [crates/wopr-core/src/credit.rs]
//! Monetary value type. One `Credit` equals one US cent. Arithmetic on
//! credits never uses floating point; conversion to/from dollars only
//! happens at the UI/external-API boundary (§3, §9).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};

/// A signed, whole-number count of credits (1 credit == 1 US cent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credit(i64);

impl Credit {
    pub const ZERO: Credit = Credit(0);

    pub const fn new(cents: i64) -> Self {
        Credit(cents)
    }

    /// Converts a dollar amount to credits. Only valid at a boundary —
    /// the caller is responsible for rounding however their source
    /// (a pricing page, a processor webhook) represents fractional cents.
    pub fn from_dollars(dollars: f64) -> Self {
        Credit((dollars * 100.0).round() as i64)
    }

    pub fn to_dollars(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Credit) -> Option<Credit> {
        self.0.checked_add(other.0).map(Credit)
    }

    pub fn saturating_add(self, other: Credit) -> Credit {
        Credit(self.0.saturating_add(other.0))
    }

    /// Scales by a rational multiplier expressed as an integer numerator
    /// and denominator (e.g. margin = 1.2 -> scale_rational(6, 5)),
    /// quantizing up to the nearest whole credit. Used by the gateway to
    /// turn upstream `cost` into tenant-facing `charge` (§4.14).
    pub fn scale_rational(self, numerator: i64, denominator: i64) -> Credit {
        debug_assert!(denominator != 0);
        let scaled = (self.0 as i128 * numerator as i128 + denominator as i128 - 1)
            / denominator as i128;
        Credit(scaled as i64)
    }
}

impl Add for Credit {
    type Output = Credit;
    fn add(self, rhs: Credit) -> Credit {
        Credit(self.0 + rhs.0)
    }
}

impl Sub for Credit {
    type Output = Credit;
    fn sub(self, rhs: Credit) -> Credit {
        Credit(self.0 - rhs.0)
    }
}

impl Neg for Credit {
    type Output = Credit;
    fn neg(self) -> Credit {
        Credit(-self.0)
    }
}

impl fmt::Display for Credit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}cr", self.0)
    }
}

impl From<i64> for Credit {
    fn from(v: i64) -> Self {
        Credit(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollars_roundtrip() {
        let c = Credit::from_dollars(5.50);
        assert_eq!(c.cents(), 550);
        assert_eq!(c.to_dollars(), 5.50);
    }

    #[test]
    fn margin_quantizes_up() {
        // cost = 100 credits, margin numerator/denominator = 6/5 (1.2x)
        let cost = Credit::new(100);
        assert_eq!(cost.scale_rational(6, 5), Credit::new(120));
        // non-exact case rounds up to the nearest whole credit
        let cost2 = Credit::new(7);
        assert_eq!(cost2.scale_rational(6, 5), Credit::new(9)); // 8.4 -> 9
    }

    #[test]
    fn arithmetic_never_overflows_silently() {
        assert_eq!(Credit::new(i64::MAX).checked_add(Credit::new(1)), None);
    }
}
