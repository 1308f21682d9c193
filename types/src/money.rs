//! Fixed-point currency arithmetic.
//!
//! Amounts are stored as integer minor units (cents) so that pool totals
//! never accumulate binary floating-point drift. All arithmetic that can
//! overflow is checked; the ledger layer treats an overflow as a storage
//! corruption rather than wrapping silently.

use std::fmt;
use std::iter::Sum;

use serde::{Deserialize, Serialize};

/// A currency amount in minor units (cents).
///
/// Negative values are representable so that subtraction stays closed, but
/// every ledger entry point rejects non-positive input amounts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Construct from minor units (cents).
    #[must_use]
    pub fn from_minor(cents: i64) -> Self {
        Self(cents)
    }

    /// Construct from whole currency units (rands).
    ///
    /// # Panics
    ///
    /// Panics when `units * 100` does not fit in `i64`.
    #[must_use]
    pub fn from_major(units: i64) -> Self {
        match units.checked_mul(100) {
            Some(cents) => Self(cents),
            None => panic!("major amount {units} does not fit in minor units"),
        }
    }

    #[must_use]
    pub fn minor(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[must_use]
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    #[must_use]
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    #[must_use]
    pub fn checked_mul(self, count: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(count)).map(Money)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        Money(iter.map(|m| m.0).sum())
    }
}

impl fmt::Display for Money {
    /// Formats as `R 1 234.56` (en-ZA convention: space-grouped thousands).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let major = abs / 100;
        let cents = abs % 100;

        let digits = major.to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        let offset = digits.len() % 3;
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (i + 3 - offset) % 3 == 0 {
                grouped.push(' ');
            }
            grouped.push(ch);
        }

        write!(f, "{sign}R {grouped}.{cents:02}")
    }
}
