//! Fixed-point money amounts for the betting core.
//!
//! Balances, bets, and payouts are held as integer units at 8 decimal
//! places so that pool aggregation and payout splits never accumulate
//! binary floating point drift. Floats appear only at the API boundary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Conversion factor: 1 currency unit = 100_000_000 raw units.
pub const AMOUNT_SCALE: i64 = 100_000_000;

/// Basis points denominator for commission rates.
pub const BPS_DENOM: i64 = 10_000;

/// A non-negative monetary amount in fixed-point raw units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);
    pub const MAX: Amount = Amount(i64::MAX);

    /// Construct from raw fixed-point units. Negative input is clamped to
    /// zero; callers validating user input should go through `from_f64`.
    pub fn from_raw(raw: i64) -> Self {
        Amount(raw.max(0))
    }

    /// Construct from whole currency units (convenience for fixtures).
    pub fn from_units(units: i64) -> Self {
        Amount(units.saturating_mul(AMOUNT_SCALE).max(0))
    }

    /// Parse an amount from an external f64 value. Rejects non-finite and
    /// negative values, and values beyond the representable ceiling.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let raw = (value * AMOUNT_SCALE as f64).round();
        // `i64::MAX as f64` rounds up to 2^63, which does not fit in i64,
        // so the boundary itself must be rejected too.
        if raw >= i64::MAX as f64 {
            return None;
        }
        Some(Amount(raw as i64))
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / AMOUNT_SCALE as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Addition that fails on the i64 ceiling instead of wrapping.
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Subtraction that fails if the result would go negative.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        if other.0 > self.0 {
            None
        } else {
            Some(Amount(self.0 - other.0))
        }
    }

    /// Commission share of this amount at the given basis-point rate,
    /// rounded down. `bps` must be < 10_000.
    pub fn commission(self, bps: u32) -> Amount {
        let share = (self.0 as i128 * bps as i128) / BPS_DENOM as i128;
        Amount(share as i64)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = self.0 / AMOUNT_SCALE;
        let frac = (self.0 % AMOUNT_SCALE).abs();
        if frac == 0 {
            write!(f, "{}", units)
        } else {
            let s = format!("{:08}", frac);
            write!(f, "{}.{}", units, s.trim_end_matches('0'))
        }
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Amount::from_f64(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {}", value)))
    }
}

/// Split `pool` across `stakes` in exact proportion, conserving every raw
/// unit: each share is `remaining_pool * stake / remaining_stakes`, so the
/// final recipient absorbs rounding dust and the shares sum to `pool`.
pub fn proportional_split(pool: Amount, stakes: &[Amount]) -> Vec<Amount> {
    let total: i128 = stakes.iter().map(|s| s.0 as i128).sum();
    if total <= 0 {
        return stakes.iter().map(|_| Amount::ZERO).collect();
    }

    let mut remaining_pool = pool.0 as i128;
    let mut remaining_stakes = total;
    let mut out = Vec::with_capacity(stakes.len());
    for stake in stakes {
        let share = if remaining_stakes > 0 {
            remaining_pool * stake.0 as i128 / remaining_stakes
        } else {
            0
        };
        remaining_pool -= share;
        remaining_stakes -= stake.0 as i128;
        out.push(Amount(share as i64));
    }
    out
}
