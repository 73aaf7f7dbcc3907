//! Direct-payment fee tiers.

use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Tiered surcharge covering payment-processing cost.
///
/// ```text
/// subtotal <  lower            -> percent of subtotal
/// lower <= subtotal <= upper   -> mid_flat
/// subtotal >  upper            -> high_flat
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Start of the first flat tier (inclusive).
    pub lower: Money,
    /// End of the first flat tier (inclusive).
    pub upper: Money,
    /// Percentage charged below `lower`.
    pub percent: i64,
    pub mid_flat: Money,
    pub high_flat: Money,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            lower: Money::from_cents(100_000),
            upper: Money::from_cents(200_000),
            percent: 10,
            mid_flat: Money::from_cents(1_500),
            high_flat: Money::from_cents(2_000),
        }
    }
}

impl FeeSchedule {
    /// Fee owed on `subtotal`.
    pub fn fee_for(&self, subtotal: Money) -> Money {
        if subtotal < self.lower {
            subtotal.percent(self.percent)
        } else if subtotal <= self.upper {
            self.mid_flat
        } else {
            self.high_flat
        }
    }
}

/// Fee under the default schedule.
pub fn direct_payment_fee(subtotal: Money) -> Money {
    FeeSchedule::default().fee_for(subtotal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fee(dollars: f64) -> f64 {
        direct_payment_fee(Money::from_dollars(dollars)).as_dollars()
    }

    #[test]
    fn under_1000_is_ten_percent() {
        assert_eq!(fee(100.0), 10.0);
        assert_eq!(fee(130.0), 13.0);
        assert_eq!(fee(500.0), 50.0);
        // 99.999 rounds to the cent.
        assert_eq!(fee(999.99), 100.0);
    }

    #[test]
    fn tier_boundaries_are_flat() {
        assert_eq!(fee(1000.0), 15.0);
        assert_eq!(fee(1500.0), 15.0);
        assert_eq!(fee(2000.0), 15.0);
        assert_eq!(fee(2000.01), 20.0);
    }

    #[test]
    fn over_2000_is_twenty_flat() {
        assert_eq!(fee(5000.0), 20.0);
        assert_eq!(fee(10_000.0), 20.0);
    }

    #[test]
    fn zero_subtotal_has_no_fee() {
        assert_eq!(direct_payment_fee(Money::ZERO), Money::ZERO);
    }

    #[test]
    fn custom_schedule() {
        let schedule = FeeSchedule {
            lower: Money::from_cents(50_000),
            upper: Money::from_cents(60_000),
            percent: 5,
            mid_flat: Money::from_cents(1_000),
            high_flat: Money::from_cents(3_000),
        };
        assert_eq!(schedule.fee_for(Money::from_cents(20_000)), Money::from_cents(1_000));
        assert_eq!(schedule.fee_for(Money::from_cents(55_000)), Money::from_cents(1_000));
        assert_eq!(schedule.fee_for(Money::from_cents(70_000)), Money::from_cents(3_000));
    }
}
