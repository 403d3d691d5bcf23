//! Money arithmetic and the refund bounds derived from an order total.
//!
//! Every amount is an integer number of cents. Percentages are expressed in
//! basis points and rounded half away from zero to the cent, so a total is
//! reproducible from its line items on any machine.

use std::iter::Sum;

use serde::{Deserialize, Serialize};

/// Sales tax applied on top of the active line items (10%).
pub const TAX_RATE_BP: i64 = 1_000;

/// Fee withheld from every return (5%).
pub const RESTOCK_FEE_RATE_BP: i64 = 500;

const BASIS_POINTS: i128 = 10_000;

/// Money amount in cents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub fn from_dollars(dollars: i64) -> Self {
        Self {
            cents: dollars * 100,
        }
    }

    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    pub fn cents(&self) -> i64 {
        self.cents
    }

    pub fn dollars(&self) -> i64 {
        self.cents / 100
    }

    /// Cents left over after whole dollars, always non-negative.
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Price of `quantity` units, `None` when it does not fit in cents.
    pub fn checked_multiply(&self, quantity: u32) -> Option<Money> {
        self.cents
            .checked_mul(i64::from(quantity))
            .map(Money::from_cents)
    }

    pub fn checked_add(&self, rhs: Money) -> Option<Money> {
        self.cents.checked_add(rhs.cents).map(Money::from_cents)
    }

    /// Returns `self * bp / 10_000`, rounded half away from zero.
    pub fn checked_apply_basis_points(&self, bp: i64) -> Option<Money> {
        let product = i128::from(self.cents) * i128::from(bp);
        let quotient = product / BASIS_POINTS;
        let remainder = product % BASIS_POINTS;
        let rounded = if remainder.abs() * 2 >= BASIS_POINTS {
            quotient + product.signum()
        } else {
            quotient
        };
        i64::try_from(rounded).ok().map(Money::from_cents)
    }

    /// Like [`Money::checked_apply_basis_points`] for rates up to 100%,
    /// which can never leave the range of the input.
    pub fn apply_basis_points(&self, bp: i64) -> Money {
        debug_assert!((0..=BASIS_POINTS as i64).contains(&bp));
        self.checked_apply_basis_points(bp).unwrap_or(*self)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-${}.{:02}", self.dollars().abs(), self.cents_part())
        } else {
            write!(f, "${}.{:02}", self.dollars(), self.cents_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents - rhs.cents,
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.cents += rhs.cents;
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.cents -= rhs.cents;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// Tax-inclusive total of a set of line subtotals, `None` on overflow.
pub fn checked_order_total(subtotals: impl IntoIterator<Item = Money>) -> Option<Money> {
    let net = subtotals
        .into_iter()
        .try_fold(Money::zero(), |acc, m| acc.checked_add(m))?;
    net.checked_apply_basis_points(BASIS_POINTS as i64 + TAX_RATE_BP)
}

/// Tax-inclusive total of lines that are already known to fit, as every
/// committed order's lines are.
pub fn order_total(subtotals: impl IntoIterator<Item = Money>) -> Money {
    checked_order_total(subtotals).unwrap_or(Money::from_cents(i64::MAX))
}

pub fn restock_fee(amount: Money) -> Money {
    amount.apply_basis_points(RESTOCK_FEE_RATE_BP)
}

/// Amount refunded for returned goods worth `amount`, after the restock fee.
pub fn refund_after_restock(amount: Money) -> Money {
    amount - restock_fee(amount)
}

/// How much of an order can still be refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundCapacity {
    pub order_total: Money,
    /// Sum of final refund amounts of every return that was not rejected.
    pub already_returned: Money,
}

impl RefundCapacity {
    pub fn new(order_total: Money, already_returned: Money) -> Self {
        Self {
            order_total,
            already_returned,
        }
    }

    pub fn available(&self) -> Money {
        self.order_total - self.already_returned
    }

    pub fn is_exhausted(&self) -> bool {
        !self.available().is_positive()
    }

    /// Accepts `requested` if it fits in what is still available.
    pub fn check(&self, requested: Money) -> Result<(), RefundShortfall> {
        if requested > self.available() {
            return Err(RefundShortfall {
                requested,
                available: self.available(),
                already_returned: self.already_returned,
                order_total: self.order_total,
            });
        }
        Ok(())
    }
}

/// A refund request that does not fit in the remaining capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundShortfall {
    pub requested: Money,
    pub available: Money,
    pub already_returned: Money,
    pub order_total: Money,
}

impl std::fmt::Display for RefundShortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "refund of {} exceeds the remaining balance: only {} of {} is available to return",
            self.requested, self.available, self.order_total
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "$12.34");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-$12.34");
    }

    #[test]
    fn money_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!(a.checked_multiply(3), Some(Money::from_cents(3000)));

        let mut c = a;
        c -= b;
        c += Money::from_cents(1);
        assert_eq!(c.cents(), 501);
    }

    #[test]
    fn basis_points_round_half_away_from_zero() {
        // 5% of $0.50 is 2.5 cents.
        assert_eq!(Money::from_cents(50).apply_basis_points(500).cents(), 3);
        assert_eq!(Money::from_cents(-50).apply_basis_points(500).cents(), -3);
        // 5% of $0.49 is 2.45 cents.
        assert_eq!(Money::from_cents(49).apply_basis_points(500).cents(), 2);
    }

    #[test]
    fn total_adds_ten_percent_tax() {
        let total = order_total([Money::from_dollars(50), Money::from_dollars(30)]);
        assert_eq!(total, Money::from_cents(8_800));

        let total = order_total([Money::from_dollars(50)]);
        assert_eq!(total, Money::from_cents(5_500));
    }

    #[test]
    fn total_rounds_to_the_cent() {
        // 90.91 * 1.10 = 100.001
        let total = order_total([Money::from_cents(5_500), Money::from_cents(3_591)]);
        assert_eq!(total, Money::from_cents(10_000));
    }

    #[test]
    fn overflowing_amounts_are_reported() {
        let price = Money::from_cents(i64::MAX / 2);
        assert_eq!(price.checked_multiply(3), None);
        assert_eq!(price.checked_add(price), Some(Money::from_cents(i64::MAX - 1)));
        assert_eq!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)), None);

        // Fits untaxed, overflows once tax is added.
        assert_eq!(checked_order_total([Money::from_cents(i64::MAX - 10)]), None);
        assert_eq!(
            checked_order_total([Money::from_cents(i64::MAX), Money::from_cents(1)]),
            None
        );
        assert_eq!(
            checked_order_total([Money::from_dollars(50)]),
            Some(Money::from_cents(5_500))
        );
    }

    #[test]
    fn total_of_nothing_is_zero() {
        assert_eq!(order_total(std::iter::empty()), Money::zero());
    }

    #[test]
    fn restock_fee_is_five_percent() {
        let raw = Money::from_cents(5_500);
        assert_eq!(restock_fee(raw), Money::from_cents(275));
        assert_eq!(refund_after_restock(raw), Money::from_cents(5_225));
    }

    #[test]
    fn capacity_accepts_request_within_bounds() {
        let capacity = RefundCapacity::new(Money::from_cents(10_000), Money::zero());
        let requested = refund_after_restock(Money::from_cents(5_000));

        assert_eq!(requested, Money::from_cents(4_750));
        assert!(capacity.check(requested).is_ok());
        assert_eq!(capacity.available(), Money::from_cents(10_000));
    }

    #[test]
    fn capacity_rejects_request_over_remaining_balance() {
        let capacity = RefundCapacity::new(Money::from_cents(10_000), Money::from_cents(5_225));
        let shortfall = capacity.check(Money::from_cents(5_225)).unwrap_err();

        assert_eq!(shortfall.available, Money::from_cents(4_775));
        assert_eq!(shortfall.already_returned, Money::from_cents(5_225));
        assert_eq!(
            shortfall.to_string(),
            "refund of $52.25 exceeds the remaining balance: only $47.75 of $100.00 is available to return"
        );
    }

    #[test]
    fn capacity_exhausted_when_nothing_left() {
        let capacity = RefundCapacity::new(Money::from_cents(10_000), Money::from_cents(10_000));
        assert!(capacity.is_exhausted());
        assert!(capacity.check(Money::from_cents(1)).is_err());
        assert!(capacity.check(Money::zero()).is_ok());
    }
}
