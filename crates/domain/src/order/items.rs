use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};

use crate::catalog::{Product, ProductId};
use crate::ledger::Money;

use super::{ItemId, OrderError};

/// Where a line item stands. Lines are never deleted, only retired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemLifecycle {
    Active,
    Removed {
        reason: String,
        removed_at: DateTime<Utc>,
        removed_by: UserId,
    },
    Substituted {
        reason: String,
        substituted_at: DateTime<Utc>,
        replacement_id: ItemId,
        replacement_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: ItemId,
    pub product_id: ProductId,
    /// Product name when the line was created.
    pub product_name: String,
    pub unit: String,
    pub quantity: u32,
    /// Catalog price when the line was created or last topped up.
    pub price_per_unit: Money,
    pub subtotal: Money,
    pub lifecycle: ItemLifecycle,
}

impl OrderItem {
    /// A new active line priced from the catalog.
    pub fn from_product(product: &Product, quantity: u32) -> Result<Self, OrderError> {
        Ok(Self {
            id: ItemId::new(),
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            unit: product.unit.clone(),
            quantity,
            price_per_unit: product.price,
            subtotal: line_subtotal(product.price, quantity)?,
            lifecycle: ItemLifecycle::Active,
        })
    }

    pub fn is_active(&self) -> bool {
        matches!(self.lifecycle, ItemLifecycle::Active)
    }

    /// What this line adds to the order total before tax.
    pub fn contribution(&self) -> Money {
        if self.is_active() {
            self.subtotal
        } else {
            Money::zero()
        }
    }
}

/// `price * quantity`, refused when it does not fit in cents.
pub(crate) fn line_subtotal(price: Money, quantity: u32) -> Result<Money, OrderError> {
    price
        .checked_multiply(quantity)
        .ok_or(OrderError::AmountOutOfRange)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retired_lines_contribute_nothing() {
        let product = Product::new("OIL-5", "Olive oil", Money::from_cents(1_100), 20, "bottle");
        let mut item = OrderItem::from_product(&product, 5).unwrap();

        assert_eq!(item.subtotal, Money::from_cents(5_500));
        assert_eq!(item.contribution(), Money::from_cents(5_500));

        item.lifecycle = ItemLifecycle::Removed {
            reason: "damaged".into(),
            removed_at: Utc::now(),
            removed_by: UserId::new(),
        };
        assert!(!item.is_active());
        assert_eq!(item.contribution(), Money::zero());
    }

    #[test]
    fn oversized_line_is_refused() {
        let product = Product::new("GOLD", "Gold bar", Money::from_cents(i64::MAX / 2), 10, "bar");

        assert_eq!(
            OrderItem::from_product(&product, 3).unwrap_err(),
            OrderError::AmountOutOfRange
        );
        assert!(OrderItem::from_product(&product, 2).is_ok());
    }

    #[test]
    fn lifecycle_serializes_with_state_tag() {
        let json = serde_json::to_value(ItemLifecycle::Active).unwrap();
        assert_eq!(json, serde_json::json!({"state": "active"}));
    }
}
