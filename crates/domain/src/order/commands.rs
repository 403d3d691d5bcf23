//! Multi-field command inputs.

use common::{AggregateId, UserId};

use crate::catalog::ProductId;

use super::{ItemId, RefundType, ReturnLine, ReturnReason};

/// Place a new order in `PENDING`.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub order_id: AggregateId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub lines: Vec<(ProductId, u32)>,
    pub notes: Option<String>,
}

impl PlaceOrder {
    pub fn new(buyer_id: UserId, seller_id: UserId) -> Self {
        Self {
            order_id: AggregateId::new(),
            buyer_id,
            seller_id,
            lines: Vec::new(),
            notes: None,
        }
    }

    pub fn line(mut self, product_id: impl Into<ProductId>, quantity: u32) -> Self {
        self.lines.push((product_id.into(), quantity));
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Swap a line for another product.
#[derive(Debug, Clone)]
pub struct SubstituteItem {
    pub order_id: AggregateId,
    pub item_id: ItemId,
    pub new_product_id: ProductId,
    /// Name shown on the new line; the catalog name is used when blank.
    pub new_product_name: String,
    pub reason: String,
    /// Defaults to the quantity of the replaced line.
    pub quantity: Option<u32>,
}

impl SubstituteItem {
    pub fn new(
        order_id: AggregateId,
        item_id: ItemId,
        new_product_id: impl Into<ProductId>,
        new_product_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            item_id,
            new_product_id: new_product_id.into(),
            new_product_name: new_product_name.into(),
            reason: reason.into(),
            quantity: None,
        }
    }

    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }
}

/// Ask for part of a delivered order to be taken back.
#[derive(Debug, Clone)]
pub struct CreateReturn {
    pub order_id: AggregateId,
    pub lines: Vec<ReturnLine>,
    pub reason: ReturnReason,
    pub reason_details: Option<String>,
    pub refund_type: RefundType,
}

impl CreateReturn {
    pub fn new(order_id: AggregateId, reason: ReturnReason, refund_type: RefundType) -> Self {
        Self {
            order_id,
            lines: Vec::new(),
            reason,
            reason_details: None,
            refund_type,
        }
    }

    pub fn line(mut self, order_item_id: ItemId, quantity: u32) -> Self {
        self.lines.push(ReturnLine::new(order_item_id, quantity));
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.reason_details = Some(details.into());
        self
    }
}
