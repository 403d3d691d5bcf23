use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};

use crate::catalog::ProductId;

use super::{IssueId, ItemId, OrderItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    OutOfStock,
    InsufficientQuantity,
    QualityProblem,
    PriceChange,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    /// Reported by the seller, waiting for the buyer.
    BuyerNotified,
    Accepted,
    Rejected,
    /// Settled by an item change.
    Resolved,
}

impl IssueStatus {
    /// Still blocks the order from moving on.
    pub fn is_pending(&self) -> bool {
        matches!(self, IssueStatus::BuyerNotified | IssueStatus::Rejected)
    }
}

/// How an issue was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuyerResponse {
    /// Free-text answer from the buyer.
    Message(String),
    RemovedBySeller,
    SubstitutedByBuyer,
}

/// What the seller reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueDetails {
    /// The affected line, when the issue is about one.
    pub order_item_id: Option<ItemId>,
    /// Name used when no line id is given.
    pub product_name: Option<String>,
    pub issue_type: IssueType,
    pub description: String,
    pub requested_quantity: Option<u32>,
    pub available_quantity: Option<u32>,
    pub proposed_solution: Option<String>,
    pub substitute_product_id: Option<ProductId>,
}

impl IssueDetails {
    pub fn for_item(item_id: ItemId, issue_type: IssueType, description: impl Into<String>) -> Self {
        Self {
            order_item_id: Some(item_id),
            product_name: None,
            issue_type,
            description: description.into(),
            requested_quantity: None,
            available_quantity: None,
            proposed_solution: None,
            substitute_product_id: None,
        }
    }

    pub fn quantities(mut self, requested: u32, available: u32) -> Self {
        self.requested_quantity = Some(requested);
        self.available_quantity = Some(available);
        self
    }

    pub fn proposal(mut self, solution: impl Into<String>) -> Self {
        self.proposed_solution = Some(solution.into());
        self
    }

    pub fn substitute(mut self, product_id: impl Into<ProductId>) -> Self {
        self.substitute_product_id = Some(product_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIssue {
    pub id: IssueId,
    pub order_item_id: Option<ItemId>,
    pub product_name: Option<String>,
    pub issue_type: IssueType,
    pub description: String,
    pub requested_quantity: Option<u32>,
    pub available_quantity: Option<u32>,
    pub proposed_solution: Option<String>,
    pub substitute_product_id: Option<ProductId>,
    pub status: IssueStatus,
    pub buyer_accepted: Option<bool>,
    pub buyer_response: Option<BuyerResponse>,
    pub reported_by: UserId,
    pub reported_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<UserId>,
}

impl OrderIssue {
    /// Open issues are the ones an item change settles implicitly. An answer
    /// the buyer already accepted stays as recorded.
    pub fn is_open(&self) -> bool {
        self.status.is_pending()
    }

    /// Does this issue concern `item`?
    ///
    /// Issues that carry a line id match on it. Older reports without one
    /// fall back to the product name snapshot.
    pub fn concerns(&self, item: &OrderItem) -> bool {
        match self.order_item_id {
            Some(id) => id == item.id,
            None => self.product_name.as_deref() == Some(item.product_name.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Product;
    use crate::ledger::Money;

    fn issue(order_item_id: Option<ItemId>, product_name: Option<&str>) -> OrderIssue {
        OrderIssue {
            id: IssueId::new(),
            order_item_id,
            product_name: product_name.map(str::to_string),
            issue_type: IssueType::OutOfStock,
            description: "none left".into(),
            requested_quantity: None,
            available_quantity: None,
            proposed_solution: None,
            substitute_product_id: None,
            status: IssueStatus::BuyerNotified,
            buyer_accepted: None,
            buyer_response: None,
            reported_by: UserId::new(),
            reported_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
        }
    }

    #[test]
    fn matches_by_line_id_before_name() {
        let product = Product::new("TOM", "Tomatoes", Money::from_cents(300), 10, "kg");
        let item = OrderItem::from_product(&product, 2).unwrap();
        let twin = OrderItem::from_product(&product, 1).unwrap();

        assert!(issue(Some(item.id), Some("Tomatoes")).concerns(&item));
        assert!(!issue(Some(twin.id), Some("Tomatoes")).concerns(&item));
        assert!(issue(None, Some("Tomatoes")).concerns(&item));
        assert!(!issue(None, Some("Peppers")).concerns(&item));
        assert!(!issue(None, None).concerns(&item));
    }

    #[test]
    fn pending_statuses() {
        assert!(IssueStatus::BuyerNotified.is_pending());
        assert!(IssueStatus::Rejected.is_pending());
        assert!(!IssueStatus::Accepted.is_pending());
        assert!(!IssueStatus::Resolved.is_pending());
    }
}
