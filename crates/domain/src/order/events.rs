//! Order journal events.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::ledger::Money;

use super::{
    BuyerResponse, CreditNote, IssueId, IssueStatus, ItemId, OrderIssue, OrderItem, RefundType,
    Return, ReturnId, StatusHistoryEntry,
};

/// Everything that can happen to an order.
///
/// Events that change the line items carry the order total recomputed from
/// the resulting active lines, so the stored total and the lines commit
/// together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    OrderPlaced(OrderPlacedData),

    /// Carries the new status and its audit entry as one fact.
    StatusChanged(StatusChangedData),

    ItemAdded(ItemAddedData),

    ItemQuantityIncreased(ItemQuantityIncreasedData),

    ItemRemoved(ItemRemovedData),

    ItemSubstituted(ItemSubstitutedData),

    IssueReported(IssueReportedData),

    IssueAnswered(IssueAnsweredData),

    IssueResolved(IssueResolvedData),

    ReturnRequested(ReturnRequestedData),

    ReturnApproved(ReturnReviewedData),

    ReturnRejected(ReturnReviewedData),

    ReturnCompleted(ReturnCompletedData),

    RefundTypeChanged(RefundTypeChangedData),

    CreditRedeemed(CreditRedeemedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::StatusChanged(_) => "StatusChanged",
            OrderEvent::ItemAdded(_) => "ItemAdded",
            OrderEvent::ItemQuantityIncreased(_) => "ItemQuantityIncreased",
            OrderEvent::ItemRemoved(_) => "ItemRemoved",
            OrderEvent::ItemSubstituted(_) => "ItemSubstituted",
            OrderEvent::IssueReported(_) => "IssueReported",
            OrderEvent::IssueAnswered(_) => "IssueAnswered",
            OrderEvent::IssueResolved(_) => "IssueResolved",
            OrderEvent::ReturnRequested(_) => "ReturnRequested",
            OrderEvent::ReturnApproved(_) => "ReturnApproved",
            OrderEvent::ReturnRejected(_) => "ReturnRejected",
            OrderEvent::ReturnCompleted(_) => "ReturnCompleted",
            OrderEvent::RefundTypeChanged(_) => "RefundTypeChanged",
            OrderEvent::CreditRedeemed(_) => "CreditRedeemed",
        }
    }

    fn metadata(&self) -> Vec<(&'static str, String)> {
        match self {
            OrderEvent::OrderPlaced(data) => vec![("order_number", data.order_number.clone())],
            OrderEvent::ReturnRequested(data) => {
                vec![("return_id", data.ret.id.to_string())]
            }
            OrderEvent::ReturnApproved(data) | OrderEvent::ReturnRejected(data) => {
                vec![("return_id", data.return_id.to_string())]
            }
            OrderEvent::ReturnCompleted(data) => vec![("return_id", data.return_id.to_string())],
            OrderEvent::RefundTypeChanged(data) => {
                vec![("return_id", data.return_id.to_string())]
            }
            OrderEvent::CreditRedeemed(data) => vec![("return_id", data.return_id.to_string())],
            _ => vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_id: AggregateId,
    pub order_number: String,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub notes: Option<String>,
    pub placed_by: UserId,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangedData {
    pub entry: StatusHistoryEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemAddedData {
    pub item: OrderItem,
    pub note: Option<String>,
    pub added_by: UserId,
    pub total_amount: Money,
}

/// An existing line was topped up and repriced at the current catalog price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemQuantityIncreasedData {
    pub item_id: ItemId,
    pub quantity: u32,
    pub price_per_unit: Money,
    pub subtotal: Money,
    pub note: Option<String>,
    pub added_by: UserId,
    pub total_amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRemovedData {
    pub item_id: ItemId,
    pub reason: String,
    pub removed_by: UserId,
    pub removed_at: DateTime<Utc>,
    pub total_amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSubstitutedData {
    pub item_id: ItemId,
    pub replacement: OrderItem,
    pub reason: String,
    pub substituted_by: UserId,
    pub substituted_at: DateTime<Utc>,
    pub total_amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueReportedData {
    pub issue: OrderIssue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueAnsweredData {
    pub issue_id: IssueId,
    pub accepted: bool,
    pub response: String,
    pub status: IssueStatus,
    pub answered_by: UserId,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueResolvedData {
    pub issue_id: IssueId,
    pub response: BuyerResponse,
    pub buyer_accepted: Option<bool>,
    pub resolved_by: UserId,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnRequestedData {
    #[serde(rename = "return")]
    pub ret: Return,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnReviewedData {
    pub return_id: ReturnId,
    pub reviewed_by: UserId,
    pub note: Option<String>,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnCompletedData {
    pub return_id: ReturnId,
    pub completed_by: UserId,
    pub completed_at: DateTime<Utc>,
}

/// `issued_credit` is set when switching to CREDIT, `credit_removed` when
/// leaving it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundTypeChangedData {
    pub return_id: ReturnId,
    pub from: RefundType,
    pub to: RefundType,
    pub issued_credit: Option<CreditNote>,
    pub credit_removed: bool,
    pub changed_by: UserId,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditRedeemedData {
    pub return_id: ReturnId,
    pub amount: Money,
    pub redeemed_by: UserId,
    pub redeemed_at: DateTime<Utc>,
}
