use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::ledger::Money;

use super::{CreditNoteId, ItemId, ReturnId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl ReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnStatus::Pending => "PENDING",
            ReturnStatus::Approved => "APPROVED",
            ReturnStatus::Rejected => "REJECTED",
            ReturnStatus::Completed => "COMPLETED",
        }
    }
}

impl std::fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundType {
    /// Store credit through a credit note.
    Credit,
    Refund,
    Replacement,
}

impl std::fmt::Display for RefundType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RefundType::Credit => "CREDIT",
            RefundType::Refund => "REFUND",
            RefundType::Replacement => "REPLACEMENT",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnReason {
    Damaged,
    WrongItem,
    NotAsDescribed,
    QualityIssue,
    Other,
}

/// A requested return line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnLine {
    pub order_item_id: ItemId,
    pub quantity: u32,
    pub notes: Option<String>,
}

impl ReturnLine {
    pub fn new(order_item_id: ItemId, quantity: u32) -> Self {
        Self {
            order_item_id,
            quantity,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItem {
    pub order_item_id: ItemId,
    pub product_name: String,
    pub quantity_returned: u32,
    pub price_per_unit: Money,
    pub subtotal: Money,
    pub notes: Option<String>,
}

/// Store credit granted for a return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNote {
    pub id: CreditNoteId,
    pub credit_number: String,
    pub amount: Money,
    /// Always `amount - used_amount`.
    pub balance: Money,
    pub used_amount: Money,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl CreditNote {
    pub fn issue(amount: Money, issued_at: DateTime<Utc>, validity: chrono::Duration) -> Self {
        let id = CreditNoteId::new();
        Self {
            id,
            credit_number: reference_number("CN", issued_at, id.as_uuid()),
            amount,
            balance: amount,
            used_amount: Money::zero(),
            issued_at,
            expires_at: issued_at + validity,
            is_active: true,
        }
    }

    pub fn is_untouched(&self) -> bool {
        self.used_amount.is_zero() && self.balance == self.amount
    }

    /// Active and not yet expired. Whether the balance covers a request is
    /// checked separately.
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at
    }

    pub(super) fn consume(&mut self, amount: Money) {
        self.used_amount += amount;
        self.balance = self.amount - self.used_amount;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Return {
    pub id: ReturnId,
    pub order_id: AggregateId,
    pub return_number: String,
    pub status: ReturnStatus,
    pub reason: ReturnReason,
    pub reason_details: Option<String>,
    pub refund_type: RefundType,
    pub items: Vec<ReturnItem>,
    /// Value of the returned goods before the restock fee.
    pub total_return_amount: Money,
    pub restock_fee: Money,
    pub final_refund_amount: Money,
    pub credit_note: Option<CreditNote>,
    pub requested_by: UserId,
    pub requested_at: DateTime<Utc>,
    pub reviewed_by: Option<UserId>,
    pub review_note: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Return {
    /// Rejected returns give their share of the order total back.
    pub fn counts_toward_refunds(&self) -> bool {
        self.status != ReturnStatus::Rejected
    }
}

/// `PREFIX-YYYYMMDD-XXXXXXXX`, the suffix taken from the entity id.
pub(crate) fn reference_number(prefix: &str, at: DateTime<Utc>, id: uuid::Uuid) -> String {
    let simple = id.simple().to_string().to_ascii_uppercase();
    format!("{prefix}-{}-{}", at.format("%Y%m%d"), &simple[..8])
}
