//! Order statuses and the transition table.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actor::Role;

/// Lifecycle status of an order.
///
/// ```text
/// PENDING ─► CONFIRMED ─► PREPARING ─► READY_FOR_PICKUP ─► IN_DELIVERY ─► DELIVERED ─► COMPLETED
///    │           │            │                                 │             ▲
///    │           └► PAYMENT_PENDING ─► PAID ─┘                  └► PARTIALLY_DELIVERED
///    │
///    └► REVIEWING ◄─► ISSUE_REPORTED ─► LOCKED ─► CONFIRMED
///
/// CANCELED is reachable from every status before fulfilment starts.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Preparing,
    ReadyForPickup,
    InDelivery,
    Delivered,
    PartiallyDelivered,
    Completed,
    Canceled,
    PaymentPending,
    Paid,
    IssueReported,
    Reviewing,
    /// Disputes are settled; lines may still be added but not changed.
    Locked,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 14] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::ReadyForPickup,
        OrderStatus::InDelivery,
        OrderStatus::Delivered,
        OrderStatus::PartiallyDelivered,
        OrderStatus::Completed,
        OrderStatus::Canceled,
        OrderStatus::PaymentPending,
        OrderStatus::Paid,
        OrderStatus::IssueReported,
        OrderStatus::Reviewing,
        OrderStatus::Locked,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Canceled)
    }

    /// Lines may be added, removed or substituted.
    pub fn allows_item_changes(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::Reviewing
                | OrderStatus::IssueReported
                | OrderStatus::Confirmed
        )
    }

    pub fn allows_item_additions(&self) -> bool {
        self.allows_item_changes() || *self == OrderStatus::Locked
    }

    /// Goods have reached the buyer, so returns may be requested.
    pub fn accepts_returns(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::PartiallyDelivered | OrderStatus::Completed
        )
    }

    /// Statuses in which pending issues hold the order back.
    pub fn is_under_dispute(&self) -> bool {
        matches!(self, OrderStatus::IssueReported | OrderStatus::Reviewing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Preparing => "PREPARING",
            OrderStatus::ReadyForPickup => "READY_FOR_PICKUP",
            OrderStatus::InDelivery => "IN_DELIVERY",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::PartiallyDelivered => "PARTIALLY_DELIVERED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::PaymentPending => "PAYMENT_PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::IssueReported => "ISSUE_REPORTED",
            OrderStatus::Reviewing => "REVIEWING",
            OrderStatus::Locked => "LOCKED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown order status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Verdict of the transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

const SELLER: &[Role] = &[Role::Seller];
const PARTIES: &[Role] = &[Role::Buyer, Role::Seller];
const PARTIES_AND_SYSTEM: &[Role] = &[Role::Buyer, Role::Seller, Role::System];
const NOBODY: &[Role] = &[];

/// Roles that may move an order along the edge `from -> to`. Admins may take
/// any edge that some role may take.
fn permitted_roles(from: OrderStatus, to: OrderStatus) -> &'static [Role] {
    use OrderStatus::*;

    match (from, to) {
        (Pending, Confirmed | Reviewing | IssueReported | PaymentPending) => SELLER,
        (Reviewing, Confirmed | IssueReported | Locked) => SELLER,
        (IssueReported, Reviewing | Confirmed | Locked) => SELLER,
        (Locked, Confirmed) => SELLER,
        (Confirmed, Preparing | PaymentPending | IssueReported) => SELLER,
        (PaymentPending, Paid) => PARTIES_AND_SYSTEM,
        (Paid, Preparing) => SELLER,
        (Preparing, ReadyForPickup | InDelivery | IssueReported) => SELLER,
        (ReadyForPickup, InDelivery) => SELLER,
        (ReadyForPickup, Delivered) => PARTIES,
        (InDelivery, Delivered | PartiallyDelivered) => SELLER,
        (PartiallyDelivered, Delivered) => SELLER,
        (Delivered | PartiallyDelivered, Completed) => PARTIES_AND_SYSTEM,

        (Pending | Reviewing | IssueReported | Locked | Confirmed, Canceled) => PARTIES,
        (PaymentPending, Canceled) => PARTIES_AND_SYSTEM,
        (Paid | Preparing, Canceled) => SELLER,

        _ => NOBODY,
    }
}

/// The transition table: may `role` move an order from `from` to `to`?
///
/// Total over every combination of statuses and roles.
pub fn decide(from: OrderStatus, to: OrderStatus, role: Role) -> Decision {
    if from == to {
        return Decision::Deny(format!("order is already {from}"));
    }
    if from.is_terminal() {
        return Decision::Deny(format!("{from} is a final status"));
    }

    let permitted = permitted_roles(from, to);
    if permitted.is_empty() {
        return Decision::Deny(format!("cannot move an order from {from} to {to}"));
    }
    if role == Role::Admin || permitted.contains(&role) {
        Decision::Allow
    } else {
        Decision::Deny(format!("{role} may not move an order from {from} to {to}"))
    }
}
