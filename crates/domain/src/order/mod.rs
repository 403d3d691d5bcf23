//! The order aggregate: status machine, line items, disputes and returns.

mod aggregate;
mod audit;
mod commands;
mod events;
mod issues;
mod items;
mod reactions;
mod returns;
mod service;
mod status;

pub use aggregate::Order;
pub use audit::StatusHistoryEntry;
pub use commands::{CreateReturn, PlaceOrder, SubstituteItem};
pub use events::{
    CreditRedeemedData, IssueAnsweredData, IssueReportedData, IssueResolvedData, ItemAddedData,
    ItemQuantityIncreasedData, ItemRemovedData, ItemSubstitutedData, OrderEvent, OrderPlacedData,
    RefundTypeChangedData, ReturnCompletedData, ReturnRequestedData, ReturnReviewedData,
    StatusChangedData,
};
pub use issues::{BuyerResponse, IssueDetails, IssueStatus, IssueType, OrderIssue};
pub use items::{ItemLifecycle, OrderItem};
pub use returns::{
    CreditNote, RefundType, Return, ReturnItem, ReturnLine, ReturnReason, ReturnStatus,
};
pub use service::{
    IssueAnswer, IssueReport, ItemAdded, ItemRemoved, ItemSubstituted, OrderService,
    TransitionOutcome,
};
pub use status::{Decision, OrderStatus, UnknownStatus, decide};

use common::UserId;
use thiserror::Error;

use crate::actor::Role;
use crate::catalog::ProductId;
use crate::error::ErrorKind;
use crate::ledger::{Money, RefundShortfall};

common::uuid_id!(
    /// Identifier of a line item.
    ItemId
);

common::uuid_id!(
    /// Identifier of a reported issue.
    IssueId
);

common::uuid_id!(
    /// Identifier of a return request.
    ReturnId
);

common::uuid_id!(
    /// Identifier of a credit note.
    CreditNoteId
);

/// Why an order command was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error(transparent)]
    UnknownStatus(#[from] UnknownStatus),

    #[error("Quantity must be greater than zero")]
    InvalidQuantity,

    #[error("Quantity or amount is too large for an order line")]
    AmountOutOfRange,

    #[error("An order needs at least one item")]
    NoItems,

    #[error("A return needs at least one item")]
    EmptyReturn,

    #[error("Cannot return {requested} of item {item_id}: only {original} were ordered")]
    ReturnQuantityExceeded {
        item_id: ItemId,
        requested: u32,
        original: u32,
    },

    #[error("Credit amount must be greater than zero")]
    InvalidCreditAmount,

    #[error("A reason is required")]
    ReasonRequired,

    #[error("Order not found")]
    NotPlaced,

    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("Issue not found: {0}")]
    IssueNotFound(IssueId),

    #[error("Return not found: {0}")]
    ReturnNotFound(ReturnId),

    #[error("Return {0} has no credit note")]
    NoCreditNote(ReturnId),

    #[error("{role} may not {action}")]
    Forbidden { role: Role, action: &'static str },

    #[error("User {actor_id} is not a party to this order")]
    NotAParty { actor_id: UserId },

    #[error("Order has already been placed")]
    AlreadyPlaced,

    #[error("Cannot move order from {from} to {to}: {reason}")]
    TransitionDenied {
        from: OrderStatus,
        to: OrderStatus,
        reason: String,
    },

    #[error("Items cannot be {action} while the order is {status}")]
    ItemsFrozen {
        status: OrderStatus,
        action: &'static str,
    },

    #[error("Item {0} is no longer active")]
    ItemNotActive(ItemId),

    #[error("Insufficient stock for {product_id}: {available} available, {requested} requested")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    #[error("Cannot report an issue while the order is {status}")]
    IssueNotAllowed { status: OrderStatus },

    #[error("Issue {issue_id} has already been answered")]
    IssueAlreadyAnswered {
        issue_id: IssueId,
        status: IssueStatus,
    },

    #[error("Returns are accepted only after delivery; the order is {status}")]
    ReturnsNotAccepted { status: OrderStatus },

    #[error("Order has been fully returned")]
    FullyReturned,

    #[error("{0}")]
    RefundExceedsAvailable(RefundShortfall),

    #[error("Cannot {action} return {return_id} while it is {status}")]
    ReturnStateConflict {
        return_id: ReturnId,
        status: ReturnStatus,
        action: &'static str,
    },

    #[error("Credit note {credit_number} is partially used ({used} of {amount})")]
    CreditPartiallyUsed {
        credit_number: String,
        used: Money,
        amount: Money,
    },

    #[error("Credit note {credit_number} is inactive or expired")]
    CreditUnavailable { credit_number: String },

    #[error("Requested {requested} exceeds the credit balance of {balance}")]
    InsufficientCredit { requested: Money, balance: Money },
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::UnknownStatus(_)
            | OrderError::InvalidQuantity
            | OrderError::AmountOutOfRange
            | OrderError::NoItems
            | OrderError::EmptyReturn
            | OrderError::ReturnQuantityExceeded { .. }
            | OrderError::InvalidCreditAmount
            | OrderError::ReasonRequired => ErrorKind::Validation,

            OrderError::NotPlaced
            | OrderError::ItemNotFound(_)
            | OrderError::IssueNotFound(_)
            | OrderError::ReturnNotFound(_)
            | OrderError::NoCreditNote(_) => ErrorKind::NotFound,

            OrderError::Forbidden { .. } | OrderError::NotAParty { .. } => {
                ErrorKind::Authorization
            }

            OrderError::AlreadyPlaced
            | OrderError::TransitionDenied { .. }
            | OrderError::ItemsFrozen { .. }
            | OrderError::ItemNotActive(_)
            | OrderError::InsufficientStock { .. }
            | OrderError::IssueNotAllowed { .. }
            | OrderError::IssueAlreadyAnswered { .. }
            | OrderError::ReturnsNotAccepted { .. }
            | OrderError::FullyReturned
            | OrderError::RefundExceedsAvailable(_)
            | OrderError::ReturnStateConflict { .. }
            | OrderError::CreditPartiallyUsed { .. }
            | OrderError::CreditUnavailable { .. }
            | OrderError::InsufficientCredit { .. } => ErrorKind::StateConflict,
        }
    }
}
