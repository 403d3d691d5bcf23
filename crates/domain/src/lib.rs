//! Order lifecycle and fulfillment reconciliation.
//!
//! This crate provides:
//! - Ledger primitives: integer-cent money, tax-inclusive totals, refund bounds
//! - Aggregate and DomainEvent traits, and the CommandHandler that appends
//!   decided events under optimistic concurrency
//! - The order aggregate: status machine with audit trail, line items,
//!   disputes, returns, refund-type switching and credit notes
//! - Collaborator seams: product catalog and side-effect dispatcher

pub mod actor;
pub mod aggregate;
pub mod catalog;
pub mod command;
pub mod effects;
pub mod error;
pub mod ledger;
pub mod order;
pub mod settings;

pub use actor::{Actor, Role};
pub use aggregate::{Aggregate, DomainEvent};
pub use catalog::{CatalogError, InMemoryCatalog, Product, ProductCatalog, ProductId};
pub use command::{CommandHandler, CommandResult};
pub use effects::{
    NoopDispatcher, Notification, NotificationTopic, OrderUpdate, RecordingDispatcher,
    SideEffect, SideEffectDispatcher,
};
pub use error::{DomainError, ErrorKind};
pub use ledger::{Money, RefundCapacity, RefundShortfall};
pub use order::{
    CreateReturn, CreditNote, IssueAnswer, IssueDetails, IssueId, IssueReport, IssueStatus,
    IssueType, ItemAdded, ItemId, ItemRemoved, ItemSubstituted, Order, OrderError, OrderEvent,
    OrderIssue, OrderItem, OrderService, OrderStatus, PlaceOrder, RefundType, Return, ReturnId,
    ReturnReason, ReturnStatus, StatusHistoryEntry, SubstituteItem, TransitionOutcome,
};
pub use settings::{EngineSettings, MAX_CREDIT_NOTE_VALIDITY_DAYS};
