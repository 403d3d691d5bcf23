//! Order aggregate implementation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::actor::{Actor, Role};
use crate::aggregate::Aggregate;
use crate::catalog::Product;
use crate::ledger::{self, Money, RefundCapacity};

use super::events::{
    CreditRedeemedData, IssueAnsweredData, IssueReportedData, IssueResolvedData, ItemAddedData,
    ItemQuantityIncreasedData, ItemRemovedData, ItemSubstitutedData, OrderPlacedData,
    RefundTypeChangedData, ReturnCompletedData, ReturnRequestedData, ReturnReviewedData,
    StatusChangedData,
};
use super::items::line_subtotal;
use super::returns::reference_number;
use super::{
    BuyerResponse, CreditNote, Decision, IssueDetails, IssueId, IssueStatus, ItemId,
    ItemLifecycle, OrderError, OrderEvent, OrderIssue, OrderItem, OrderStatus, RefundType, Return,
    ReturnId, ReturnItem, ReturnLine, ReturnReason, ReturnStatus, StatusHistoryEntry, decide,
};

/// Order aggregate root.
///
/// Built only by folding journal events. Command methods never mutate; they
/// validate against the current state and return the events to append.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    order_number: String,
    buyer_id: Option<UserId>,
    seller_id: Option<UserId>,
    status: OrderStatus,

    /// Status the order had when it was last moved to `ISSUE_REPORTED`.
    status_before_issue: Option<OrderStatus>,

    total_amount: Money,
    notes: Option<String>,
    created_at: Option<DateTime<Utc>>,
    has_issues: bool,

    items: Vec<OrderItem>,
    history: Vec<StatusHistoryEntry>,
    issues: Vec<OrderIssue>,
    returns: Vec<Return>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderPlaced(data) => self.apply_order_placed(data),
            OrderEvent::StatusChanged(data) => self.apply_status_changed(data),
            OrderEvent::ItemAdded(data) => {
                self.items.push(data.item);
                self.total_amount = data.total_amount;
            }
            OrderEvent::ItemQuantityIncreased(data) => {
                if let Some(item) = self.item_mut(data.item_id) {
                    item.quantity = data.quantity;
                    item.price_per_unit = data.price_per_unit;
                    item.subtotal = data.subtotal;
                }
                self.total_amount = data.total_amount;
            }
            OrderEvent::ItemRemoved(data) => {
                if let Some(item) = self.item_mut(data.item_id) {
                    item.lifecycle = ItemLifecycle::Removed {
                        reason: data.reason,
                        removed_at: data.removed_at,
                        removed_by: data.removed_by,
                    };
                }
                self.total_amount = data.total_amount;
            }
            OrderEvent::ItemSubstituted(data) => self.apply_item_substituted(data),
            OrderEvent::IssueReported(data) => {
                self.issues.push(data.issue);
                self.refresh_has_issues();
            }
            OrderEvent::IssueAnswered(data) => self.apply_issue_answered(data),
            OrderEvent::IssueResolved(data) => self.apply_issue_resolved(data),
            OrderEvent::ReturnRequested(data) => self.returns.push(data.ret),
            OrderEvent::ReturnApproved(data) => {
                if let Some(ret) = self.return_mut(data.return_id) {
                    ret.status = ReturnStatus::Approved;
                    ret.reviewed_by = Some(data.reviewed_by);
                    ret.review_note = data.note;
                }
            }
            OrderEvent::ReturnRejected(data) => {
                if let Some(ret) = self.return_mut(data.return_id) {
                    ret.status = ReturnStatus::Rejected;
                    ret.reviewed_by = Some(data.reviewed_by);
                    ret.review_note = data.note;
                    if let Some(note) = ret.credit_note.as_mut() {
                        note.is_active = false;
                    }
                }
            }
            OrderEvent::ReturnCompleted(data) => {
                if let Some(ret) = self.return_mut(data.return_id) {
                    ret.status = ReturnStatus::Completed;
                    ret.completed_at = Some(data.completed_at);
                }
            }
            OrderEvent::RefundTypeChanged(data) => self.apply_refund_type_changed(data),
            OrderEvent::CreditRedeemed(data) => {
                if let Some(note) = self
                    .return_mut(data.return_id)
                    .and_then(|ret| ret.credit_note.as_mut())
                {
                    note.consume(data.amount);
                }
            }
        }
    }
}

// Event application
impl Order {
    fn apply_order_placed(&mut self, data: OrderPlacedData) {
        self.id = Some(data.order_id);
        self.order_number = data.order_number;
        self.buyer_id = Some(data.buyer_id);
        self.seller_id = Some(data.seller_id);
        self.status = OrderStatus::Pending;
        self.items = data.items;
        self.total_amount = data.total_amount;
        self.notes = data.notes;
        self.created_at = Some(data.placed_at);
    }

    fn apply_status_changed(&mut self, data: StatusChangedData) {
        let entry = data.entry;
        if entry.new_status == OrderStatus::IssueReported
            && entry.previous_status != OrderStatus::IssueReported
        {
            self.status_before_issue = Some(entry.previous_status);
        }
        self.status = entry.new_status;
        self.history.push(entry);
    }

    fn apply_item_substituted(&mut self, data: ItemSubstitutedData) {
        let replacement_id = data.replacement.id;
        let replacement_name = data.replacement.product_name.clone();
        if let Some(item) = self.item_mut(data.item_id) {
            item.lifecycle = ItemLifecycle::Substituted {
                reason: data.reason,
                substituted_at: data.substituted_at,
                replacement_id,
                replacement_name,
            };
        }
        self.items.push(data.replacement);
        self.total_amount = data.total_amount;
    }

    fn apply_issue_answered(&mut self, data: IssueAnsweredData) {
        if let Some(issue) = self.issue_mut(data.issue_id) {
            issue.status = data.status;
            issue.buyer_accepted = Some(data.accepted);
            issue.buyer_response = Some(BuyerResponse::Message(data.response));
            if data.accepted {
                issue.resolved_at = Some(data.answered_at);
                issue.resolved_by = Some(data.answered_by);
            }
        }
        self.refresh_has_issues();
    }

    fn apply_issue_resolved(&mut self, data: IssueResolvedData) {
        if let Some(issue) = self.issue_mut(data.issue_id) {
            issue.status = IssueStatus::Resolved;
            issue.buyer_response = Some(data.response);
            if let Some(accepted) = data.buyer_accepted {
                issue.buyer_accepted = Some(accepted);
            }
            issue.resolved_at = Some(data.resolved_at);
            issue.resolved_by = Some(data.resolved_by);
        }
        self.refresh_has_issues();
    }

    fn apply_refund_type_changed(&mut self, data: RefundTypeChangedData) {
        if let Some(ret) = self.return_mut(data.return_id) {
            ret.refund_type = data.to;
            if data.credit_removed {
                ret.credit_note = None;
            }
            if let Some(note) = data.issued_credit {
                ret.credit_note = Some(note);
            }
        }
    }

    fn refresh_has_issues(&mut self) {
        self.has_issues = self.pending_issue_count() > 0;
    }

    fn item_mut(&mut self, id: ItemId) -> Option<&mut OrderItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    fn issue_mut(&mut self, id: IssueId) -> Option<&mut OrderIssue> {
        self.issues.iter_mut().find(|issue| issue.id == id)
    }

    fn return_mut(&mut self, id: ReturnId) -> Option<&mut Return> {
        self.returns.iter_mut().find(|ret| ret.id == id)
    }
}

// Query methods
impl Order {
    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn buyer_id(&self) -> Option<UserId> {
        self.buyer_id
    }

    pub fn seller_id(&self) -> Option<UserId> {
        self.seller_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn status_before_issue(&self) -> Option<OrderStatus> {
        self.status_before_issue
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn has_issues(&self) -> bool {
        self.has_issues
    }

    /// Every line ever added, retired ones included.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn active_items(&self) -> impl Iterator<Item = &OrderItem> {
        self.items.iter().filter(|item| item.is_active())
    }

    pub fn active_item_count(&self) -> usize {
        self.active_items().count()
    }

    pub fn item(&self, id: ItemId) -> Option<&OrderItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// The total as it should be for the current active lines.
    pub fn recomputed_total(&self) -> Money {
        ledger::order_total(self.items.iter().map(OrderItem::contribution))
    }

    pub fn history(&self) -> &[StatusHistoryEntry] {
        &self.history
    }

    pub fn issues(&self) -> &[OrderIssue] {
        &self.issues
    }

    pub fn issue(&self, id: IssueId) -> Option<&OrderIssue> {
        self.issues.iter().find(|issue| issue.id == id)
    }

    /// Issues still waiting on the buyer or rejected by them.
    pub fn pending_issue_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.status.is_pending())
            .count()
    }

    pub fn can_lock(&self) -> bool {
        self.pending_issue_count() == 0
    }

    pub fn returns(&self) -> &[Return] {
        &self.returns
    }

    pub fn find_return(&self, id: ReturnId) -> Option<&Return> {
        self.returns.iter().find(|ret| ret.id == id)
    }

    /// Final refund amounts of all returns that were not rejected.
    pub fn already_returned(&self) -> Money {
        self.returns
            .iter()
            .filter(|ret| ret.counts_toward_refunds())
            .map(|ret| ret.final_refund_amount)
            .sum()
    }

    pub fn refund_capacity(&self) -> RefundCapacity {
        RefundCapacity::new(self.total_amount, self.already_returned())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Guards
impl Order {
    fn ensure_placed(&self) -> Result<(), OrderError> {
        match self.id {
            Some(_) => Ok(()),
            None => Err(OrderError::NotPlaced),
        }
    }

    /// Buyers and sellers may only touch their own orders.
    fn ensure_party(&self, actor: &Actor) -> Result<(), OrderError> {
        let owner = match actor.role {
            Role::Buyer => self.buyer_id,
            Role::Seller => self.seller_id,
            Role::Admin | Role::System => return Ok(()),
        };
        if owner == Some(actor.id) {
            Ok(())
        } else {
            Err(OrderError::NotAParty { actor_id: actor.id })
        }
    }

    /// Checks the role, then the relationship. Admins pass any role check.
    fn authorize(
        &self,
        actor: &Actor,
        roles: &[Role],
        action: &'static str,
    ) -> Result<(), OrderError> {
        if actor.role != Role::Admin && !roles.contains(&actor.role) {
            return Err(OrderError::Forbidden {
                role: actor.role,
                action,
            });
        }
        self.ensure_party(actor)
    }

    fn active_item(&self, id: ItemId) -> Result<&OrderItem, OrderError> {
        let item = self.item(id).ok_or(OrderError::ItemNotFound(id))?;
        if !item.is_active() {
            return Err(OrderError::ItemNotActive(id));
        }
        Ok(item)
    }

    fn existing_return(&self, id: ReturnId) -> Result<&Return, OrderError> {
        self.find_return(id).ok_or(OrderError::ReturnNotFound(id))
    }

    /// Total after applying `change` to a copy of the lines.
    fn projected_total(
        &self,
        change: impl FnOnce(&mut Vec<OrderItem>),
    ) -> Result<Money, OrderError> {
        let mut items = self.items.clone();
        change(&mut items);
        checked_total(&items)
    }

    fn status_change(
        &self,
        to: OrderStatus,
        actor: &Actor,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> OrderEvent {
        OrderEvent::StatusChanged(StatusChangedData {
            entry: StatusHistoryEntry::record(self.status, to, actor, note, now),
        })
    }
}

fn checked_total(items: &[OrderItem]) -> Result<Money, OrderError> {
    ledger::checked_order_total(items.iter().map(OrderItem::contribution))
        .ok_or(OrderError::AmountOutOfRange)
}

fn check_stock(product: &Product, requested: u32) -> Result<(), OrderError> {
    if product.stock < requested {
        return Err(OrderError::InsufficientStock {
            product_id: product.id.clone(),
            available: product.stock,
            requested,
        });
    }
    Ok(())
}

fn require_reason(reason: &str) -> Result<(), OrderError> {
    if reason.trim().is_empty() {
        return Err(OrderError::ReasonRequired);
    }
    Ok(())
}

// Command methods (return events)
impl Order {
    /// Places a new order. Lines for the same product are merged.
    #[allow(clippy::too_many_arguments)]
    pub fn place(
        &self,
        order_id: AggregateId,
        buyer_id: UserId,
        seller_id: UserId,
        lines: &[(Product, u32)],
        notes: Option<String>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyPlaced);
        }
        match actor.role {
            Role::Buyer if actor.id != buyer_id => {
                return Err(OrderError::NotAParty { actor_id: actor.id });
            }
            Role::Seller => {
                return Err(OrderError::Forbidden {
                    role: actor.role,
                    action: "place an order",
                });
            }
            _ => {}
        }
        if lines.is_empty() {
            return Err(OrderError::NoItems);
        }

        let mut requested: HashMap<&str, u32> = HashMap::new();
        for (product, quantity) in lines {
            if *quantity == 0 {
                return Err(OrderError::InvalidQuantity);
            }
            let merged = requested.entry(product.id.as_str()).or_default();
            *merged = merged
                .checked_add(*quantity)
                .ok_or(OrderError::AmountOutOfRange)?;
        }

        let mut items: Vec<OrderItem> = Vec::new();
        for (product, _) in lines {
            if items.iter().any(|item| item.product_id == product.id) {
                continue;
            }
            let quantity = requested[product.id.as_str()];
            check_stock(product, quantity)?;
            items.push(OrderItem::from_product(product, quantity)?);
        }

        let total_amount = checked_total(&items)?;

        Ok(vec![OrderEvent::OrderPlaced(OrderPlacedData {
            order_id,
            order_number: reference_number("ORD", now, order_id.as_uuid()),
            buyer_id,
            seller_id,
            items,
            total_amount,
            notes,
            placed_by: actor.id,
            placed_at: now,
        })])
    }

    /// Moves the order to `to` if the transition table and the dispute gate
    /// allow it.
    pub fn transition(
        &self,
        to: OrderStatus,
        actor: &Actor,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.ensure_party(actor)?;

        let from = self.status;
        if let Decision::Deny(reason) = decide(from, to, actor.role) {
            return Err(OrderError::TransitionDenied { from, to, reason });
        }

        let pending = self.pending_issue_count();
        if from.is_under_dispute() && to != OrderStatus::Canceled && pending > 0 {
            return Err(OrderError::TransitionDenied {
                from,
                to,
                reason: format!("{pending} issue(s) are still awaiting resolution"),
            });
        }

        Ok(vec![self.status_change(to, actor, note, now)])
    }

    /// Adds `quantity` of `product`, topping up an existing active line for
    /// the same product and repricing it at the current catalog price.
    pub fn add_item(
        &self,
        product: &Product,
        quantity: u32,
        note: Option<String>,
        actor: &Actor,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.authorize(actor, &[Role::Buyer, Role::Seller], "add items")?;
        if !self.status.allows_item_additions() {
            return Err(OrderError::ItemsFrozen {
                status: self.status,
                action: "added",
            });
        }
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity);
        }
        check_stock(product, quantity)?;

        let existing = self
            .active_items()
            .find(|item| item.product_id == product.id);

        let event = match existing {
            Some(item) => {
                let item_id = item.id;
                let new_quantity = item
                    .quantity
                    .checked_add(quantity)
                    .ok_or(OrderError::AmountOutOfRange)?;
                let subtotal = line_subtotal(product.price, new_quantity)?;
                let total_amount = self.projected_total(|items| {
                    if let Some(line) = items.iter_mut().find(|line| line.id == item_id) {
                        line.subtotal = subtotal;
                    }
                })?;
                OrderEvent::ItemQuantityIncreased(ItemQuantityIncreasedData {
                    item_id,
                    quantity: new_quantity,
                    price_per_unit: product.price,
                    subtotal,
                    note,
                    added_by: actor.id,
                    total_amount,
                })
            }
            None => {
                let item = OrderItem::from_product(product, quantity)?;
                let total_amount = self.projected_total(|items| items.push(item.clone()))?;
                OrderEvent::ItemAdded(ItemAddedData {
                    item,
                    note,
                    added_by: actor.id,
                    total_amount,
                })
            }
        };

        Ok(vec![event])
    }

    /// Retires a line. Open issues about it are resolved, and removing the
    /// last active line cancels the order.
    pub fn remove_item(
        &self,
        item_id: ItemId,
        reason: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.authorize(actor, &[Role::Seller], "remove items")?;
        if !self.status.allows_item_changes() {
            return Err(OrderError::ItemsFrozen {
                status: self.status,
                action: "removed",
            });
        }
        require_reason(reason)?;
        let item = self.active_item(item_id)?;

        let total_amount = self.projected_total(|items| {
            if let Some(line) = items.iter_mut().find(|line| line.id == item_id) {
                line.subtotal = Money::zero();
            }
        })?;

        let mut events = vec![OrderEvent::ItemRemoved(ItemRemovedData {
            item_id,
            reason: reason.to_string(),
            removed_by: actor.id,
            removed_at: now,
            total_amount,
        })];

        events.extend(self.resolutions_for(item, BuyerResponse::RemovedBySeller, None, actor, now));

        if self.active_item_count() == 1 {
            events.push(self.status_change(
                OrderStatus::Canceled,
                actor,
                Some(format!("All items removed: {reason}")),
                now,
            ));
        }

        Ok(events)
    }

    /// Replaces a line with another product chosen by the buyer.
    pub fn substitute_item(
        &self,
        item_id: ItemId,
        replacement: &Product,
        replacement_name: &str,
        reason: &str,
        quantity: Option<u32>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.authorize(actor, &[Role::Buyer], "substitute items")?;
        if !self.status.allows_item_changes() {
            return Err(OrderError::ItemsFrozen {
                status: self.status,
                action: "substituted",
            });
        }
        require_reason(reason)?;
        let original = self.active_item(item_id)?;

        let quantity = quantity.unwrap_or(original.quantity);
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity);
        }
        check_stock(replacement, quantity)?;

        let mut new_item = OrderItem::from_product(replacement, quantity)?;
        if !replacement_name.trim().is_empty() {
            new_item.product_name = replacement_name.to_string();
        }

        let total_amount = self.projected_total(|items| {
            if let Some(line) = items.iter_mut().find(|line| line.id == item_id) {
                line.subtotal = Money::zero();
            }
            items.push(new_item.clone());
        })?;

        let mut events = vec![OrderEvent::ItemSubstituted(ItemSubstitutedData {
            item_id,
            replacement: new_item,
            reason: reason.to_string(),
            substituted_by: actor.id,
            substituted_at: now,
            total_amount,
        })];

        events.extend(self.resolutions_for(
            original,
            BuyerResponse::SubstitutedByBuyer,
            Some(true),
            actor,
            now,
        ));

        Ok(events)
    }

    fn resolutions_for(
        &self,
        item: &OrderItem,
        response: BuyerResponse,
        buyer_accepted: Option<bool>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Vec<OrderEvent> {
        self.issues
            .iter()
            .filter(|issue| issue.is_open() && issue.concerns(item))
            .map(|issue| {
                OrderEvent::IssueResolved(IssueResolvedData {
                    issue_id: issue.id,
                    response: response.clone(),
                    buyer_accepted,
                    resolved_by: actor.id,
                    resolved_at: now,
                })
            })
            .collect()
    }

    /// Records a seller-reported problem and moves the order to
    /// `ISSUE_REPORTED` unless it is already there.
    pub fn report_issue(
        &self,
        details: IssueDetails,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.authorize(actor, &[Role::Seller], "report issues")?;

        let moves_status = self.status != OrderStatus::IssueReported;
        if moves_status && !decide(self.status, OrderStatus::IssueReported, actor.role).is_allowed()
        {
            return Err(OrderError::IssueNotAllowed {
                status: self.status,
            });
        }

        let product_name = match details.order_item_id {
            Some(item_id) => Some(self.active_item(item_id)?.product_name.clone()),
            None => details.product_name,
        };

        let description = details.description;
        let issue = OrderIssue {
            id: IssueId::new(),
            order_item_id: details.order_item_id,
            product_name,
            issue_type: details.issue_type,
            description: description.clone(),
            requested_quantity: details.requested_quantity,
            available_quantity: details.available_quantity,
            proposed_solution: details.proposed_solution,
            substitute_product_id: details.substitute_product_id,
            status: IssueStatus::BuyerNotified,
            buyer_accepted: None,
            buyer_response: None,
            reported_by: actor.id,
            reported_at: now,
            resolved_at: None,
            resolved_by: None,
        };

        let mut events = vec![OrderEvent::IssueReported(IssueReportedData { issue })];
        if moves_status {
            events.push(self.status_change(
                OrderStatus::IssueReported,
                actor,
                Some(description),
                now,
            ));
        }
        Ok(events)
    }

    /// The buyer accepts or rejects a reported issue.
    pub fn answer_issue(
        &self,
        issue_id: IssueId,
        accepted: bool,
        response: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.authorize(actor, &[Role::Buyer], "answer issues")?;

        let issue = self
            .issue(issue_id)
            .ok_or(OrderError::IssueNotFound(issue_id))?;
        if issue.status != IssueStatus::BuyerNotified {
            return Err(OrderError::IssueAlreadyAnswered {
                issue_id,
                status: issue.status,
            });
        }

        Ok(vec![OrderEvent::IssueAnswered(IssueAnsweredData {
            issue_id,
            accepted,
            response: response.to_string(),
            status: if accepted {
                IssueStatus::Accepted
            } else {
                IssueStatus::Rejected
            },
            answered_by: actor.id,
            answered_at: now,
        })])
    }

    /// Opens a return for delivered goods.
    ///
    /// The refund after restock fee must fit in what the order has left
    /// after every earlier non-rejected return. The check and the new return
    /// are one append, so two concurrent requests cannot both pass it.
    #[allow(clippy::too_many_arguments)]
    pub fn request_return(
        &self,
        lines: &[ReturnLine],
        reason: ReturnReason,
        reason_details: Option<String>,
        refund_type: RefundType,
        actor: &Actor,
        now: DateTime<Utc>,
        credit_validity: chrono::Duration,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.authorize(actor, &[Role::Buyer], "request returns")?;
        if !self.status.accepts_returns() {
            return Err(OrderError::ReturnsNotAccepted {
                status: self.status,
            });
        }
        if lines.is_empty() {
            return Err(OrderError::EmptyReturn);
        }

        let capacity = self.refund_capacity();
        if capacity.is_exhausted() {
            return Err(OrderError::FullyReturned);
        }

        let mut requested_per_item: HashMap<ItemId, u32> = HashMap::new();
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            if line.quantity == 0 {
                return Err(OrderError::InvalidQuantity);
            }
            let item = self.active_item(line.order_item_id)?;
            let requested = requested_per_item.entry(item.id).or_default();
            *requested = requested
                .checked_add(line.quantity)
                .ok_or(OrderError::AmountOutOfRange)?;
            if *requested > item.quantity {
                return Err(OrderError::ReturnQuantityExceeded {
                    item_id: item.id,
                    requested: *requested,
                    original: item.quantity,
                });
            }
            items.push(ReturnItem {
                order_item_id: item.id,
                product_name: item.product_name.clone(),
                quantity_returned: line.quantity,
                price_per_unit: item.price_per_unit,
                subtotal: line_subtotal(item.price_per_unit, line.quantity)?,
                notes: line.notes.clone(),
            });
        }

        let total_return_amount: Money = items.iter().map(|item| item.subtotal).sum();
        let restock_fee = ledger::restock_fee(total_return_amount);
        let final_refund_amount = total_return_amount - restock_fee;

        capacity
            .check(final_refund_amount)
            .map_err(OrderError::RefundExceedsAvailable)?;

        let credit_note = (refund_type == RefundType::Credit)
            .then(|| CreditNote::issue(final_refund_amount, now, credit_validity));

        let id = ReturnId::new();
        let ret = Return {
            id,
            order_id: self.id.unwrap_or_default(),
            return_number: reference_number("RET", now, id.as_uuid()),
            status: ReturnStatus::Pending,
            reason,
            reason_details,
            refund_type,
            items,
            total_return_amount,
            restock_fee,
            final_refund_amount,
            credit_note,
            requested_by: actor.id,
            requested_at: now,
            reviewed_by: None,
            review_note: None,
            completed_at: None,
        };

        Ok(vec![OrderEvent::ReturnRequested(ReturnRequestedData {
            ret,
        })])
    }

    fn reviewable_return(
        &self,
        return_id: ReturnId,
        expected: ReturnStatus,
        action: &'static str,
    ) -> Result<&Return, OrderError> {
        let ret = self.existing_return(return_id)?;
        if ret.status != expected {
            return Err(OrderError::ReturnStateConflict {
                return_id,
                status: ret.status,
                action,
            });
        }
        Ok(ret)
    }

    pub fn approve_return(
        &self,
        return_id: ReturnId,
        note: Option<String>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.authorize(actor, &[Role::Seller], "review returns")?;
        self.reviewable_return(return_id, ReturnStatus::Pending, "approve")?;

        Ok(vec![OrderEvent::ReturnApproved(ReturnReviewedData {
            return_id,
            reviewed_by: actor.id,
            note,
            reviewed_at: now,
        })])
    }

    /// Rejects a pending return. Its credit note, if any, is deactivated and
    /// its amount no longer counts against the order.
    pub fn reject_return(
        &self,
        return_id: ReturnId,
        reason: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.authorize(actor, &[Role::Seller], "review returns")?;
        require_reason(reason)?;
        self.reviewable_return(return_id, ReturnStatus::Pending, "reject")?;

        Ok(vec![OrderEvent::ReturnRejected(ReturnReviewedData {
            return_id,
            reviewed_by: actor.id,
            note: Some(reason.to_string()),
            reviewed_at: now,
        })])
    }

    pub fn complete_return(
        &self,
        return_id: ReturnId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.authorize(actor, &[Role::Seller], "complete returns")?;
        self.reviewable_return(return_id, ReturnStatus::Approved, "complete")?;

        Ok(vec![OrderEvent::ReturnCompleted(ReturnCompletedData {
            return_id,
            completed_by: actor.id,
            completed_at: now,
        })])
    }

    /// Switches how an approved return is paid out. Asking for the current
    /// type commits nothing.
    pub fn change_refund_type(
        &self,
        return_id: ReturnId,
        new_type: RefundType,
        actor: &Actor,
        now: DateTime<Utc>,
        credit_validity: chrono::Duration,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.authorize(actor, &[Role::Buyer], "change the refund type")?;
        let ret =
            self.reviewable_return(return_id, ReturnStatus::Approved, "change the refund type of")?;

        if ret.refund_type == new_type {
            return Ok(vec![]);
        }

        let leaving_credit = ret.refund_type == RefundType::Credit;
        if let Some(note) = ret.credit_note.as_ref().filter(|_| leaving_credit) {
            if !note.is_untouched() {
                return Err(OrderError::CreditPartiallyUsed {
                    credit_number: note.credit_number.clone(),
                    used: note.used_amount,
                    amount: note.amount,
                });
            }
        }
        let credit_removed = leaving_credit && ret.credit_note.is_some();

        let issued_credit = (new_type == RefundType::Credit)
            .then(|| CreditNote::issue(ret.final_refund_amount, now, credit_validity));

        Ok(vec![OrderEvent::RefundTypeChanged(RefundTypeChangedData {
            return_id,
            from: ret.refund_type,
            to: new_type,
            issued_credit,
            credit_removed,
            changed_by: actor.id,
            changed_at: now,
        })])
    }

    /// Spends part of the credit note attached to a return.
    pub fn redeem_credit(
        &self,
        return_id: ReturnId,
        amount: Money,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        self.authorize(actor, &[Role::Buyer], "redeem credit")?;

        let ret = self.existing_return(return_id)?;
        if !matches!(ret.status, ReturnStatus::Approved | ReturnStatus::Completed) {
            return Err(OrderError::ReturnStateConflict {
                return_id,
                status: ret.status,
                action: "redeem credit from",
            });
        }
        let note = ret
            .credit_note
            .as_ref()
            .ok_or(OrderError::NoCreditNote(return_id))?;
        if !amount.is_positive() {
            return Err(OrderError::InvalidCreditAmount);
        }
        if !note.is_redeemable_at(now) {
            return Err(OrderError::CreditUnavailable {
                credit_number: note.credit_number.clone(),
            });
        }
        if amount > note.balance {
            return Err(OrderError::InsufficientCredit {
                requested: amount,
                balance: note.balance,
            });
        }

        Ok(vec![OrderEvent::CreditRedeemed(CreditRedeemedData {
            return_id,
            amount,
            redeemed_by: actor.id,
            redeemed_at: now,
        })])
    }
}
