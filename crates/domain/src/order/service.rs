//! Order service: the entry point callers use to drive orders.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::AggregateId;
use event_store::{EventQuery, EventStore, EventStoreExt};

use crate::actor::Actor;
use crate::aggregate::Aggregate;
use crate::catalog::{Product, ProductCatalog, ProductId};
use crate::command::{CommandHandler, CommandResult};
use crate::effects::SideEffectDispatcher;
use crate::error::{DomainError, ErrorKind};
use crate::ledger::Money;
use crate::settings::EngineSettings;

use super::reactions::side_effects;
use super::{
    CreateReturn, CreditNote, IssueDetails, IssueId, ItemId, Order, OrderError, OrderEvent,
    OrderIssue, OrderItem, OrderStatus, PlaceOrder, RefundType, Return, ReturnId,
    StatusHistoryEntry, SubstituteItem,
};

/// Result of a status change request.
///
/// A transition the table or the dispute gate refuses is a normal outcome:
/// `updated` is false and `message` says why. Nothing is recorded.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub updated: bool,
    pub order: Option<Order>,
    pub audit_entry: Option<StatusHistoryEntry>,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ItemAdded {
    pub item: OrderItem,
    pub new_total: Money,
    pub order: Order,
}

#[derive(Debug, Clone)]
pub struct ItemRemoved {
    pub new_total: Money,
    pub remaining_item_count: usize,
    pub order: Order,
}

#[derive(Debug, Clone)]
pub struct ItemSubstituted {
    pub new_total: Money,
    pub substituted_item: OrderItem,
    pub new_item: OrderItem,
    pub order: Order,
}

#[derive(Debug, Clone)]
pub struct IssueReport {
    pub issue: OrderIssue,
    pub order: Order,
}

#[derive(Debug, Clone)]
pub struct IssueAnswer {
    pub issue: OrderIssue,
    /// Issues still holding the order back.
    pub pending_issues: usize,
    pub can_lock: bool,
    pub order: Order,
}

/// Drives orders through the journal.
///
/// Every mutation loads the order, decides its events, appends them under
/// optimistic concurrency and, once the append has returned, hands the
/// resulting side effects to the dispatcher.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
    catalog: Arc<dyn ProductCatalog>,
    dispatcher: Arc<dyn SideEffectDispatcher>,
    settings: EngineSettings,
}

impl<S: EventStore> OrderService<S> {
    pub fn new(
        store: S,
        catalog: Arc<dyn ProductCatalog>,
        dispatcher: Arc<dyn SideEffectDispatcher>,
    ) -> Self {
        Self::with_settings(store, catalog, dispatcher, EngineSettings::default())
    }

    pub fn with_settings(
        store: S,
        catalog: Arc<dyn ProductCatalog>,
        dispatcher: Arc<dyn SideEffectDispatcher>,
        settings: EngineSettings,
    ) -> Self {
        let handler = CommandHandler::new(store)
            .with_commit_timeout(settings.commit_timeout)
            .with_max_conflict_retries(settings.max_conflict_retries);
        Self {
            handler,
            catalog,
            dispatcher,
            settings,
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Places an order priced from the catalog.
    #[tracing::instrument(skip(self, cmd, actor), fields(order_id = %cmd.order_id, actor = %actor.id))]
    pub async fn place_order(&self, cmd: PlaceOrder, actor: &Actor) -> Result<Order, DomainError> {
        let mut lines = Vec::with_capacity(cmd.lines.len());
        for (product_id, quantity) in &cmd.lines {
            lines.push((self.product(product_id).await?, *quantity));
        }

        let now = Utc::now();
        let result = self
            .run(cmd.order_id, actor, "place_order", |order| {
                order.place(
                    cmd.order_id,
                    cmd.buyer_id,
                    cmd.seller_id,
                    &lines,
                    cmd.notes.clone(),
                    actor,
                    now,
                )
            })
            .await?;

        tracing::info!(
            order_number = result.aggregate.order_number(),
            total = %result.aggregate.total_amount(),
            "order placed"
        );
        Ok(result.aggregate)
    }

    /// Moves an order to `new_status`.
    #[tracing::instrument(skip(self, actor, notes), fields(actor = %actor.id, role = %actor.role))]
    pub async fn transition_status(
        &self,
        order_id: AggregateId,
        new_status: OrderStatus,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<TransitionOutcome, DomainError> {
        let now = Utc::now();
        let result = self
            .run(order_id, actor, "transition_status", |order| {
                order.transition(new_status, actor, notes.clone(), now)
            })
            .await;

        match result {
            Ok(committed) => {
                let order = committed.aggregate;
                let audit_entry = order.history().last().cloned();
                if let Some(entry) = &audit_entry {
                    metrics::counter!("order_transitions_total", "to" => new_status.as_str())
                        .increment(1);
                    tracing::info!(
                        from = %entry.previous_status,
                        to = %entry.new_status,
                        "order status changed"
                    );
                }
                Ok(TransitionOutcome {
                    updated: true,
                    order: Some(order),
                    audit_entry,
                    message: None,
                })
            }
            Err(DomainError::Order(e @ OrderError::TransitionDenied { .. })) => {
                metrics::counter!("order_transitions_denied_total").increment(1);
                Ok(TransitionOutcome {
                    updated: false,
                    order: None,
                    audit_entry: None,
                    message: Some(e.to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Adds a product, or tops up the line that already has it.
    #[tracing::instrument(skip(self, note, actor), fields(actor = %actor.id))]
    pub async fn add_item(
        &self,
        order_id: AggregateId,
        product_id: ProductId,
        quantity: u32,
        note: Option<String>,
        actor: &Actor,
    ) -> Result<ItemAdded, DomainError> {
        let product = self.product(&product_id).await?;

        let result = self
            .run(order_id, actor, "add_item", |order| {
                order.add_item(&product, quantity, note.clone(), actor)
            })
            .await?;
        metrics::counter!("order_item_mutations_total", "op" => "add").increment(1);

        let order = result.aggregate;
        let item_id = result.events.iter().find_map(|event| match event {
            OrderEvent::ItemAdded(data) => Some(data.item.id),
            OrderEvent::ItemQuantityIncreased(data) => Some(data.item_id),
            _ => None,
        });
        let item = item_id
            .and_then(|id| order.item(id))
            .cloned()
            .ok_or_else(|| DomainError::not_found("item", &product_id))?;

        Ok(ItemAdded {
            item,
            new_total: order.total_amount(),
            order,
        })
    }

    /// Retires a line. Removing the last active line cancels the order.
    #[tracing::instrument(skip(self, reason, actor), fields(actor = %actor.id))]
    pub async fn remove_item(
        &self,
        order_id: AggregateId,
        item_id: ItemId,
        reason: &str,
        actor: &Actor,
    ) -> Result<ItemRemoved, DomainError> {
        let now = Utc::now();
        let result = self
            .run(order_id, actor, "remove_item", |order| {
                order.remove_item(item_id, reason, actor, now)
            })
            .await?;
        metrics::counter!("order_item_mutations_total", "op" => "remove").increment(1);

        let order = result.aggregate;
        if order.status() == OrderStatus::Canceled {
            tracing::info!("last item removed, order canceled");
        }
        Ok(ItemRemoved {
            new_total: order.total_amount(),
            remaining_item_count: order.active_item_count(),
            order,
        })
    }

    /// Replaces a line with another catalog product.
    #[tracing::instrument(skip(self, cmd, actor), fields(order_id = %cmd.order_id, item_id = %cmd.item_id))]
    pub async fn substitute_item(
        &self,
        cmd: SubstituteItem,
        actor: &Actor,
    ) -> Result<ItemSubstituted, DomainError> {
        let replacement = self.product(&cmd.new_product_id).await?;

        let now = Utc::now();
        let result = self
            .run(cmd.order_id, actor, "substitute_item", |order| {
                order.substitute_item(
                    cmd.item_id,
                    &replacement,
                    &cmd.new_product_name,
                    &cmd.reason,
                    cmd.quantity,
                    actor,
                    now,
                )
            })
            .await?;
        metrics::counter!("order_item_mutations_total", "op" => "substitute").increment(1);

        let order = result.aggregate;
        let new_item = result
            .events
            .iter()
            .find_map(|event| match event {
                OrderEvent::ItemSubstituted(data) => Some(data.replacement.clone()),
                _ => None,
            })
            .ok_or_else(|| DomainError::not_found("item", cmd.item_id))?;
        let substituted_item = order
            .item(cmd.item_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("item", cmd.item_id))?;

        Ok(ItemSubstituted {
            new_total: order.total_amount(),
            substituted_item,
            new_item,
            order,
        })
    }

    /// Records a problem found by the seller.
    #[tracing::instrument(skip(self, details, actor), fields(actor = %actor.id))]
    pub async fn report_issue(
        &self,
        order_id: AggregateId,
        details: IssueDetails,
        actor: &Actor,
    ) -> Result<IssueReport, DomainError> {
        let now = Utc::now();
        let result = self
            .run(order_id, actor, "report_issue", |order| {
                order.report_issue(details.clone(), actor, now)
            })
            .await?;
        metrics::counter!("order_issues_reported_total").increment(1);

        let issue_id = result.events.iter().find_map(|event| match event {
            OrderEvent::IssueReported(data) => Some(data.issue.id),
            _ => None,
        });
        let order = result.aggregate;
        let issue = issue_id
            .and_then(|id| order.issue(id))
            .cloned()
            .ok_or_else(|| DomainError::not_found("issue", order_id))?;

        Ok(IssueReport { issue, order })
    }

    /// The buyer's answer to a reported issue.
    #[tracing::instrument(skip(self, response, actor), fields(actor = %actor.id))]
    pub async fn respond_to_issue(
        &self,
        order_id: AggregateId,
        issue_id: IssueId,
        accepted: bool,
        response: &str,
        actor: &Actor,
    ) -> Result<IssueAnswer, DomainError> {
        let now = Utc::now();
        let result = self
            .run(order_id, actor, "respond_to_issue", |order| {
                order.answer_issue(issue_id, accepted, response, actor, now)
            })
            .await?;

        let order = result.aggregate;
        let issue = order
            .issue(issue_id)
            .cloned()
            .ok_or_else(|| DomainError::from(OrderError::IssueNotFound(issue_id)))?;

        Ok(IssueAnswer {
            issue,
            pending_issues: order.pending_issue_count(),
            can_lock: order.can_lock(),
            order,
        })
    }

    /// Opens a return against a delivered order.
    #[tracing::instrument(skip(self, cmd, actor), fields(order_id = %cmd.order_id, actor = %actor.id))]
    pub async fn create_return(
        &self,
        cmd: CreateReturn,
        actor: &Actor,
    ) -> Result<Return, DomainError> {
        let now = Utc::now();
        let validity = self.settings.credit_note_validity();
        let result = self
            .run(cmd.order_id, actor, "create_return", |order| {
                order.request_return(
                    &cmd.lines,
                    cmd.reason,
                    cmd.reason_details.clone(),
                    cmd.refund_type,
                    actor,
                    now,
                    validity,
                )
            })
            .await;

        let result = match result {
            Err(DomainError::Order(OrderError::RefundExceedsAvailable(shortfall))) => {
                metrics::counter!("order_refund_rejections_total").increment(1);
                tracing::info!(
                    requested = %shortfall.requested,
                    available = %shortfall.available,
                    already_returned = %shortfall.already_returned,
                    "return refused, refund exceeds what is left"
                );
                return Err(OrderError::RefundExceedsAvailable(shortfall).into());
            }
            other => other?,
        };
        metrics::counter!("order_returns_created_total").increment(1);

        result
            .events
            .into_iter()
            .find_map(|event| match event {
                OrderEvent::ReturnRequested(data) => result.aggregate.find_return(data.ret.id).cloned(),
                _ => None,
            })
            .ok_or_else(|| DomainError::not_found("return", cmd.order_id))
    }

    #[tracing::instrument(skip(self, note, actor), fields(actor = %actor.id))]
    pub async fn approve_return(
        &self,
        return_id: ReturnId,
        note: Option<String>,
        actor: &Actor,
    ) -> Result<Return, DomainError> {
        let order_id = self.locate_return(return_id).await?;
        let now = Utc::now();
        let result = self
            .run(order_id, actor, "approve_return", |order| {
                order.approve_return(return_id, note.clone(), actor, now)
            })
            .await?;
        Self::committed_return(&result.aggregate, return_id)
    }

    #[tracing::instrument(skip(self, reason, actor), fields(actor = %actor.id))]
    pub async fn reject_return(
        &self,
        return_id: ReturnId,
        reason: &str,
        actor: &Actor,
    ) -> Result<Return, DomainError> {
        let order_id = self.locate_return(return_id).await?;
        let now = Utc::now();
        let result = self
            .run(order_id, actor, "reject_return", |order| {
                order.reject_return(return_id, reason, actor, now)
            })
            .await?;
        Self::committed_return(&result.aggregate, return_id)
    }

    #[tracing::instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn complete_return(
        &self,
        return_id: ReturnId,
        actor: &Actor,
    ) -> Result<Return, DomainError> {
        let order_id = self.locate_return(return_id).await?;
        let now = Utc::now();
        let result = self
            .run(order_id, actor, "complete_return", |order| {
                order.complete_return(return_id, actor, now)
            })
            .await?;
        Self::committed_return(&result.aggregate, return_id)
    }

    /// Switches the payout of an approved return. Asking for the current
    /// type returns the return unchanged.
    #[tracing::instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn change_refund_type(
        &self,
        return_id: ReturnId,
        new_type: RefundType,
        actor: &Actor,
    ) -> Result<Return, DomainError> {
        let order_id = self.locate_return(return_id).await?;
        let now = Utc::now();
        let validity = self.settings.credit_note_validity();
        let result = self
            .run(order_id, actor, "change_refund_type", |order| {
                order.change_refund_type(return_id, new_type, actor, now, validity)
            })
            .await?;
        if result.events.is_empty() {
            tracing::debug!(%new_type, "refund type unchanged");
        }
        Self::committed_return(&result.aggregate, return_id)
    }

    /// Spends `amount` from the credit note of a return.
    #[tracing::instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn redeem_credit(
        &self,
        return_id: ReturnId,
        amount: Money,
        actor: &Actor,
    ) -> Result<CreditNote, DomainError> {
        let order_id = self.locate_return(return_id).await?;
        let now = Utc::now();
        let result = self
            .run(order_id, actor, "redeem_credit", |order| {
                order.redeem_credit(return_id, amount, actor, now)
            })
            .await?;
        Self::committed_return(&result.aggregate, return_id)?
            .credit_note
            .ok_or_else(|| OrderError::NoCreditNote(return_id).into())
    }

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }

    /// Audit trail of an order, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn status_history(
        &self,
        order_id: AggregateId,
    ) -> Result<Vec<StatusHistoryEntry>, DomainError> {
        let order = self
            .get_order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("order", order_id))?;
        Ok(order.history().to_vec())
    }

    #[tracing::instrument(skip(self))]
    pub async fn find_return(&self, return_id: ReturnId) -> Result<Option<Return>, DomainError> {
        let Some(order_id) = self
            .handler
            .store()
            .locate("return_id", &return_id.to_string())
            .await?
        else {
            return Ok(None);
        };
        let order = self.handler.load(order_id).await?;
        Ok(order.find_return(return_id).cloned())
    }

    #[tracing::instrument(skip(self))]
    pub async fn find_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Order>, DomainError> {
        let query = EventQuery::with_metadata("order_number", order_number)
            .aggregate_type(Order::aggregate_type())
            .limit(1);
        let Some(envelope) = self.handler.store().query_events(query).await?.into_iter().next()
        else {
            return Ok(None);
        };
        self.get_order(envelope.aggregate_id).await
    }

    async fn product(&self, product_id: &ProductId) -> Result<Product, DomainError> {
        self.catalog
            .product(product_id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", product_id))
    }

    async fn locate_return(&self, return_id: ReturnId) -> Result<AggregateId, DomainError> {
        self.handler
            .store()
            .locate("return_id", &return_id.to_string())
            .await?
            .ok_or_else(|| OrderError::ReturnNotFound(return_id).into())
    }

    fn committed_return(order: &Order, return_id: ReturnId) -> Result<Return, DomainError> {
        order
            .find_return(return_id)
            .cloned()
            .ok_or_else(|| OrderError::ReturnNotFound(return_id).into())
    }

    /// Executes one command, times it, and dispatches the effects of what
    /// was committed. Rejections are logged; authorization failures go to
    /// the `security` target.
    async fn run<F>(
        &self,
        order_id: AggregateId,
        actor: &Actor,
        op: &'static str,
        decide: F,
    ) -> Result<CommandResult<Order>, DomainError>
    where
        F: Fn(&Order) -> Result<Vec<OrderEvent>, OrderError>,
    {
        let started = Instant::now();
        let result = self.handler.execute(order_id, decide).await;
        metrics::histogram!("order_command_duration_seconds", "op" => op)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(committed) => {
                for effect in side_effects(&committed.aggregate, actor, &committed.events) {
                    self.dispatcher.dispatch(effect);
                }
            }
            Err(e) if e.kind() == ErrorKind::Authorization => {
                tracing::warn!(
                    target: "security",
                    %order_id,
                    actor_id = %actor.id,
                    role = %actor.role,
                    op,
                    error = %e,
                    "unauthorized order command"
                );
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(%order_id, op, error = %e, "order command failed");
            }
            Err(e) => {
                tracing::debug!(%order_id, op, error = %e, "order command rejected");
            }
        }
        result
    }
}
