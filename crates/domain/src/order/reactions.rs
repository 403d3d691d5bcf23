//! Maps committed order events to notifications and realtime updates.

use common::UserId;

use crate::actor::{Actor, Role};
use crate::aggregate::{Aggregate, DomainEvent};
use crate::effects::{Notification, NotificationTopic, OrderUpdate, SideEffect};

use super::{Order, OrderEvent, OrderStatus, RefundType};

/// Effects for `events`, which `actor` has just committed against `order`.
///
/// `order` is the state after the events were applied. Every event is
/// published; notifications go to the party that did not act.
pub(crate) fn side_effects(order: &Order, actor: &Actor, events: &[OrderEvent]) -> Vec<SideEffect> {
    let Some(order_id) = order.id() else {
        return Vec::new();
    };

    let mut effects = Vec::new();
    for event in events {
        effects.push(SideEffect::Publish(OrderUpdate {
            order_id,
            event_type: event.event_type().to_string(),
            status: order.status(),
        }));

        for (recipient, topic, message) in notifications_for(order, actor, event) {
            effects.push(SideEffect::Notify(Notification {
                recipient,
                order_id,
                order_number: order.order_number().to_string(),
                topic,
                message,
            }));
        }
    }
    effects
}

fn notifications_for(
    order: &Order,
    actor: &Actor,
    event: &OrderEvent,
) -> Vec<(UserId, NotificationTopic, String)> {
    let number = order.order_number();
    let buyer = order.buyer_id();
    let seller = order.seller_id();

    let counterparties = || -> Vec<UserId> {
        match actor.role {
            Role::Buyer => seller.into_iter().collect(),
            Role::Seller => buyer.into_iter().collect(),
            Role::Admin | Role::System => buyer.into_iter().chain(seller).collect(),
        }
    };
    let to = |recipients: Vec<UserId>, topic: NotificationTopic, message: String| {
        recipients
            .into_iter()
            .map(|recipient| (recipient, topic, message.clone()))
            .collect::<Vec<_>>()
    };

    match event {
        OrderEvent::StatusChanged(data) => match data.entry.new_status {
            OrderStatus::Confirmed => to(
                buyer.into_iter().collect(),
                NotificationTopic::OrderConfirmed,
                format!("Order {number} has been confirmed"),
            ),
            OrderStatus::Delivered => to(
                buyer.into_iter().collect(),
                NotificationTopic::OrderDelivered,
                format!("Order {number} has been delivered"),
            ),
            OrderStatus::Completed => to(
                counterparties(),
                NotificationTopic::OrderCompleted,
                format!("Order {number} is complete"),
            ),
            OrderStatus::Canceled => to(
                counterparties(),
                NotificationTopic::OrderCanceled,
                match &data.entry.note {
                    Some(note) => format!("Order {number} was canceled: {note}"),
                    None => format!("Order {number} was canceled"),
                },
            ),
            _ => Vec::new(),
        },

        OrderEvent::ItemAdded(data) => to(
            counterparties(),
            NotificationTopic::ItemsChanged,
            format!("{} was added to order {number}", data.item.product_name),
        ),
        OrderEvent::ItemQuantityIncreased(data) => to(
            counterparties(),
            NotificationTopic::ItemsChanged,
            format!("Quantity raised to {} on order {number}", data.quantity),
        ),
        OrderEvent::ItemRemoved(data) => {
            let name = order
                .item(data.item_id)
                .map(|item| item.product_name.as_str())
                .unwrap_or("An item");
            to(
                buyer.into_iter().collect(),
                NotificationTopic::ItemsChanged,
                format!("{name} was removed from order {number}: {}", data.reason),
            )
        }
        OrderEvent::ItemSubstituted(data) => to(
            seller.into_iter().collect(),
            NotificationTopic::ItemsChanged,
            format!(
                "The buyer substituted {} on order {number}",
                data.replacement.product_name
            ),
        ),

        OrderEvent::IssueReported(data) => to(
            buyer.into_iter().collect(),
            NotificationTopic::IssueReported,
            format!("Problem with order {number}: {}", data.issue.description),
        ),
        OrderEvent::IssueAnswered(data) => to(
            seller.into_iter().collect(),
            NotificationTopic::IssueAnswered,
            if data.accepted {
                format!("The buyer accepted the proposal on order {number}")
            } else {
                format!("The buyer rejected the proposal on order {number}")
            },
        ),

        OrderEvent::ReturnRequested(data) => to(
            seller.into_iter().collect(),
            NotificationTopic::ReturnRequested,
            format!(
                "Return {} requested on order {number} for {}",
                data.ret.return_number, data.ret.final_refund_amount
            ),
        ),
        OrderEvent::ReturnApproved(data)
        | OrderEvent::ReturnRejected(data) => {
            let ret = order.find_return(data.return_id);
            let label = ret.map(|r| r.return_number.as_str()).unwrap_or("Your return");
            let status = ret.map(|r| r.status.to_string()).unwrap_or_default();
            to(
                buyer.into_iter().collect(),
                NotificationTopic::ReturnReviewed,
                format!("{label} is now {status}"),
            )
        }
        OrderEvent::ReturnCompleted(data) => {
            let label = order
                .find_return(data.return_id)
                .map(|r| r.return_number.as_str())
                .unwrap_or("Your return");
            to(
                buyer.into_iter().collect(),
                NotificationTopic::ReturnReviewed,
                format!("{label} is complete"),
            )
        }
        OrderEvent::RefundTypeChanged(data) if data.to == RefundType::Credit => {
            match &data.issued_credit {
                Some(note) => to(
                    buyer.into_iter().collect(),
                    NotificationTopic::CreditIssued,
                    format!(
                        "Credit note {} for {} issued on order {number}",
                        note.credit_number, note.amount
                    ),
                ),
                None => Vec::new(),
            }
        }

        OrderEvent::OrderPlaced(_)
        | OrderEvent::IssueResolved(_)
        | OrderEvent::RefundTypeChanged(_)
        | OrderEvent::CreditRedeemed(_) => Vec::new(),
    }
}
