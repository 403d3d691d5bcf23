//! Side effects scheduled after an order mutation commits.
//!
//! Effects are handed to a [`SideEffectDispatcher`] once the journal append
//! has returned. Dispatching never blocks and never fails from the caller's
//! point of view; a lost notification does not undo a committed mutation.

use std::sync::Mutex;

use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::order::OrderStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTopic {
    OrderConfirmed,
    OrderDelivered,
    OrderCompleted,
    OrderCanceled,
    ItemsChanged,
    IssueReported,
    IssueAnswered,
    ReturnRequested,
    ReturnReviewed,
    CreditIssued,
}

/// A message for one participant of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: UserId,
    pub order_id: AggregateId,
    pub order_number: String,
    pub topic: NotificationTopic,
    pub message: String,
}

/// Realtime update pushed to everyone watching an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: AggregateId,
    pub event_type: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "effect", rename_all = "snake_case")]
pub enum SideEffect {
    Notify(Notification),
    Publish(OrderUpdate),
}

impl SideEffect {
    pub fn kind(&self) -> &'static str {
        match self {
            SideEffect::Notify(_) => "notify",
            SideEffect::Publish(_) => "publish",
        }
    }
}

/// Receives side effects after commit.
///
/// Implementations must return immediately; any I/O happens elsewhere.
pub trait SideEffectDispatcher: Send + Sync {
    fn dispatch(&self, effect: SideEffect);
}

/// Drops every effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatcher;

impl SideEffectDispatcher for NoopDispatcher {
    fn dispatch(&self, _effect: SideEffect) {}
}

/// Keeps every dispatched effect in memory.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    effects: Mutex<Vec<SideEffect>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn effects(&self) -> Vec<SideEffect> {
        self.effects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.effects()
            .into_iter()
            .filter_map(|effect| match effect {
                SideEffect::Notify(n) => Some(n),
                SideEffect::Publish(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.effects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl SideEffectDispatcher for RecordingDispatcher {
    fn dispatch(&self, effect: SideEffect) {
        self.effects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(effect);
    }
}
