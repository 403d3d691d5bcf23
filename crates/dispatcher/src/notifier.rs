//! Delivery targets for side effects.

use async_trait::async_trait;
use domain::{Notification, OrderUpdate};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Recipient unreachable: {0}")]
    Unreachable(String),
}

/// Sends notifications and realtime updates to the outside world.
///
/// Called from the dispatcher worker, never from a command path.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;

    async fn publish(&self, update: &OrderUpdate) -> Result<(), NotifyError>;
}

/// Writes every effect to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %notification.recipient,
            order_id = %notification.order_id,
            order_number = %notification.order_number,
            topic = ?notification.topic,
            "{}",
            notification.message
        );
        Ok(())
    }

    async fn publish(&self, update: &OrderUpdate) -> Result<(), NotifyError> {
        tracing::debug!(
            order_id = %update.order_id,
            event_type = %update.event_type,
            status = %update.status,
            "order update"
        );
        Ok(())
    }
}
