//! Bounded channel between committed commands and the notifier.

use std::sync::Arc;

use domain::{SideEffect, SideEffectDispatcher};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::notifier::Notifier;

/// Producer half. Cheap to clone; every clone feeds the same worker.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::Sender<SideEffect>,
}

impl ChannelDispatcher {
    /// Creates a dispatcher and the worker that drains it.
    ///
    /// The worker is not running yet; see [`SideEffectWorker::run`].
    pub fn new(buffer_size: usize, notifier: Arc<dyn Notifier>) -> (Self, SideEffectWorker) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        (Self { sender }, SideEffectWorker { receiver, notifier })
    }

    /// Creates a dispatcher and spawns its worker on the current runtime.
    pub fn spawn(buffer_size: usize, notifier: Arc<dyn Notifier>) -> (Self, JoinHandle<()>) {
        let (dispatcher, worker) = Self::new(buffer_size, notifier);
        (dispatcher, tokio::spawn(worker.run()))
    }
}

impl SideEffectDispatcher for ChannelDispatcher {
    fn dispatch(&self, effect: SideEffect) {
        let kind = effect.kind();
        match self.sender.try_send(effect) {
            Ok(()) => {
                metrics::counter!("side_effects_dispatched_total", "kind" => kind).increment(1);
            }
            Err(TrySendError::Full(_)) => {
                metrics::counter!("side_effects_dropped_total", "reason" => "full").increment(1);
                tracing::warn!(kind, "side-effect channel full, effect dropped");
            }
            Err(TrySendError::Closed(_)) => {
                metrics::counter!("side_effects_dropped_total", "reason" => "closed").increment(1);
                tracing::warn!(kind, "side-effect worker gone, effect dropped");
            }
        }
    }
}

/// Consumer half. Delivers effects one at a time, in dispatch order.
pub struct SideEffectWorker {
    receiver: mpsc::Receiver<SideEffect>,
    notifier: Arc<dyn Notifier>,
}

impl SideEffectWorker {
    /// Runs until every [`ChannelDispatcher`] clone has been dropped and the
    /// channel is drained.
    pub async fn run(mut self) {
        tracing::debug!("side-effect worker started");
        while let Some(effect) = self.receiver.recv().await {
            self.deliver(effect).await;
        }
        tracing::debug!("side-effect worker stopped");
    }

    async fn deliver(&self, effect: SideEffect) {
        let kind = effect.kind();
        let result = match &effect {
            SideEffect::Notify(notification) => self.notifier.notify(notification).await,
            SideEffect::Publish(update) => self.notifier.publish(update).await,
        };
        if let Err(e) = result {
            metrics::counter!("side_effects_failed_total", "kind" => kind).increment(1);
            tracing::error!(kind, error = %e, "side-effect delivery failed");
        }
    }
}
