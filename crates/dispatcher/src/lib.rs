//! Side-effect delivery for the order engine.
//!
//! [`ChannelDispatcher`] is the [`domain::SideEffectDispatcher`] used in
//! production: it hands effects to a bounded channel without waiting, and a
//! background worker passes them to a [`Notifier`]. A full or closed channel
//! drops the effect with a warning; notifier failures are logged and never
//! retried.

pub mod channel;
pub mod notifier;

pub use channel::{ChannelDispatcher, SideEffectWorker};
pub use notifier::{LoggingNotifier, Notifier, NotifyError};
