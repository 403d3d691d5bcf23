//! Aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A fact recorded in an aggregate's journal stream.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Name stored alongside the payload.
    fn event_type(&self) -> &'static str;

    /// Lookup attributes written to the envelope metadata.
    ///
    /// Child entities that are addressed by their own id (a return, for
    /// instance) are resolved back to their stream through these.
    fn metadata(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// State rebuilt by folding a stream of events.
///
/// `apply` is pure and infallible: events are facts that already happened.
/// Validation belongs in the methods that decide which events to emit.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;

    type Error: std::error::Error + Send + Sync;

    fn aggregate_type() -> &'static str;

    /// `None` until the first event has been applied.
    fn id(&self) -> Option<AggregateId>;

    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
