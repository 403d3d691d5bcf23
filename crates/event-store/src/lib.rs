//! Append-only journal for order aggregates.
//!
//! Every order is one stream of events, versioned from 1. Appends carry the
//! version the writer last saw; a stale version is rejected with
//! [`EventStoreError::ConcurrencyConflict`], which is how concurrent
//! mutations of the same order are serialized.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventQuery;
pub use store::{AppendOptions, EventStore, EventStoreExt};
