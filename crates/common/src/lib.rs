//! Identifier types shared by every crate of the order engine.

mod types;

pub use types::{AggregateId, UserId};
