//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::order::{OrderError, UnknownStatus};

/// Coarse classification callers use to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request itself is malformed.
    Validation,
    NotFound,
    /// Wrong role, or the actor is not a party to the order.
    Authorization,
    /// The request is well formed but the current state forbids it.
    StateConflict,
    /// Retrying the same request may succeed.
    Transient,
    Internal,
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Journal error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("{0}")]
    Order(OrderError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DomainError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::EventStore(e) if e.is_retryable() => ErrorKind::Transient,
            DomainError::EventStore(_) => ErrorKind::Internal,
            DomainError::Order(e) => e.kind(),
            DomainError::NotFound { .. } => ErrorKind::NotFound,
            DomainError::Catalog(_) => ErrorKind::Transient,
            DomainError::Serialization(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// The order error behind this failure, if any.
    pub fn as_order_error(&self) -> Option<&OrderError> {
        match self {
            DomainError::Order(e) => Some(e),
            _ => None,
        }
    }
}

impl From<OrderError> for DomainError {
    fn from(e: OrderError) -> Self {
        DomainError::Order(e)
    }
}

impl From<UnknownStatus> for DomainError {
    fn from(e: UnknownStatus) -> Self {
        DomainError::Order(OrderError::from(e))
    }
}
