//! Who is acting on an order.

use common::UserId;
use serde::{Deserialize, Serialize};

/// Role under which an actor performs a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
    /// Automated producers such as the recurring-order scheduler.
    System,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Buyer, Role::Seller, Role::Admin, Role::System];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "BUYER",
            Role::Seller => "SELLER",
            Role::Admin => "ADMIN",
            Role::System => "SYSTEM",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An identity already resolved by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: UserId, name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            name: name.into(),
            role,
        }
    }

    pub fn buyer(id: UserId, name: impl Into<String>) -> Self {
        Self::new(id, name, Role::Buyer)
    }

    pub fn seller(id: UserId, name: impl Into<String>) -> Self {
        Self::new(id, name, Role::Seller)
    }

    pub fn admin(id: UserId, name: impl Into<String>) -> Self {
        Self::new(id, name, Role::Admin)
    }

    /// The scheduler and other automated producers.
    pub fn system(name: impl Into<String>) -> Self {
        Self::new(UserId::from_uuid(uuid::Uuid::nil()), name, Role::System)
    }
}
