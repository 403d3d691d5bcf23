use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};

use crate::actor::{Actor, Role};

use super::OrderStatus;

/// One committed status change. Never edited after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub previous_status: OrderStatus,
    pub new_status: OrderStatus,
    pub actor_id: UserId,
    pub actor_name: String,
    pub actor_role: Role,
    pub note: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl StatusHistoryEntry {
    pub fn record(
        from: OrderStatus,
        to: OrderStatus,
        actor: &Actor,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            previous_status: from,
            new_status: to,
            actor_id: actor.id,
            actor_name: actor.name.clone(),
            actor_role: actor.role,
            note,
            changed_at: at,
        }
    }
}
