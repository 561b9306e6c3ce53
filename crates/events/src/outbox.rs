//! Post-commit side effects.
//!
//! An order commit produces a list of effects (audit record, group back-fill,
//! Tier-1 allocation, pick-list creation). Each effect is an independent
//! outbox entry: it succeeds or fails on its own, a failure never rolls back
//! the committed order, and failed entries stay pending for a later retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use nursery_core::{EntityId, OrgId, UserId};

use crate::EventEnvelope;

/// Outbox entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxEntryId(pub Uuid);

impl OutboxEntryId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for OutboxEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps one committed order line (by correlation key) to the product group it was ordered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBackfill {
    pub correlation_key: Uuid,
    pub product_group_id: EntityId,
}

/// A best-effort step that runs after the main write has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostCommitEffect {
    /// Write an audit record.
    RecordAudit { envelope: EventEnvelope<JsonValue> },
    /// Copy group ids onto freshly committed order lines.
    BackfillGroupIds {
        order_id: EntityId,
        lines: Vec<GroupBackfill>,
    },
    /// Product-level (Tier-1) reservation for the whole order.
    AllocateTier1 {
        order_id: EntityId,
        actor: Option<UserId>,
    },
    /// Ask the picking subsystem for a pick list, optionally handing it to a team.
    EnsurePickList {
        order_id: EntityId,
        team_id: Option<EntityId>,
    },
}

impl PostCommitEffect {
    pub fn kind(&self) -> &'static str {
        match self {
            PostCommitEffect::RecordAudit { .. } => "record_audit",
            PostCommitEffect::BackfillGroupIds { .. } => "backfill_group_ids",
            PostCommitEffect::AllocateTier1 { .. } => "allocate_tier1",
            PostCommitEffect::EnsurePickList { .. } => "ensure_pick_list",
        }
    }
}

/// Delivery state of an outbox entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    /// Last attempt failed; the entry is retried until `attempts` reaches the limit.
    Failed { error: String },
    /// Retries exhausted.
    Abandoned { error: String },
}

impl OutboxStatus {
    pub fn is_retriable(&self) -> bool {
        matches!(self, OutboxStatus::Pending | OutboxStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxEntryId,
    pub org_id: OrgId,
    pub effect: PostCommitEffect,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn new(org_id: OrgId, effect: PostCommitEffect, now: DateTime<Utc>) -> Self {
        Self {
            id: OutboxEntryId::new(),
            org_id,
            effect,
            status: OutboxStatus::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_delivered(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.status = OutboxStatus::Delivered;
        self.updated_at = now;
    }

    /// Record a failed attempt; abandons the entry once `max_attempts` is reached.
    pub fn mark_failed(&mut self, error: impl Into<String>, max_attempts: u32, now: DateTime<Utc>) {
        self.attempts += 1;
        let error = error.into();
        self.status = if self.attempts >= max_attempts {
            OutboxStatus::Abandoned { error }
        } else {
            OutboxStatus::Failed { error }
        };
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> OutboxEntry {
        OutboxEntry::new(
            OrgId::new(),
            PostCommitEffect::AllocateTier1 {
                order_id: EntityId::new(),
                actor: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn failures_stay_retriable_until_limit() {
        let mut e = entry();
        e.mark_failed("timeout", 3, Utc::now());
        assert!(e.status.is_retriable());
        e.mark_failed("timeout", 3, Utc::now());
        assert!(e.status.is_retriable());
        e.mark_failed("timeout", 3, Utc::now());
        assert_eq!(e.attempts, 3);
        assert!(matches!(e.status, OutboxStatus::Abandoned { .. }));
    }

    #[test]
    fn delivered_is_terminal() {
        let mut e = entry();
        e.mark_delivered(Utc::now());
        assert!(!e.status.is_retriable());
        assert_eq!(e.attempts, 1);
    }

    #[test]
    fn effect_serializes_with_kind_tag() {
        let json = serde_json::to_value(&entry().effect).unwrap();
        assert_eq!(json["kind"], "allocate_tier1");
    }
}
