//! Post-commit effect processor.
//!
//! Runs outbox entries one by one against the store. Each entry succeeds or
//! fails on its own: a failure is logged, recorded on the entry (which stays
//! retriable until `max_attempts`), and never affects the other entries or
//! the write that produced them.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use nursery_core::OrgId;
use nursery_dispatch::PickingTeamId;
use nursery_events::{OutboxEntry, OutboxEntryId, PostCommitEffect};
use nursery_inventory::Tier1Outcome;
use nursery_sales::OrderId;

use crate::error::StoreError;
use crate::picking::PickListId;
use crate::stores::NurseryStore;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// What a delivered effect produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectOutput {
    Recorded,
    Backfilled { lines: usize },
    Tier1(Tier1Outcome),
    PickList { id: PickListId, created: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EffectOutcome {
    Delivered(EffectOutput),
    Failed { error: String, abandoned: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectReport {
    pub entry_id: OutboxEntryId,
    pub kind: &'static str,
    pub outcome: EffectOutcome,
}

impl EffectReport {
    pub fn tier1(&self) -> Option<&Tier1Outcome> {
        match &self.outcome {
            EffectOutcome::Delivered(EffectOutput::Tier1(outcome)) => Some(outcome),
            _ => None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, EffectOutcome::Delivered(_))
    }
}

pub struct OutboxProcessor {
    store: Arc<dyn NurseryStore>,
    max_attempts: u32,
}

impl OutboxProcessor {
    pub fn new(store: Arc<dyn NurseryStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Run already-enqueued entries in the given order.
    pub async fn run(&self, entries: &[OutboxEntry]) -> Vec<EffectReport> {
        let mut reports = Vec::with_capacity(entries.len());
        for entry in entries {
            reports.push(self.run_one(entry).await);
        }
        reports
    }

    /// Retry every retriable entry of the organization.
    pub async fn drain(&self, org_id: OrgId, limit: usize) -> Result<Vec<EffectReport>, StoreError> {
        let pending = self.store.pending(org_id, limit).await?;
        info!(org_id = %org_id, pending = pending.len(), "draining outbox");
        Ok(self.run(&pending).await)
    }

    async fn run_one(&self, entry: &OutboxEntry) -> EffectReport {
        let kind = entry.effect.kind();
        let outcome = match self.execute(entry.org_id, &entry.effect).await {
            Ok(output) => {
                if let Err(e) = self.store.mark_delivered(entry.id, Utc::now()).await {
                    warn!(entry_id = %entry.id, kind, error = %e, "failed to mark outbox entry delivered");
                }
                debug!(entry_id = %entry.id, kind, "post-commit effect delivered");
                EffectOutcome::Delivered(output)
            }
            Err(err) => {
                let error = err.to_string();
                warn!(
                    org_id = %entry.org_id,
                    entry_id = %entry.id,
                    kind,
                    attempt = entry.attempts + 1,
                    error = %error,
                    "post-commit effect failed"
                );
                let abandoned = match self
                    .store
                    .mark_failed(entry.id, &error, self.max_attempts, Utc::now())
                    .await
                {
                    Ok(updated) => !updated.status.is_retriable(),
                    Err(e) => {
                        warn!(entry_id = %entry.id, kind, error = %e, "failed to record outbox failure");
                        false
                    }
                };
                EffectOutcome::Failed { error, abandoned }
            }
        };
        EffectReport {
            entry_id: entry.id,
            kind,
            outcome,
        }
    }

    async fn execute(&self, org_id: OrgId, effect: &PostCommitEffect) -> Result<EffectOutput, StoreError> {
        match effect {
            PostCommitEffect::RecordAudit { envelope } => {
                self.store.record(envelope).await?;
                Ok(EffectOutput::Recorded)
            }
            PostCommitEffect::BackfillGroupIds { order_id, lines } => {
                let updated = self
                    .store
                    .backfill_group_ids(org_id, OrderId(*order_id), lines)
                    .await?;
                if updated != lines.len() {
                    warn!(
                        order_id = %order_id,
                        expected = lines.len(),
                        updated,
                        "group back-fill matched fewer lines than requested"
                    );
                }
                Ok(EffectOutput::Backfilled { lines: updated })
            }
            PostCommitEffect::AllocateTier1 { order_id, actor } => {
                let outcome = self
                    .store
                    .allocate_tier1(org_id, OrderId(*order_id), *actor)
                    .await?;
                if outcome.has_oversell_warning {
                    info!(
                        order_id = %order_id,
                        oversold_lines = outcome.oversell_items.len(),
                        "order committed with oversell warning"
                    );
                }
                Ok(EffectOutput::Tier1(outcome))
            }
            PostCommitEffect::EnsurePickList { order_id, team_id } => {
                let order_id = OrderId(*order_id);
                let (pick_list, created) = match self
                    .store
                    .get_pick_list_for_order(org_id, order_id)
                    .await?
                {
                    Some(existing) => (existing, false),
                    None => (
                        self.store.create_pick_list_from_order(org_id, order_id).await?,
                        true,
                    ),
                };
                if let Some(team) = team_id {
                    self.store
                        .assign_pick_list_to_team(org_id, pick_list.id, PickingTeamId(*team))
                        .await?;
                }
                Ok(EffectOutput::PickList {
                    id: pick_list.id,
                    created,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nursery_core::EntityId;
    use nursery_events::{EventEnvelope, OutboxStatus};
    use nursery_products::{Product, ProductId, SkuId};
    use nursery_parties::{Customer, CustomerId};
    use nursery_pricing::PriceSource;
    use nursery_sales::{NewOrder, NewOrderLine, OrderStatus};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use crate::memory::{FailurePoint, InMemoryStore};
    use crate::stores::{OrderStore, OutboxStore};

    async fn committed(store: &InMemoryStore) -> (OrgId, OrderId) {
        let org = OrgId::new();
        let customer = CustomerId::new();
        let product = ProductId::new();
        store.seed_customer(Customer::new(customer, org, "Garden Centre"));
        store.seed_product(Product::new(product, org, SkuId::new(), "Lavender 2L"));
        let order_id = store
            .commit_order(&NewOrder {
                org_id: org,
                customer_id: customer,
                order_number: "SO-20260410-0A0A0A".to_string(),
                status: OrderStatus::Confirmed,
                delivery_date: None,
                notes: None,
                ship_to_address_id: None,
                created_by: None,
                lines: vec![NewOrderLine {
                    line_no: 1,
                    correlation_key: Uuid::now_v7(),
                    product_id: product,
                    product_group_id: None,
                    description: "Lavender 2L".to_string(),
                    quantity: 3,
                    unit_price: dec!(4.50),
                    vat_rate: dec!(13.5),
                    price_source: PriceSource::LineOverride,
                }],
            })
            .await
            .unwrap();
        (org, order_id)
    }

    fn audit(org: OrgId, order_id: OrderId) -> PostCommitEffect {
        PostCommitEffect::RecordAudit {
            envelope: EventEnvelope::new(
                Uuid::now_v7(),
                org,
                order_id.0,
                "sales.order",
                "sales.order.committed",
                1,
                Utc::now(),
                None,
                serde_json::json!({ "order_id": order_id }),
            ),
        }
    }

    #[tokio::test]
    async fn failed_effect_does_not_stop_the_others() {
        let store = Arc::new(InMemoryStore::new());
        let (org, order_id) = committed(&store).await;
        store.fail_next(FailurePoint::RecordAudit, "audit table locked");

        let entries = vec![
            OutboxEntry::new(org, audit(org, order_id), Utc::now()),
            OutboxEntry::new(
                org,
                PostCommitEffect::AllocateTier1 {
                    order_id: order_id.0,
                    actor: None,
                },
                Utc::now(),
            ),
        ];
        store.enqueue(&entries).await.unwrap();

        let processor = OutboxProcessor::new(store.clone());
        let reports = processor.run(&entries).await;

        assert!(!reports[0].is_delivered());
        let tier1 = reports[1].tier1().unwrap();
        assert!(tier1.has_oversell_warning);

        let stored = store.outbox_entries();
        assert!(matches!(stored[0].status, OutboxStatus::Failed { .. }));
        assert_eq!(stored[1].status, OutboxStatus::Delivered);
    }

    #[tokio::test]
    async fn drain_retries_failed_entries() {
        let store = Arc::new(InMemoryStore::new());
        let (org, order_id) = committed(&store).await;
        store.fail_next(FailurePoint::RecordAudit, "audit table locked");

        let entries = vec![OutboxEntry::new(org, audit(org, order_id), Utc::now())];
        store.enqueue(&entries).await.unwrap();
        let processor = OutboxProcessor::new(store.clone());
        processor.run(&entries).await;
        assert!(store.audit_records().is_empty());

        let reports = processor.drain(org, 10).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_delivered());
        assert_eq!(store.audit_records().len(), 1);
        assert!(store.pending(org, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_attempt_limit_abandons_immediately() {
        let store = Arc::new(InMemoryStore::new());
        let (org, order_id) = committed(&store).await;
        store.fail_next(FailurePoint::CreatePickList, "picking offline");

        let entries = vec![OutboxEntry::new(
            org,
            PostCommitEffect::EnsurePickList {
                order_id: order_id.0,
                team_id: None,
            },
            Utc::now(),
        )];
        store.enqueue(&entries).await.unwrap();
        let reports = OutboxProcessor::new(store.clone())
            .with_max_attempts(1)
            .run(&entries)
            .await;

        assert_eq!(
            reports[0].outcome,
            EffectOutcome::Failed {
                error: "picking offline".to_string(),
                abandoned: true,
            }
        );
    }

    #[tokio::test]
    async fn pick_list_is_reused_and_handed_to_team() {
        let store = Arc::new(InMemoryStore::new());
        let (org, order_id) = committed(&store).await;
        let team = EntityId::new();
        let effect = |team_id| PostCommitEffect::EnsurePickList {
            order_id: order_id.0,
            team_id,
        };
        let entries = vec![
            OutboxEntry::new(org, effect(None), Utc::now()),
            OutboxEntry::new(org, effect(Some(team)), Utc::now()),
        ];
        store.enqueue(&entries).await.unwrap();

        let reports = OutboxProcessor::new(store.clone()).run(&entries).await;
        let created: Vec<bool> = reports
            .iter()
            .map(|r| match &r.outcome {
                EffectOutcome::Delivered(EffectOutput::PickList { created, .. }) => *created,
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect();
        assert_eq!(created, vec![true, false]);

        let lists = store.pick_lists();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].team_id, Some(PickingTeamId(team)));
    }
}
