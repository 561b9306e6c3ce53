//! Public actions of the order, allocation and dispatch core.
//!
//! Each action is one short unit of work: validate, load what it needs, run
//! the pure domain logic, write through the store, then run post-commit
//! effects through the outbox. Effects never fail the action.

mod allocation;
mod dispatch;
mod orders;

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use nursery_core::{EntityId, OrgId, UserId};
use nursery_events::{Event, EventEnvelope, OutboxEntry, PostCommitEffect};
use nursery_infra::{EffectReport, InMemoryStore, NurseryStore, OutboxProcessor, PgStore, StoreError};
use nursery_pricing::PriceResolver;

use crate::config::AppConfig;
use crate::context::ActionContext;
use crate::error::ActionError;

pub struct NurseryServices {
    store: Arc<dyn NurseryStore>,
    prices: PriceResolver,
    outbox: OutboxProcessor,
    default_vat_rate: Decimal,
    recent_orders_limit: usize,
}

impl NurseryServices {
    pub fn new(store: Arc<dyn NurseryStore>, config: &AppConfig) -> Self {
        Self {
            outbox: OutboxProcessor::new(store.clone()).with_max_attempts(config.outbox_max_attempts),
            store,
            prices: PriceResolver::default(),
            default_vat_rate: config.default_vat_rate,
            recent_orders_limit: config.recent_orders_limit,
        }
    }

    pub fn store(&self) -> &Arc<dyn NurseryStore> {
        &self.store
    }

    /// Retry the organization's failed post-commit effects.
    pub async fn retry_outbox(&self, ctx: &ActionContext, limit: usize) -> Result<Vec<EffectReport>, ActionError> {
        let org_id = ctx.require_org()?;
        Ok(self.outbox.drain(org_id, limit).await?)
    }

    /// Enqueue and run effects; a failure to enqueue still runs them once.
    async fn run_effects(&self, org_id: OrgId, effects: Vec<PostCommitEffect>) -> Vec<EffectReport> {
        if effects.is_empty() {
            return Vec::new();
        }
        let now = Utc::now();
        let entries: Vec<OutboxEntry> = effects
            .into_iter()
            .map(|effect| OutboxEntry::new(org_id, effect, now))
            .collect();
        if let Err(e) = self.store.enqueue(&entries).await {
            warn!(org_id = %org_id, error = %e, "failed to enqueue post-commit effects; running them unrecorded");
        }
        self.outbox.run(&entries).await
    }
}

/// Audit effect for one event; `None` (logged) when the payload cannot be serialized.
fn audit<E: Event + Serialize>(
    org_id: OrgId,
    entity_id: EntityId,
    entity_type: &str,
    actor: Option<UserId>,
    event: &E,
) -> Option<PostCommitEffect> {
    match EventEnvelope::from_event(org_id, entity_id, entity_type, actor, event) {
        Ok(envelope) => Some(PostCommitEffect::RecordAudit { envelope }),
        Err(e) => {
            warn!(
                org_id = %org_id,
                entity_type,
                event_type = event.event_type(),
                error = %e,
                "failed to serialize audit payload"
            );
            None
        }
    }
}

/// Wire services against the configured store.
///
/// `USE_PERSISTENT_STORES=true` with a `DATABASE_URL` selects Postgres;
/// anything else runs on the in-memory store.
pub async fn build_services(config: &AppConfig) -> Result<NurseryServices, StoreError> {
    let store: Arc<dyn NurseryStore> = match (config.use_persistent_stores, config.database_url.as_deref()) {
        (true, Some(url)) => {
            info!(max_connections = config.max_connections, "using Postgres stores");
            Arc::new(PgStore::connect(url, config.max_connections).await?)
        }
        (true, None) => {
            warn!("USE_PERSISTENT_STORES=true but DATABASE_URL is not set, falling back to in-memory");
            Arc::new(InMemoryStore::new())
        }
        (false, _) => Arc::new(InMemoryStore::new()),
    };
    Ok(NurseryServices::new(store, config))
}
