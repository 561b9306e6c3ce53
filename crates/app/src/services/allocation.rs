use chrono::Utc;
use tracing::{info, instrument};

use nursery_core::{Aggregate, AggregateRoot, ExpectedVersion, OrgId};
use nursery_inventory::{
    AllocateFromBatch, AllocationCommand, AllocationEvent, BatchAllocation, BatchAllocationId, BatchId,
    LineAllocation, ReleaseAllocation,
};
use nursery_sales::OrderLineId;

use super::{NurseryServices, audit};
use crate::context::ActionContext;
use crate::dto::{AllocateFromBatchRequest, AllocationResponse};
use crate::error::{ActionError, ActionErrorKind};

const ENTITY_TYPE: &str = "inventory.batch_allocation";

impl NurseryServices {
    /// Tier 2: turn part of a line's reservation into a hard allocation on one batch.
    ///
    /// Replaying an idempotency key returns the allocation it created. The
    /// write is checked against the batch and line versions that were read.
    #[instrument(
        skip(self, ctx, request),
        fields(order_line_id = %request.order_line_id, batch_id = %request.batch_id, quantity = request.quantity),
        err
    )]
    pub async fn allocate_from_batch(
        &self,
        ctx: &ActionContext,
        request: &AllocateFromBatchRequest,
    ) -> Result<AllocationResponse, ActionError> {
        let order_line_id = OrderLineId::parse(request.order_line_id.trim())?;
        let batch_id = BatchId::parse(request.batch_id.trim())?;
        let key = request.idempotency_key.trim();
        if key.is_empty() {
            return Err(ActionError::invalid_field("idempotency_key", "is required"));
        }
        if request.quantity <= 0 {
            return Err(ActionError::invalid_field("quantity", "must be positive"));
        }
        let org_id = ctx.require_org()?;

        if let Some(existing) = self.store.find_by_idempotency_key(org_id, key).await? {
            if existing.order_line_id != order_line_id || existing.batch_id != batch_id {
                return Err(ActionError::new(
                    ActionErrorKind::Conflict,
                    format!("idempotency key '{key}' was used for a different allocation"),
                ));
            }
            let line = self.line_state(org_id, order_line_id).await?;
            return Ok(response(existing, true, &line));
        }

        let line = self.line_state(org_id, order_line_id).await?;
        let batch = self
            .store
            .load_batch(org_id, batch_id)
            .await?
            .ok_or_else(|| ActionError::not_found("Batch not found"))?;

        let command = AllocationCommand::AllocateFromBatch(AllocateFromBatch {
            org_id,
            allocation_id: BatchAllocationId::new(),
            batch,
            quantity: request.quantity,
            idempotency_key: key.to_string(),
            actor: ctx.user_id(),
            occurred_at: Utc::now(),
        });
        let (next, events) = line.execute(&command)?;

        let mut created = None;
        for event in &events {
            if let AllocationEvent::BatchAllocated(allocated) = event {
                self.store
                    .apply_batch_allocation(org_id, ExpectedVersion::Exact(line.version()), allocated)
                    .await?;
                created = Some(allocated.allocation.clone());
            }
        }
        let Some(allocation) = created else {
            // The line already holds an allocation under this key.
            let existing = next
                .by_idempotency_key(key)
                .cloned()
                .ok_or_else(|| ActionError::internal("allocation replay without a stored allocation"))?;
            return Ok(response(existing, true, &next));
        };

        info!(
            allocation_id = %allocation.id,
            batch_id = %allocation.batch_id,
            quantity = allocation.quantity,
            "batch allocated"
        );
        self.audit_allocation(org_id, ctx, &events).await;
        Ok(response(allocation, false, &next))
    }

    /// Return a hard allocation's quantity to its batch and to the line's reservation.
    #[instrument(skip(self, ctx), err)]
    pub async fn release_batch_allocation(
        &self,
        ctx: &ActionContext,
        allocation_id: &str,
    ) -> Result<AllocationResponse, ActionError> {
        let allocation_id = BatchAllocationId::parse(allocation_id.trim())?;
        let org_id = ctx.require_org()?;

        let allocation = self
            .store
            .find_batch_allocation(org_id, allocation_id)
            .await?
            .ok_or_else(|| ActionError::not_found("Batch allocation not found"))?;
        let line = self.line_state(org_id, allocation.order_line_id).await?;

        let command = AllocationCommand::ReleaseAllocation(ReleaseAllocation {
            org_id,
            allocation_id,
            occurred_at: Utc::now(),
        });
        let (next, events) = line.execute(&command)?;
        for event in &events {
            if let AllocationEvent::AllocationReleased(released) = event {
                self.store
                    .release_batch_allocation(org_id, ExpectedVersion::Exact(line.version()), released)
                    .await?;
            }
        }

        info!(allocation_id = %allocation_id, "batch allocation released");
        self.audit_allocation(org_id, ctx, &events).await;
        let released = next
            .allocations
            .iter()
            .find(|a| a.id == allocation_id)
            .cloned()
            .unwrap_or(allocation);
        Ok(response(released, false, &next))
    }

    async fn line_state(&self, org_id: OrgId, line_id: OrderLineId) -> Result<LineAllocation, ActionError> {
        self.store
            .line_allocation_state(org_id, line_id)
            .await?
            .ok_or_else(|| ActionError::not_found("Order line not found"))
    }

    async fn audit_allocation(&self, org_id: OrgId, ctx: &ActionContext, events: &[AllocationEvent]) {
        let effects = events
            .iter()
            .filter_map(|event| {
                let entity = match event {
                    AllocationEvent::BatchAllocated(e) => e.allocation.id.0,
                    AllocationEvent::AllocationReleased(e) => e.allocation_id.0,
                };
                audit(org_id, entity, ENTITY_TYPE, ctx.user_id(), event)
            })
            .collect();
        self.run_effects(org_id, effects).await;
    }
}

fn response(allocation: BatchAllocation, replayed: bool, line: &LineAllocation) -> AllocationResponse {
    AllocationResponse {
        allocation,
        replayed,
        line_unallocated: line.unallocated(),
        tier1_reserved: line.tier1_reserved,
    }
}
