//! Tier 2: batch-level (hard) allocation of an order line.
//!
//! [`LineAllocation`] is the per-line aggregate. Its guards enforce:
//! - the batch belongs to the line's organization and product
//! - Σ active allocations of the line ≤ line quantity
//! - each allocation ≤ the batch's available quantity as read
//!
//! The resulting [`AllocationEvent`] carries the batch version that was read;
//! stores apply the batch decrement, the allocation row and the Tier-1
//! decrement in one write conditional on that version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nursery_core::{Aggregate, AggregateRoot, DomainError, OrgId, UserId};
use nursery_events::Event;
use nursery_products::ProductId;
use nursery_sales::{OrderId, OrderLineId};

use crate::batch::{Batch, BatchAllocation, BatchAllocationId, BatchAllocationStatus, BatchId};

/// Allocation state of one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAllocation {
    pub order_line_id: OrderLineId,
    pub order_id: OrderId,
    pub org_id: OrgId,
    pub product_id: ProductId,
    pub line_quantity: i64,
    /// Current Tier-1 reservation of the line.
    pub tier1_reserved: i64,
    pub allocations: Vec<BatchAllocation>,
    pub version: u64,
}

impl LineAllocation {
    pub fn allocated(&self) -> i64 {
        self.allocations
            .iter()
            .filter(|a| a.is_active())
            .map(|a| a.quantity)
            .sum()
    }

    pub fn unallocated(&self) -> i64 {
        self.line_quantity - self.allocated()
    }

    pub fn by_idempotency_key(&self, key: &str) -> Option<&BatchAllocation> {
        self.allocations.iter().find(|a| a.idempotency_key == key)
    }
}

impl AggregateRoot for LineAllocation {
    type Id = OrderLineId;

    fn id(&self) -> &Self::Id {
        &self.order_line_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AllocateFromBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateFromBatch {
    pub org_id: OrgId,
    pub allocation_id: BatchAllocationId,
    /// The batch as read, including its version.
    pub batch: Batch,
    pub quantity: i64,
    pub idempotency_key: String,
    pub actor: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseAllocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAllocation {
    pub org_id: OrgId,
    pub allocation_id: BatchAllocationId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationCommand {
    AllocateFromBatch(AllocateFromBatch),
    ReleaseAllocation(ReleaseAllocation),
}

/// Event: BatchAllocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAllocated {
    pub allocation: BatchAllocation,
    /// Batch version the allocation was checked against.
    pub batch_version: u64,
    /// Taken off the line's Tier-1 reservation.
    pub tier1_released: i64,
}

/// Event: AllocationReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationReleased {
    pub allocation_id: BatchAllocationId,
    pub order_line_id: OrderLineId,
    pub batch_id: BatchId,
    pub quantity: i64,
    /// Put back on the line's Tier-1 reservation.
    pub tier1_restored: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationEvent {
    BatchAllocated(BatchAllocated),
    AllocationReleased(AllocationReleased),
}

impl Event for AllocationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AllocationEvent::BatchAllocated(_) => "inventory.batch.allocated",
            AllocationEvent::AllocationReleased(_) => "inventory.batch_allocation.released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AllocationEvent::BatchAllocated(e) => e.allocation.allocated_at,
            AllocationEvent::AllocationReleased(e) => e.occurred_at,
        }
    }
}

impl Aggregate for LineAllocation {
    type Command = AllocationCommand;
    type Event = AllocationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AllocationEvent::BatchAllocated(e) => {
                self.tier1_reserved = (self.tier1_reserved - e.tier1_released).max(0);
                self.allocations.push(e.allocation.clone());
            }
            AllocationEvent::AllocationReleased(e) => {
                if let Some(a) = self
                    .allocations
                    .iter_mut()
                    .find(|a| a.id == e.allocation_id)
                {
                    a.status = BatchAllocationStatus::Released;
                    a.released_at = Some(e.occurred_at);
                }
                self.tier1_reserved += e.tier1_restored;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AllocationCommand::AllocateFromBatch(cmd) => self.handle_allocate(cmd),
            AllocationCommand::ReleaseAllocation(cmd) => self.handle_release(cmd),
        }
    }
}

impl LineAllocation {
    fn ensure_org(&self, org_id: OrgId) -> Result<(), DomainError> {
        if self.org_id != org_id {
            return Err(DomainError::not_found("Order line not found"));
        }
        Ok(())
    }

    fn handle_allocate(&self, cmd: &AllocateFromBatch) -> Result<Vec<AllocationEvent>, DomainError> {
        self.ensure_org(cmd.org_id)?;

        // Replay of a key already seen: nothing new happens.
        if self.by_idempotency_key(&cmd.idempotency_key).is_some() {
            return Ok(Vec::new());
        }

        if cmd.idempotency_key.trim().is_empty() {
            return Err(DomainError::validation("idempotency key is required"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let batch = &cmd.batch;
        if batch.org_id != self.org_id {
            return Err(DomainError::not_found("Batch not found"));
        }
        if batch.product_id != self.product_id {
            return Err(DomainError::invariant(
                "Batch product does not match the order line product",
            ));
        }

        let remaining = self.unallocated();
        if cmd.quantity > remaining {
            return Err(DomainError::invariant(format!(
                "Allocation exceeds line quantity (requested {}, unallocated {})",
                cmd.quantity, remaining
            )));
        }
        if cmd.quantity > batch.available_quantity {
            return Err(DomainError::invariant(format!(
                "Insufficient batch quantity (requested {}, available {})",
                cmd.quantity, batch.available_quantity
            )));
        }

        Ok(vec![AllocationEvent::BatchAllocated(BatchAllocated {
            allocation: BatchAllocation {
                id: cmd.allocation_id,
                org_id: self.org_id,
                batch_id: batch.id,
                order_id: self.order_id,
                order_line_id: self.order_line_id,
                product_id: self.product_id,
                quantity: cmd.quantity,
                idempotency_key: cmd.idempotency_key.clone(),
                status: BatchAllocationStatus::Active,
                allocated_by: cmd.actor,
                allocated_at: cmd.occurred_at,
                released_at: None,
            },
            batch_version: batch.version,
            tier1_released: cmd.quantity.min(self.tier1_reserved),
        })])
    }

    fn handle_release(&self, cmd: &ReleaseAllocation) -> Result<Vec<AllocationEvent>, DomainError> {
        self.ensure_org(cmd.org_id)?;

        let allocation = self
            .allocations
            .iter()
            .find(|a| a.id == cmd.allocation_id)
            .ok_or_else(|| DomainError::not_found("Batch allocation not found"))?;
        if !allocation.is_active() {
            return Err(DomainError::conflict("batch allocation already released"));
        }

        // Soft reservation never exceeds what is left unallocated.
        let headroom = self.unallocated() + allocation.quantity - self.tier1_reserved;
        Ok(vec![AllocationEvent::AllocationReleased(AllocationReleased {
            allocation_id: allocation.id,
            order_line_id: self.order_line_id,
            batch_id: allocation.batch_id,
            quantity: allocation.quantity,
            tier1_restored: allocation.quantity.min(headroom.max(0)),
            occurred_at: cmd.occurred_at,
        })])
    }
}
