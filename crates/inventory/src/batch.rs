use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nursery_core::{AggregateRoot, OrgId, UserId};
use nursery_products::ProductId;
use nursery_sales::{OrderId, OrderLineId};

nursery_core::typed_id!(BatchId, "batch");
nursery_core::typed_id!(BatchAllocationId, "batch allocation");

/// Physical lot of one product at one location.
///
/// Owned by production; allocation only ever moves `available_quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub org_id: OrgId,
    pub product_id: ProductId,
    pub batch_number: String,
    pub location: Option<String>,
    pub available_quantity: i64,
    /// Bumped on every write; allocation writes are conditional on it.
    pub version: u64,
}

impl Batch {
    pub fn new(
        id: BatchId,
        org_id: OrgId,
        product_id: ProductId,
        batch_number: impl Into<String>,
        available_quantity: i64,
    ) -> Self {
        Self {
            id,
            org_id,
            product_id,
            batch_number: batch_number.into(),
            location: None,
            available_quantity,
            version: 0,
        }
    }
}

impl AggregateRoot for Batch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchAllocationStatus {
    Active,
    Released,
}

/// Hard (Tier-2) reservation of part of one batch for one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAllocation {
    pub id: BatchAllocationId,
    pub org_id: OrgId,
    pub batch_id: BatchId,
    pub order_id: OrderId,
    pub order_line_id: OrderLineId,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Client-supplied; a repeated key returns this allocation instead of allocating again.
    pub idempotency_key: String,
    pub status: BatchAllocationStatus,
    pub allocated_by: Option<UserId>,
    pub allocated_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl BatchAllocation {
    pub fn is_active(&self) -> bool {
        self.status == BatchAllocationStatus::Active
    }
}
