use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use nursery_core::AggregateRoot;
use nursery_dispatch::{DeliveryItem, DeliveryRunId, Load, LoadStatus, PickingTeamId};
use nursery_infra::{EffectReport, PickListId};
use nursery_inventory::{BatchAllocation, OversellItem};
use nursery_sales::{OrderId, OrderTotals};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AllocateFromBatchRequest {
    pub order_line_id: String,
    pub batch_id: String,
    pub quantity: i64,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateLoadRequest {
    pub run_date: Option<NaiveDate>,
    pub run_number: Option<String>,
    pub vehicle: Option<String>,
    pub driver: Option<String>,
    pub picking_team_id: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: OrderId,
    pub order_number: String,
    pub totals: OrderTotals,
    pub has_oversell_warning: bool,
    pub oversell_items: Vec<OversellItem>,
    /// Outcome of each post-commit effect, in run order.
    pub effects: Vec<EffectReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationResponse {
    pub allocation: BatchAllocation,
    /// True when the idempotency key had already been used and nothing new was allocated.
    pub replayed: bool,
    pub line_unallocated: i64,
    pub tier1_reserved: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadView {
    pub load_id: DeliveryRunId,
    pub run_number: String,
    pub run_date: NaiveDate,
    pub status: LoadStatus,
    pub vehicle: Option<String>,
    pub driver: Option<String>,
    pub picking_team_id: Option<PickingTeamId>,
    pub departed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items: Vec<DeliveryItem>,
    pub version: u64,
}

impl LoadView {
    /// `None` for a load that has not been created.
    pub fn of(load: &Load) -> Option<Self> {
        let run = load.run()?;
        Some(Self {
            load_id: run.id,
            run_number: run.run_number.clone(),
            run_date: run.run_date,
            status: run.status,
            vehicle: run.vehicle.clone(),
            driver: run.driver.clone(),
            picking_team_id: run.picking_team_id,
            departed_at: run.departed_at,
            completed_at: run.completed_at,
            items: load.items().to_vec(),
            version: load.version(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignOrderResponse {
    pub load: LoadView,
    /// False when the order was already on this load.
    pub assigned: bool,
    pub pick_list_id: Option<PickListId>,
}
