use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use nursery_core::OrgId;
use nursery_sales::{OrderId, OrderStatus};

nursery_core::typed_id!(DeliveryRunId, "delivery run");
nursery_core::typed_id!(DeliveryItemId, "delivery item");
nursery_core::typed_id!(PickingTeamId, "picking team");

/// Load lifecycle: `planned → loading → in_transit → completed`, `cancelled`
/// from anything not completed, and recall back to `planned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Planned,
    Loading,
    InTransit,
    Completed,
    Cancelled,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::Planned => "planned",
            LoadStatus::Loading => "loading",
            LoadStatus::InTransit => "in_transit",
            LoadStatus::Completed => "completed",
            LoadStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "planned" => LoadStatus::Planned,
            "loading" => LoadStatus::Loading,
            "in_transit" => LoadStatus::InTransit,
            "completed" => LoadStatus::Completed,
            "cancelled" => LoadStatus::Cancelled,
            _ => return None,
        })
    }

    /// Orders can still be put on (or moved to) the load.
    pub fn accepts_orders(&self) -> bool {
        matches!(self, LoadStatus::Planned | LoadStatus::Loading)
    }
}

impl core::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryItemStatus {
    Pending,
    Loading,
    InTransit,
    Delivered,
    Failed,
    Rescheduled,
}

impl DeliveryItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryItemStatus::Pending => "pending",
            DeliveryItemStatus::Loading => "loading",
            DeliveryItemStatus::InTransit => "in_transit",
            DeliveryItemStatus::Delivered => "delivered",
            DeliveryItemStatus::Failed => "failed",
            DeliveryItemStatus::Rescheduled => "rescheduled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => DeliveryItemStatus::Pending,
            "loading" => DeliveryItemStatus::Loading,
            "in_transit" => DeliveryItemStatus::InTransit,
            "delivered" => DeliveryItemStatus::Delivered,
            "failed" => DeliveryItemStatus::Failed,
            "rescheduled" => DeliveryItemStatus::Rescheduled,
            _ => return None,
        })
    }

    /// An order has at most one item in one of these states.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DeliveryItemStatus::Pending | DeliveryItemStatus::Loading | DeliveryItemStatus::InTransit
        )
    }
}

/// A delivery run ("load").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRun {
    pub id: DeliveryRunId,
    pub org_id: OrgId,
    pub run_number: String,
    pub run_date: NaiveDate,
    pub status: LoadStatus,
    pub vehicle: Option<String>,
    pub driver: Option<String>,
    pub picking_team_id: Option<PickingTeamId>,
    pub departed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Links one order to one run. Historical items are kept after the order moves on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryItem {
    pub id: DeliveryItemId,
    pub org_id: OrgId,
    pub run_id: DeliveryRunId,
    pub order_id: OrderId,
    pub status: DeliveryItemStatus,
    /// Route position on the run, 1-based.
    pub sequence: u32,
    pub created_at: DateTime<Utc>,
}

/// The order fields the state machine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub order_id: OrderId,
    pub org_id: OrgId,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChange {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// `LOAD-<YYYYMMDD>-<seq>`, with `seq` the run's position among the org's runs of that date.
pub fn generate_run_number(run_date: NaiveDate, seq: u32) -> String {
    format!("LOAD-{}-{:03}", run_date.format("%Y%m%d"), seq)
}
