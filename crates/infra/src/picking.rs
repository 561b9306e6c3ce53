//! Pick lists, as far as the order and dispatch core needs them.
//!
//! The picking subsystem itself lives elsewhere; this core only asks it to
//! make sure an order has a pick list and hands that list to a team.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nursery_core::OrgId;
use nursery_dispatch::PickingTeamId;
use nursery_sales::OrderId;

nursery_core::typed_id!(PickListId, "pick list");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickList {
    pub id: PickListId,
    pub org_id: OrgId,
    pub order_id: OrderId,
    pub team_id: Option<PickingTeamId>,
    pub created_at: DateTime<Utc>,
}

impl PickList {
    pub fn for_order(org_id: OrgId, order_id: OrderId, now: DateTime<Utc>) -> Self {
        Self {
            id: PickListId::new(),
            org_id,
            order_id,
            team_id: None,
            created_at: now,
        }
    }
}
