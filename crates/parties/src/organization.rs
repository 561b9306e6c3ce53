use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use nursery_core::{Entity, OrgId};

/// VAT rate (percent) applied when neither the order line nor the product carries one.
pub const DEFAULT_VAT_RATE: Decimal = dec!(13.5);

/// Organization (tenant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
}

impl Organization {
    pub fn new(id: OrgId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl Entity for Organization {
    type Id = OrgId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn org_id(&self) -> OrgId {
        self.id
    }
}
