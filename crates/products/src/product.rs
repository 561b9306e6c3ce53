use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use nursery_core::{Entity, OrgId};

use crate::label::VarietySize;

nursery_core::typed_id!(ProductId, "product");
nursery_core::typed_id!(SkuId, "sku");

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
}

/// A sellable product of one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub org_id: OrgId,
    pub sku_id: SkuId,
    pub name: String,
    /// VAT rate (percent) defined on the SKU, if any.
    pub vat_rate: Option<Decimal>,
    pub variety: Option<String>,
    pub size: Option<String>,
    pub status: ProductStatus,
}

impl Product {
    pub fn new(id: ProductId, org_id: OrgId, sku_id: SkuId, name: impl Into<String>) -> Self {
        Self {
            id,
            org_id,
            sku_id,
            name: name.into(),
            vat_rate: None,
            variety: None,
            size: None,
            status: ProductStatus::Active,
        }
    }

    pub fn with_label(mut self, variety: impl Into<String>, size: impl Into<String>) -> Self {
        self.variety = Some(variety.into());
        self.size = Some(size.into());
        self
    }

    pub fn with_vat_rate(mut self, vat_rate: Decimal) -> Self {
        self.vat_rate = Some(vat_rate);
        self
    }

    /// Only active products can be put on an order.
    pub fn can_be_sold(&self) -> bool {
        self.status == ProductStatus::Active
    }

    /// The normalized `(variety, size)` label, when both halves are present.
    pub fn label(&self) -> Option<VarietySize> {
        match (&self.variety, &self.size) {
            (Some(v), Some(s)) => VarietySize::new(v, s),
            _ => None,
        }
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn org_id(&self) -> OrgId {
        self.org_id
    }
}
