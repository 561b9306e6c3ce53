use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use nursery_core::{Entity, OrgId};
use nursery_products::ProductId;

use crate::window::DateWindow;

nursery_core::typed_id!(PriceListId, "price list");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceList {
    pub id: PriceListId,
    pub org_id: OrgId,
    pub name: String,
    /// At most one list per organization carries this flag.
    pub is_default: bool,
}

impl Entity for PriceList {
    type Id = PriceListId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn org_id(&self) -> OrgId {
        self.org_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceListEntry {
    pub price_list_id: PriceListId,
    pub product_id: ProductId,
    pub unit_price: Decimal,
}

/// Customer-specific price list, valid for a date window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerPriceOverride {
    pub price_list_id: PriceListId,
    #[serde(flatten)]
    pub window: DateWindow,
}

/// Price lookups for the lists relevant to one order.
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    prices: HashMap<(PriceListId, ProductId), Decimal>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = PriceListEntry>) -> Self {
        let mut book = Self::new();
        for entry in entries {
            book.insert(entry);
        }
        book
    }

    pub fn insert(&mut self, entry: PriceListEntry) {
        self.prices
            .insert((entry.price_list_id, entry.product_id), entry.unit_price);
    }

    pub fn price(&self, price_list_id: PriceListId, product_id: ProductId) -> Option<Decimal> {
        self.prices.get(&(price_list_id, product_id)).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
