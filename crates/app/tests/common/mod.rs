#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;

use nursery_app::{ActionContext, AppConfig, NurseryServices};
use nursery_core::OrgId;
use nursery_infra::InMemoryStore;
use nursery_inventory::{Batch, BatchId};
use nursery_parties::{Customer, CustomerId, Organization};
use nursery_pricing::{PriceList, PriceListEntry, PriceListId};
use nursery_products::{Product, ProductId, SkuId};
use nursery_sales::{OrderForm, OrderLineForm};

/// One organization with a customer, a product and a default price list.
pub struct Nursery {
    pub store: Arc<InMemoryStore>,
    pub services: NurseryServices,
    pub org: OrgId,
    pub customer: CustomerId,
    pub product: ProductId,
    pub price_list: PriceListId,
}

impl Nursery {
    pub fn seeded() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let services = NurseryServices::new(store.clone(), &AppConfig::default());

        let org = OrgId::new();
        let customer = CustomerId::new();
        let product = ProductId::new();
        let price_list = PriceListId::new();
        store.seed_organization(Organization::new(org, "Greenleaf Nurseries"));
        store.seed_customer(Customer::new(customer, org, "Riverside Garden Centre"));
        store.seed_product(
            Product::new(product, org, SkuId::new(), "Buxus sempervirens 40cm").with_label("Buxus", "40cm"),
        );
        store.seed_price_list(PriceList {
            id: price_list,
            org_id: org,
            name: "Trade".to_string(),
            is_default: true,
        });

        Self {
            store,
            services,
            org,
            customer,
            product,
            price_list,
        }
    }

    pub fn ctx(&self) -> ActionContext {
        ActionContext::new(self.org, None)
    }

    pub fn price(&self, product: ProductId, unit_price: Decimal) {
        self.store.seed_price_entry(PriceListEntry {
            price_list_id: self.price_list,
            product_id: product,
            unit_price,
        });
    }

    pub fn batch(&self, product: ProductId, number: &str, available: i64) -> BatchId {
        let id = BatchId::new();
        self.store
            .seed_batch(Batch::new(id, self.org, product, number, available));
        id
    }

    pub fn extra_product(&self, name: &str) -> ProductId {
        let id = ProductId::new();
        self.store
            .seed_product(Product::new(id, self.org, SkuId::new(), name));
        id
    }

    pub fn form(&self, lines: Vec<OrderLineForm>) -> OrderForm {
        OrderForm {
            customer_id: self.customer.to_string(),
            lines,
            ..OrderForm::default()
        }
    }
}

pub fn product_line(product: ProductId, quantity: i64) -> OrderLineForm {
    OrderLineForm {
        product_id: Some(product.to_string()),
        quantity,
        ..OrderLineForm::default()
    }
}
