use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::postgres::PgRow;
use tracing::instrument;
use uuid::Uuid;

use nursery_core::OrgId;
use nursery_parties::{AddressId, Customer, CustomerId, CustomerStatus, Organization};
use nursery_pricing::{CustomerPriceOverride, DateWindow, PriceListEntry, PriceListId};
use nursery_products::{
    GroupMember, Product, ProductGroup, ProductGroupId, ProductId, ProductStatus, SkuId,
};

use super::{PgStore, map_sqlx_error, unknown_status};
use crate::error::StoreError;
use crate::stores::{CatalogStore, PartyStore, PricingStore};

fn decode(operation: &str) -> impl Fn(sqlx::Error) -> StoreError + '_ {
    move |e| map_sqlx_error(operation, e)
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let d = decode("product row");
    let status: String = row.try_get("status").map_err(&d)?;
    Ok(Product {
        id: ProductId::from_uuid(row.try_get("id").map_err(&d)?),
        org_id: OrgId::from_uuid(row.try_get("org_id").map_err(&d)?),
        sku_id: SkuId::from_uuid(row.try_get("sku_id").map_err(&d)?),
        name: row.try_get("name").map_err(&d)?,
        vat_rate: row.try_get::<Option<Decimal>, _>("vat_rate").map_err(&d)?,
        variety: row.try_get("variety").map_err(&d)?,
        size: row.try_get("size").map_err(&d)?,
        status: match status.as_str() {
            "draft" => ProductStatus::Draft,
            "active" => ProductStatus::Active,
            "archived" => ProductStatus::Archived,
            other => return Err(unknown_status("product status", other)),
        },
    })
}

fn customer_from_row(row: &PgRow) -> Result<Customer, StoreError> {
    let d = decode("customer row");
    let status: String = row.try_get("status").map_err(&d)?;
    Ok(Customer {
        id: CustomerId::from_uuid(row.try_get("id").map_err(&d)?),
        org_id: OrgId::from_uuid(row.try_get("org_id").map_err(&d)?),
        name: row.try_get("name").map_err(&d)?,
        status: match status.as_str() {
            "active" => CustomerStatus::Active,
            "suspended" => CustomerStatus::Suspended,
            other => return Err(unknown_status("customer status", other)),
        },
        default_price_list_id: row
            .try_get::<Option<Uuid>, _>("default_price_list_id")
            .map_err(&d)?
            .map(PriceListId::from_uuid),
        default_ship_address_id: row
            .try_get::<Option<Uuid>, _>("default_ship_address_id")
            .map_err(&d)?
            .map(AddressId::from_uuid),
    })
}

#[async_trait]
impl CatalogStore for PgStore {
    #[instrument(skip(self), fields(org_id = %org_id), err)]
    async fn resolve_products(&self, org_id: OrgId) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, org_id, sku_id, name, vat_rate, variety, size, status
            FROM products
            WHERE org_id = $1 AND status = 'active'
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(org_id.as_uuid())
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_sqlx_error("resolve_products", e))?;

        rows.iter().map(product_from_row).collect()
    }

    #[instrument(skip(self), fields(org_id = %org_id, group_id = %group_id), err)]
    async fn find_product_group(
        &self,
        org_id: OrgId,
        group_id: ProductGroupId,
    ) -> Result<Option<ProductGroup>, StoreError> {
        let row = sqlx::query("SELECT id, org_id, name FROM product_groups WHERE org_id = $1 AND id = $2")
            .bind(org_id.as_uuid())
            .bind(group_id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| map_sqlx_error("find_product_group", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let d = decode("product group row");
        Ok(Some(ProductGroup {
            id: ProductGroupId::from_uuid(row.try_get("id").map_err(&d)?),
            org_id: OrgId::from_uuid(row.try_get("org_id").map_err(&d)?),
            name: row.try_get("name").map_err(&d)?,
        }))
    }

    #[instrument(skip(self), fields(org_id = %org_id, group_id = %group_id), err)]
    async fn resolve_group_members(
        &self,
        org_id: OrgId,
        group_id: ProductGroupId,
    ) -> Result<Vec<GroupMember>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT m.product_id
            FROM product_group_members m
            JOIN product_groups g ON g.id = m.group_id
            WHERE g.org_id = $1 AND m.group_id = $2
            ORDER BY m.position ASC, m.created_at ASC
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(group_id.as_uuid())
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_sqlx_error("resolve_group_members", e))?;

        rows.iter()
            .map(|row| {
                let product_id: Uuid = row
                    .try_get("product_id")
                    .map_err(|e| map_sqlx_error("group member row", e))?;
                Ok(GroupMember {
                    product_id: ProductId::from_uuid(product_id),
                })
            })
            .collect()
    }
}

#[async_trait]
impl PartyStore for PgStore {
    #[instrument(skip(self), fields(customer_id = %customer_id), err)]
    async fn find_customer(&self, customer_id: CustomerId) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, org_id, name, status, default_price_list_id, default_ship_address_id
            FROM customers
            WHERE id = $1
            "#,
        )
        .bind(customer_id.as_uuid())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_sqlx_error("find_customer", e))?;

        row.as_ref().map(customer_from_row).transpose()
    }

    #[instrument(skip(self), fields(org_id = %org_id), err)]
    async fn find_organization(&self, org_id: OrgId) -> Result<Option<Organization>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM organizations WHERE id = $1")
            .bind(org_id.as_uuid())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| map_sqlx_error("find_organization", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let d = decode("organization row");
        Ok(Some(Organization {
            id: OrgId::from_uuid(row.try_get("id").map_err(&d)?),
            name: row.try_get("name").map_err(&d)?,
        }))
    }
}

#[async_trait]
impl PricingStore for PgStore {
    #[instrument(skip(self), fields(org_id = %org_id, customer_id = %customer_id), err)]
    async fn resolve_price_overrides(
        &self,
        org_id: OrgId,
        customer_id: CustomerId,
    ) -> Result<Vec<CustomerPriceOverride>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT o.price_list_id, o.valid_from, o.valid_to
            FROM customer_price_lists o
            JOIN price_lists l ON l.id = o.price_list_id
            WHERE l.org_id = $1 AND o.customer_id = $2
            ORDER BY o.created_at ASC
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(customer_id.as_uuid())
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_sqlx_error("resolve_price_overrides", e))?;

        let d = decode("price override row");
        rows.iter()
            .map(|row| {
                Ok(CustomerPriceOverride {
                    price_list_id: PriceListId::from_uuid(row.try_get("price_list_id").map_err(&d)?),
                    window: DateWindow::new(
                        row.try_get::<Option<NaiveDate>, _>("valid_from").map_err(&d)?,
                        row.try_get::<Option<NaiveDate>, _>("valid_to").map_err(&d)?,
                    ),
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(org_id = %org_id), err)]
    async fn default_price_list(&self, org_id: OrgId) -> Result<Option<PriceListId>, StoreError> {
        let id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM price_lists WHERE org_id = $1 AND is_default LIMIT 1",
        )
        .bind(org_id.as_uuid())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_sqlx_error("default_price_list", e))?;

        Ok(id.map(PriceListId::from_uuid))
    }

    #[instrument(
        skip(self, price_lists, products),
        fields(org_id = %org_id, lists = price_lists.len(), products = products.len()),
        err
    )]
    async fn price_entries(
        &self,
        org_id: OrgId,
        price_lists: &[PriceListId],
        products: &[ProductId],
    ) -> Result<Vec<PriceListEntry>, StoreError> {
        if price_lists.is_empty() || products.is_empty() {
            return Ok(Vec::new());
        }
        let list_ids: Vec<Uuid> = price_lists.iter().map(|l| *l.as_uuid()).collect();
        let product_ids: Vec<Uuid> = products.iter().map(|p| *p.as_uuid()).collect();

        let rows = sqlx::query(
            r#"
            SELECT e.price_list_id, e.product_id, e.unit_price
            FROM price_list_entries e
            JOIN price_lists l ON l.id = e.price_list_id
            WHERE l.org_id = $1 AND e.price_list_id = ANY($2) AND e.product_id = ANY($3)
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(&list_ids)
        .bind(&product_ids)
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_sqlx_error("price_entries", e))?;

        let d = decode("price entry row");
        rows.iter()
            .map(|row| {
                Ok(PriceListEntry {
                    price_list_id: PriceListId::from_uuid(row.try_get("price_list_id").map_err(&d)?),
                    product_id: ProductId::from_uuid(row.try_get("product_id").map_err(&d)?),
                    unit_price: row.try_get("unit_price").map_err(&d)?,
                })
            })
            .collect()
    }
}
