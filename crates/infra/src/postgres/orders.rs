use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::Row;
use sqlx::postgres::PgRow;
use tracing::{Span, instrument};
use uuid::Uuid;

use nursery_core::OrgId;
use nursery_events::GroupBackfill;
use nursery_parties::{AddressId, CustomerId};
use nursery_products::{ProductGroupId, ProductId};
use nursery_sales::{NewOrder, Order, OrderId, OrderLine, OrderLineId, OrderStatus, OrderSummary};

use super::{PgStore, map_sqlx_error, unknown_status};
use crate::error::StoreError;
use crate::stores::OrderStore;

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let d = |e| map_sqlx_error("order row", e);
    let status: String = row.try_get("status").map_err(d)?;
    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id").map_err(d)?),
        org_id: OrgId::from_uuid(row.try_get("org_id").map_err(d)?),
        customer_id: CustomerId::from_uuid(row.try_get("customer_id").map_err(d)?),
        order_number: row.try_get("order_number").map_err(d)?,
        status: OrderStatus::parse(&status).ok_or_else(|| unknown_status("order status", &status))?,
        delivery_date: row.try_get::<Option<NaiveDate>, _>("delivery_date").map_err(d)?,
        notes: row.try_get("notes").map_err(d)?,
        ship_to_address_id: row
            .try_get::<Option<Uuid>, _>("ship_to_address_id")
            .map_err(d)?
            .map(AddressId::from_uuid),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(d)?,
        lines: Vec::new(),
    })
}

fn line_from_row(row: &PgRow) -> Result<OrderLine, StoreError> {
    let d = |e| map_sqlx_error("order line row", e);
    let line_no: i32 = row.try_get("line_no").map_err(d)?;
    Ok(OrderLine {
        id: OrderLineId::from_uuid(row.try_get("id").map_err(d)?),
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(d)?),
        line_no: u32::try_from(line_no).unwrap_or_default(),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(d)?),
        product_group_id: row
            .try_get::<Option<Uuid>, _>("product_group_id")
            .map_err(d)?
            .map(ProductGroupId::from_uuid),
        description: row.try_get("description").map_err(d)?,
        quantity: row.try_get("quantity").map_err(d)?,
        unit_price: row.try_get::<Decimal, _>("unit_price").map_err(d)?,
        vat_rate: row.try_get::<Decimal, _>("vat_rate").map_err(d)?,
        correlation_key: row.try_get("correlation_key").map_err(d)?,
        created_at: row.try_get("created_at").map_err(d)?,
    })
}

impl PgStore {
    /// Attach lines to already-loaded orders.
    async fn with_lines(&self, org_id: OrgId, mut orders: Vec<Order>) -> Result<Vec<Order>, StoreError> {
        if orders.is_empty() {
            return Ok(orders);
        }
        let ids: Vec<Uuid> = orders.iter().map(|o| *o.id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, line_no, product_id, product_group_id, description,
                   quantity, unit_price, vat_rate, correlation_key, created_at
            FROM order_lines
            WHERE org_id = $1 AND order_id = ANY($2)
            ORDER BY line_no ASC
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(&ids)
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_sqlx_error("load_order_lines", e))?;

        let mut by_order: HashMap<OrderId, Vec<OrderLine>> = HashMap::new();
        for row in &rows {
            let line = line_from_row(row)?;
            by_order.entry(line.order_id).or_default().push(line);
        }
        for order in &mut orders {
            order.lines = by_order.remove(&order.id).unwrap_or_default();
        }
        Ok(orders)
    }
}

#[async_trait]
impl OrderStore for PgStore {
    #[instrument(
        skip(self, order),
        fields(
            org_id = %order.org_id,
            order_number = %order.order_number,
            line_count = order.lines.len(),
            order_id = tracing::field::Empty
        ),
        err
    )]
    async fn commit_order(&self, order: &NewOrder) -> Result<OrderId, StoreError> {
        let lines: Vec<_> = order
            .lines
            .iter()
            .map(|l| {
                json!({
                    "line_no": l.line_no,
                    "correlation_key": l.correlation_key,
                    "product_id": l.product_id,
                    "description": l.description,
                    "quantity": l.quantity,
                    "unit_price": l.unit_price,
                    "vat_rate": l.vat_rate,
                })
            })
            .collect();

        let order_id: Uuid = sqlx::query_scalar(
            "SELECT create_order_with_lines($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(order.org_id.as_uuid())
        .bind(order.customer_id.as_uuid())
        .bind(&order.order_number)
        .bind(order.status.as_str())
        .bind(order.delivery_date)
        .bind(order.notes.as_deref())
        .bind(order.ship_to_address_id.map(|a| *a.as_uuid()))
        .bind(order.created_by.map(|u| *u.as_uuid()))
        .bind(serde_json::Value::Array(lines))
        .fetch_one(self.pool())
        .await
        .map_err(|e| map_sqlx_error("create_order_with_lines", e))?;

        Span::current().record("order_id", tracing::field::display(order_id));
        Ok(OrderId::from_uuid(order_id))
    }

    #[instrument(skip(self, lines), fields(org_id = %org_id, order_id = %order_id, lines = lines.len()), err)]
    async fn backfill_group_ids(
        &self,
        org_id: OrgId,
        order_id: OrderId,
        lines: &[GroupBackfill],
    ) -> Result<usize, StoreError> {
        if lines.is_empty() {
            return Ok(0);
        }
        let keys: Vec<Uuid> = lines.iter().map(|b| b.correlation_key).collect();
        let groups: Vec<Uuid> = lines.iter().map(|b| *b.product_group_id.as_uuid()).collect();

        let result = sqlx::query(
            r#"
            UPDATE order_lines l
            SET product_group_id = b.group_id
            FROM UNNEST($3::uuid[], $4::uuid[]) AS b(correlation_key, group_id)
            WHERE l.org_id = $1 AND l.order_id = $2 AND l.correlation_key = b.correlation_key
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(order_id.as_uuid())
        .bind(&keys)
        .bind(&groups)
        .execute(self.pool())
        .await
        .map_err(|e| map_sqlx_error("backfill_group_ids", e))?;

        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    #[instrument(skip(self), fields(org_id = %org_id, order_id = %order_id), err)]
    async fn find_order(&self, org_id: OrgId, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, org_id, customer_id, order_number, status, delivery_date, notes,
                   ship_to_address_id, created_at
            FROM orders
            WHERE org_id = $1 AND id = $2
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(order_id.as_uuid())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_sqlx_error("find_order", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let order = order_from_row(&row)?;
        Ok(self.with_lines(org_id, vec![order]).await?.pop())
    }

    #[instrument(skip(self), fields(org_id = %org_id, customer_id = %customer_id), err)]
    async fn recent_orders_for_customer(
        &self,
        org_id: OrgId,
        customer_id: CustomerId,
        limit: usize,
    ) -> Result<Vec<OrderSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, org_id, customer_id, order_number, status, delivery_date, notes,
                   ship_to_address_id, created_at
            FROM orders
            WHERE org_id = $1 AND customer_id = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(customer_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_sqlx_error("recent_orders_for_customer", e))?;

        let orders = rows.iter().map(order_from_row).collect::<Result<Vec<_>, _>>()?;
        let orders = self.with_lines(org_id, orders).await?;
        Ok(orders.iter().map(Order::summary).collect())
    }
}
