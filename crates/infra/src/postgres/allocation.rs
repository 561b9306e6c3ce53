use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use nursery_core::{ExpectedVersion, OrgId, UserId};
use nursery_inventory::{
    AllocationReleased, Batch, BatchAllocated, BatchAllocation, BatchAllocationId,
    BatchAllocationStatus, BatchId, LineAllocation, Tier1Outcome,
};
use nursery_products::ProductId;
use nursery_sales::{OrderId, OrderLineId};

use super::{PgStore, map_sqlx_error, unknown_status, version_from_db, version_to_db};
use crate::error::StoreError;
use crate::stores::AllocationStore;

const ALLOCATION_COLUMNS: &str = "id, org_id, batch_id, order_id, order_line_id, product_id, quantity, \
     idempotency_key, status, allocated_by, allocated_at, released_at";

fn allocation_from_row(row: &PgRow) -> Result<BatchAllocation, StoreError> {
    let d = |e| map_sqlx_error("batch allocation row", e);
    let status: String = row.try_get("status").map_err(d)?;
    Ok(BatchAllocation {
        id: BatchAllocationId::from_uuid(row.try_get("id").map_err(d)?),
        org_id: OrgId::from_uuid(row.try_get("org_id").map_err(d)?),
        batch_id: BatchId::from_uuid(row.try_get("batch_id").map_err(d)?),
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(d)?),
        order_line_id: OrderLineId::from_uuid(row.try_get("order_line_id").map_err(d)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(d)?),
        quantity: row.try_get("quantity").map_err(d)?,
        idempotency_key: row.try_get("idempotency_key").map_err(d)?,
        status: match status.as_str() {
            "active" => BatchAllocationStatus::Active,
            "released" => BatchAllocationStatus::Released,
            other => return Err(unknown_status("batch allocation status", other)),
        },
        allocated_by: row
            .try_get::<Option<Uuid>, _>("allocated_by")
            .map_err(d)?
            .map(UserId::from_uuid),
        allocated_at: row.try_get("allocated_at").map_err(d)?,
        released_at: row.try_get("released_at").map_err(d)?,
    })
}

fn expected_to_db(expected: ExpectedVersion) -> Option<i64> {
    match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(version_to_db(v)),
    }
}

/// Bump the line's allocation version, conditional on `expected`.
async fn claim_line(
    tx: &mut Transaction<'_, Postgres>,
    org_id: OrgId,
    order_line_id: OrderLineId,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let claimed = sqlx::query(
        r#"
        UPDATE order_lines
        SET allocation_version = allocation_version + 1
        WHERE org_id = $1 AND id = $2 AND ($3::bigint IS NULL OR allocation_version = $3)
        "#,
    )
    .bind(org_id.as_uuid())
    .bind(order_line_id.as_uuid())
    .bind(expected_to_db(expected))
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("claim_line", e))?;

    if claimed.rows_affected() == 0 {
        return Err(StoreError::conflict(format!(
            "order line {order_line_id} was modified concurrently"
        )));
    }
    Ok(())
}

#[async_trait]
impl AllocationStore for PgStore {
    #[instrument(skip(self), fields(org_id = %org_id, order_id = %order_id), err)]
    async fn allocate_tier1(
        &self,
        org_id: OrgId,
        order_id: OrderId,
        actor: Option<UserId>,
    ) -> Result<Tier1Outcome, StoreError> {
        let result: serde_json::Value = sqlx::query_scalar("SELECT allocate_order_tier1($1, $2, $3)")
            .bind(org_id.as_uuid())
            .bind(order_id.as_uuid())
            .bind(actor.map(|a| *a.as_uuid()))
            .fetch_one(self.pool())
            .await
            .map_err(|e| map_sqlx_error("allocate_order_tier1", e))?;

        Ok(serde_json::from_value(result)?)
    }

    #[instrument(skip(self), fields(org_id = %org_id, batch_id = %batch_id), err)]
    async fn load_batch(&self, org_id: OrgId, batch_id: BatchId) -> Result<Option<Batch>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, org_id, product_id, batch_number, location, available_quantity, version
            FROM batches
            WHERE org_id = $1 AND id = $2
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(batch_id.as_uuid())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_sqlx_error("load_batch", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let d = |e| map_sqlx_error("batch row", e);
        Ok(Some(Batch {
            id: BatchId::from_uuid(row.try_get("id").map_err(d)?),
            org_id: OrgId::from_uuid(row.try_get("org_id").map_err(d)?),
            product_id: ProductId::from_uuid(row.try_get("product_id").map_err(d)?),
            batch_number: row.try_get("batch_number").map_err(d)?,
            location: row.try_get("location").map_err(d)?,
            available_quantity: row.try_get("available_quantity").map_err(d)?,
            version: version_from_db(row.try_get("version").map_err(d)?),
        }))
    }

    #[instrument(skip(self), fields(org_id = %org_id, order_line_id = %order_line_id), err)]
    async fn line_allocation_state(
        &self,
        org_id: OrgId,
        order_line_id: OrderLineId,
    ) -> Result<Option<LineAllocation>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT l.order_id, l.product_id, l.quantity, l.allocation_version,
                   COALESCE(r.quantity, 0) AS tier1_reserved
            FROM order_lines l
            LEFT JOIN tier1_reservations r ON r.order_line_id = l.id
            WHERE l.org_id = $1 AND l.id = $2
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(order_line_id.as_uuid())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_sqlx_error("line_allocation_state", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let allocation_rows = sqlx::query(&format!(
            "SELECT {ALLOCATION_COLUMNS} FROM batch_allocations \
             WHERE org_id = $1 AND order_line_id = $2 ORDER BY allocated_at ASC"
        ))
        .bind(org_id.as_uuid())
        .bind(order_line_id.as_uuid())
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_sqlx_error("line_allocations", e))?;
        let allocations = allocation_rows
            .iter()
            .map(allocation_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let d = |e| map_sqlx_error("line allocation row", e);
        Ok(Some(LineAllocation {
            order_line_id,
            order_id: OrderId::from_uuid(row.try_get("order_id").map_err(d)?),
            org_id,
            product_id: ProductId::from_uuid(row.try_get("product_id").map_err(d)?),
            line_quantity: row.try_get("quantity").map_err(d)?,
            tier1_reserved: row.try_get("tier1_reserved").map_err(d)?,
            allocations,
            version: version_from_db(row.try_get("allocation_version").map_err(d)?),
        }))
    }

    #[instrument(skip(self), fields(org_id = %org_id), err)]
    async fn find_by_idempotency_key(
        &self,
        org_id: OrgId,
        idempotency_key: &str,
    ) -> Result<Option<BatchAllocation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ALLOCATION_COLUMNS} FROM batch_allocations WHERE org_id = $1 AND idempotency_key = $2"
        ))
        .bind(org_id.as_uuid())
        .bind(idempotency_key)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_sqlx_error("find_by_idempotency_key", e))?;

        row.as_ref().map(allocation_from_row).transpose()
    }

    #[instrument(skip(self), fields(org_id = %org_id, allocation_id = %allocation_id), err)]
    async fn find_batch_allocation(
        &self,
        org_id: OrgId,
        allocation_id: BatchAllocationId,
    ) -> Result<Option<BatchAllocation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ALLOCATION_COLUMNS} FROM batch_allocations WHERE org_id = $1 AND id = $2"
        ))
        .bind(org_id.as_uuid())
        .bind(allocation_id.as_uuid())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_sqlx_error("find_batch_allocation", e))?;

        row.as_ref().map(allocation_from_row).transpose()
    }

    #[instrument(
        skip(self, event),
        fields(
            org_id = %org_id,
            order_line_id = %event.allocation.order_line_id,
            batch_id = %event.allocation.batch_id,
            quantity = event.allocation.quantity,
            batch_version = event.batch_version
        ),
        err
    )]
    async fn apply_batch_allocation(
        &self,
        org_id: OrgId,
        expected_line: ExpectedVersion,
        event: &BatchAllocated,
    ) -> Result<(), StoreError> {
        let allocation = &event.allocation;
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        claim_line(&mut tx, org_id, allocation.order_line_id, expected_line).await?;

        let decremented = sqlx::query(
            r#"
            UPDATE batches
            SET available_quantity = available_quantity - $4, version = version + 1
            WHERE org_id = $1 AND id = $2 AND version = $3 AND available_quantity >= $4
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(allocation.batch_id.as_uuid())
        .bind(version_to_db(event.batch_version))
        .bind(allocation.quantity)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("decrement_batch", e))?;
        if decremented.rows_affected() == 0 {
            return Err(StoreError::conflict(format!(
                "batch {} was modified concurrently (expected version {})",
                allocation.batch_id, event.batch_version
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO batch_allocations (
                id, org_id, batch_id, order_id, order_line_id, product_id, quantity,
                idempotency_key, status, allocated_by, allocated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'active', $9, $10)
            "#,
        )
        .bind(allocation.id.as_uuid())
        .bind(org_id.as_uuid())
        .bind(allocation.batch_id.as_uuid())
        .bind(allocation.order_id.as_uuid())
        .bind(allocation.order_line_id.as_uuid())
        .bind(allocation.product_id.as_uuid())
        .bind(allocation.quantity)
        .bind(&allocation.idempotency_key)
        .bind(allocation.allocated_by.map(|u| *u.as_uuid()))
        .bind(allocation.allocated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_batch_allocation", e))?;

        sqlx::query(
            r#"
            UPDATE tier1_reservations
            SET quantity = GREATEST(quantity - $3, 0)
            WHERE org_id = $1 AND order_line_id = $2
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(allocation.order_line_id.as_uuid())
        .bind(event.tier1_released)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("decrement_tier1", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, event),
        fields(org_id = %org_id, allocation_id = %event.allocation_id, quantity = event.quantity),
        err
    )]
    async fn release_batch_allocation(
        &self,
        org_id: OrgId,
        expected_line: ExpectedVersion,
        event: &AllocationReleased,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        claim_line(&mut tx, org_id, event.order_line_id, expected_line).await?;

        let released = sqlx::query(
            r#"
            UPDATE batch_allocations
            SET status = 'released', released_at = $3
            WHERE org_id = $1 AND id = $2 AND status = 'active'
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(event.allocation_id.as_uuid())
        .bind(event.occurred_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("release_batch_allocation", e))?;
        if released.rows_affected() == 0 {
            return Err(StoreError::conflict("batch allocation already released"));
        }

        sqlx::query(
            r#"
            UPDATE batches
            SET available_quantity = available_quantity + $3, version = version + 1
            WHERE org_id = $1 AND id = $2
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(event.batch_id.as_uuid())
        .bind(event.quantity)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("restore_batch", e))?;

        sqlx::query(
            r#"
            INSERT INTO tier1_reservations (order_line_id, org_id, order_id, product_id, quantity)
            SELECT a.order_line_id, a.org_id, a.order_id, a.product_id, $3
            FROM batch_allocations a
            WHERE a.org_id = $1 AND a.id = $2
            ON CONFLICT (order_line_id)
            DO UPDATE SET quantity = tier1_reservations.quantity + EXCLUDED.quantity
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(event.allocation_id.as_uuid())
        .bind(event.tier1_restored)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("restore_tier1", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}
