use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::Row;
use sqlx::postgres::PgRow;
use tracing::instrument;
use uuid::Uuid;

use nursery_core::{AggregateRoot, DomainError, ExpectedVersion, OrgId};
use nursery_dispatch::{
    DeliveryItem, DeliveryItemId, DeliveryItemStatus, DeliveryRun, DeliveryRunId, Load, LoadEvent,
    LoadStatus, OrderRef, PickingTeamId,
};
use nursery_sales::{OrderId, OrderStatus};

use super::{PgStore, map_sqlx_error, unknown_status, version_from_db, version_to_db};
use crate::error::StoreError;
use crate::stores::DispatchStore;

fn run_from_row(row: &PgRow) -> Result<DeliveryRun, StoreError> {
    let d = |e| map_sqlx_error("delivery run row", e);
    let status: String = row.try_get("status").map_err(d)?;
    Ok(DeliveryRun {
        id: DeliveryRunId::from_uuid(row.try_get("id").map_err(d)?),
        org_id: OrgId::from_uuid(row.try_get("org_id").map_err(d)?),
        run_number: row.try_get("run_number").map_err(d)?,
        run_date: row.try_get("run_date").map_err(d)?,
        status: LoadStatus::parse(&status).ok_or_else(|| unknown_status("load status", &status))?,
        vehicle: row.try_get("vehicle").map_err(d)?,
        driver: row.try_get("driver").map_err(d)?,
        picking_team_id: row
            .try_get::<Option<Uuid>, _>("picking_team_id")
            .map_err(d)?
            .map(PickingTeamId::from_uuid),
        departed_at: row.try_get("departed_at").map_err(d)?,
        completed_at: row.try_get("completed_at").map_err(d)?,
        created_at: row.try_get("created_at").map_err(d)?,
    })
}

fn item_from_row(row: &PgRow) -> Result<DeliveryItem, StoreError> {
    let d = |e| map_sqlx_error("delivery item row", e);
    let status: String = row.try_get("status").map_err(d)?;
    let sequence: i32 = row.try_get("sequence").map_err(d)?;
    Ok(DeliveryItem {
        id: DeliveryItemId::from_uuid(row.try_get("id").map_err(d)?),
        org_id: OrgId::from_uuid(row.try_get("org_id").map_err(d)?),
        run_id: DeliveryRunId::from_uuid(row.try_get("run_id").map_err(d)?),
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(d)?),
        status: DeliveryItemStatus::parse(&status)
            .ok_or_else(|| unknown_status("delivery item status", &status))?,
        sequence: u32::try_from(sequence).unwrap_or_default(),
        created_at: row.try_get("created_at").map_err(d)?,
    })
}

const ITEM_COLUMNS: &str = "id, org_id, run_id, order_id, status, sequence, created_at";

#[async_trait]
impl DispatchStore for PgStore {
    #[instrument(skip(self, run), fields(org_id = %run.org_id, run_number = %run.run_number), err)]
    async fn create_run(&self, run: &DeliveryRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO delivery_runs (
                id, org_id, run_number, run_date, status, vehicle, driver,
                picking_team_id, departed_at, completed_at, created_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 1)
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(run.org_id.as_uuid())
        .bind(&run.run_number)
        .bind(run.run_date)
        .bind(run.status.as_str())
        .bind(run.vehicle.as_deref())
        .bind(run.driver.as_deref())
        .bind(run.picking_team_id.map(|t| *t.as_uuid()))
        .bind(run.departed_at)
        .bind(run.completed_at)
        .bind(run.created_at)
        .execute(self.pool())
        .await
        .map_err(|e| map_sqlx_error("create_run", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(org_id = %org_id, run_date = %run_date), err)]
    async fn next_run_sequence(&self, org_id: OrgId, run_date: NaiveDate) -> Result<u32, StoreError> {
        let taken: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM delivery_runs WHERE org_id = $1 AND run_date = $2",
        )
        .bind(org_id.as_uuid())
        .bind(run_date)
        .fetch_one(self.pool())
        .await
        .map_err(|e| map_sqlx_error("next_run_sequence", e))?;

        Ok(u32::try_from(taken).unwrap_or(u32::MAX - 1) + 1)
    }

    #[instrument(skip(self), fields(org_id = %org_id, run_id = %run_id), err)]
    async fn load_load(&self, org_id: OrgId, run_id: DeliveryRunId) -> Result<Option<Load>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, org_id, run_number, run_date, status, vehicle, driver,
                   picking_team_id, departed_at, completed_at, created_at, version
            FROM delivery_runs
            WHERE org_id = $1 AND id = $2
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(run_id.as_uuid())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_sqlx_error("load_run", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let run = run_from_row(&row)?;
        let version: i64 = row
            .try_get("version")
            .map_err(|e| map_sqlx_error("delivery run row", e))?;

        let item_rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM delivery_items WHERE org_id = $1 AND run_id = $2 ORDER BY sequence ASC"
        ))
        .bind(org_id.as_uuid())
        .bind(run_id.as_uuid())
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_sqlx_error("load_run_items", e))?;
        let items = item_rows
            .iter()
            .map(item_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let order_ids: Vec<Uuid> = items.iter().map(|i| *i.order_id.as_uuid()).collect();
        let order_rows = sqlx::query("SELECT id, status FROM orders WHERE org_id = $1 AND id = ANY($2)")
            .bind(org_id.as_uuid())
            .bind(&order_ids)
            .fetch_all(self.pool())
            .await
            .map_err(|e| map_sqlx_error("load_run_orders", e))?;
        let orders = order_rows
            .iter()
            .map(|row| {
                let d = |e| map_sqlx_error("order status row", e);
                let status: String = row.try_get("status").map_err(d)?;
                Ok(OrderRef {
                    order_id: OrderId::from_uuid(row.try_get("id").map_err(d)?),
                    org_id,
                    status: OrderStatus::parse(&status)
                        .ok_or_else(|| unknown_status("order status", &status))?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Some(Load::from_parts(run, items, orders, version_from_db(version))))
    }

    #[instrument(skip(self), fields(org_id = %org_id, order_id = %order_id), err)]
    async fn active_item_for_order(
        &self,
        org_id: OrgId,
        order_id: OrderId,
    ) -> Result<Option<DeliveryItem>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM delivery_items \
             WHERE org_id = $1 AND order_id = $2 AND status IN ('pending', 'loading', 'in_transit')"
        ))
        .bind(org_id.as_uuid())
        .bind(order_id.as_uuid())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_sqlx_error("active_item_for_order", e))?;

        row.as_ref().map(item_from_row).transpose()
    }

    #[instrument(
        skip(self, load, events),
        fields(org_id = %org_id, run_id = %load.id_typed(), events = events.len()),
        err
    )]
    async fn save_transition(
        &self,
        org_id: OrgId,
        load: &Load,
        expected: ExpectedVersion,
        events: &[LoadEvent],
    ) -> Result<(), StoreError> {
        let run = load
            .run()
            .filter(|r| r.org_id == org_id)
            .ok_or_else(|| StoreError::not_found("Load not found"))?;
        let expected_db = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(version_to_db(v)),
        };

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let updated = sqlx::query(
            r#"
            UPDATE delivery_runs
            SET status = $3, vehicle = $4, driver = $5, picking_team_id = $6,
                departed_at = $7, completed_at = $8, version = $9
            WHERE org_id = $1 AND id = $2 AND ($10::bigint IS NULL OR version = $10)
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(run.id.as_uuid())
        .bind(run.status.as_str())
        .bind(run.vehicle.as_deref())
        .bind(run.driver.as_deref())
        .bind(run.picking_team_id.map(|t| *t.as_uuid()))
        .bind(run.departed_at)
        .bind(run.completed_at)
        .bind(version_to_db(load.version()))
        .bind(expected_db)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_run", e))?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::conflict(format!(
                "load {} was modified concurrently",
                run.run_number
            )));
        }

        for item_id in events.iter().filter_map(LoadEvent::removed_item) {
            sqlx::query("DELETE FROM delivery_items WHERE org_id = $1 AND id = $2")
                .bind(org_id.as_uuid())
                .bind(item_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_delivery_item", e))?;
        }

        // A moved order's old item changes run; the partial unique index on
        // active items then rejects a second active item for the same order.
        for item in load.items() {
            sqlx::query(
                r#"
                INSERT INTO delivery_items (id, org_id, run_id, order_id, status, sequence, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO UPDATE
                SET run_id = EXCLUDED.run_id, status = EXCLUDED.status, sequence = EXCLUDED.sequence
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(org_id.as_uuid())
            .bind(item.run_id.as_uuid())
            .bind(item.order_id.as_uuid())
            .bind(item.status.as_str())
            .bind(i32::try_from(item.sequence).unwrap_or(i32::MAX))
            .bind(item.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_delivery_item", e))?;
        }

        for change in events.iter().flat_map(LoadEvent::order_changes) {
            let moved = sqlx::query(
                "UPDATE orders SET status = $4 WHERE org_id = $1 AND id = $2 AND status = $3",
            )
            .bind(org_id.as_uuid())
            .bind(change.order_id.as_uuid())
            .bind(change.from.as_str())
            .bind(change.to.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_order_status", e))?;
            if moved.rows_affected() == 0 {
                return Err(StoreError::conflict(format!(
                    "order {} is no longer {}",
                    change.order_id, change.from
                )));
            }
        }

        for event in events {
            if let LoadEvent::OrderAssigned(assigned) = event {
                if let Some(previous) = assigned.moved_from {
                    sqlx::query(
                        "UPDATE delivery_runs SET version = version + 1 WHERE org_id = $1 AND id = $2",
                    )
                    .bind(org_id.as_uuid())
                    .bind(previous.as_uuid())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("bump_previous_run", e))?;
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(org_id = %org_id, run_id = %run_id), err)]
    async fn delete_run(
        &self,
        org_id: OrgId,
        run_id: DeliveryRunId,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let expected_db = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(version_to_db(v)),
        };
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let referenced: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM delivery_items WHERE org_id = $1 AND run_id = $2)",
        )
        .bind(org_id.as_uuid())
        .bind(run_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("delete_run", e))?;
        if referenced {
            return Err(DomainError::invariant(
                "Cannot delete a load that has orders assigned. Remove all orders first.",
            )
            .into());
        }

        let deleted = sqlx::query(
            "DELETE FROM delivery_runs WHERE org_id = $1 AND id = $2 AND ($3::bigint IS NULL OR version = $3)",
        )
        .bind(org_id.as_uuid())
        .bind(run_id.as_uuid())
        .bind(expected_db)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("delete_run", e))?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::conflict(format!(
                "load {run_id} was modified concurrently"
            )));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}
