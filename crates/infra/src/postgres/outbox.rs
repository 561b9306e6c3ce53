use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::Row;
use sqlx::postgres::PgRow;
use tracing::instrument;
use uuid::Uuid;

use nursery_core::OrgId;
use nursery_dispatch::PickingTeamId;
use nursery_events::{EventEnvelope, OutboxEntry, OutboxEntryId};
use nursery_sales::OrderId;

use super::{PgStore, map_sqlx_error};
use crate::error::StoreError;
use crate::picking::{PickList, PickListId};
use crate::stores::{AuditSink, OutboxStore, PickingService};

const OUTBOX_COLUMNS: &str = "id, org_id, effect, status, attempts, created_at, updated_at";

fn entry_from_row(row: &PgRow) -> Result<OutboxEntry, StoreError> {
    let d = |e| map_sqlx_error("outbox row", e);
    let attempts: i32 = row.try_get("attempts").map_err(d)?;
    Ok(OutboxEntry {
        id: OutboxEntryId(row.try_get("id").map_err(d)?),
        org_id: OrgId::from_uuid(row.try_get("org_id").map_err(d)?),
        effect: serde_json::from_value(row.try_get("effect").map_err(d)?)?,
        status: serde_json::from_value(row.try_get("status").map_err(d)?)?,
        attempts: u32::try_from(attempts).unwrap_or_default(),
        created_at: row.try_get("created_at").map_err(d)?,
        updated_at: row.try_get("updated_at").map_err(d)?,
    })
}

fn pick_list_from_row(row: &PgRow) -> Result<PickList, StoreError> {
    let d = |e| map_sqlx_error("pick list row", e);
    Ok(PickList {
        id: PickListId::from_uuid(row.try_get("id").map_err(d)?),
        org_id: OrgId::from_uuid(row.try_get("org_id").map_err(d)?),
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(d)?),
        team_id: row
            .try_get::<Option<Uuid>, _>("team_id")
            .map_err(d)?
            .map(PickingTeamId::from_uuid),
        created_at: row.try_get("created_at").map_err(d)?,
    })
}

#[async_trait]
impl OutboxStore for PgStore {
    #[instrument(skip(self, entries), fields(entries = entries.len()), err)]
    async fn enqueue(&self, entries: &[OutboxEntry]) -> Result<(), StoreError> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        for entry in entries {
            sqlx::query(&format!(
                "INSERT INTO outbox_entries ({OUTBOX_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
            ))
            .bind(entry.id.0)
            .bind(entry.org_id.as_uuid())
            .bind(serde_json::to_value(&entry.effect)?)
            .bind(serde_json::to_value(&entry.status)?)
            .bind(i32::try_from(entry.attempts).unwrap_or(i32::MAX))
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("enqueue_outbox_entry", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(org_id = %org_id), err)]
    async fn pending(&self, org_id: OrgId, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_entries \
             WHERE org_id = $1 AND status->>'state' IN ('pending', 'failed') \
             ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(org_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_sqlx_error("pending_outbox_entries", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    #[instrument(skip(self), fields(entry_id = %id), err)]
    async fn mark_delivered(&self, id: OutboxEntryId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = '{"state":"delivered"}'::jsonb, attempts = attempts + 1, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| map_sqlx_error("mark_delivered", e))?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found("Outbox entry not found"));
        }
        Ok(())
    }

    #[instrument(skip(self, error), fields(entry_id = %id), err)]
    async fn mark_failed(
        &self,
        id: OutboxEntryId,
        error: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<OutboxEntry, StoreError> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_entries WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("mark_failed", e))?
        .ok_or_else(|| StoreError::not_found("Outbox entry not found"))?;

        let mut entry = entry_from_row(&row)?;
        entry.mark_failed(error, max_attempts, now);

        sqlx::query("UPDATE outbox_entries SET status = $2, attempts = $3, updated_at = $4 WHERE id = $1")
            .bind(id.0)
            .bind(serde_json::to_value(&entry.status)?)
            .bind(i32::try_from(entry.attempts).unwrap_or(i32::MAX))
            .bind(entry.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("mark_failed", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(entry)
    }
}

#[async_trait]
impl AuditSink for PgStore {
    #[instrument(
        skip(self, envelope),
        fields(org_id = %envelope.org_id(), event_type = %envelope.event_type()),
        err
    )]
    async fn record(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (
                event_id, org_id, entity_id, entity_type, event_type, event_version,
                occurred_at, actor, payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(envelope.event_id())
        .bind(envelope.org_id().as_uuid())
        .bind(envelope.entity_id().as_uuid())
        .bind(envelope.entity_type())
        .bind(envelope.event_type())
        .bind(i32::try_from(envelope.event_version()).unwrap_or(i32::MAX))
        .bind(envelope.occurred_at())
        .bind(envelope.actor().map(|a| *a.as_uuid()))
        .bind(envelope.payload())
        .execute(self.pool())
        .await
        .map_err(|e| map_sqlx_error("record_audit", e))?;
        Ok(())
    }
}

#[async_trait]
impl PickingService for PgStore {
    #[instrument(skip(self), fields(org_id = %org_id, order_id = %order_id), err)]
    async fn get_pick_list_for_order(
        &self,
        org_id: OrgId,
        order_id: OrderId,
    ) -> Result<Option<PickList>, StoreError> {
        let row = sqlx::query(
            "SELECT id, org_id, order_id, team_id, created_at FROM pick_lists WHERE org_id = $1 AND order_id = $2",
        )
        .bind(org_id.as_uuid())
        .bind(order_id.as_uuid())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_sqlx_error("get_pick_list_for_order", e))?;

        row.as_ref().map(pick_list_from_row).transpose()
    }

    #[instrument(skip(self), fields(org_id = %org_id, order_id = %order_id), err)]
    async fn create_pick_list_from_order(
        &self,
        org_id: OrgId,
        order_id: OrderId,
    ) -> Result<PickList, StoreError> {
        let pick_list = PickList::for_order(org_id, order_id, Utc::now());
        let inserted = sqlx::query(
            r#"
            INSERT INTO pick_lists (id, org_id, order_id, team_id, created_at)
            SELECT $1, o.org_id, o.id, NULL, $3
            FROM orders o
            WHERE o.org_id = $4 AND o.id = $2
            "#,
        )
        .bind(pick_list.id.as_uuid())
        .bind(order_id.as_uuid())
        .bind(pick_list.created_at)
        .bind(org_id.as_uuid())
        .execute(self.pool())
        .await
        .map_err(|e| map_sqlx_error("create_pick_list_from_order", e))?;
        if inserted.rows_affected() == 0 {
            return Err(StoreError::not_found("Order not found"));
        }
        Ok(pick_list)
    }

    #[instrument(skip(self), fields(org_id = %org_id, pick_list_id = %pick_list_id, team_id = %team_id), err)]
    async fn assign_pick_list_to_team(
        &self,
        org_id: OrgId,
        pick_list_id: PickListId,
        team_id: PickingTeamId,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE pick_lists SET team_id = $3 WHERE org_id = $1 AND id = $2")
            .bind(org_id.as_uuid())
            .bind(pick_list_id.as_uuid())
            .bind(team_id.as_uuid())
            .execute(self.pool())
            .await
            .map_err(|e| map_sqlx_error("assign_pick_list_to_team", e))?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found("Pick list not found"));
        }
        Ok(())
    }
}
