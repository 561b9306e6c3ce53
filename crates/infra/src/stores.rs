//! Collaborator traits of the order, allocation and dispatch core.
//!
//! Every method is scoped to the caller's organization: a record of another
//! organization is reported as absent, never returned. Each trait has an
//! in-memory ([`crate::memory`]) and a Postgres ([`crate::postgres`])
//! implementation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;

use nursery_core::{ExpectedVersion, OrgId, UserId};
use nursery_dispatch::{DeliveryItem, DeliveryRun, DeliveryRunId, Load, LoadEvent, PickingTeamId};
use nursery_events::{EventEnvelope, GroupBackfill, OutboxEntry, OutboxEntryId};
use nursery_inventory::{
    AllocationReleased, Batch, BatchAllocated, BatchAllocation, BatchAllocationId, BatchId,
    LineAllocation, Tier1Outcome,
};
use nursery_parties::{Customer, CustomerId, Organization};
use nursery_pricing::{CustomerPriceOverride, PriceListEntry, PriceListId};
use nursery_products::{GroupMember, Product, ProductGroup, ProductGroupId, ProductId};
use nursery_sales::{NewOrder, Order, OrderId, OrderLineId, OrderSummary};

use crate::error::StoreError;
use crate::picking::{PickList, PickListId};

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Sellable products of the organization, in stable catalog order.
    async fn resolve_products(&self, org_id: OrgId) -> Result<Vec<Product>, StoreError>;

    async fn find_product_group(
        &self,
        org_id: OrgId,
        group_id: ProductGroupId,
    ) -> Result<Option<ProductGroup>, StoreError>;

    /// Members in data-source order; the first one represents the group on a mix line.
    async fn resolve_group_members(
        &self,
        org_id: OrgId,
        group_id: ProductGroupId,
    ) -> Result<Vec<GroupMember>, StoreError>;
}

#[async_trait]
pub trait PartyStore: Send + Sync {
    /// Looked up by id alone so that a customer of another organization can
    /// be reported as cross-tenant rather than missing.
    async fn find_customer(&self, customer_id: CustomerId) -> Result<Option<Customer>, StoreError>;

    async fn find_organization(&self, org_id: OrgId) -> Result<Option<Organization>, StoreError>;
}

#[async_trait]
pub trait PricingStore: Send + Sync {
    /// Every override of the customer; date filtering happens in the resolver.
    async fn resolve_price_overrides(
        &self,
        org_id: OrgId,
        customer_id: CustomerId,
    ) -> Result<Vec<CustomerPriceOverride>, StoreError>;

    async fn default_price_list(&self, org_id: OrgId) -> Result<Option<PriceListId>, StoreError>;

    async fn price_entries(
        &self,
        org_id: OrgId,
        price_lists: &[PriceListId],
        products: &[ProductId],
    ) -> Result<Vec<PriceListEntry>, StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Create the order and all of its lines, or nothing.
    async fn commit_order(&self, order: &NewOrder) -> Result<OrderId, StoreError>;

    /// Set `product_group_id` on the lines matching each correlation key.
    /// Returns the number of lines updated.
    async fn backfill_group_ids(
        &self,
        org_id: OrgId,
        order_id: OrderId,
        lines: &[GroupBackfill],
    ) -> Result<usize, StoreError>;

    async fn find_order(&self, org_id: OrgId, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Newest first.
    async fn recent_orders_for_customer(
        &self,
        org_id: OrgId,
        customer_id: CustomerId,
        limit: usize,
    ) -> Result<Vec<OrderSummary>, StoreError>;
}

#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Tier 1 for every line of the order without a batch allocation, in one
    /// atomic call. Safe to repeat: reservations are set, not added.
    async fn allocate_tier1(
        &self,
        org_id: OrgId,
        order_id: OrderId,
        actor: Option<UserId>,
    ) -> Result<Tier1Outcome, StoreError>;

    async fn load_batch(&self, org_id: OrgId, batch_id: BatchId) -> Result<Option<Batch>, StoreError>;

    async fn line_allocation_state(
        &self,
        org_id: OrgId,
        order_line_id: OrderLineId,
    ) -> Result<Option<LineAllocation>, StoreError>;

    async fn find_by_idempotency_key(
        &self,
        org_id: OrgId,
        idempotency_key: &str,
    ) -> Result<Option<BatchAllocation>, StoreError>;

    async fn find_batch_allocation(
        &self,
        org_id: OrgId,
        allocation_id: BatchAllocationId,
    ) -> Result<Option<BatchAllocation>, StoreError>;

    /// Batch decrement, allocation row and Tier-1 decrement in one write.
    ///
    /// Fails with a conflict when the batch is no longer at
    /// `event.batch_version`, the line is not at `expected_line`, or the
    /// idempotency key was already used.
    async fn apply_batch_allocation(
        &self,
        org_id: OrgId,
        expected_line: ExpectedVersion,
        event: &BatchAllocated,
    ) -> Result<(), StoreError>;

    /// Compensating write: quantity back to the batch, reservation restored.
    async fn release_batch_allocation(
        &self,
        org_id: OrgId,
        expected_line: ExpectedVersion,
        event: &AllocationReleased,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DispatchStore: Send + Sync {
    async fn create_run(&self, run: &DeliveryRun) -> Result<(), StoreError>;

    /// 1-based position of the next run of `run_date` in the organization.
    async fn next_run_sequence(&self, org_id: OrgId, run_date: NaiveDate) -> Result<u32, StoreError>;

    /// The run, its items and the statuses of the orders on them.
    async fn load_load(&self, org_id: OrgId, run_id: DeliveryRunId) -> Result<Option<Load>, StoreError>;

    async fn active_item_for_order(
        &self,
        org_id: OrgId,
        order_id: OrderId,
    ) -> Result<Option<DeliveryItem>, StoreError>;

    /// Persist run, item and order status changes of one transition together.
    ///
    /// `load` is the state after the events were applied; the stored run must
    /// still be at `expected`.
    async fn save_transition(
        &self,
        org_id: OrgId,
        load: &Load,
        expected: ExpectedVersion,
        events: &[LoadEvent],
    ) -> Result<(), StoreError>;

    /// Refuses while any delivery item references the run.
    async fn delete_run(
        &self,
        org_id: OrgId,
        run_id: DeliveryRunId,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PickingService: Send + Sync {
    async fn get_pick_list_for_order(
        &self,
        org_id: OrgId,
        order_id: OrderId,
    ) -> Result<Option<PickList>, StoreError>;

    async fn create_pick_list_from_order(
        &self,
        org_id: OrgId,
        order_id: OrderId,
    ) -> Result<PickList, StoreError>;

    async fn assign_pick_list_to_team(
        &self,
        org_id: OrgId,
        pick_list_id: PickListId,
        team_id: PickingTeamId,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, entries: &[OutboxEntry]) -> Result<(), StoreError>;

    /// Retriable entries of the organization, oldest first.
    async fn pending(&self, org_id: OrgId, limit: usize) -> Result<Vec<OutboxEntry>, StoreError>;

    async fn mark_delivered(&self, id: OutboxEntryId, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Returns the entry as updated (failed, or abandoned once `max_attempts` is reached).
    async fn mark_failed(
        &self,
        id: OutboxEntryId,
        error: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<OutboxEntry, StoreError>;
}

/// Everything the application services talk to, behind one handle.
pub trait NurseryStore:
    CatalogStore
    + PartyStore
    + PricingStore
    + OrderStore
    + AllocationStore
    + DispatchStore
    + PickingService
    + AuditSink
    + OutboxStore
{
}

impl<T> NurseryStore for T where
    T: CatalogStore
        + PartyStore
        + PricingStore
        + OrderStore
        + AllocationStore
        + DispatchStore
        + PickingService
        + AuditSink
        + OutboxStore
{
}
