//! In-memory store.
//!
//! Intended for tests/dev. Every collaborator trait is implemented over one
//! `RwLock`-guarded state, and every multi-record write happens under a single
//! write guard, so a write is either fully visible or not at all.
//!
//! [`InMemoryStore::fail_next`] makes the next call at a [`FailurePoint`] fail
//! before it touches any state.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use tracing::debug;

use nursery_core::{AggregateRoot, DomainError, ExpectedVersion, OrgId, UserId};
use nursery_dispatch::{
    DeliveryItem, DeliveryItemId, DeliveryRun, DeliveryRunId, Load, LoadEvent, OrderRef,
    PickingTeamId,
};
use nursery_events::{EventEnvelope, GroupBackfill, OutboxEntry, OutboxEntryId};
use nursery_inventory::{
    AllocationReleased, Batch, BatchAllocated, BatchAllocation, BatchAllocationId,
    BatchAllocationStatus, BatchId, LineAllocation, StockLedger, Tier1Line, Tier1Outcome,
    Tier1Reservation, plan_tier1,
};
use nursery_parties::{Customer, CustomerId, Organization};
use nursery_pricing::{CustomerPriceOverride, PriceList, PriceListEntry, PriceListId};
use nursery_products::{GroupMember, Product, ProductGroup, ProductGroupId, ProductId};
use nursery_sales::{NewOrder, Order, OrderId, OrderLine, OrderLineId, OrderStatus, OrderSummary};

use crate::error::StoreError;
use crate::picking::{PickList, PickListId};
use crate::stores::{
    AllocationStore, AuditSink, CatalogStore, DispatchStore, OrderStore, OutboxStore, PartyStore,
    PickingService, PricingStore,
};

/// Store calls that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    CommitOrder,
    BackfillGroupIds,
    AllocateTier1,
    RecordAudit,
    CreatePickList,
}

#[derive(Default)]
struct State {
    organizations: HashMap<OrgId, Organization>,
    customers: HashMap<CustomerId, Customer>,
    /// Catalog order is insertion order.
    products: Vec<Product>,
    groups: HashMap<ProductGroupId, ProductGroup>,
    members: HashMap<ProductGroupId, Vec<GroupMember>>,
    price_lists: HashMap<PriceListId, PriceList>,
    price_entries: Vec<PriceListEntry>,
    overrides: HashMap<CustomerId, Vec<CustomerPriceOverride>>,

    orders: HashMap<OrderId, Order>,

    batches: HashMap<BatchId, Batch>,
    reservations: HashMap<OrderLineId, (OrgId, Tier1Reservation)>,
    line_versions: HashMap<OrderLineId, u64>,
    allocations: HashMap<BatchAllocationId, BatchAllocation>,

    runs: HashMap<DeliveryRunId, (DeliveryRun, u64)>,
    items: HashMap<DeliveryItemId, DeliveryItem>,
    pick_lists: HashMap<PickListId, PickList>,

    audit: Vec<EventEnvelope<JsonValue>>,
    outbox: Vec<OutboxEntry>,

    failures: HashMap<FailurePoint, String>,
}

impl State {
    fn take_failure(&mut self, point: FailurePoint) -> Result<(), StoreError> {
        match self.failures.remove(&point) {
            Some(message) => Err(StoreError::Database(message)),
            None => Ok(()),
        }
    }

    fn order_in(&self, org_id: OrgId, order_id: OrderId) -> Option<&Order> {
        self.orders.get(&order_id).filter(|o| o.org_id == org_id)
    }

    fn line_in(&self, org_id: OrgId, line_id: OrderLineId) -> Option<(&Order, &OrderLine)> {
        self.orders
            .values()
            .filter(|o| o.org_id == org_id)
            .find_map(|o| o.lines.iter().find(|l| l.id == line_id).map(|l| (o, l)))
    }

    fn batch_allocated(&self, line_id: OrderLineId) -> i64 {
        self.allocations
            .values()
            .filter(|a| a.order_line_id == line_id && a.is_active())
            .map(|a| a.quantity)
            .sum()
    }

    fn bump_line(&mut self, line_id: OrderLineId) {
        *self.line_versions.entry(line_id).or_default() += 1;
    }
}

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|_| StoreError::poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state.write().map_err(|_| StoreError::poisoned())
    }

    /// Seeding and inspection never fail, even after a panic in another test thread.
    fn seed(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn peek(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, operation: &'static str) {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        *calls.entry(operation).or_default() += 1;
    }

    /// How many times a store operation was called.
    pub fn calls(&self, operation: &str) -> usize {
        let calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.get(operation).copied().unwrap_or(0)
    }

    /// Make the next call at `point` fail with `message`.
    pub fn fail_next(&self, point: FailurePoint, message: impl Into<String>) {
        self.seed().failures.insert(point, message.into());
    }

    pub fn seed_organization(&self, organization: Organization) {
        self.seed().organizations.insert(organization.id, organization);
    }

    pub fn seed_customer(&self, customer: Customer) {
        self.seed().customers.insert(customer.id, customer);
    }

    pub fn seed_product(&self, product: Product) {
        let mut state = self.seed();
        state.products.retain(|p| p.id != product.id);
        state.products.push(product);
    }

    pub fn seed_group(&self, group: ProductGroup, members: impl IntoIterator<Item = ProductId>) {
        let mut state = self.seed();
        let members = members
            .into_iter()
            .map(|product_id| GroupMember { product_id })
            .collect();
        state.members.insert(group.id, members);
        state.groups.insert(group.id, group);
    }

    pub fn seed_price_list(&self, list: PriceList) {
        self.seed().price_lists.insert(list.id, list);
    }

    pub fn seed_price_entry(&self, entry: PriceListEntry) {
        self.seed().price_entries.push(entry);
    }

    pub fn seed_price_override(&self, customer_id: CustomerId, price_override: CustomerPriceOverride) {
        self.seed()
            .overrides
            .entry(customer_id)
            .or_default()
            .push(price_override);
    }

    pub fn seed_batch(&self, batch: Batch) {
        self.seed().batches.insert(batch.id, batch);
    }

    /// Force an order into a status (orders reach draft/cancelled outside this core).
    pub fn set_order_status(&self, order_id: OrderId, status: OrderStatus) {
        if let Some(order) = self.seed().orders.get_mut(&order_id) {
            order.status = status;
        }
    }

    pub fn orders(&self, org_id: OrgId) -> Vec<Order> {
        self.peek()
            .orders
            .values()
            .filter(|o| o.org_id == org_id)
            .cloned()
            .collect()
    }

    pub fn order_by_number(&self, org_id: OrgId, order_number: &str) -> Option<Order> {
        self.peek()
            .orders
            .values()
            .find(|o| o.org_id == org_id && o.order_number == order_number)
            .cloned()
    }

    pub fn batch(&self, batch_id: BatchId) -> Option<Batch> {
        self.peek().batches.get(&batch_id).cloned()
    }

    pub fn reservation(&self, line_id: OrderLineId) -> Option<Tier1Reservation> {
        self.peek().reservations.get(&line_id).map(|(_, r)| *r)
    }

    pub fn run(&self, run_id: DeliveryRunId) -> Option<DeliveryRun> {
        self.peek().runs.get(&run_id).map(|(run, _)| run.clone())
    }

    pub fn items_for_order(&self, order_id: OrderId) -> Vec<DeliveryItem> {
        self.peek()
            .items
            .values()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect()
    }

    pub fn pick_lists(&self) -> Vec<PickList> {
        self.peek().pick_lists.values().cloned().collect()
    }

    pub fn audit_records(&self) -> Vec<EventEnvelope<JsonValue>> {
        self.peek().audit.clone()
    }

    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.peek().outbox.clone()
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn resolve_products(&self, org_id: OrgId) -> Result<Vec<Product>, StoreError> {
        self.track("resolve_products");
        let state = self.read()?;
        Ok(state
            .products
            .iter()
            .filter(|p| p.org_id == org_id && p.can_be_sold())
            .cloned()
            .collect())
    }

    async fn find_product_group(
        &self,
        org_id: OrgId,
        group_id: ProductGroupId,
    ) -> Result<Option<ProductGroup>, StoreError> {
        self.track("find_product_group");
        let state = self.read()?;
        Ok(state
            .groups
            .get(&group_id)
            .filter(|g| g.org_id == org_id)
            .cloned())
    }

    async fn resolve_group_members(
        &self,
        org_id: OrgId,
        group_id: ProductGroupId,
    ) -> Result<Vec<GroupMember>, StoreError> {
        self.track("resolve_group_members");
        let state = self.read()?;
        if !state.groups.get(&group_id).is_some_and(|g| g.org_id == org_id) {
            return Ok(Vec::new());
        }
        Ok(state.members.get(&group_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl PartyStore for InMemoryStore {
    async fn find_customer(&self, customer_id: CustomerId) -> Result<Option<Customer>, StoreError> {
        self.track("find_customer");
        Ok(self.read()?.customers.get(&customer_id).cloned())
    }

    async fn find_organization(&self, org_id: OrgId) -> Result<Option<Organization>, StoreError> {
        self.track("find_organization");
        Ok(self.read()?.organizations.get(&org_id).cloned())
    }
}

#[async_trait]
impl PricingStore for InMemoryStore {
    async fn resolve_price_overrides(
        &self,
        org_id: OrgId,
        customer_id: CustomerId,
    ) -> Result<Vec<CustomerPriceOverride>, StoreError> {
        self.track("resolve_price_overrides");
        let state = self.read()?;
        let in_org = |id: &PriceListId| state.price_lists.get(id).is_some_and(|l| l.org_id == org_id);
        Ok(state
            .overrides
            .get(&customer_id)
            .map(|all| {
                all.iter()
                    .filter(|o| in_org(&o.price_list_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn default_price_list(&self, org_id: OrgId) -> Result<Option<PriceListId>, StoreError> {
        self.track("default_price_list");
        let state = self.read()?;
        Ok(state
            .price_lists
            .values()
            .find(|l| l.org_id == org_id && l.is_default)
            .map(|l| l.id))
    }

    async fn price_entries(
        &self,
        org_id: OrgId,
        price_lists: &[PriceListId],
        products: &[ProductId],
    ) -> Result<Vec<PriceListEntry>, StoreError> {
        self.track("price_entries");
        let state = self.read()?;
        Ok(state
            .price_entries
            .iter()
            .filter(|e| price_lists.contains(&e.price_list_id) && products.contains(&e.product_id))
            .filter(|e| {
                state
                    .price_lists
                    .get(&e.price_list_id)
                    .is_some_and(|l| l.org_id == org_id)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn commit_order(&self, order: &NewOrder) -> Result<OrderId, StoreError> {
        self.track("commit_order");
        let mut guard = self.write()?;
        let state = &mut *guard;
        state.take_failure(FailurePoint::CommitOrder)?;

        if order.lines.is_empty() {
            return Err(StoreError::Database(
                "an order requires at least one line".to_string(),
            ));
        }
        if !state
            .customers
            .get(&order.customer_id)
            .is_some_and(|c| c.org_id == order.org_id)
        {
            return Err(StoreError::Database(
                "customer does not belong to the organization".to_string(),
            ));
        }
        if state
            .orders
            .values()
            .any(|o| o.org_id == order.org_id && o.order_number == order.order_number)
        {
            return Err(StoreError::conflict(format!(
                "order number {} already exists",
                order.order_number
            )));
        }

        let now = Utc::now();
        let order_id = OrderId::new();
        let lines = order
            .lines
            .iter()
            .map(|l| OrderLine {
                id: OrderLineId::new(),
                order_id,
                line_no: l.line_no,
                product_id: l.product_id,
                product_group_id: None,
                description: l.description.clone(),
                quantity: l.quantity,
                unit_price: l.unit_price,
                vat_rate: l.vat_rate,
                correlation_key: l.correlation_key,
                created_at: now,
            })
            .collect();

        state.orders.insert(
            order_id,
            Order {
                id: order_id,
                org_id: order.org_id,
                customer_id: order.customer_id,
                order_number: order.order_number.clone(),
                status: order.status,
                delivery_date: order.delivery_date,
                notes: order.notes.clone(),
                ship_to_address_id: order.ship_to_address_id,
                created_at: now,
                lines,
            },
        );
        debug!(order_id = %order_id, order_number = %order.order_number, "order committed");
        Ok(order_id)
    }

    async fn backfill_group_ids(
        &self,
        org_id: OrgId,
        order_id: OrderId,
        lines: &[GroupBackfill],
    ) -> Result<usize, StoreError> {
        self.track("backfill_group_ids");
        let mut state = self.write()?;
        state.take_failure(FailurePoint::BackfillGroupIds)?;

        let order = state
            .orders
            .get_mut(&order_id)
            .filter(|o| o.org_id == org_id)
            .ok_or_else(|| StoreError::not_found("Order not found"))?;

        let mut updated = 0;
        for backfill in lines {
            if let Some(line) = order
                .lines
                .iter_mut()
                .find(|l| l.correlation_key == backfill.correlation_key)
            {
                line.product_group_id = Some(ProductGroupId(backfill.product_group_id));
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn find_order(&self, org_id: OrgId, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        self.track("find_order");
        Ok(self.read()?.order_in(org_id, order_id).cloned())
    }

    async fn recent_orders_for_customer(
        &self,
        org_id: OrgId,
        customer_id: CustomerId,
        limit: usize,
    ) -> Result<Vec<OrderSummary>, StoreError> {
        self.track("recent_orders_for_customer");
        let state = self.read()?;
        let mut orders: Vec<&Order> = state
            .orders
            .values()
            .filter(|o| o.org_id == org_id && o.customer_id == customer_id)
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders.into_iter().take(limit).map(Order::summary).collect())
    }
}

#[async_trait]
impl AllocationStore for InMemoryStore {
    async fn allocate_tier1(
        &self,
        org_id: OrgId,
        order_id: OrderId,
        actor: Option<UserId>,
    ) -> Result<Tier1Outcome, StoreError> {
        self.track("allocate_tier1");
        let mut guard = self.write()?;
        let state = &mut *guard;
        state.take_failure(FailurePoint::AllocateTier1)?;

        let order = state
            .order_in(org_id, order_id)
            .ok_or_else(|| StoreError::not_found("Order not found"))?;
        let lines: Vec<Tier1Line> = order
            .lines
            .iter()
            .map(|l| Tier1Line {
                order_line_id: l.id,
                product_id: l.product_id,
                quantity: l.quantity,
                batch_allocated: state.batch_allocated(l.id),
            })
            .collect();

        let mut ledger = StockLedger::new();
        for batch in state.batches.values().filter(|b| b.org_id == org_id) {
            ledger.add_batch_stock(batch.product_id, batch.available_quantity);
        }
        for (_, reservation) in state.reservations.values().filter(|(org, _)| *org == org_id) {
            ledger.put_reservation(*reservation);
        }

        let plan = plan_tier1(order_id, &lines, &ledger);
        for reservation in plan.reservations {
            state
                .reservations
                .insert(reservation.order_line_id, (org_id, reservation));
            state.bump_line(reservation.order_line_id);
        }
        debug!(
            order_id = %order_id,
            actor = ?actor,
            reserved_lines = plan.outcome.reserved_lines,
            "tier 1 reservations set"
        );
        Ok(plan.outcome)
    }

    async fn load_batch(&self, org_id: OrgId, batch_id: BatchId) -> Result<Option<Batch>, StoreError> {
        self.track("load_batch");
        let state = self.read()?;
        Ok(state
            .batches
            .get(&batch_id)
            .filter(|b| b.org_id == org_id)
            .cloned())
    }

    async fn line_allocation_state(
        &self,
        org_id: OrgId,
        order_line_id: OrderLineId,
    ) -> Result<Option<LineAllocation>, StoreError> {
        self.track("line_allocation_state");
        let state = self.read()?;
        let Some((order, line)) = state.line_in(org_id, order_line_id) else {
            return Ok(None);
        };

        let mut allocations: Vec<BatchAllocation> = state
            .allocations
            .values()
            .filter(|a| a.order_line_id == order_line_id)
            .cloned()
            .collect();
        allocations.sort_by_key(|a| a.allocated_at);

        Ok(Some(LineAllocation {
            order_line_id,
            order_id: order.id,
            org_id,
            product_id: line.product_id,
            line_quantity: line.quantity,
            tier1_reserved: state
                .reservations
                .get(&order_line_id)
                .map_or(0, |(_, r)| r.quantity),
            allocations,
            version: state.line_versions.get(&order_line_id).copied().unwrap_or(0),
        }))
    }

    async fn find_by_idempotency_key(
        &self,
        org_id: OrgId,
        idempotency_key: &str,
    ) -> Result<Option<BatchAllocation>, StoreError> {
        self.track("find_by_idempotency_key");
        let state = self.read()?;
        Ok(state
            .allocations
            .values()
            .find(|a| a.org_id == org_id && a.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn find_batch_allocation(
        &self,
        org_id: OrgId,
        allocation_id: BatchAllocationId,
    ) -> Result<Option<BatchAllocation>, StoreError> {
        self.track("find_batch_allocation");
        let state = self.read()?;
        Ok(state
            .allocations
            .get(&allocation_id)
            .filter(|a| a.org_id == org_id)
            .cloned())
    }

    async fn apply_batch_allocation(
        &self,
        org_id: OrgId,
        expected_line: ExpectedVersion,
        event: &BatchAllocated,
    ) -> Result<(), StoreError> {
        self.track("apply_batch_allocation");
        let mut guard = self.write()?;
        let state = &mut *guard;
        let allocation = &event.allocation;

        if allocation.org_id != org_id || state.line_in(org_id, allocation.order_line_id).is_none() {
            return Err(StoreError::not_found("Order line not found"));
        }
        let line_version = state
            .line_versions
            .get(&allocation.order_line_id)
            .copied()
            .unwrap_or(0);
        if !expected_line.matches(line_version) {
            return Err(StoreError::conflict(format!(
                "order line {} was modified concurrently",
                allocation.order_line_id
            )));
        }
        if state
            .allocations
            .values()
            .any(|a| a.org_id == org_id && a.idempotency_key == allocation.idempotency_key)
        {
            return Err(StoreError::conflict(format!(
                "idempotency key '{}' already used",
                allocation.idempotency_key
            )));
        }

        let batch = state
            .batches
            .get_mut(&allocation.batch_id)
            .filter(|b| b.org_id == org_id)
            .ok_or_else(|| StoreError::not_found("Batch not found"))?;
        if batch.version != event.batch_version {
            return Err(StoreError::conflict(format!(
                "batch {} was modified concurrently (expected version {}, actual {})",
                batch.batch_number, event.batch_version, batch.version
            )));
        }
        if batch.available_quantity < allocation.quantity {
            return Err(StoreError::conflict(format!(
                "batch {} no longer has {} available",
                batch.batch_number, allocation.quantity
            )));
        }

        batch.available_quantity -= allocation.quantity;
        batch.version += 1;
        if let Some((_, reservation)) = state.reservations.get_mut(&allocation.order_line_id) {
            reservation.quantity = (reservation.quantity - event.tier1_released).max(0);
        }
        state.allocations.insert(allocation.id, allocation.clone());
        state.bump_line(allocation.order_line_id);
        Ok(())
    }

    async fn release_batch_allocation(
        &self,
        org_id: OrgId,
        expected_line: ExpectedVersion,
        event: &AllocationReleased,
    ) -> Result<(), StoreError> {
        self.track("release_batch_allocation");
        let mut guard = self.write()?;
        let state = &mut *guard;

        let allocation = state
            .allocations
            .get(&event.allocation_id)
            .filter(|a| a.org_id == org_id)
            .ok_or_else(|| StoreError::not_found("Batch allocation not found"))?;
        if !allocation.is_active() {
            return Err(StoreError::conflict("batch allocation already released"));
        }
        let line_version = state
            .line_versions
            .get(&event.order_line_id)
            .copied()
            .unwrap_or(0);
        if !expected_line.matches(line_version) {
            return Err(StoreError::conflict(format!(
                "order line {} was modified concurrently",
                event.order_line_id
            )));
        }
        let restored = Tier1Reservation {
            order_line_id: allocation.order_line_id,
            order_id: allocation.order_id,
            product_id: allocation.product_id,
            quantity: 0,
        };
        let batch = state
            .batches
            .get_mut(&event.batch_id)
            .filter(|b| b.org_id == org_id)
            .ok_or_else(|| StoreError::not_found("Batch not found"))?;

        batch.available_quantity += event.quantity;
        batch.version += 1;
        if let Some(allocation) = state.allocations.get_mut(&event.allocation_id) {
            allocation.status = BatchAllocationStatus::Released;
            allocation.released_at = Some(event.occurred_at);
        }
        let (_, reservation) = state
            .reservations
            .entry(event.order_line_id)
            .or_insert((org_id, restored));
        reservation.quantity += event.tier1_restored;
        state.bump_line(event.order_line_id);
        Ok(())
    }
}

#[async_trait]
impl DispatchStore for InMemoryStore {
    async fn create_run(&self, run: &DeliveryRun) -> Result<(), StoreError> {
        self.track("create_run");
        let mut state = self.write()?;
        if state.runs.contains_key(&run.id) {
            return Err(StoreError::conflict(format!("load {} already exists", run.id)));
        }
        if state
            .runs
            .values()
            .any(|(r, _)| r.org_id == run.org_id && r.run_number == run.run_number)
        {
            return Err(StoreError::conflict(format!(
                "run number {} already exists",
                run.run_number
            )));
        }
        state.runs.insert(run.id, (run.clone(), 1));
        Ok(())
    }

    async fn next_run_sequence(&self, org_id: OrgId, run_date: NaiveDate) -> Result<u32, StoreError> {
        self.track("next_run_sequence");
        let state = self.read()?;
        let taken = state
            .runs
            .values()
            .filter(|(r, _)| r.org_id == org_id && r.run_date == run_date)
            .count();
        Ok(u32::try_from(taken).unwrap_or(u32::MAX - 1) + 1)
    }

    async fn load_load(&self, org_id: OrgId, run_id: DeliveryRunId) -> Result<Option<Load>, StoreError> {
        self.track("load_load");
        let state = self.read()?;
        let Some((run, version)) = state.runs.get(&run_id).filter(|(r, _)| r.org_id == org_id) else {
            return Ok(None);
        };

        let mut items: Vec<DeliveryItem> = state
            .items
            .values()
            .filter(|i| i.run_id == run_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.sequence);
        let orders: Vec<OrderRef> = items
            .iter()
            .filter_map(|i| state.orders.get(&i.order_id))
            .map(|o| OrderRef {
                order_id: o.id,
                org_id: o.org_id,
                status: o.status,
            })
            .collect();

        Ok(Some(Load::from_parts(run.clone(), items, orders, *version)))
    }

    async fn active_item_for_order(
        &self,
        org_id: OrgId,
        order_id: OrderId,
    ) -> Result<Option<DeliveryItem>, StoreError> {
        self.track("active_item_for_order");
        let state = self.read()?;
        Ok(state
            .items
            .values()
            .find(|i| i.org_id == org_id && i.order_id == order_id && i.status.is_active())
            .cloned())
    }

    async fn save_transition(
        &self,
        org_id: OrgId,
        load: &Load,
        expected: ExpectedVersion,
        events: &[LoadEvent],
    ) -> Result<(), StoreError> {
        self.track("save_transition");
        let mut guard = self.write()?;
        let state = &mut *guard;

        let run = load
            .run()
            .filter(|r| r.org_id == org_id)
            .ok_or_else(|| StoreError::not_found("Load not found"))?;
        let current = state
            .runs
            .get(&run.id)
            .map(|(_, v)| *v)
            .ok_or_else(|| StoreError::not_found("Load not found"))?;
        if !expected.matches(current) {
            return Err(StoreError::conflict(format!(
                "load {} was modified concurrently",
                run.run_number
            )));
        }

        let changes: Vec<_> = events.iter().flat_map(LoadEvent::order_changes).collect();
        for change in &changes {
            let order = state
                .order_in(org_id, change.order_id)
                .ok_or_else(|| StoreError::not_found("Order not found"))?;
            if order.status != change.from {
                return Err(StoreError::conflict(format!(
                    "order {} is no longer {}",
                    order.order_number, change.from
                )));
            }
        }
        for event in events {
            if let LoadEvent::OrderAssigned(assigned) = event {
                let duplicate = state.items.values().any(|i| {
                    i.order_id == assigned.item.order_id
                        && i.id != assigned.item.id
                        && i.status.is_active()
                });
                if duplicate {
                    return Err(StoreError::conflict(
                        "order already has an active delivery item",
                    ));
                }
            }
        }

        for item_id in events.iter().filter_map(LoadEvent::removed_item) {
            state.items.remove(&item_id);
        }
        for item in load.items() {
            state.items.insert(item.id, item.clone());
        }
        for change in changes {
            if let Some(order) = state.orders.get_mut(&change.order_id) {
                order.status = change.to;
            }
        }
        for event in events {
            if let LoadEvent::OrderAssigned(assigned) = event {
                if let Some((_, version)) = assigned.moved_from.and_then(|id| state.runs.get_mut(&id)) {
                    *version += 1;
                }
            }
        }
        state.runs.insert(run.id, (run.clone(), load.version()));
        Ok(())
    }

    async fn delete_run(
        &self,
        org_id: OrgId,
        run_id: DeliveryRunId,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        self.track("delete_run");
        let mut state = self.write()?;
        let current = state
            .runs
            .get(&run_id)
            .filter(|(r, _)| r.org_id == org_id)
            .map(|(_, v)| *v)
            .ok_or_else(|| StoreError::not_found("Load not found"))?;
        if !expected.matches(current) {
            return Err(StoreError::conflict(format!(
                "load {run_id} was modified concurrently"
            )));
        }
        if state.items.values().any(|i| i.run_id == run_id) {
            return Err(DomainError::invariant(
                "Cannot delete a load that has orders assigned. Remove all orders first.",
            )
            .into());
        }
        state.runs.remove(&run_id);
        Ok(())
    }
}

#[async_trait]
impl PickingService for InMemoryStore {
    async fn get_pick_list_for_order(
        &self,
        org_id: OrgId,
        order_id: OrderId,
    ) -> Result<Option<PickList>, StoreError> {
        self.track("get_pick_list_for_order");
        let state = self.read()?;
        Ok(state
            .pick_lists
            .values()
            .find(|p| p.org_id == org_id && p.order_id == order_id)
            .cloned())
    }

    async fn create_pick_list_from_order(
        &self,
        org_id: OrgId,
        order_id: OrderId,
    ) -> Result<PickList, StoreError> {
        self.track("create_pick_list_from_order");
        let mut state = self.write()?;
        state.take_failure(FailurePoint::CreatePickList)?;
        if state.order_in(org_id, order_id).is_none() {
            return Err(StoreError::not_found("Order not found"));
        }
        let pick_list = PickList::for_order(org_id, order_id, Utc::now());
        state.pick_lists.insert(pick_list.id, pick_list.clone());
        Ok(pick_list)
    }

    async fn assign_pick_list_to_team(
        &self,
        org_id: OrgId,
        pick_list_id: PickListId,
        team_id: PickingTeamId,
    ) -> Result<(), StoreError> {
        self.track("assign_pick_list_to_team");
        let mut state = self.write()?;
        let pick_list = state
            .pick_lists
            .get_mut(&pick_list_id)
            .filter(|p| p.org_id == org_id)
            .ok_or_else(|| StoreError::not_found("Pick list not found"))?;
        pick_list.team_id = Some(team_id);
        Ok(())
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn record(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), StoreError> {
        self.track("record_audit");
        let mut state = self.write()?;
        state.take_failure(FailurePoint::RecordAudit)?;
        state.audit.push(envelope.clone());
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn enqueue(&self, entries: &[OutboxEntry]) -> Result<(), StoreError> {
        self.track("enqueue");
        self.write()?.outbox.extend_from_slice(entries);
        Ok(())
    }

    async fn pending(&self, org_id: OrgId, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.track("pending");
        let state = self.read()?;
        let mut pending: Vec<OutboxEntry> = state
            .outbox
            .iter()
            .filter(|e| e.org_id == org_id && e.status.is_retriable())
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_delivered(&self, id: OutboxEntryId, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.track("mark_delivered");
        let mut state = self.write()?;
        let entry = state
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::not_found("Outbox entry not found"))?;
        entry.mark_delivered(now);
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: OutboxEntryId,
        error: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<OutboxEntry, StoreError> {
        self.track("mark_failed");
        let mut state = self.write()?;
        let entry = state
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::not_found("Outbox entry not found"))?;
        entry.mark_failed(error, max_attempts, now);
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nursery_core::Aggregate;
    use nursery_dispatch::{AssignOrder, CreateLoad, LoadCommand, LoadTransition};
    use nursery_inventory::{AllocateFromBatch, AllocationCommand, AllocationEvent};
    use nursery_pricing::PriceSource;
    use nursery_products::SkuId;
    use nursery_sales::NewOrderLine;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Seeded {
        store: InMemoryStore,
        org: OrgId,
        customer: CustomerId,
        product: ProductId,
    }

    fn seeded() -> Seeded {
        let store = InMemoryStore::new();
        let org = OrgId::new();
        let customer = CustomerId::new();
        let product = ProductId::new();
        store.seed_organization(Organization::new(org, "Greenleaf Nurseries"));
        store.seed_customer(Customer::new(customer, org, "Garden Centre"));
        store.seed_product(Product::new(product, org, SkuId::new(), "Box hedging 40cm"));
        Seeded {
            store,
            org,
            customer,
            product,
        }
    }

    fn new_order(s: &Seeded, number: &str, quantities: &[i64]) -> NewOrder {
        NewOrder {
            org_id: s.org,
            customer_id: s.customer,
            order_number: number.to_string(),
            status: OrderStatus::Confirmed,
            delivery_date: None,
            notes: None,
            ship_to_address_id: None,
            created_by: None,
            lines: quantities
                .iter()
                .enumerate()
                .map(|(i, q)| NewOrderLine {
                    line_no: i as u32 + 1,
                    correlation_key: Uuid::now_v7(),
                    product_id: s.product,
                    product_group_id: None,
                    description: "Box hedging 40cm".to_string(),
                    quantity: *q,
                    unit_price: dec!(5.00),
                    vat_rate: dec!(13.5),
                    price_source: PriceSource::LineOverride,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn commit_failure_leaves_nothing_behind() {
        let s = seeded();
        s.store.fail_next(FailurePoint::CommitOrder, "deadlock detected");

        let err = s
            .store
            .commit_order(&new_order(&s, "SO-20260410-AAAAAA", &[10]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "deadlock detected");
        assert!(s.store.order_by_number(s.org, "SO-20260410-AAAAAA").is_none());

        // The injected failure is one-shot.
        s.store
            .commit_order(&new_order(&s, "SO-20260410-AAAAAA", &[10]))
            .await
            .unwrap();
        assert_eq!(s.store.orders(s.org).len(), 1);
    }

    #[tokio::test]
    async fn duplicate_order_number_is_a_conflict() {
        let s = seeded();
        let order = new_order(&s, "SO-20260410-BBBBBB", &[1]);
        s.store.commit_order(&order).await.unwrap();
        let err = s.store.commit_order(&order).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn backfill_matches_lines_by_correlation_key() {
        let s = seeded();
        let order = new_order(&s, "SO-20260410-CCCCCC", &[1, 2]);
        let order_id = s.store.commit_order(&order).await.unwrap();
        let group = nursery_core::EntityId::new();

        let updated = s
            .store
            .backfill_group_ids(
                s.org,
                order_id,
                &[GroupBackfill {
                    correlation_key: order.lines[1].correlation_key,
                    product_group_id: group,
                }],
            )
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let stored = s.store.find_order(s.org, order_id).await.unwrap().unwrap();
        let line_two = stored.lines.iter().find(|l| l.line_no == 2).unwrap();
        let line_one = stored.lines.iter().find(|l| l.line_no == 1).unwrap();
        assert_eq!(line_two.product_group_id, Some(ProductGroupId(group)));
        assert_eq!(line_one.product_group_id, None);
    }

    #[tokio::test]
    async fn tier1_rerun_sets_reservations_and_reports_oversell() {
        let s = seeded();
        s.store
            .seed_batch(Batch::new(BatchId::new(), s.org, s.product, "B-1", 8));
        let order_id = s
            .store
            .commit_order(&new_order(&s, "SO-20260410-DDDDDD", &[10]))
            .await
            .unwrap();

        let first = s.store.allocate_tier1(s.org, order_id, None).await.unwrap();
        let second = s.store.allocate_tier1(s.org, order_id, None).await.unwrap();
        assert!(first.has_oversell_warning);
        assert_eq!(first.oversell_items[0].available, 8);
        assert_eq!(first, second);

        let line = s.store.orders(s.org)[0].lines[0].id;
        assert_eq!(s.store.reservation(line).unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn other_org_sees_nothing() {
        let s = seeded();
        let order_id = s
            .store
            .commit_order(&new_order(&s, "SO-20260410-EEEEEE", &[1]))
            .await
            .unwrap();
        let other = OrgId::new();
        assert!(s.store.find_order(other, order_id).await.unwrap().is_none());
        assert!(s.store.resolve_products(other).await.unwrap().is_empty());
        assert!(matches!(
            s.store.allocate_tier1(other, order_id, None).await,
            Err(StoreError::NotFound(_))
        ));
    }

    async fn allocation_event(s: &Seeded, batch: &Batch, quantity: i64, key: &str) -> (LineAllocation, BatchAllocated) {
        let line_id = s.store.orders(s.org)[0].lines[0].id;
        let line = s
            .store
            .line_allocation_state(s.org, line_id)
            .await
            .unwrap()
            .unwrap();
        let cmd = AllocationCommand::AllocateFromBatch(AllocateFromBatch {
            org_id: s.org,
            allocation_id: BatchAllocationId::new(),
            batch: batch.clone(),
            quantity,
            idempotency_key: key.to_string(),
            actor: None,
            occurred_at: Utc::now(),
        });
        let mut events = line.handle(&cmd).unwrap();
        match events.pop() {
            Some(AllocationEvent::BatchAllocated(e)) => (line, e),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_allocation_is_version_checked() {
        let s = seeded();
        let batch = Batch::new(BatchId::new(), s.org, s.product, "B-2", 20);
        s.store.seed_batch(batch.clone());
        let order_id = s
            .store
            .commit_order(&new_order(&s, "SO-20260410-FFFFFF", &[10]))
            .await
            .unwrap();
        s.store.allocate_tier1(s.org, order_id, None).await.unwrap();

        let (line, first) = allocation_event(&s, &batch, 4, "pick-1").await;
        s.store
            .apply_batch_allocation(s.org, ExpectedVersion::Exact(line.version), &first)
            .await
            .unwrap();
        let stored = s.store.batch(batch.id).unwrap();
        assert_eq!(stored.available_quantity, 16);
        assert_eq!(stored.version, 1);
        assert_eq!(s.store.reservation(line.order_line_id).unwrap().quantity, 6);

        // Planned against the batch as it was before the first write.
        let (line, stale) = allocation_event(&s, &batch, 2, "pick-2").await;
        let err = s
            .store
            .apply_batch_allocation(s.org, ExpectedVersion::Exact(line.version), &stale)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(s.store.batch(batch.id).unwrap().available_quantity, 16);
    }

    #[tokio::test]
    async fn reused_idempotency_key_is_rejected_by_the_store() {
        let s = seeded();
        let batch = Batch::new(BatchId::new(), s.org, s.product, "B-3", 20);
        s.store.seed_batch(batch.clone());
        s.store
            .commit_order(&new_order(&s, "SO-20260410-ABCDEF", &[10]))
            .await
            .unwrap();

        let (line, first) = allocation_event(&s, &batch, 2, "dup").await;
        s.store
            .apply_batch_allocation(s.org, ExpectedVersion::Exact(line.version), &first)
            .await
            .unwrap();

        let fresh = s.store.batch(batch.id).unwrap();
        let (line, again) = allocation_event(&s, &fresh, 2, "dup-2").await;
        let mut again = again;
        again.allocation.idempotency_key = "dup".to_string();
        let err = s
            .store
            .apply_batch_allocation(s.org, ExpectedVersion::Exact(line.version), &again)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already used"));
    }

    async fn planned_load(s: &Seeded, number: &str) -> Load {
        let cmd = LoadCommand::CreateLoad(CreateLoad {
            org_id: s.org,
            run_number: number.to_string(),
            run_date: NaiveDate::from_ymd_opt(2026, 4, 10).unwrap(),
            vehicle: None,
            driver: None,
            picking_team_id: None,
            occurred_at: Utc::now(),
        });
        let (load, _) = Load::empty(DeliveryRunId::new()).execute(&cmd).unwrap();
        s.store.create_run(load.run().unwrap()).await.unwrap();
        s.store
            .load_load(s.org, load.id_typed())
            .await
            .unwrap()
            .unwrap()
    }

    async fn assign(s: &Seeded, load: &Load, order_id: OrderId, current: Option<DeliveryItem>) -> Result<(), StoreError> {
        let order = s.store.find_order(s.org, order_id).await?.unwrap();
        let cmd = LoadCommand::AssignOrder(AssignOrder {
            org_id: s.org,
            order: OrderRef {
                order_id,
                org_id: s.org,
                status: order.status,
            },
            current_item: current,
            new_item_id: DeliveryItemId::new(),
            occurred_at: Utc::now(),
        });
        let (next, events) = load.execute(&cmd)?;
        s.store
            .save_transition(s.org, &next, ExpectedVersion::Exact(load.version()), &events)
            .await
    }

    #[tokio::test]
    async fn transition_persists_items_and_order_statuses_together() {
        let s = seeded();
        let order_id = s
            .store
            .commit_order(&new_order(&s, "SO-20260410-111111", &[1]))
            .await
            .unwrap();
        let load = planned_load(&s, "LOAD-20260410-001").await;
        assign(&s, &load, order_id, None).await.unwrap();

        let order = s.store.find_order(s.org, order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::ReadyForDispatch);
        let load = s.store.load_load(s.org, load.id_typed()).await.unwrap().unwrap();
        assert_eq!(load.items().len(), 1);

        let (next, events) = load
            .execute(&LoadCommand::Dispatch(LoadTransition {
                org_id: s.org,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        s.store
            .save_transition(s.org, &next, ExpectedVersion::Exact(load.version()), &events)
            .await
            .unwrap();
        let order = s.store.find_order(s.org, order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Dispatched);

        // Saving against the old version again is refused.
        let err = s
            .store
            .save_transition(s.org, &next, ExpectedVersion::Exact(load.version()), &events)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn second_active_item_for_an_order_is_refused() {
        let s = seeded();
        let order_id = s
            .store
            .commit_order(&new_order(&s, "SO-20260410-222222", &[1]))
            .await
            .unwrap();
        let first = planned_load(&s, "LOAD-20260410-001").await;
        let second = planned_load(&s, "LOAD-20260410-002").await;
        assign(&s, &first, order_id, None).await.unwrap();

        // A caller that skipped the active-item lookup.
        let err = assign(&s, &second, order_id, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(s.store.items_for_order(order_id).len(), 1);
    }

    #[tokio::test]
    async fn run_with_items_cannot_be_deleted() {
        let s = seeded();
        let order_id = s
            .store
            .commit_order(&new_order(&s, "SO-20260410-333333", &[1]))
            .await
            .unwrap();
        let load = planned_load(&s, "LOAD-20260410-001").await;
        assign(&s, &load, order_id, None).await.unwrap();

        let err = s
            .store
            .delete_run(s.org, load.id_typed(), ExpectedVersion::Any)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Cannot delete a load"));
        assert!(s.store.run(load.id_typed()).is_some());
    }

    #[tokio::test]
    async fn run_sequence_counts_runs_of_the_same_day() {
        let s = seeded();
        let date = NaiveDate::from_ymd_opt(2026, 4, 10).unwrap();
        assert_eq!(s.store.next_run_sequence(s.org, date).await.unwrap(), 1);
        planned_load(&s, "LOAD-20260410-001").await;
        assert_eq!(s.store.next_run_sequence(s.org, date).await.unwrap(), 2);
        assert_eq!(s.store.next_run_sequence(OrgId::new(), date).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn outbox_failures_are_retried_until_abandoned() {
        let s = seeded();
        let entry = OutboxEntry::new(
            s.org,
            nursery_events::PostCommitEffect::AllocateTier1 {
                order_id: nursery_core::EntityId::new(),
                actor: None,
            },
            Utc::now(),
        );
        s.store.enqueue(std::slice::from_ref(&entry)).await.unwrap();

        let failed = s.store.mark_failed(entry.id, "timeout", 2, Utc::now()).await.unwrap();
        assert!(failed.status.is_retriable());
        assert_eq!(s.store.pending(s.org, 10).await.unwrap().len(), 1);

        s.store.mark_failed(entry.id, "timeout", 2, Utc::now()).await.unwrap();
        assert!(s.store.pending(s.org, 10).await.unwrap().is_empty());
    }
}
