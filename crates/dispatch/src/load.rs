//! Load aggregate: one delivery run with its items and the statuses of the
//! orders on it.
//!
//! Every transition changes run, item and order statuses together. Events
//! carry the order status changes so a store can persist the whole transition
//! in one call.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use nursery_core::{Aggregate, AggregateRoot, DomainError, OrgId};
use nursery_events::Event;
use nursery_sales::{OrderId, OrderStatus};

use crate::run::{
    DeliveryItem, DeliveryItemId, DeliveryItemStatus, DeliveryRun, DeliveryRunId, LoadStatus,
    OrderRef, OrderStatusChange, PickingTeamId,
};

/// Aggregate root: Load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Load {
    id: DeliveryRunId,
    run: Option<DeliveryRun>,
    /// Every item on the run, historical ones included.
    items: Vec<DeliveryItem>,
    orders: BTreeMap<OrderId, OrderStatus>,
    version: u64,
}

impl Load {
    /// A not-yet-created load, the target of [`LoadCommand::CreateLoad`].
    pub fn empty(id: DeliveryRunId) -> Self {
        Self {
            id,
            run: None,
            items: Vec::new(),
            orders: BTreeMap::new(),
            version: 0,
        }
    }

    /// Rehydrate from stored rows.
    pub fn from_parts(
        run: DeliveryRun,
        items: Vec<DeliveryItem>,
        orders: impl IntoIterator<Item = OrderRef>,
        version: u64,
    ) -> Self {
        Self {
            id: run.id,
            run: Some(run),
            items,
            orders: orders.into_iter().map(|o| (o.order_id, o.status)).collect(),
            version,
        }
    }

    pub fn id_typed(&self) -> DeliveryRunId {
        self.id
    }

    pub fn run(&self) -> Option<&DeliveryRun> {
        self.run.as_ref()
    }

    pub fn status(&self) -> Option<LoadStatus> {
        self.run.as_ref().map(|r| r.status)
    }

    pub fn items(&self) -> &[DeliveryItem] {
        &self.items
    }

    pub fn active_items(&self) -> impl Iterator<Item = &DeliveryItem> {
        self.items.iter().filter(|i| i.status.is_active())
    }

    pub fn order_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.orders.get(&order_id).copied()
    }

    /// Loads are only deleted once nothing references them.
    pub fn ensure_deletable(&self) -> Result<(), DomainError> {
        if !self.items.is_empty() {
            return Err(DomainError::invariant(
                "Cannot delete a load that has orders assigned. Remove all orders first.",
            ));
        }
        Ok(())
    }

    fn next_sequence(&self) -> u32 {
        self.items.iter().map(|i| i.sequence).max().unwrap_or(0) + 1
    }
}

impl AggregateRoot for Load {
    type Id = DeliveryRunId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateLoad.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLoad {
    pub org_id: OrgId,
    pub run_number: String,
    pub run_date: NaiveDate,
    pub vehicle: Option<String>,
    pub driver: Option<String>,
    pub picking_team_id: Option<PickingTeamId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignOrder {
    pub org_id: OrgId,
    pub order: OrderRef,
    /// The order's active item on any load, if it has one.
    pub current_item: Option<DeliveryItem>,
    /// Used only when no active item exists.
    pub new_item_id: DeliveryItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveOrder {
    pub org_id: OrgId,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command without arguments beyond the caller org and time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadTransition {
    pub org_id: OrgId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadCommand {
    CreateLoad(CreateLoad),
    AssignOrder(AssignOrder),
    StartLoading(LoadTransition),
    Dispatch(LoadTransition),
    Recall(LoadTransition),
    Complete(LoadTransition),
    Cancel(LoadTransition),
    RemoveOrder(RemoveOrder),
}

/// Event: LoadCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadCreated {
    pub run: DeliveryRun,
}

/// Event: OrderAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAssigned {
    pub item: DeliveryItem,
    /// Set when an active item was moved here from another load.
    pub moved_from: Option<DeliveryRunId>,
    pub order_status: OrderStatus,
    pub order_change: Option<OrderStatusChange>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: items and orders moved together by one load status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsTransitioned {
    pub item_ids: Vec<DeliveryItemId>,
    pub order_changes: Vec<OrderStatusChange>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRemoved {
    pub item_id: DeliveryItemId,
    pub order_id: OrderId,
    pub order_change: Option<OrderStatusChange>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadEvent {
    LoadCreated(LoadCreated),
    OrderAssigned(OrderAssigned),
    LoadingStarted(ItemsTransitioned),
    LoadDispatched(ItemsTransitioned),
    LoadRecalled(ItemsTransitioned),
    LoadCompleted(ItemsTransitioned),
    LoadCancelled(ItemsTransitioned),
    OrderRemoved(OrderRemoved),
}

impl LoadEvent {
    /// Order status writes this event implies.
    pub fn order_changes(&self) -> Vec<OrderStatusChange> {
        match self {
            LoadEvent::LoadCreated(_) => Vec::new(),
            LoadEvent::OrderAssigned(e) => e.order_change.into_iter().collect(),
            LoadEvent::OrderRemoved(e) => e.order_change.into_iter().collect(),
            LoadEvent::LoadingStarted(e)
            | LoadEvent::LoadDispatched(e)
            | LoadEvent::LoadRecalled(e)
            | LoadEvent::LoadCompleted(e)
            | LoadEvent::LoadCancelled(e) => e.order_changes.clone(),
        }
    }

    /// Item rows this event deletes.
    pub fn removed_item(&self) -> Option<DeliveryItemId> {
        match self {
            LoadEvent::OrderRemoved(e) => Some(e.item_id),
            _ => None,
        }
    }
}

impl Event for LoadEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LoadEvent::LoadCreated(_) => "dispatch.load.created",
            LoadEvent::OrderAssigned(_) => "dispatch.load.order_assigned",
            LoadEvent::LoadingStarted(_) => "dispatch.load.loading_started",
            LoadEvent::LoadDispatched(_) => "dispatch.load.dispatched",
            LoadEvent::LoadRecalled(_) => "dispatch.load.recalled",
            LoadEvent::LoadCompleted(_) => "dispatch.load.completed",
            LoadEvent::LoadCancelled(_) => "dispatch.load.cancelled",
            LoadEvent::OrderRemoved(_) => "dispatch.load.order_removed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LoadEvent::LoadCreated(e) => e.run.created_at,
            LoadEvent::OrderAssigned(e) => e.occurred_at,
            LoadEvent::OrderRemoved(e) => e.occurred_at,
            LoadEvent::LoadingStarted(e)
            | LoadEvent::LoadDispatched(e)
            | LoadEvent::LoadRecalled(e)
            | LoadEvent::LoadCompleted(e)
            | LoadEvent::LoadCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Load {
    type Command = LoadCommand;
    type Event = LoadEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LoadEvent::LoadCreated(e) => {
                self.id = e.run.id;
                self.run = Some(e.run.clone());
            }
            LoadEvent::OrderAssigned(e) => {
                match self.items.iter_mut().find(|i| i.id == e.item.id) {
                    Some(existing) => *existing = e.item.clone(),
                    None => self.items.push(e.item.clone()),
                }
                self.orders.insert(e.item.order_id, e.order_status);
            }
            LoadEvent::LoadingStarted(e) => {
                self.set_items(&e.item_ids, DeliveryItemStatus::Loading);
                self.set_status(LoadStatus::Loading);
                self.apply_order_changes(&e.order_changes);
            }
            LoadEvent::LoadDispatched(e) => {
                self.set_items(&e.item_ids, DeliveryItemStatus::InTransit);
                self.set_status(LoadStatus::InTransit);
                if let Some(run) = self.run.as_mut() {
                    run.departed_at = Some(e.occurred_at);
                }
                self.apply_order_changes(&e.order_changes);
            }
            LoadEvent::LoadRecalled(e) => {
                self.set_items(&e.item_ids, DeliveryItemStatus::Pending);
                self.set_status(LoadStatus::Planned);
                if let Some(run) = self.run.as_mut() {
                    run.departed_at = None;
                }
                self.apply_order_changes(&e.order_changes);
            }
            LoadEvent::LoadCompleted(e) => {
                self.set_items(&e.item_ids, DeliveryItemStatus::Delivered);
                self.set_status(LoadStatus::Completed);
                if let Some(run) = self.run.as_mut() {
                    run.completed_at = Some(e.occurred_at);
                }
                self.apply_order_changes(&e.order_changes);
            }
            LoadEvent::LoadCancelled(e) => {
                self.set_items(&e.item_ids, DeliveryItemStatus::Rescheduled);
                self.set_status(LoadStatus::Cancelled);
                self.apply_order_changes(&e.order_changes);
            }
            LoadEvent::OrderRemoved(e) => {
                self.items.retain(|i| i.id != e.item_id);
                self.orders.remove(&e.order_id);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LoadCommand::CreateLoad(cmd) => self.handle_create(cmd),
            LoadCommand::AssignOrder(cmd) => self.handle_assign(cmd),
            LoadCommand::StartLoading(cmd) => self.handle_start_loading(cmd),
            LoadCommand::Dispatch(cmd) => self.handle_dispatch(cmd),
            LoadCommand::Recall(cmd) => self.handle_recall(cmd),
            LoadCommand::Complete(cmd) => self.handle_complete(cmd),
            LoadCommand::Cancel(cmd) => self.handle_cancel(cmd),
            LoadCommand::RemoveOrder(cmd) => self.handle_remove(cmd),
        }
    }
}

impl Load {
    fn set_items(&mut self, ids: &[DeliveryItemId], status: DeliveryItemStatus) {
        for item in self.items.iter_mut().filter(|i| ids.contains(&i.id)) {
            item.status = status;
        }
    }

    fn set_status(&mut self, status: LoadStatus) {
        if let Some(run) = self.run.as_mut() {
            run.status = status;
        }
    }

    fn apply_order_changes(&mut self, changes: &[OrderStatusChange]) {
        for change in changes {
            self.orders.insert(change.order_id, change.to);
        }
    }

    /// The run, if it exists and belongs to `org_id`.
    fn ensure_run(&self, org_id: OrgId) -> Result<&DeliveryRun, DomainError> {
        match &self.run {
            Some(run) if run.org_id == org_id => Ok(run),
            _ => Err(DomainError::not_found("Load not found")),
        }
    }

    /// Ids of the items matching `include`, plus the status changes that move
    /// their orders to `order_to` (only from statuses accepted by `order_from`).
    fn transition_items(
        &self,
        include: impl Fn(&DeliveryItem) -> bool,
        order_to: OrderStatus,
        order_from: impl Fn(OrderStatus) -> bool,
        occurred_at: DateTime<Utc>,
    ) -> ItemsTransitioned {
        let mut item_ids = Vec::new();
        let mut order_changes = Vec::new();
        for item in &self.items {
            if !include(item) {
                continue;
            }
            item_ids.push(item.id);
            let change = self
                .order_status(item.order_id)
                .filter(|from| *from != order_to && order_from(*from));
            if let Some(from) = change {
                order_changes.push(OrderStatusChange {
                    order_id: item.order_id,
                    from,
                    to: order_to,
                });
            }
        }
        ItemsTransitioned {
            item_ids,
            order_changes,
            occurred_at,
        }
    }

    fn handle_create(&self, cmd: &CreateLoad) -> Result<Vec<LoadEvent>, DomainError> {
        if self.run.is_some() {
            return Err(DomainError::conflict("load already exists"));
        }
        if cmd.run_number.trim().is_empty() {
            return Err(DomainError::validation("run number cannot be empty"));
        }
        let label = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Ok(vec![LoadEvent::LoadCreated(LoadCreated {
            run: DeliveryRun {
                id: self.id,
                org_id: cmd.org_id,
                run_number: cmd.run_number.trim().to_string(),
                run_date: cmd.run_date,
                status: LoadStatus::Planned,
                vehicle: label(&cmd.vehicle),
                driver: label(&cmd.driver),
                picking_team_id: cmd.picking_team_id,
                departed_at: None,
                completed_at: None,
                created_at: cmd.occurred_at,
            },
        })])
    }

    fn handle_assign(&self, cmd: &AssignOrder) -> Result<Vec<LoadEvent>, DomainError> {
        let run = self.ensure_run(cmd.org_id)?;
        if !run.status.accepts_orders() {
            return Err(DomainError::invariant(format!(
                "Cannot assign orders to a load that is {}.",
                run.status
            )));
        }

        let order = &cmd.order;
        if order.org_id != run.org_id {
            return Err(DomainError::not_found("Order not found"));
        }
        if !order.status.is_assignable() {
            return Err(DomainError::invariant(format!(
                "Order must be confirmed or ready for dispatch (current status: {}).",
                order.status
            )));
        }

        let current = cmd
            .current_item
            .as_ref()
            .filter(|i| i.status.is_active() && i.order_id == order.order_id);
        if current.is_some_and(|i| i.run_id == self.id) {
            return Ok(Vec::new());
        }

        let status = if run.status == LoadStatus::Loading {
            DeliveryItemStatus::Loading
        } else {
            DeliveryItemStatus::Pending
        };
        let (id, created_at) = current
            .map(|i| (i.id, i.created_at))
            .unwrap_or((cmd.new_item_id, cmd.occurred_at));
        let order_change = (order.status == OrderStatus::Confirmed).then_some(OrderStatusChange {
            order_id: order.order_id,
            from: OrderStatus::Confirmed,
            to: OrderStatus::ReadyForDispatch,
        });

        Ok(vec![LoadEvent::OrderAssigned(OrderAssigned {
            item: DeliveryItem {
                id,
                org_id: run.org_id,
                run_id: self.id,
                order_id: order.order_id,
                status,
                sequence: self.next_sequence(),
                created_at,
            },
            moved_from: current.map(|i| i.run_id),
            order_status: order_change.map_or(order.status, |c| c.to),
            order_change,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start_loading(&self, cmd: &LoadTransition) -> Result<Vec<LoadEvent>, DomainError> {
        let run = self.ensure_run(cmd.org_id)?;
        if run.status != LoadStatus::Planned {
            return Err(DomainError::invariant(format!(
                "Cannot start loading a load that is {}.",
                run.status
            )));
        }
        Ok(vec![LoadEvent::LoadingStarted(self.transition_items(
            |i| i.status == DeliveryItemStatus::Pending,
            OrderStatus::ReadyForDispatch,
            |_| false,
            cmd.occurred_at,
        ))])
    }

    fn handle_dispatch(&self, cmd: &LoadTransition) -> Result<Vec<LoadEvent>, DomainError> {
        let run = self.ensure_run(cmd.org_id)?;
        match run.status {
            LoadStatus::Planned | LoadStatus::Loading => {}
            LoadStatus::InTransit => {
                return Err(DomainError::invariant("Load has already been dispatched."));
            }
            other => {
                return Err(DomainError::invariant(format!(
                    "Cannot dispatch a load that is {other}."
                )));
            }
        }
        if self.active_items().next().is_none() {
            return Err(DomainError::invariant("Cannot dispatch a load with no orders."));
        }
        Ok(vec![LoadEvent::LoadDispatched(self.transition_items(
            |i| i.status.is_active(),
            OrderStatus::Dispatched,
            |_| true,
            cmd.occurred_at,
        ))])
    }

    fn handle_recall(&self, cmd: &LoadTransition) -> Result<Vec<LoadEvent>, DomainError> {
        let run = self.ensure_run(cmd.org_id)?;
        match run.status {
            LoadStatus::InTransit | LoadStatus::Loading => {}
            LoadStatus::Completed => {
                return Err(DomainError::invariant(
                    "Cannot recall a completed load. Use reschedule instead.",
                ));
            }
            LoadStatus::Cancelled => {
                return Err(DomainError::invariant("Cannot recall a cancelled load."));
            }
            LoadStatus::Planned => {
                return Err(DomainError::invariant("Load has not been dispatched."));
            }
        }
        Ok(vec![LoadEvent::LoadRecalled(self.transition_items(
            |i| i.status.is_active(),
            OrderStatus::ReadyForDispatch,
            |_| true,
            cmd.occurred_at,
        ))])
    }

    fn handle_complete(&self, cmd: &LoadTransition) -> Result<Vec<LoadEvent>, DomainError> {
        let run = self.ensure_run(cmd.org_id)?;
        if run.status != LoadStatus::InTransit {
            return Err(DomainError::invariant(format!(
                "Cannot complete a load that is {}.",
                run.status
            )));
        }
        Ok(vec![LoadEvent::LoadCompleted(self.transition_items(
            |i| i.status == DeliveryItemStatus::InTransit,
            OrderStatus::Delivered,
            |_| true,
            cmd.occurred_at,
        ))])
    }

    fn handle_cancel(&self, cmd: &LoadTransition) -> Result<Vec<LoadEvent>, DomainError> {
        let run = self.ensure_run(cmd.org_id)?;
        match run.status {
            LoadStatus::Completed => {
                return Err(DomainError::invariant("Cannot cancel a completed load."));
            }
            LoadStatus::Cancelled => {
                return Err(DomainError::invariant("Load is already cancelled."));
            }
            _ => {}
        }
        Ok(vec![LoadEvent::LoadCancelled(self.transition_items(
            |i| i.status.is_active(),
            OrderStatus::Confirmed,
            |from| matches!(from, OrderStatus::ReadyForDispatch | OrderStatus::Dispatched),
            cmd.occurred_at,
        ))])
    }

    /// Removal is allowed in every load status so that any load can be emptied
    /// and deleted. The order's active item is removed; when it has none, its
    /// most recent historical item is. Only a `ready_for_dispatch` order goes
    /// back to `confirmed`; dispatched and delivered orders keep their status.
    fn handle_remove(&self, cmd: &RemoveOrder) -> Result<Vec<LoadEvent>, DomainError> {
        self.ensure_run(cmd.org_id)?;

        let on_load = |i: &&DeliveryItem| i.order_id == cmd.order_id;
        let item = self
            .items
            .iter()
            .filter(on_load)
            .find(|i| i.status.is_active())
            .or_else(|| self.items.iter().filter(on_load).max_by_key(|i| i.created_at))
            .ok_or_else(|| DomainError::not_found("Order is not assigned to this load"))?;

        let order_change = self
            .order_status(cmd.order_id)
            .filter(|s| *s == OrderStatus::ReadyForDispatch)
            .map(|from| OrderStatusChange {
                order_id: cmd.order_id,
                from,
                to: OrderStatus::Confirmed,
            });

        Ok(vec![LoadEvent::OrderRemoved(OrderRemoved {
            item_id: item.id,
            order_id: cmd.order_id,
            order_change,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        org: OrgId,
        load: Load,
    }

    impl Fixture {
        fn planned_in(org: OrgId, run_number: &str) -> Self {
            let create = LoadCommand::CreateLoad(CreateLoad {
                org_id: org,
                run_number: run_number.into(),
                run_date: NaiveDate::from_ymd_opt(2026, 4, 10).unwrap(),
                vehicle: Some(" Van 2 ".into()),
                driver: None,
                picking_team_id: None,
                occurred_at: Utc::now(),
            });
            let (load, _) = Load::empty(DeliveryRunId::new()).execute(&create).unwrap();
            Self { org, load }
        }

        fn planned() -> Self {
            Self::planned_in(OrgId::new(), "LOAD-20260410-001")
        }

        fn tick(&self) -> LoadTransition {
            LoadTransition {
                org_id: self.org,
                occurred_at: Utc::now(),
            }
        }

        fn order(&self, status: OrderStatus) -> OrderRef {
            OrderRef {
                order_id: OrderId::new(),
                org_id: self.org,
                status,
            }
        }

        fn assign(&self, order: OrderRef, current: Option<DeliveryItem>) -> LoadCommand {
            LoadCommand::AssignOrder(AssignOrder {
                org_id: self.org,
                order,
                current_item: current,
                new_item_id: DeliveryItemId::new(),
                occurred_at: Utc::now(),
            })
        }

        fn run(&mut self, cmd: LoadCommand) -> Vec<LoadEvent> {
            let (next, events) = self.load.execute(&cmd).unwrap();
            self.load = next;
            events
        }

        fn fail(&self, cmd: LoadCommand) -> String {
            self.load.handle(&cmd).unwrap_err().to_string()
        }

        /// One confirmed order assigned, then dispatched.
        fn in_transit() -> (Self, OrderRef) {
            let mut f = Self::planned();
            let o = f.order(OrderStatus::Confirmed);
            f.run(f.assign(o, None));
            f.run(LoadCommand::Dispatch(f.tick()));
            (f, o)
        }
    }

    #[test]
    fn create_trims_labels_and_starts_planned() {
        let f = Fixture::planned();
        let run = f.load.run().unwrap();
        assert_eq!(run.status, LoadStatus::Planned);
        assert_eq!(run.vehicle.as_deref(), Some("Van 2"));
        assert_eq!(f.load.version(), 1);
    }

    #[test]
    fn assigning_confirmed_order_readies_it_and_sequences_items() {
        let mut f = Fixture::planned();
        let a = f.order(OrderStatus::Confirmed);
        let b = f.order(OrderStatus::ReadyForDispatch);
        let events = f.run(f.assign(a, None));
        let second = f.run(f.assign(b, None));

        assert_eq!(
            events[0].order_changes(),
            vec![OrderStatusChange {
                order_id: a.order_id,
                from: OrderStatus::Confirmed,
                to: OrderStatus::ReadyForDispatch,
            }]
        );
        assert!(second[0].order_changes().is_empty());
        assert_eq!(
            f.load.order_status(a.order_id),
            Some(OrderStatus::ReadyForDispatch)
        );
        let seqs: Vec<_> = f.load.items().iter().map(|i| i.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn assigning_moves_existing_active_item_instead_of_duplicating() {
        let mut source = Fixture::planned();
        let o = source.order(OrderStatus::Confirmed);
        source.run(source.assign(o, None));
        let existing = source.load.items()[0].clone();

        let mut target = Fixture::planned_in(source.org, "LOAD-20260410-002");
        let moved = OrderRef {
            status: OrderStatus::ReadyForDispatch,
            ..o
        };
        let events = target.run(target.assign(moved, Some(existing.clone())));

        match &events[0] {
            LoadEvent::OrderAssigned(e) => {
                assert_eq!(e.item.id, existing.id);
                assert_eq!(e.item.run_id, target.load.id_typed());
                assert_eq!(e.moved_from, Some(source.load.id_typed()));
                assert!(e.order_change.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(target.load.items().len(), 1);
    }

    #[test]
    fn reassigning_to_same_load_is_a_no_op() {
        let mut f = Fixture::planned();
        let o = f.order(OrderStatus::Confirmed);
        f.run(f.assign(o, None));
        let existing = f.load.items()[0].clone();
        let again = OrderRef {
            status: OrderStatus::ReadyForDispatch,
            ..o
        };
        assert!(f.run(f.assign(again, Some(existing))).is_empty());
        assert_eq!(f.load.items().len(), 1);
    }

    #[test]
    fn assignment_guards() {
        let (f, _) = Fixture::in_transit();
        let o = f.order(OrderStatus::Confirmed);
        assert_eq!(
            f.fail(f.assign(o, None)),
            "Cannot assign orders to a load that is in_transit."
        );

        let f = Fixture::planned();
        let draft = f.order(OrderStatus::Draft);
        assert!(f.fail(f.assign(draft, None)).contains("current status: draft"));

        let foreign = OrderRef {
            org_id: OrgId::new(),
            ..f.order(OrderStatus::Confirmed)
        };
        assert_eq!(f.fail(f.assign(foreign, None)), "Order not found");
    }

    #[test]
    fn dispatch_moves_items_and_orders_together() {
        let (f, o) = Fixture::in_transit();
        let run = f.load.run().unwrap();
        assert_eq!(run.status, LoadStatus::InTransit);
        assert!(run.departed_at.is_some());
        assert_eq!(f.load.items()[0].status, DeliveryItemStatus::InTransit);
        assert_eq!(
            f.load.order_status(o.order_id),
            Some(OrderStatus::Dispatched)
        );
        assert_eq!(
            f.fail(LoadCommand::Dispatch(f.tick())),
            "Load has already been dispatched."
        );
    }

    #[test]
    fn dispatch_requires_an_order() {
        let f = Fixture::planned();
        assert_eq!(
            f.fail(LoadCommand::Dispatch(f.tick())),
            "Cannot dispatch a load with no orders."
        );
    }

    #[test]
    fn recall_resets_items_and_orders() {
        let (mut f, o) = Fixture::in_transit();
        let events = f.run(LoadCommand::Recall(f.tick()));

        let run = f.load.run().unwrap();
        assert_eq!(run.status, LoadStatus::Planned);
        assert!(run.departed_at.is_none());
        assert_eq!(f.load.items()[0].status, DeliveryItemStatus::Pending);
        assert_eq!(
            events[0].order_changes(),
            vec![OrderStatusChange {
                order_id: o.order_id,
                from: OrderStatus::Dispatched,
                to: OrderStatus::ReadyForDispatch,
            }]
        );
    }

    #[test]
    fn recall_guard_messages() {
        let f = Fixture::planned();
        assert_eq!(
            f.fail(LoadCommand::Recall(f.tick())),
            "Load has not been dispatched."
        );

        let (mut f, _) = Fixture::in_transit();
        f.run(LoadCommand::Complete(f.tick()));
        let before = f.load.clone();
        assert_eq!(
            f.fail(LoadCommand::Recall(f.tick())),
            "Cannot recall a completed load. Use reschedule instead."
        );
        assert_eq!(f.load, before);

        let mut f = Fixture::planned();
        f.run(LoadCommand::Cancel(f.tick()));
        assert_eq!(
            f.fail(LoadCommand::Recall(f.tick())),
            "Cannot recall a cancelled load."
        );
    }

    #[test]
    fn complete_delivers_in_transit_orders() {
        let (mut f, o) = Fixture::in_transit();
        f.run(LoadCommand::Complete(f.tick()));
        assert_eq!(f.load.status(), Some(LoadStatus::Completed));
        assert_eq!(f.load.items()[0].status, DeliveryItemStatus::Delivered);
        assert_eq!(
            f.load.order_status(o.order_id),
            Some(OrderStatus::Delivered)
        );
        assert!(f.load.run().unwrap().completed_at.is_some());
        assert_eq!(
            f.fail(LoadCommand::Cancel(f.tick())),
            "Cannot cancel a completed load."
        );
    }

    #[test]
    fn cancel_reschedules_items_and_reverts_orders() {
        let (mut f, o) = Fixture::in_transit();
        f.run(LoadCommand::Cancel(f.tick()));
        assert_eq!(f.load.status(), Some(LoadStatus::Cancelled));
        assert_eq!(f.load.items()[0].status, DeliveryItemStatus::Rescheduled);
        assert_eq!(
            f.load.order_status(o.order_id),
            Some(OrderStatus::Confirmed)
        );
        assert_eq!(
            f.fail(LoadCommand::Cancel(f.tick())),
            "Load is already cancelled."
        );
    }

    #[test]
    fn start_loading_marks_items_loading() {
        let mut f = Fixture::planned();
        let o = f.order(OrderStatus::Confirmed);
        f.run(f.assign(o, None));
        f.run(LoadCommand::StartLoading(f.tick()));
        assert_eq!(f.load.status(), Some(LoadStatus::Loading));
        assert_eq!(f.load.items()[0].status, DeliveryItemStatus::Loading);

        // Late additions join in the loading state.
        let late = f.order(OrderStatus::Confirmed);
        f.run(f.assign(late, None));
        assert_eq!(f.load.items()[1].status, DeliveryItemStatus::Loading);

        f.run(LoadCommand::Recall(f.tick()));
        assert_eq!(f.load.status(), Some(LoadStatus::Planned));
        assert!(f.load.active_items().all(|i| i.status == DeliveryItemStatus::Pending));
    }

    #[test]
    fn remove_order_reverts_ready_order_and_deletes_item() {
        let mut f = Fixture::planned();
        let o = f.order(OrderStatus::Confirmed);
        f.run(f.assign(o, None));
        let item_id = f.load.items()[0].id;

        let events = f.run(LoadCommand::RemoveOrder(RemoveOrder {
            org_id: f.org,
            order_id: o.order_id,
            occurred_at: Utc::now(),
        }));
        assert_eq!(events[0].removed_item(), Some(item_id));
        assert_eq!(events[0].order_changes()[0].to, OrderStatus::Confirmed);
        assert!(f.load.items().is_empty());
        assert!(f.load.ensure_deletable().is_ok());
    }

    fn remove(f: &Fixture, order: &OrderRef) -> LoadCommand {
        LoadCommand::RemoveOrder(RemoveOrder {
            org_id: f.org,
            order_id: order.order_id,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn removing_from_in_transit_load_keeps_order_dispatched() {
        let (mut f, o) = Fixture::in_transit();

        let events = f.run(remove(&f, &o));

        assert!(events[0].order_changes().is_empty());
        assert!(f.load.items().is_empty());
        assert_eq!(f.load.status(), Some(LoadStatus::InTransit));
        assert!(f.load.ensure_deletable().is_ok());
    }

    #[test]
    fn completed_load_can_be_emptied_without_touching_delivered_orders() {
        let (mut f, o) = Fixture::in_transit();
        f.run(LoadCommand::Complete(f.tick()));
        assert_eq!(f.load.items()[0].status, DeliveryItemStatus::Delivered);

        let events = f.run(remove(&f, &o));

        assert!(events[0].order_changes().is_empty());
        assert!(f.load.items().is_empty());
        assert!(f.load.ensure_deletable().is_ok());
    }

    #[test]
    fn historical_item_is_removed_when_order_has_no_active_one() {
        let mut f = Fixture::planned();
        let o = f.order(OrderStatus::Confirmed);
        f.run(f.assign(o, None));
        f.run(LoadCommand::Cancel(f.tick()));
        let rescheduled = f.load.items()[0].id;
        assert_eq!(f.load.items()[0].status, DeliveryItemStatus::Rescheduled);

        let events = f.run(remove(&f, &o));

        assert_eq!(events[0].removed_item(), Some(rescheduled));
        // Cancel already put the order back to confirmed.
        assert!(events[0].order_changes().is_empty());
        assert!(f.load.ensure_deletable().is_ok());
    }

    #[test]
    fn removing_an_unknown_order_is_not_found() {
        let f = Fixture::planned();
        let stranger = f.order(OrderStatus::Confirmed);
        assert_eq!(f.fail(remove(&f, &stranger)), "Order is not assigned to this load");
    }

    #[test]
    fn load_with_items_cannot_be_deleted() {
        let mut f = Fixture::planned();
        let o = f.order(OrderStatus::Confirmed);
        f.run(f.assign(o, None));
        let err = f.load.ensure_deletable().unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn other_org_cannot_see_the_load() {
        let f = Fixture::planned();
        let foreign = LoadTransition {
            org_id: OrgId::new(),
            occurred_at: Utc::now(),
        };
        assert_eq!(
            f.fail(LoadCommand::Dispatch(foreign)),
            "Load not found"
        );
    }
}
