use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use nursery_core::{Aggregate, AggregateRoot, ExpectedVersion, OrgId};
use nursery_dispatch::{
    AssignOrder, CreateLoad, DeliveryItemId, DeliveryRunId, Load, LoadCommand, LoadEvent,
    LoadTransition, OrderRef, PickingTeamId, RemoveOrder, generate_run_number,
};
use nursery_events::PostCommitEffect;
use nursery_infra::{EffectOutcome, EffectOutput};
use nursery_sales::OrderId;

use super::{NurseryServices, audit};
use crate::context::ActionContext;
use crate::dto::{AssignOrderResponse, CreateLoadRequest, LoadView};
use crate::error::ActionError;

const ENTITY_TYPE: &str = "dispatch.load";

impl NurseryServices {
    /// New load in `planned`. The run number defaults to `LOAD-<date>-<seq>`.
    #[instrument(skip(self, ctx, request), fields(run_date = ?request.run_date), err)]
    pub async fn create_load(
        &self,
        ctx: &ActionContext,
        request: &CreateLoadRequest,
    ) -> Result<LoadView, ActionError> {
        let picking_team_id = request
            .picking_team_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PickingTeamId::parse)
            .transpose()?;
        let org_id = ctx.require_org()?;
        let now = Utc::now();
        let run_date = request.run_date.unwrap_or_else(|| now.date_naive());

        let run_number = match request.run_number.as_deref().map(str::trim) {
            Some(number) if !number.is_empty() => number.to_string(),
            _ => generate_run_number(run_date, self.store.next_run_sequence(org_id, run_date).await?),
        };

        let command = LoadCommand::CreateLoad(CreateLoad {
            org_id,
            run_number,
            run_date,
            vehicle: request.vehicle.clone(),
            driver: request.driver.clone(),
            picking_team_id,
            occurred_at: now,
        });
        let (load, events) = Load::empty(DeliveryRunId::new()).execute(&command)?;
        let run = load
            .run()
            .ok_or_else(|| ActionError::internal("created load has no run"))?;
        self.store.create_run(run).await?;

        info!(load_id = %run.id, run_number = %run.run_number, "load created");
        self.audit_load(org_id, ctx, load.id_typed(), &events).await;
        view(&load)
    }

    /// Put an order on a load, moving it off any other load it is active on.
    ///
    /// Afterwards the order's pick list is ensured and handed to the load's
    /// picking team; that step is best-effort.
    #[instrument(skip(self, ctx), err)]
    pub async fn assign_order_to_load(
        &self,
        ctx: &ActionContext,
        load_id: &str,
        order_id: &str,
    ) -> Result<AssignOrderResponse, ActionError> {
        let load_id = DeliveryRunId::parse(load_id.trim())?;
        let order_id = OrderId::parse(order_id.trim())?;
        let org_id = ctx.require_org()?;

        let order = self
            .store
            .find_order(org_id, order_id)
            .await?
            .ok_or_else(|| ActionError::not_found("Order not found"))?;
        let current_item = self.store.active_item_for_order(org_id, order_id).await?;

        let (load, events) = self
            .transition(ctx, load_id, |org_id, occurred_at| {
                LoadCommand::AssignOrder(AssignOrder {
                    org_id,
                    order: OrderRef {
                        order_id: order.id,
                        org_id: order.org_id,
                        status: order.status,
                    },
                    current_item,
                    new_item_id: DeliveryItemId::new(),
                    occurred_at,
                })
            })
            .await?;

        let team_id = load.run().and_then(|r| r.picking_team_id).map(|t| t.0);
        let reports = self
            .run_effects(
                org_id,
                vec![PostCommitEffect::EnsurePickList {
                    order_id: order_id.0,
                    team_id,
                }],
            )
            .await;
        let pick_list_id = reports.iter().find_map(|r| match &r.outcome {
            EffectOutcome::Delivered(EffectOutput::PickList { id, .. }) => Some(*id),
            _ => None,
        });

        Ok(AssignOrderResponse {
            load: view(&load)?,
            assigned: !events.is_empty(),
            pick_list_id,
        })
    }

    /// `planned → loading`.
    #[instrument(skip(self, ctx), err)]
    pub async fn start_loading(&self, ctx: &ActionContext, load_id: &str) -> Result<LoadView, ActionError> {
        self.simple_transition(ctx, load_id, LoadCommand::StartLoading).await
    }

    /// `planned | loading → in_transit`; items and their orders move together.
    #[instrument(skip(self, ctx), err)]
    pub async fn dispatch_load(&self, ctx: &ActionContext, load_id: &str) -> Result<LoadView, ActionError> {
        self.simple_transition(ctx, load_id, LoadCommand::Dispatch).await
    }

    /// `in_transit | loading → planned`.
    #[instrument(skip(self, ctx), err)]
    pub async fn recall_load(&self, ctx: &ActionContext, load_id: &str) -> Result<LoadView, ActionError> {
        self.simple_transition(ctx, load_id, LoadCommand::Recall).await
    }

    #[instrument(skip(self, ctx), err)]
    pub async fn complete_load(&self, ctx: &ActionContext, load_id: &str) -> Result<LoadView, ActionError> {
        self.simple_transition(ctx, load_id, LoadCommand::Complete).await
    }

    #[instrument(skip(self, ctx), err)]
    pub async fn cancel_load(&self, ctx: &ActionContext, load_id: &str) -> Result<LoadView, ActionError> {
        self.simple_transition(ctx, load_id, LoadCommand::Cancel).await
    }

    #[instrument(skip(self, ctx), err)]
    pub async fn remove_order_from_load(
        &self,
        ctx: &ActionContext,
        load_id: &str,
        order_id: &str,
    ) -> Result<LoadView, ActionError> {
        let load_id = DeliveryRunId::parse(load_id.trim())?;
        let order_id = OrderId::parse(order_id.trim())?;
        let (load, _) = self
            .transition(ctx, load_id, |org_id, occurred_at| {
                LoadCommand::RemoveOrder(RemoveOrder {
                    org_id,
                    order_id,
                    occurred_at,
                })
            })
            .await?;
        view(&load)
    }

    /// Only a load no delivery item references can be deleted.
    #[instrument(skip(self, ctx), err)]
    pub async fn delete_load(&self, ctx: &ActionContext, load_id: &str) -> Result<(), ActionError> {
        let load_id = DeliveryRunId::parse(load_id.trim())?;
        let org_id = ctx.require_org()?;
        let load = self.find_load(org_id, load_id).await?;
        load.ensure_deletable()?;
        self.store
            .delete_run(org_id, load_id, ExpectedVersion::Exact(load.version()))
            .await?;
        info!(load_id = %load_id, "load deleted");
        Ok(())
    }

    async fn simple_transition(
        &self,
        ctx: &ActionContext,
        load_id: &str,
        command: fn(LoadTransition) -> LoadCommand,
    ) -> Result<LoadView, ActionError> {
        let load_id = DeliveryRunId::parse(load_id.trim())?;
        let (load, _) = self
            .transition(ctx, load_id, |org_id, occurred_at| {
                command(LoadTransition { org_id, occurred_at })
            })
            .await?;
        view(&load)
    }

    /// Load, run the command, persist every resulting change in one store call.
    async fn transition(
        &self,
        ctx: &ActionContext,
        load_id: DeliveryRunId,
        command: impl FnOnce(OrgId, DateTime<Utc>) -> LoadCommand,
    ) -> Result<(Load, Vec<LoadEvent>), ActionError> {
        let org_id = ctx.require_org()?;
        let load = self.find_load(org_id, load_id).await?;
        let (next, events) = load.execute(&command(org_id, Utc::now()))?;
        if events.is_empty() {
            return Ok((next, events));
        }

        self.store
            .save_transition(org_id, &next, ExpectedVersion::Exact(load.version()), &events)
            .await?;
        if let (Some(before), Some(after)) = (load.status(), next.status()) {
            if before != after {
                info!(load_id = %load_id, from = %before, to = %after, "load status changed");
            }
        }
        self.audit_load(org_id, ctx, load_id, &events).await;
        Ok((next, events))
    }

    async fn find_load(&self, org_id: OrgId, load_id: DeliveryRunId) -> Result<Load, ActionError> {
        self.store
            .load_load(org_id, load_id)
            .await?
            .ok_or_else(|| ActionError::not_found("Load not found"))
    }

    async fn audit_load(&self, org_id: OrgId, ctx: &ActionContext, load_id: DeliveryRunId, events: &[LoadEvent]) {
        let effects = events
            .iter()
            .filter_map(|event| audit(org_id, load_id.0, ENTITY_TYPE, ctx.user_id(), event))
            .collect();
        self.run_effects(org_id, effects).await;
    }
}

fn view(load: &Load) -> Result<LoadView, ActionError> {
    LoadView::of(load).ok_or_else(|| ActionError::not_found("Load not found"))
}
