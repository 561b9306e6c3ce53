use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{Span, info, instrument, warn};

use nursery_core::OrgId;
use nursery_events::PostCommitEffect;
use nursery_parties::CustomerId;
use nursery_pricing::{PriceBook, PricingContext};
use nursery_products::ProductId;
use nursery_sales::{
    CatalogSnapshot, GroupSnapshot, LineRef, LineRequest, NewOrder, OrderCommitted, OrderEvent, OrderForm,
    OrderStatus, OrderSummary, assemble_lines, generate_order_number, resolve_customer, resolve_lines,
};

use super::{NurseryServices, audit};
use crate::context::ActionContext;
use crate::dto::CreateOrderResponse;
use crate::error::ActionError;

impl NurseryServices {
    /// Validate, resolve, price and commit an order, then reserve stock for it.
    ///
    /// The commit is the only step that can fail the action. Audit, group
    /// back-fill and Tier-1 reservation run afterwards as outbox effects.
    #[instrument(
        skip(self, ctx, form),
        fields(org_id = tracing::field::Empty, order_id = tracing::field::Empty, lines = form.lines.len()),
        err
    )]
    pub async fn create_order(
        &self,
        ctx: &ActionContext,
        form: &OrderForm,
    ) -> Result<CreateOrderResponse, ActionError> {
        let validated = form.validate()?;
        let org_id = ctx.require_org()?;
        Span::current().record("org_id", tracing::field::display(org_id));

        let customer = self.store.find_customer(validated.customer_id).await?;
        let customer = resolve_customer(Some(org_id), customer)?;
        if self.store.find_organization(org_id).await?.is_none() {
            return Err(ActionError::not_found("Organization not found"));
        }

        let catalog = self.catalog_snapshot(org_id, &validated.lines).await?;
        let resolved = resolve_lines(&validated.lines, &catalog)?;

        let now = Utc::now();
        let mut pricing = PricingContext {
            target_date: now.date_naive(),
            overrides: self.store.resolve_price_overrides(org_id, customer.id).await?,
            customer_default: customer.default_price_list_id,
            org_default: self.store.default_price_list(org_id).await?,
            book: PriceBook::new(),
        };
        let products: Vec<ProductId> = resolved
            .iter()
            .map(|l| l.product.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let entries = self
            .store
            .price_entries(org_id, &pricing.candidate_lists(), &products)
            .await?;
        pricing.book = PriceBook::from_entries(entries);

        let order = NewOrder {
            org_id,
            customer_id: customer.id,
            order_number: generate_order_number(now),
            status: OrderStatus::Confirmed,
            delivery_date: validated.delivery_date,
            notes: validated.notes.clone(),
            ship_to_address_id: validated
                .ship_to_address_id
                .or(customer.default_ship_address_id),
            created_by: ctx.user_id(),
            lines: assemble_lines(&resolved, &self.prices, &pricing, self.default_vat_rate),
        };
        let totals = order.totals();

        let order_id = self.store.commit_order(&order).await?;
        Span::current().record("order_id", tracing::field::display(order_id));
        info!(
            order_id = %order_id,
            order_number = %order.order_number,
            customer_id = %customer.id,
            "order committed"
        );

        let committed = OrderEvent::OrderCommitted(OrderCommitted {
            order_id,
            order_number: order.order_number.clone(),
            customer_id: customer.id,
            line_count: order.lines.len(),
            total: totals.gross,
            occurred_at: now,
        });
        let backfill = order.group_backfill();
        let mut effects: Vec<PostCommitEffect> =
            audit(org_id, order_id.0, "sales.order", ctx.user_id(), &committed)
                .into_iter()
                .collect();
        if !backfill.is_empty() {
            effects.push(PostCommitEffect::BackfillGroupIds {
                order_id: order_id.0,
                lines: backfill,
            });
        }
        effects.push(PostCommitEffect::AllocateTier1 {
            order_id: order_id.0,
            actor: ctx.user_id(),
        });

        let reports = self.run_effects(org_id, effects).await;
        let tier1 = reports.iter().find_map(|r| r.tier1().cloned());
        if tier1.is_none() {
            warn!(order_id = %order_id, "tier-1 reservation did not run; order committed without it");
        }
        let tier1 = tier1.unwrap_or_default();

        Ok(CreateOrderResponse {
            order_id,
            order_number: order.order_number,
            totals,
            has_oversell_warning: tier1.has_oversell_warning,
            oversell_items: tier1.oversell_items,
            effects: reports,
        })
    }

    /// Most recent orders of a customer of the caller's organization.
    #[instrument(skip(self, ctx), err)]
    pub async fn get_customer_recent_orders(
        &self,
        ctx: &ActionContext,
        customer_id: &str,
    ) -> Result<Vec<OrderSummary>, ActionError> {
        let customer_id = CustomerId::parse(customer_id.trim())?;
        let org_id = ctx.require_org()?;
        let customer = self.store.find_customer(customer_id).await?;
        let customer = resolve_customer(Some(org_id), customer)?;
        Ok(self
            .store
            .recent_orders_for_customer(org_id, customer.id, self.recent_orders_limit)
            .await?)
    }

    /// Active products of the org plus every group the lines reference.
    ///
    /// A group that does not exist in the org is left out; line resolution
    /// then reports it as not found.
    async fn catalog_snapshot(
        &self,
        org_id: OrgId,
        lines: &[LineRequest],
    ) -> Result<CatalogSnapshot, ActionError> {
        let products = self.store.resolve_products(org_id).await?;

        let group_ids: BTreeSet<_> = lines
            .iter()
            .filter_map(|l| match &l.reference {
                LineRef::Group { product_group_id } => Some(*product_group_id),
                _ => None,
            })
            .collect();
        let mut groups = Vec::with_capacity(group_ids.len());
        for group_id in group_ids {
            if let Some(group) = self.store.find_product_group(org_id, group_id).await? {
                let members = self.store.resolve_group_members(org_id, group_id).await?;
                groups.push(GroupSnapshot { group, members });
            }
        }

        Ok(CatalogSnapshot::new(org_id, products, groups))
    }
}
