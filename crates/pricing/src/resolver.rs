//! Strategy chain for unit prices.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use nursery_products::ProductId;

use crate::price_list::{CustomerPriceOverride, PriceBook, PriceListId};

/// Where a resolved price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "price_list_id", rename_all = "snake_case")]
pub enum PriceSource {
    LineOverride,
    CustomerOverride(PriceListId),
    CustomerDefault(PriceListId),
    OrgDefault(PriceListId),
    /// No price found anywhere; priced at zero.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub unit_price: Decimal,
    pub source: PriceSource,
}

/// Everything price resolution needs for one order, loaded up front.
#[derive(Debug, Clone, Default)]
pub struct PricingContext {
    /// Order creation date (not the delivery date).
    pub target_date: NaiveDate,
    /// Customer overrides in data-source order.
    pub overrides: Vec<CustomerPriceOverride>,
    pub customer_default: Option<PriceListId>,
    pub org_default: Option<PriceListId>,
    pub book: PriceBook,
}

impl PricingContext {
    /// Overrides whose window contains the target date, in source order.
    pub fn active_overrides(&self) -> impl Iterator<Item = PriceListId> + '_ {
        self.overrides
            .iter()
            .filter(|o| o.window.contains(self.target_date))
            .map(|o| o.price_list_id)
    }

    /// Price lists the book must be loaded for.
    pub fn candidate_lists(&self) -> Vec<PriceListId> {
        let mut seen = BTreeSet::new();
        self.active_overrides()
            .chain(self.customer_default)
            .chain(self.org_default)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// One step of the precedence chain.
pub trait PriceStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Some` only when this strategy's list prices the product.
    fn try_resolve(&self, ctx: &PricingContext, product_id: ProductId) -> Option<ResolvedPrice>;
}

pub struct CustomerOverrideStrategy;

impl PriceStrategy for CustomerOverrideStrategy {
    fn name(&self) -> &'static str {
        "customer_override"
    }

    fn try_resolve(&self, ctx: &PricingContext, product_id: ProductId) -> Option<ResolvedPrice> {
        ctx.active_overrides().find_map(|list| {
            ctx.book.price(list, product_id).map(|unit_price| ResolvedPrice {
                unit_price,
                source: PriceSource::CustomerOverride(list),
            })
        })
    }
}

pub struct CustomerDefaultStrategy;

impl PriceStrategy for CustomerDefaultStrategy {
    fn name(&self) -> &'static str {
        "customer_default"
    }

    fn try_resolve(&self, ctx: &PricingContext, product_id: ProductId) -> Option<ResolvedPrice> {
        let list = ctx.customer_default?;
        ctx.book.price(list, product_id).map(|unit_price| ResolvedPrice {
            unit_price,
            source: PriceSource::CustomerDefault(list),
        })
    }
}

pub struct OrgDefaultStrategy;

impl PriceStrategy for OrgDefaultStrategy {
    fn name(&self) -> &'static str {
        "org_default"
    }

    fn try_resolve(&self, ctx: &PricingContext, product_id: ProductId) -> Option<ResolvedPrice> {
        let list = ctx.org_default?;
        ctx.book.price(list, product_id).map(|unit_price| ResolvedPrice {
            unit_price,
            source: PriceSource::OrgDefault(list),
        })
    }
}

/// Ordered strategies, tried first to last.
pub struct PriceResolver {
    strategies: Vec<Box<dyn PriceStrategy>>,
}

impl Default for PriceResolver {
    fn default() -> Self {
        Self::new(vec![
            Box::new(CustomerOverrideStrategy),
            Box::new(CustomerDefaultStrategy),
            Box::new(OrgDefaultStrategy),
        ])
    }
}

impl PriceResolver {
    pub fn new(strategies: Vec<Box<dyn PriceStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Resolve the effective unit price. Never fails.
    pub fn resolve(
        &self,
        ctx: &PricingContext,
        product_id: ProductId,
        line_override: Option<Decimal>,
    ) -> ResolvedPrice {
        if let Some(unit_price) = line_override {
            return ResolvedPrice {
                unit_price,
                source: PriceSource::LineOverride,
            };
        }

        if let Some(found) = self
            .strategies
            .iter()
            .find_map(|s| s.try_resolve(ctx, product_id))
        {
            return found;
        }

        warn!(
            product_id = %product_id,
            target_date = %ctx.target_date,
            "no price list entry for product; pricing at zero"
        );
        ResolvedPrice {
            unit_price: Decimal::ZERO,
            source: PriceSource::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price_list::PriceListEntry;
    use crate::window::DateWindow;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn entry(list: PriceListId, product: ProductId, price: Decimal) -> PriceListEntry {
        PriceListEntry {
            price_list_id: list,
            product_id: product,
            unit_price: price,
        }
    }

    struct Fixture {
        product: ProductId,
        override_list: PriceListId,
        customer_list: PriceListId,
        org_list: PriceListId,
        ctx: PricingContext,
    }

    fn fixture() -> Fixture {
        let product = ProductId::new();
        let override_list = PriceListId::new();
        let customer_list = PriceListId::new();
        let org_list = PriceListId::new();
        let book = PriceBook::from_entries([
            entry(override_list, product, dec!(3.10)),
            entry(customer_list, product, dec!(3.60)),
            entry(org_list, product, dec!(4.00)),
        ]);
        let ctx = PricingContext {
            target_date: d(2026, 5, 10),
            overrides: vec![CustomerPriceOverride {
                price_list_id: override_list,
                window: DateWindow::new(Some(d(2026, 5, 1)), Some(d(2026, 5, 10))),
            }],
            customer_default: Some(customer_list),
            org_default: Some(org_list),
            book,
        };
        Fixture {
            product,
            override_list,
            customer_list,
            org_list,
            ctx,
        }
    }

    #[test]
    fn line_override_always_wins() {
        let f = fixture();
        let resolved = PriceResolver::default().resolve(&f.ctx, f.product, Some(dec!(5.00)));
        assert_eq!(resolved.unit_price, dec!(5.00));
        assert_eq!(resolved.source, PriceSource::LineOverride);
    }

    #[test]
    fn active_customer_override_beats_defaults() {
        let f = fixture();
        let resolved = PriceResolver::default().resolve(&f.ctx, f.product, None);
        assert_eq!(resolved.unit_price, dec!(3.10));
        assert_eq!(resolved.source, PriceSource::CustomerOverride(f.override_list));
    }

    #[test]
    fn expired_override_falls_through_to_customer_default() {
        let mut f = fixture();
        f.ctx.target_date = d(2026, 5, 11);
        let resolved = PriceResolver::default().resolve(&f.ctx, f.product, None);
        assert_eq!(resolved.unit_price, dec!(3.60));
        assert_eq!(resolved.source, PriceSource::CustomerDefault(f.customer_list));
    }

    #[test]
    fn org_default_used_when_customer_has_no_list() {
        let mut f = fixture();
        f.ctx.overrides.clear();
        f.ctx.customer_default = None;
        let resolved = PriceResolver::default().resolve(&f.ctx, f.product, None);
        assert_eq!(resolved.source, PriceSource::OrgDefault(f.org_list));
        assert_eq!(resolved.unit_price, dec!(4.00));
    }

    #[test]
    fn list_without_entry_for_product_falls_through() {
        let mut f = fixture();
        let other = ProductId::new();
        f.ctx.book.insert(entry(f.org_list, other, dec!(9.99)));
        let resolved = PriceResolver::default().resolve(&f.ctx, other, None);
        assert_eq!(resolved.source, PriceSource::OrgDefault(f.org_list));
    }

    #[test]
    fn missing_price_data_prices_at_zero() {
        let f = fixture();
        let resolved = PriceResolver::default().resolve(&f.ctx, ProductId::new(), None);
        assert_eq!(resolved.unit_price, Decimal::ZERO);
        assert_eq!(resolved.source, PriceSource::Fallback);
    }

    #[test]
    fn candidate_lists_follow_precedence_without_duplicates() {
        let mut f = fixture();
        f.ctx.customer_default = Some(f.org_list);
        assert_eq!(f.ctx.candidate_lists(), vec![f.override_list, f.org_list]);
    }

    #[test]
    fn default_chain_order_is_fixed() {
        assert_eq!(
            PriceResolver::default().strategy_names(),
            vec!["customer_override", "customer_default", "org_default"]
        );
    }
}
