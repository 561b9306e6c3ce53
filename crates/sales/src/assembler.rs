//! Turns resolved lines into a priced, persistence-ready order payload.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nursery_core::{OrgId, UserId};
use nursery_events::GroupBackfill;
use nursery_parties::{AddressId, CustomerId};
use nursery_pricing::{PriceResolver, PriceSource, PricingContext};
use nursery_products::{ProductGroupId, ProductId};

use crate::order::OrderStatus;
use crate::resolver::ResolvedLine;

/// Description prefix of lines ordered as a product-group mix.
pub const MIX_MARKER: &str = "[MIX] ";

fn money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn line_net(quantity: i64, unit_price: Decimal) -> Decimal {
    money(Decimal::from(quantity) * unit_price)
}

pub fn line_vat(quantity: i64, unit_price: Decimal, vat_rate: Decimal) -> Decimal {
    money(line_net(quantity, unit_price) * vat_rate / Decimal::ONE_HUNDRED)
}

pub fn line_gross(quantity: i64, unit_price: Decimal, vat_rate: Decimal) -> Decimal {
    line_net(quantity, unit_price) + line_vat(quantity, unit_price, vat_rate)
}

/// One line of the commit payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub line_no: u32,
    pub correlation_key: Uuid,
    pub product_id: ProductId,
    /// Not part of the commit call; written back afterwards by correlation key.
    pub product_group_id: Option<ProductGroupId>,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub vat_rate: Decimal,
    pub price_source: PriceSource,
}

impl NewOrderLine {
    pub fn gross(&self) -> Decimal {
        line_gross(self.quantity, self.unit_price, self.vat_rate)
    }
}

/// Everything the atomic commit call receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub org_id: OrgId,
    pub customer_id: CustomerId,
    pub order_number: String,
    pub status: OrderStatus,
    pub delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub ship_to_address_id: Option<AddressId>,
    pub created_by: Option<UserId>,
    pub lines: Vec<NewOrderLine>,
}

impl NewOrder {
    pub fn totals(&self) -> OrderTotals {
        OrderTotals::of(&self.lines)
    }

    /// Group ids of mix lines, keyed by correlation key.
    pub fn group_backfill(&self) -> Vec<GroupBackfill> {
        self.lines
            .iter()
            .filter_map(|line| {
                line.product_group_id.map(|group| GroupBackfill {
                    correlation_key: line.correlation_key,
                    product_group_id: group.0,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub net: Decimal,
    pub vat: Decimal,
    pub gross: Decimal,
}

impl OrderTotals {
    pub fn of(lines: &[NewOrderLine]) -> Self {
        lines.iter().fold(Self::default(), |acc, l| {
            let net = line_net(l.quantity, l.unit_price);
            let vat = line_vat(l.quantity, l.unit_price, l.vat_rate);
            Self {
                net: acc.net + net,
                vat: acc.vat + vat,
                gross: acc.gross + net + vat,
            }
        })
    }
}

/// Price each resolved line and flatten it for the commit call.
///
/// VAT falls back from the line override to the product's SKU rate, then to
/// `default_vat_rate`.
pub fn assemble_lines(
    resolved: &[ResolvedLine],
    prices: &PriceResolver,
    pricing: &PricingContext,
    default_vat_rate: Decimal,
) -> Vec<NewOrderLine> {
    resolved
        .iter()
        .map(|line| {
            let request = &line.request;
            let price = prices.resolve(pricing, line.product.id, request.unit_price);
            let vat_rate = request
                .vat_rate
                .or(line.product.vat_rate)
                .unwrap_or(default_vat_rate);
            let base = request
                .description
                .clone()
                .unwrap_or_else(|| line.product.name.clone());
            let (description, product_group_id) = match &line.product_group {
                Some(group) => (format!("{MIX_MARKER}{base}"), Some(group.id)),
                None => (base, None),
            };

            NewOrderLine {
                line_no: request.line_no,
                correlation_key: Uuid::now_v7(),
                product_id: line.product.id,
                product_group_id,
                description,
                quantity: request.quantity,
                unit_price: price.unit_price,
                vat_rate,
                price_source: price.source,
            }
        })
        .collect()
}
