//! Tier 1: product-level (soft) reservations taken when an order is confirmed.
//!
//! Planning is a pure function over a [`StockLedger`] snapshot; stores run it
//! inside one transaction scoped to the order and persist the resulting
//! reservations in a single write.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use nursery_products::ProductId;
use nursery_sales::{OrderId, OrderLineId};

/// Soft reservation of one order line. At most one per line; re-planning replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier1Reservation {
    pub order_line_id: OrderLineId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i64,
}

/// What Tier 1 needs to know about an order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier1Line {
    pub order_line_id: OrderLineId,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Quantity already held by active batch allocations.
    pub batch_allocated: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OversellItem {
    pub order_line_id: OrderLineId,
    pub product_id: ProductId,
    pub requested: i64,
    pub available: i64,
}

/// Result of one Tier-1 run. Oversell is informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier1Outcome {
    pub has_oversell_warning: bool,
    pub oversell_items: Vec<OversellItem>,
    pub reserved_lines: usize,
}

/// Org-wide stock position used for planning.
#[derive(Debug, Clone, Default)]
pub struct StockLedger {
    batch_available: HashMap<ProductId, i64>,
    reservations: HashMap<OrderLineId, Tier1Reservation>,
}

impl StockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_batch_stock(&mut self, product_id: ProductId, available: i64) {
        *self.batch_available.entry(product_id).or_default() += available;
    }

    pub fn put_reservation(&mut self, reservation: Tier1Reservation) {
        self.reservations
            .insert(reservation.order_line_id, reservation);
    }

    pub fn reservation(&self, line: OrderLineId) -> Option<&Tier1Reservation> {
        self.reservations.get(&line)
    }

    /// Σ batch available − Σ Tier-1 reservations of every other line.
    pub fn available_for(&self, product_id: ProductId, excluding: OrderLineId) -> i64 {
        let on_hand = self.batch_available.get(&product_id).copied().unwrap_or(0);
        let reserved: i64 = self
            .reservations
            .values()
            .filter(|r| r.product_id == product_id && r.order_line_id != excluding)
            .map(|r| r.quantity)
            .sum();
        on_hand - reserved
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier1Plan {
    pub reservations: Vec<Tier1Reservation>,
    pub outcome: Tier1Outcome,
}

/// Reserve every line of `order_id` that has no batch allocation yet.
///
/// Each reservation is set to the line quantity, so running the plan again
/// yields the same reservations. Lines are planned in order; a later line of
/// the same product sees the reservations of the earlier ones.
pub fn plan_tier1(order_id: OrderId, lines: &[Tier1Line], ledger: &StockLedger) -> Tier1Plan {
    let mut working = ledger.clone();
    let mut reservations = Vec::new();
    let mut outcome = Tier1Outcome::default();

    for line in lines.iter().filter(|l| l.batch_allocated == 0) {
        let available = working
            .available_for(line.product_id, line.order_line_id)
            .max(0);
        if line.quantity > available {
            outcome.oversell_items.push(OversellItem {
                order_line_id: line.order_line_id,
                product_id: line.product_id,
                requested: line.quantity,
                available,
            });
        }

        let reservation = Tier1Reservation {
            order_line_id: line.order_line_id,
            order_id,
            product_id: line.product_id,
            quantity: line.quantity,
        };
        working.put_reservation(reservation);
        reservations.push(reservation);
    }

    outcome.reserved_lines = reservations.len();
    outcome.has_oversell_warning = !outcome.oversell_items.is_empty();
    Tier1Plan {
        reservations,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: ProductId, quantity: i64) -> Tier1Line {
        Tier1Line {
            order_line_id: OrderLineId::new(),
            product_id,
            quantity,
            batch_allocated: 0,
        }
    }

    #[test]
    fn reserves_within_stock_without_warning() {
        let product = ProductId::new();
        let mut ledger = StockLedger::new();
        ledger.add_batch_stock(product, 60);
        ledger.add_batch_stock(product, 40);

        let plan = plan_tier1(OrderId::new(), &[line(product, 100)], &ledger);
        assert!(!plan.outcome.has_oversell_warning);
        assert_eq!(plan.reservations[0].quantity, 100);
        assert_eq!(plan.outcome.reserved_lines, 1);
    }

    #[test]
    fn other_orders_reservations_reduce_availability() {
        let product = ProductId::new();
        let mut ledger = StockLedger::new();
        ledger.add_batch_stock(product, 50);
        ledger.put_reservation(Tier1Reservation {
            order_line_id: OrderLineId::new(),
            order_id: OrderId::new(),
            product_id: product,
            quantity: 45,
        });

        let l = line(product, 10);
        let plan = plan_tier1(OrderId::new(), &[l], &ledger);
        assert!(plan.outcome.has_oversell_warning);
        assert_eq!(
            plan.outcome.oversell_items,
            vec![OversellItem {
                order_line_id: l.order_line_id,
                product_id: product,
                requested: 10,
                available: 5,
            }]
        );
        // Oversell still reserves the full quantity.
        assert_eq!(plan.reservations[0].quantity, 10);
    }

    #[test]
    fn rerun_sets_rather_than_appends() {
        let product = ProductId::new();
        let order = OrderId::new();
        let l = line(product, 30);
        let mut ledger = StockLedger::new();
        ledger.add_batch_stock(product, 30);

        let first = plan_tier1(order, &[l], &ledger);
        for r in &first.reservations {
            ledger.put_reservation(*r);
        }
        let second = plan_tier1(order, &[l], &ledger);

        assert_eq!(first.reservations, second.reservations);
        assert!(!second.outcome.has_oversell_warning);
    }

    #[test]
    fn lines_with_batch_allocations_are_skipped() {
        let product = ProductId::new();
        let mut allocated = line(product, 5);
        allocated.batch_allocated = 5;
        let plan = plan_tier1(OrderId::new(), &[allocated], &StockLedger::new());
        assert!(plan.reservations.is_empty());
        assert_eq!(plan.outcome, Tier1Outcome::default());
    }

    #[test]
    fn later_lines_see_earlier_lines_of_same_order() {
        let product = ProductId::new();
        let mut ledger = StockLedger::new();
        ledger.add_batch_stock(product, 15);
        let plan = plan_tier1(
            OrderId::new(),
            &[line(product, 10), line(product, 10)],
            &ledger,
        );
        assert_eq!(plan.outcome.oversell_items.len(), 1);
        assert_eq!(plan.outcome.oversell_items[0].available, 5);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: a line is flagged exactly when the stock left for it is short.
            #[test]
            fn oversell_flag_matches_remaining_stock(
                stock in 0i64..500,
                quantities in proptest::collection::vec(1i64..200, 1..8),
            ) {
                let product = ProductId::new();
                let mut ledger = StockLedger::new();
                ledger.add_batch_stock(product, stock);
                let lines: Vec<_> = quantities.iter().map(|q| line(product, *q)).collect();

                let plan = plan_tier1(OrderId::new(), &lines, &ledger);

                let mut remaining = stock;
                let mut expected = 0;
                for q in &quantities {
                    if *q > remaining.max(0) {
                        expected += 1;
                    }
                    remaining -= q;
                }
                prop_assert_eq!(plan.outcome.oversell_items.len(), expected);
                prop_assert_eq!(plan.outcome.has_oversell_warning, expected > 0);
                prop_assert_eq!(plan.reservations.len(), quantities.len());
            }
        }
    }
}
