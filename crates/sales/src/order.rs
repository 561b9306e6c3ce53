use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nursery_core::OrgId;
use nursery_events::Event;
use nursery_parties::{AddressId, CustomerId};
use nursery_products::{ProductGroupId, ProductId};

nursery_core::typed_id!(OrderId, "order");
nursery_core::typed_id!(OrderLineId, "order line");

/// Sales order status lifecycle.
///
/// `draft → confirmed → ready_for_dispatch → dispatched → delivered`, with
/// `cancelled` and `failed` as side branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Confirmed,
    ReadyForDispatch,
    Dispatched,
    Delivered,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::ReadyForDispatch => "ready_for_dispatch",
            OrderStatus::Dispatched => "dispatched",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "draft" => OrderStatus::Draft,
            "confirmed" => OrderStatus::Confirmed,
            "ready_for_dispatch" => OrderStatus::ReadyForDispatch,
            "dispatched" => OrderStatus::Dispatched,
            "delivered" => OrderStatus::Delivered,
            "cancelled" => OrderStatus::Cancelled,
            "failed" => OrderStatus::Failed,
            _ => return None,
        })
    }

    /// Orders that may be put on a load.
    pub fn is_assignable(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::ReadyForDispatch)
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Committed order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub order_id: OrderId,
    pub line_no: u32,
    pub product_id: ProductId,
    /// Set for mix lines (filled in after commit).
    pub product_group_id: Option<ProductGroupId>,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    /// Percent.
    pub vat_rate: Decimal,
    /// Client-generated key linking this row to the line that was submitted.
    pub correlation_key: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub org_id: OrgId,
    pub customer_id: CustomerId,
    pub order_number: String,
    pub status: OrderStatus,
    pub delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub ship_to_address_id: Option<AddressId>,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    pub fn gross_total(&self) -> Decimal {
        self.lines
            .iter()
            .map(|l| crate::assembler::line_gross(l.quantity, l.unit_price, l.vat_rate))
            .sum()
    }

    pub fn summary(&self) -> OrderSummary {
        OrderSummary {
            order_id: self.id,
            order_number: self.order_number.clone(),
            status: self.status,
            created_at: self.created_at,
            delivery_date: self.delivery_date,
            line_count: self.lines.len(),
            total: self.gross_total(),
        }
    }
}

/// Row shown in a customer's recent-orders list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub order_number: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub delivery_date: Option<NaiveDate>,
    pub line_count: usize,
    pub total: Decimal,
}

/// Event: an order and its lines were committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCommitted {
    pub order_id: OrderId,
    pub order_number: String,
    pub customer_id: CustomerId,
    pub line_count: usize,
    pub total: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCommitted(OrderCommitted),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCommitted(_) => "sales.order.committed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCommitted(e) => e.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            OrderStatus::Draft,
            OrderStatus::Confirmed,
            OrderStatus::ReadyForDispatch,
            OrderStatus::Dispatched,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert_eq!(OrderStatus::parse("shipped"), None);
    }

    #[test]
    fn only_confirmed_or_ready_orders_are_assignable() {
        assert!(OrderStatus::Confirmed.is_assignable());
        assert!(OrderStatus::ReadyForDispatch.is_assignable());
        assert!(!OrderStatus::Dispatched.is_assignable());
        assert!(!OrderStatus::Draft.is_assignable());
    }
}
