mod common;

use common::{Nursery, product_line};
use nursery_app::ActionErrorKind;
use nursery_app::dto::AllocateFromBatchRequest;
use nursery_inventory::{BatchAllocationStatus, BatchId};
use nursery_sales::OrderLineId;

/// An order of 10 against a 100-plant batch, reserved by Tier 1.
async fn reserved_line(n: &Nursery) -> (OrderLineId, BatchId) {
    let batch = n.batch(n.product, "B-001", 100);
    let created = n
        .services
        .create_order(&n.ctx(), &n.form(vec![product_line(n.product, 10)]))
        .await
        .unwrap();
    let order = n.store.order_by_number(n.org, &created.order_number).unwrap();
    (order.lines[0].id, batch)
}

fn request(line: OrderLineId, batch: BatchId, quantity: i64, key: &str) -> AllocateFromBatchRequest {
    AllocateFromBatchRequest {
        order_line_id: line.to_string(),
        batch_id: batch.to_string(),
        quantity,
        idempotency_key: key.to_string(),
    }
}

#[tokio::test]
async fn hard_allocation_moves_stock_from_reservation_to_batch() {
    let n = Nursery::seeded();
    let (line, batch) = reserved_line(&n).await;

    let allocated = n
        .services
        .allocate_from_batch(&n.ctx(), &request(line, batch, 4, "pick-1"))
        .await
        .unwrap();

    assert!(!allocated.replayed);
    assert_eq!(allocated.allocation.quantity, 4);
    assert_eq!(allocated.line_unallocated, 6);
    assert_eq!(allocated.tier1_reserved, 6);
    assert_eq!(n.store.batch(batch).unwrap().available_quantity, 96);
    assert_eq!(n.store.reservation(line).unwrap().quantity, 6);
}

#[tokio::test]
async fn replayed_key_returns_the_first_allocation() {
    let n = Nursery::seeded();
    let (line, batch) = reserved_line(&n).await;

    let first = n
        .services
        .allocate_from_batch(&n.ctx(), &request(line, batch, 4, "pick-1"))
        .await
        .unwrap();
    let again = n
        .services
        .allocate_from_batch(&n.ctx(), &request(line, batch, 4, "pick-1"))
        .await
        .unwrap();

    assert!(again.replayed);
    assert_eq!(again.allocation.id, first.allocation.id);
    assert_eq!(n.store.batch(batch).unwrap().available_quantity, 96);
    assert_eq!(n.store.calls("apply_batch_allocation"), 1);
}

#[tokio::test]
async fn key_reused_for_another_batch_is_a_conflict() {
    let n = Nursery::seeded();
    let (line, batch) = reserved_line(&n).await;
    let other = n.batch(n.product, "B-002", 50);

    n.services
        .allocate_from_batch(&n.ctx(), &request(line, batch, 4, "pick-1"))
        .await
        .unwrap();
    let err = n
        .services
        .allocate_from_batch(&n.ctx(), &request(line, other, 4, "pick-1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ActionErrorKind::Conflict);
    assert_eq!(n.store.batch(other).unwrap().available_quantity, 50);
}

#[tokio::test]
async fn allocation_beyond_the_line_is_refused() {
    let n = Nursery::seeded();
    let (line, batch) = reserved_line(&n).await;

    n.services
        .allocate_from_batch(&n.ctx(), &request(line, batch, 7, "pick-1"))
        .await
        .unwrap();
    let err = n
        .services
        .allocate_from_batch(&n.ctx(), &request(line, batch, 4, "pick-2"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ActionErrorKind::Invariant);
    assert_eq!(err.error, "Allocation exceeds line quantity (requested 4, unallocated 3)");
    assert_eq!(n.store.batch(batch).unwrap().available_quantity, 93);
}

#[tokio::test]
async fn allocation_beyond_the_batch_is_refused() {
    let n = Nursery::seeded();
    let (line, _) = reserved_line(&n).await;
    let small = n.batch(n.product, "B-003", 2);

    let err = n
        .services
        .allocate_from_batch(&n.ctx(), &request(line, small, 3, "pick-1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ActionErrorKind::Invariant);
    assert_eq!(err.error, "Insufficient batch quantity (requested 3, available 2)");
}

#[tokio::test]
async fn blank_key_and_bad_quantity_are_validation_errors() {
    let n = Nursery::seeded();
    let (line, batch) = reserved_line(&n).await;

    let err = n
        .services
        .allocate_from_batch(&n.ctx(), &request(line, batch, 1, "  "))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ActionErrorKind::Validation);
    assert_eq!(err.details.unwrap()[0]["field"], "idempotency_key");

    let err = n
        .services
        .allocate_from_batch(&n.ctx(), &request(line, batch, 0, "pick-1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ActionErrorKind::Validation);
    assert_eq!(n.store.calls("apply_batch_allocation"), 0);
}

#[tokio::test]
async fn release_returns_stock_and_reservation() {
    let n = Nursery::seeded();
    let (line, batch) = reserved_line(&n).await;
    let allocated = n
        .services
        .allocate_from_batch(&n.ctx(), &request(line, batch, 4, "pick-1"))
        .await
        .unwrap();

    let released = n
        .services
        .release_batch_allocation(&n.ctx(), &allocated.allocation.id.to_string())
        .await
        .unwrap();

    assert_eq!(released.allocation.status, BatchAllocationStatus::Released);
    assert_eq!(released.line_unallocated, 10);
    assert_eq!(released.tier1_reserved, 10);
    assert_eq!(n.store.batch(batch).unwrap().available_quantity, 100);
    assert_eq!(n.store.reservation(line).unwrap().quantity, 10);

    let err = n
        .services
        .release_batch_allocation(&n.ctx(), &allocated.allocation.id.to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ActionErrorKind::Conflict);
}

#[tokio::test]
async fn other_organization_cannot_see_the_line() {
    let n = Nursery::seeded();
    let (line, batch) = reserved_line(&n).await;
    let stranger = Nursery::seeded();

    let err = n
        .services
        .allocate_from_batch(&stranger.ctx(), &request(line, batch, 1, "pick-1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ActionErrorKind::NotFound);
    assert_eq!(n.store.batch(batch).unwrap().available_quantity, 100);
}
