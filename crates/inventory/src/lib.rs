//! Stock allocation against production batches.
//!
//! Two tiers:
//! - Tier 1 ([`tier1`]): product-level soft reservation, planned for a whole
//!   order right after it commits.
//! - Tier 2 ([`allocation`]): a picker converts reservation into hard
//!   allocations against specific batches.
//!
//! Pure domain logic; stores apply the results atomically.

pub mod allocation;
pub mod batch;
pub mod tier1;

pub use allocation::{
    AllocateFromBatch, AllocationCommand, AllocationEvent, AllocationReleased, BatchAllocated,
    LineAllocation, ReleaseAllocation,
};
pub use batch::{Batch, BatchAllocation, BatchAllocationId, BatchAllocationStatus, BatchId};
pub use tier1::{
    OversellItem, StockLedger, Tier1Line, Tier1Outcome, Tier1Plan, Tier1Reservation, plan_tier1,
};
