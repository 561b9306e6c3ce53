//! Infrastructure layer: store traits and their in-memory and Postgres
//! implementations, plus the post-commit outbox processor.
//!
//! Application services only see [`NurseryStore`]; which backend sits behind
//! it is decided once at startup.

pub mod error;
pub mod memory;
pub mod outbox;
pub mod picking;
pub mod postgres;
pub mod stores;

pub use error::StoreError;
pub use memory::{FailurePoint, InMemoryStore};
pub use outbox::{DEFAULT_MAX_ATTEMPTS, EffectOutcome, EffectOutput, EffectReport, OutboxProcessor};
pub use picking::{PickList, PickListId};
pub use postgres::PgStore;
pub use stores::{
    AllocationStore, AuditSink, CatalogStore, DispatchStore, NurseryStore, OrderStore, OutboxStore,
    PartyStore, PickingService, PricingStore,
};
