//! `nursery-core`: shared building blocks for the order, allocation and dispatch core.
//!
//! Pure domain primitives only: identifiers, the error taxonomy, and the small
//! traits the domain crates implement. No IO lives here.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{EntityId, OrgId, UserId};
pub use value_object::ValueObject;
