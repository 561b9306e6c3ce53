//! Organizations and customers.
//!
//! An organization is the tenant boundary; every customer belongs to exactly one.

pub mod customer;
pub mod organization;

pub use customer::{AddressId, Customer, CustomerId, CustomerStatus};
pub use organization::{DEFAULT_VAT_RATE, Organization};
