//! Value objects: compared by value, never by identity.
//!
//! Validity windows and `(variety, size)` labels are value objects: two windows
//! with the same bounds are the same window.

/// Marker trait for immutable, value-compared domain types.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
