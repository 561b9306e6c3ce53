//! Product catalog as seen by order entry.
//!
//! Products are owned by the catalog pages; this crate only models what order
//! entry needs to resolve a line: ids, SKU VAT rates, `(variety, size)` labels
//! and product groups for "mix" lines.

pub mod group;
pub mod label;
pub mod product;

pub use group::{GroupMember, ProductGroup, ProductGroupId};
pub use label::{LabelIndex, VarietySize};
pub use product::{Product, ProductId, ProductStatus, SkuId};
