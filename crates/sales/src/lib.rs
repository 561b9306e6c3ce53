//! Sales order entry.
//!
//! Deterministic order logic (no IO): form validation, reference resolution
//! against a preloaded catalog snapshot, line assembly and order numbering.
//! Loading the snapshot and committing the result is the app layer's job.

pub mod assembler;
pub mod form;
pub mod number;
pub mod order;
pub mod resolver;

pub use assembler::{MIX_MARKER, NewOrder, NewOrderLine, OrderTotals, assemble_lines};
pub use form::{FieldIssue, FormErrors, LineRef, LineRequest, OrderForm, OrderLineForm, ValidatedOrder};
pub use number::generate_order_number;
pub use order::{
    Order, OrderCommitted, OrderEvent, OrderId, OrderLine, OrderLineId, OrderStatus, OrderSummary,
};
pub use resolver::{CatalogSnapshot, GroupSnapshot, ResolvedLine, resolve_customer, resolve_lines};
