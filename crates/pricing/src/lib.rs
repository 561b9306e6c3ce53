//! Unit price resolution.
//!
//! Precedence (first hit wins):
//! 1. explicit per-line price supplied by the caller
//! 2. an active customer-specific price-list override
//! 3. the customer's default price list
//! 4. the organization's default price list
//! 5. zero, with a warning (missing price data never blocks a sale)

pub mod price_list;
pub mod resolver;
pub mod window;

pub use price_list::{CustomerPriceOverride, PriceBook, PriceList, PriceListEntry, PriceListId};
pub use resolver::{
    CustomerDefaultStrategy, CustomerOverrideStrategy, OrgDefaultStrategy, PriceResolver, PriceSource,
    PriceStrategy, PricingContext, ResolvedPrice,
};
pub use window::{DateWindow, is_within_range};
