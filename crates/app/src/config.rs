//! Process configuration, read once from the environment at startup.

use std::str::FromStr;

use rust_decimal::Decimal;

use nursery_infra::DEFAULT_MAX_ATTEMPTS;
use nursery_parties::DEFAULT_VAT_RATE;

pub const DEFAULT_RECENT_ORDERS_LIMIT: usize = 10;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub use_persistent_stores: bool,
    pub max_connections: u32,
    /// Used when neither the line nor the product carries a VAT rate.
    pub default_vat_rate: Decimal,
    pub outbox_max_attempts: u32,
    pub recent_orders_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            use_persistent_stores: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            default_vat_rate: DEFAULT_VAT_RATE,
            outbox_max_attempts: DEFAULT_MAX_ATTEMPTS,
            recent_orders_limit: DEFAULT_RECENT_ORDERS_LIMIT,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; invalid values fall back to defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            use_persistent_stores: parsed(&lookup, "USE_PERSISTENT_STORES", defaults.use_persistent_stores),
            max_connections: parsed(&lookup, "NURSERY_DB_MAX_CONNECTIONS", defaults.max_connections),
            default_vat_rate: parsed(&lookup, "NURSERY_DEFAULT_VAT_RATE", defaults.default_vat_rate),
            outbox_max_attempts: parsed(&lookup, "NURSERY_OUTBOX_MAX_ATTEMPTS", defaults.outbox_max_attempts)
                .max(1),
            recent_orders_limit: parsed(&lookup, "NURSERY_RECENT_ORDERS_LIMIT", defaults.recent_orders_limit),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "invalid configuration value; using default");
            default
        }),
    }
}
