use chrono::{DateTime, Utc};

/// A domain fact.
///
/// Events are immutable and versioned; they are recorded in the audit trail
/// but the state machines do not rebuild from them.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "sales.order.committed").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
