//! Events and post-commit side effects.
//!
//! - [`Event`]: facts produced by the state machines (order committed, load dispatched, ...).
//! - [`EventEnvelope`]: org-scoped wrapper persisted as an audit record.
//! - [`outbox`]: the explicit list of best-effort effects run after an order commits.

pub mod envelope;
pub mod event;
pub mod org;
pub mod outbox;

pub use envelope::EventEnvelope;
pub use event::Event;
pub use org::OrgScoped;
pub use outbox::{GroupBackfill, OutboxEntry, OutboxEntryId, OutboxStatus, PostCommitEffect};
