use nursery_core::OrgId;

use crate::{EventEnvelope, OutboxEntry};

/// Messages that belong to exactly one organization.
///
/// Stores and processors use this to refuse work that crosses the org boundary.
pub trait OrgScoped {
    fn org_id(&self) -> OrgId;
}

impl<E> OrgScoped for EventEnvelope<E> {
    fn org_id(&self) -> OrgId {
        EventEnvelope::org_id(self)
    }
}

impl OrgScoped for OutboxEntry {
    fn org_id(&self) -> OrgId {
        self.org_id
    }
}
