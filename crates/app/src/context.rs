use nursery_core::{DomainError, OrgId, UserId};

/// Caller identity for one action.
///
/// Resolved by the surrounding request handler; `org_id` is `None` when no
/// one is signed in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActionContext {
    org_id: Option<OrgId>,
    user_id: Option<UserId>,
}

impl ActionContext {
    pub fn new(org_id: OrgId, user_id: Option<UserId>) -> Self {
        Self {
            org_id: Some(org_id),
            user_id,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            org_id: None,
            user_id: None,
        }
    }

    pub fn org_id(&self) -> Option<OrgId> {
        self.org_id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn require_org(&self) -> Result<OrgId, DomainError> {
        self.org_id.ok_or(DomainError::Unauthenticated)
    }
}
