//! Entity trait: identity that survives state changes.

/// Records that are looked up by id (customers, products, price lists).
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Owning organization. Every record in the core is org-scoped.
    fn org_id(&self) -> crate::OrgId;
}
