//! Reference resolution for order entry.
//!
//! Lines name products three ways (id, `(variety, size)` label, product group).
//! Resolution runs against a [`CatalogSnapshot`] loaded once per order, so
//! everything in this module is pure and org-scoped by construction: the
//! snapshot only ever holds the caller organization's records.

use std::collections::HashMap;

use nursery_core::{DomainError, OrgId};
use nursery_parties::Customer;
use nursery_products::{GroupMember, LabelIndex, Product, ProductGroup, ProductGroupId, ProductId};

use crate::form::{LineRef, LineRequest};

/// A product group with its members in data-source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSnapshot {
    pub group: ProductGroup,
    pub members: Vec<GroupMember>,
}

/// The part of one organization's catalog an order can reference.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    org_id: OrgId,
    products: HashMap<ProductId, Product>,
    labels: LabelIndex,
    groups: HashMap<ProductGroupId, GroupSnapshot>,
}

impl CatalogSnapshot {
    /// Records of other organizations are dropped here.
    pub fn new(
        org_id: OrgId,
        products: impl IntoIterator<Item = Product>,
        groups: impl IntoIterator<Item = GroupSnapshot>,
    ) -> Self {
        let ordered: Vec<Product> = products
            .into_iter()
            .filter(|p| p.org_id == org_id && p.can_be_sold())
            .collect();
        let labels = LabelIndex::build(&ordered);
        let products = ordered.into_iter().map(|p| (p.id, p)).collect();
        let groups = groups
            .into_iter()
            .filter(|g| g.group.org_id == org_id)
            .map(|g| (g.group.id, g))
            .collect();
        Self {
            org_id,
            products,
            labels,
            groups,
        }
    }

    pub fn org_id(&self) -> OrgId {
        self.org_id
    }

    pub fn product(&self, id: ProductId) -> Option<&Product> {
        self.products.get(&id)
    }

    pub fn group(&self, id: ProductGroupId) -> Option<&GroupSnapshot> {
        self.groups.get(&id)
    }

    pub fn product_count(&self) -> usize {
        self.products.len()
    }
}

/// A line whose reference was resolved to one concrete product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLine {
    pub request: LineRequest,
    pub product: Product,
    /// Set for mix lines.
    pub product_group: Option<ProductGroup>,
}

impl ResolvedLine {
    pub fn is_mix(&self) -> bool {
        self.product_group.is_some()
    }
}

/// Check the loaded customer against the calling organization.
///
/// `caller_org` is `None` for an unauthenticated caller, which fails before
/// anything else is looked at.
pub fn resolve_customer(
    caller_org: Option<OrgId>,
    customer: Option<Customer>,
) -> Result<Customer, DomainError> {
    let caller_org = caller_org.ok_or(DomainError::Unauthenticated)?;
    let customer = customer.ok_or_else(|| DomainError::not_found("Customer not found"))?;
    customer.ensure_org(caller_org)?;
    if !customer.can_transact() {
        return Err(DomainError::invariant(format!(
            "Customer '{}' is suspended",
            customer.name
        )));
    }
    Ok(customer)
}

/// Resolve every line; the first line that cannot be resolved fails the order.
pub fn resolve_lines(
    lines: &[LineRequest],
    catalog: &CatalogSnapshot,
) -> Result<Vec<ResolvedLine>, DomainError> {
    lines.iter().map(|line| resolve_line(line, catalog)).collect()
}

fn resolve_line(line: &LineRequest, catalog: &CatalogSnapshot) -> Result<ResolvedLine, DomainError> {
    let unresolved = || {
        DomainError::not_found(format!(
            "Line {}: {} not found",
            line.line_no, line.reference
        ))
    };

    let (product_id, product_group) = match &line.reference {
        LineRef::Product { product_id } => (*product_id, None),
        LineRef::Label { variety, size } => (
            catalog.labels.lookup(variety, size).ok_or_else(unresolved)?,
            None,
        ),
        LineRef::Group { product_group_id } => {
            let snapshot = catalog.group(*product_group_id).ok_or_else(unresolved)?;
            let representative =
                ProductGroup::representative(&snapshot.members).ok_or_else(|| {
                    DomainError::invariant(format!(
                        "Line {}: product group '{}' has no members",
                        line.line_no, snapshot.group.name
                    ))
                })?;
            (representative, Some(snapshot.group.clone()))
        }
    };

    let product = catalog.product(product_id).ok_or_else(unresolved)?;
    Ok(ResolvedLine {
        request: line.clone(),
        product: product.clone(),
        product_group,
    })
}
