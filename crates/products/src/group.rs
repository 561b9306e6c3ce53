use serde::{Deserialize, Serialize};

use nursery_core::{Entity, OrgId};

use crate::product::ProductId;

nursery_core::typed_id!(ProductGroupId, "product group");

/// A set of interchangeable products, ordered as a "mix".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductGroup {
    pub id: ProductGroupId,
    pub org_id: OrgId,
    pub name: String,
}

impl Entity for ProductGroup {
    type Id = ProductGroupId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn org_id(&self) -> OrgId {
        self.org_id
    }
}

/// One membership row. Stores return members in their own stable order; the
/// first member is the one a mix line is booked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub product_id: ProductId,
}

impl ProductGroup {
    /// Representative product of a mix line: the first member, no ranking.
    pub fn representative(members: &[GroupMember]) -> Option<ProductId> {
        members.first().map(|m| m.product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representative_is_first_member_in_source_order() {
        let a = ProductId::new();
        let b = ProductId::new();
        let members = vec![GroupMember { product_id: b }, GroupMember { product_id: a }];
        assert_eq!(ProductGroup::representative(&members), Some(b));
    }

    #[test]
    fn empty_group_has_no_representative() {
        assert_eq!(ProductGroup::representative(&[]), None);
    }
}
