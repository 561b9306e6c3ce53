use serde::{Deserialize, Serialize};

use nursery_core::{DomainError, Entity, OrgId};
use nursery_pricing::PriceListId;

nursery_core::typed_id!(CustomerId, "customer");
nursery_core::typed_id!(AddressId, "address");

/// Customer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    Active,
    Suspended,
}

/// A customer of one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub org_id: OrgId,
    pub name: String,
    pub status: CustomerStatus,
    pub default_price_list_id: Option<PriceListId>,
    pub default_ship_address_id: Option<AddressId>,
}

impl Customer {
    pub fn new(id: CustomerId, org_id: OrgId, name: impl Into<String>) -> Self {
        Self {
            id,
            org_id,
            name: name.into(),
            status: CustomerStatus::Active,
            default_price_list_id: None,
            default_ship_address_id: None,
        }
    }

    pub fn with_default_price_list(mut self, price_list_id: PriceListId) -> Self {
        self.default_price_list_id = Some(price_list_id);
        self
    }

    pub fn with_default_ship_address(mut self, address_id: AddressId) -> Self {
        self.default_ship_address_id = Some(address_id);
        self
    }

    pub fn can_transact(&self) -> bool {
        self.status == CustomerStatus::Active
    }

    /// Reject access from another organization.
    pub fn ensure_org(&self, caller_org: OrgId) -> Result<(), DomainError> {
        if self.org_id != caller_org {
            return Err(DomainError::cross_tenant(
                "Customer belongs to a different organization",
            ));
        }
        Ok(())
    }
}

impl Entity for Customer {
    type Id = CustomerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn org_id(&self) -> OrgId {
        self.org_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_org_rejects_other_org_distinctly() {
        let customer = Customer::new(CustomerId::new(), OrgId::new(), "Greenfields Garden Centre");

        assert!(customer.ensure_org(customer.org_id).is_ok());
        let err = customer.ensure_org(OrgId::new()).unwrap_err();
        assert_eq!(
            err,
            DomainError::CrossTenant("Customer belongs to a different organization".into())
        );
        assert_eq!(err.to_string(), "Customer belongs to a different organization");
    }

    #[test]
    fn suspended_customer_cannot_transact() {
        let mut customer = Customer::new(CustomerId::new(), OrgId::new(), "Hedge & Co");
        assert!(customer.can_transact());
        customer.status = CustomerStatus::Suspended;
        assert!(!customer.can_transact());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&CustomerStatus::Suspended).unwrap();
        assert_eq!(json, "\"suspended\"");
    }
}
