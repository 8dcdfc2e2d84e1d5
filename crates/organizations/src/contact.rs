//! Contacts, addresses and phones owned by an organization.

use serde::{Deserialize, Serialize};

use carebase_core::OrganizationId;
use carebase_events::domain_events;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactType {
    Administrative,
    Billing,
    Technical,
    Emergency,
    Clinical,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Physical,
    Mailing,
    Billing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneType {
    Mobile,
    Office,
    Fax,
    Emergency,
}

/// Deletion payload shared by the three families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Removed {
    #[serde(default)]
    pub reason: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Contact
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactCreated {
    pub organization_id: OrganizationId,
    pub label: String,
    pub contact_type: ContactType,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactUpdated {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub contact_type: Option<ContactType>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub is_primary: Option<bool>,
}

domain_events! {
    pub enum ContactEvent in "contact" {
        Created(ContactCreated) = "contact.created",
        Updated(ContactUpdated) = "contact.updated",
        Deleted(Removed) = "contact.deleted",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Address
// ─────────────────────────────────────────────────────────────────────────────

fn default_country() -> String {
    "US".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressCreated {
    pub organization_id: OrganizationId,
    pub label: String,
    pub address_type: AddressType,
    pub street1: String,
    #[serde(default)]
    pub street2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressUpdated {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub address_type: Option<AddressType>,
    #[serde(default)]
    pub street1: Option<String>,
    #[serde(default)]
    pub street2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub is_primary: Option<bool>,
}

domain_events! {
    pub enum AddressEvent in "address" {
        Created(AddressCreated) = "address.created",
        Updated(AddressUpdated) = "address.updated",
        Deleted(Removed) = "address.deleted",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Phone
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneCreated {
    pub organization_id: OrganizationId,
    pub label: String,
    pub phone_type: PhoneType,
    pub number: String,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneUpdated {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub phone_type: Option<PhoneType>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub is_primary: Option<bool>,
}

domain_events! {
    pub enum PhoneEvent in "phone" {
        Created(PhoneCreated) = "phone.created",
        Updated(PhoneUpdated) = "phone.updated",
        Deleted(Removed) = "phone.deleted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebase_events::DomainEvent;
    use serde_json::json;

    #[test]
    fn address_country_defaults() {
        let org = OrganizationId::new();
        let ev = AddressEvent::decode(
            "address.created",
            &json!({
                "organization_id": org,
                "label": "HQ",
                "address_type": "physical",
                "street1": "1 Main St",
                "city": "Springfield",
                "state": "IL",
                "zip_code": "62701"
            }),
        )
        .unwrap();
        match ev {
            AddressEvent::Created(a) => {
                assert_eq!(a.country, "US");
                assert!(!a.is_primary);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
