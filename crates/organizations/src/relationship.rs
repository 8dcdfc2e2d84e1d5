//! Junction (many-to-many) associations between organization details.
//!
//! Link events are named `<left>.<right>.linked` / `<left>.<right>.unlinked` and
//! carry `<left>_id` and `<right>_id` in their payload.

use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use carebase_events::EventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relationship {
    OrganizationContact,
    OrganizationAddress,
    OrganizationPhone,
    ContactPhone,
    ContactAddress,
    PhoneAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    Link,
    Unlink,
}

/// One junction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link {
    pub relationship: Relationship,
    pub left: Uuid,
    pub right: Uuid,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("`{0}` is not a known relationship event")]
    UnknownRelationship(String),

    #[error("`{event_type}` payload is missing `{field}`")]
    MissingField { event_type: String, field: &'static str },

    #[error("`{event_type}` field `{field}` is not a UUID")]
    InvalidId { event_type: String, field: &'static str },
}

impl Relationship {
    pub const ALL: [Relationship; 6] = [
        Relationship::OrganizationContact,
        Relationship::OrganizationAddress,
        Relationship::OrganizationPhone,
        Relationship::ContactPhone,
        Relationship::ContactAddress,
        Relationship::PhoneAddress,
    ];

    /// `(left, right)` entity names as they appear in the event type.
    pub fn entities(self) -> (&'static str, &'static str) {
        match self {
            Relationship::OrganizationContact => ("organization", "contact"),
            Relationship::OrganizationAddress => ("organization", "address"),
            Relationship::OrganizationPhone => ("organization", "phone"),
            Relationship::ContactPhone => ("contact", "phone"),
            Relationship::ContactAddress => ("contact", "address"),
            Relationship::PhoneAddress => ("phone", "address"),
        }
    }

    pub fn id_fields(self) -> (&'static str, &'static str) {
        match self {
            Relationship::OrganizationContact => ("organization_id", "contact_id"),
            Relationship::OrganizationAddress => ("organization_id", "address_id"),
            Relationship::OrganizationPhone => ("organization_id", "phone_id"),
            Relationship::ContactPhone => ("contact_id", "phone_id"),
            Relationship::ContactAddress => ("contact_id", "address_id"),
            Relationship::PhoneAddress => ("phone_id", "address_id"),
        }
    }

    pub fn table_name(self) -> &'static str {
        match self {
            Relationship::OrganizationContact => "organization_contacts",
            Relationship::OrganizationAddress => "organization_addresses",
            Relationship::OrganizationPhone => "organization_phones",
            Relationship::ContactPhone => "contact_phones",
            Relationship::ContactAddress => "contact_addresses",
            Relationship::PhoneAddress => "phone_addresses",
        }
    }

    /// Classify `<left>.<right>.linked|unlinked`.
    pub fn classify(event_type: &EventType) -> Result<(Relationship, LinkAction), LinkError> {
        let unknown = || LinkError::UnknownRelationship(event_type.to_string());

        let mut labels = event_type.as_str().split('.');
        let (Some(left), Some(right), Some(action), None) = (labels.next(), labels.next(), labels.next(), labels.next())
        else {
            return Err(unknown());
        };

        let action = match action {
            "linked" => LinkAction::Link,
            "unlinked" => LinkAction::Unlink,
            _ => return Err(unknown()),
        };

        Self::ALL
            .into_iter()
            .find(|r| r.entities() == (left, right))
            .map(|r| (r, action))
            .ok_or_else(unknown)
    }

    /// Pull the two ids out of a link payload.
    pub fn link_from(self, event_type: &EventType, data: &JsonValue) -> Result<Link, LinkError> {
        let (left_field, right_field) = self.id_fields();
        Ok(Link {
            relationship: self,
            left: read_id(event_type, data, left_field)?,
            right: read_id(event_type, data, right_field)?,
        })
    }
}

fn read_id(event_type: &EventType, data: &JsonValue, field: &'static str) -> Result<Uuid, LinkError> {
    let raw = data
        .get(field)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| LinkError::MissingField {
            event_type: event_type.to_string(),
            field,
        })?;
    Uuid::parse_str(raw).map_err(|_| LinkError::InvalidId {
        event_type: event_type.to_string(),
        field,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn et(s: &str) -> EventType {
        EventType::parse(s).unwrap()
    }

    #[test]
    fn classifies_all_pairs() {
        for r in Relationship::ALL {
            let (l, rt) = r.entities();
            assert_eq!(Relationship::classify(&et(&format!("{l}.{rt}.linked"))).unwrap(), (r, LinkAction::Link));
            assert_eq!(Relationship::classify(&et(&format!("{l}.{rt}.unlinked"))).unwrap(), (r, LinkAction::Unlink));
        }
    }

    #[test]
    fn rejects_unknown_pairs_and_shapes() {
        assert!(Relationship::classify(&et("contact.organization.linked")).is_err());
        assert!(Relationship::classify(&et("client.linked")).is_err());
        assert!(Relationship::classify(&et("organization.contact.created")).is_err());
    }

    #[test]
    fn extracts_ids() {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let t = et("contact.phone.linked");
        let link = Relationship::ContactPhone
            .link_from(&t, &json!({ "contact_id": a, "phone_id": b }))
            .unwrap();
        assert_eq!((link.left, link.right), (a, b));

        let err = Relationship::ContactPhone.link_from(&t, &json!({ "contact_id": a })).unwrap_err();
        assert_eq!(err, LinkError::MissingField { event_type: t.to_string(), field: "phone_id" });
    }
}
