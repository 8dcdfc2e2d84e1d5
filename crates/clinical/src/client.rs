use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use carebase_core::{DomainError, DomainResult, OrganizationId};
use carebase_events::domain_events;

/// Client status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Active,
    Inactive,
    Archived,
}

impl ClientStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientStatus::Active => "active",
            ClientStatus::Inactive => "inactive",
            ClientStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
    PreferNotToSay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRegistered {
    pub organization_id: OrganizationId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub preferred_name: Option<String>,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_primary: Option<String>,
    #[serde(default)]
    pub phone_secondary: Option<String>,
    #[serde(default)]
    pub address: Option<serde_json::Value>,
    #[serde(default)]
    pub emergency_contact: Option<serde_json::Value>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub medical_conditions: Vec<String>,
    #[serde(default)]
    pub blood_type: Option<String>,
    #[serde(default)]
    pub admission_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl ClientRegistered {
    pub fn validate(&self) -> DomainResult<()> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(DomainError::validation("client first and last name are required"));
        }
        if let Some(admitted) = self.admission_date {
            if admitted < self.date_of_birth {
                return Err(DomainError::validation("admission_date precedes date_of_birth"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientAdmitted {
    pub admission_date: NaiveDate,
}

/// Partial update: `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInformationUpdated {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub preferred_name: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_primary: Option<String>,
    #[serde(default)]
    pub phone_secondary: Option<String>,
    #[serde(default)]
    pub address: Option<serde_json::Value>,
    #[serde(default)]
    pub emergency_contact: Option<serde_json::Value>,
    #[serde(default)]
    pub allergies: Option<Vec<String>>,
    #[serde(default)]
    pub medical_conditions: Option<Vec<String>>,
    #[serde(default)]
    pub blood_type: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientDischarged {
    pub discharge_date: NaiveDate,
    pub discharge_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientArchived {
    #[serde(default)]
    pub reason: Option<String>,
}

domain_events! {
    /// Client lifecycle (stream per client id).
    pub enum ClientEvent in "client" {
        Registered(ClientRegistered) = "client.registered",
        Admitted(ClientAdmitted) = "client.admitted",
        InformationUpdated(ClientInformationUpdated) = "client.information_updated",
        Discharged(ClientDischarged) = "client.discharged",
        Archived(ClientArchived) = "client.archived",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebase_events::DomainEvent;
    use serde_json::json;

    #[test]
    fn minimal_registration_decodes() {
        let ev = ClientEvent::decode(
            "client.registered",
            &json!({
                "first_name": "Jane",
                "last_name": "Doe",
                "date_of_birth": "1990-01-01",
                "organization_id": OrganizationId::new(),
            }),
        )
        .unwrap();
        let ClientEvent::Registered(reg) = ev else {
            panic!("expected registration");
        };
        assert!(reg.validate().is_ok());
        assert!(reg.allergies.is_empty());
    }

    #[test]
    fn admission_before_birth_is_rejected() {
        let reg = ClientRegistered {
            organization_id: OrganizationId::new(),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            middle_name: None,
            preferred_name: None,
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            gender: None,
            email: None,
            phone_primary: None,
            phone_secondary: None,
            address: None,
            emergency_contact: None,
            allergies: vec![],
            medical_conditions: vec![],
            blood_type: None,
            admission_date: NaiveDate::from_ymd_opt(1989, 1, 1),
            notes: None,
            metadata: None,
        };
        assert!(reg.validate().is_err());
    }
}
