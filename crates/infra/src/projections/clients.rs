//! Client projection.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use carebase_clinical::client::{ClientDischarged, ClientInformationUpdated, ClientRegistered};
use carebase_clinical::{ClientEvent, ClientStatus, Gender};
use carebase_core::{OrganizationId, StreamId, UserId};
use carebase_events::{DomainEvent, EventRecord};

use super::audit::AuditOperation;
use super::store::{ReadModels, Table};
use super::{ProjectionError, ProjectionRow, coalesce, coalesce_opt, insert_row, update_row};
use crate::router::{HandlerOutput, ProjectionHandler, RouteKey};

const TABLE: &str = "clients";

// ─────────────────────────────────────────────────────────────────────────────
// Read Model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRow {
    pub id: StreamId,
    pub organization_id: OrganizationId,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub preferred_name: Option<String>,
    pub date_of_birth: NaiveDate,
    pub gender: Option<Gender>,
    pub email: Option<String>,
    pub phone_primary: Option<String>,
    pub phone_secondary: Option<String>,
    pub address: Option<JsonValue>,
    pub emergency_contact: Option<JsonValue>,
    pub allergies: Vec<String>,
    pub medical_conditions: Vec<String>,
    pub blood_type: Option<String>,
    pub status: ClientStatus,
    pub admission_date: Option<NaiveDate>,
    pub discharge_date: Option<NaiveDate>,
    pub discharge_reason: Option<String>,
    pub notes: Option<String>,
    pub metadata: Option<JsonValue>,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientRow {
    fn registered(id: StreamId, e: ClientRegistered, event: &EventRecord) -> Self {
        Self {
            id,
            organization_id: e.organization_id,
            first_name: e.first_name,
            last_name: e.last_name,
            middle_name: e.middle_name,
            preferred_name: e.preferred_name,
            date_of_birth: e.date_of_birth,
            gender: e.gender,
            email: e.email,
            phone_primary: e.phone_primary,
            phone_secondary: e.phone_secondary,
            address: e.address,
            emergency_contact: e.emergency_contact,
            allergies: e.allergies,
            medical_conditions: e.medical_conditions,
            blood_type: e.blood_type,
            status: ClientStatus::Active,
            admission_date: e.admission_date,
            discharge_date: None,
            discharge_reason: None,
            notes: e.notes,
            metadata: e.metadata,
            created_by: event.event_metadata.user_id,
            updated_by: event.event_metadata.user_id,
            created_at: event.created_at,
            updated_at: event.created_at,
        }
    }

    fn apply_update(&mut self, e: ClientInformationUpdated) {
        coalesce(&mut self.first_name, e.first_name);
        coalesce(&mut self.last_name, e.last_name);
        coalesce_opt(&mut self.middle_name, e.middle_name);
        coalesce_opt(&mut self.preferred_name, e.preferred_name);
        coalesce_opt(&mut self.gender, e.gender);
        coalesce_opt(&mut self.email, e.email);
        coalesce_opt(&mut self.phone_primary, e.phone_primary);
        coalesce_opt(&mut self.phone_secondary, e.phone_secondary);
        coalesce_opt(&mut self.address, e.address);
        coalesce_opt(&mut self.emergency_contact, e.emergency_contact);
        coalesce(&mut self.allergies, e.allergies);
        coalesce(&mut self.medical_conditions, e.medical_conditions);
        coalesce_opt(&mut self.blood_type, e.blood_type);
        coalesce_opt(&mut self.notes, e.notes);
        coalesce_opt(&mut self.metadata, e.metadata);
    }

    fn discharge(&mut self, e: ClientDischarged) {
        self.status = ClientStatus::Inactive;
        self.discharge_date = Some(e.discharge_date);
        self.discharge_reason = Some(e.discharge_reason);
    }
}

impl ProjectionRow for ClientRow {
    fn organization_id(&self) -> Option<OrganizationId> {
        Some(self.organization_id)
    }

    fn touch(&mut self, at: DateTime<Utc>, by: Option<UserId>) {
        self.updated_at = at;
        self.updated_by = by;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Projection
// ─────────────────────────────────────────────────────────────────────────────

fn clients(models: &mut ReadModels) -> &mut Table<StreamId, ClientRow> {
    &mut models.clients
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ClientProjection;

impl ProjectionHandler for ClientProjection {
    fn name(&self) -> &'static str {
        "client"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(ClientEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = event.stream_id;
        match event.decode::<ClientEvent>()? {
            ClientEvent::Registered(e) => {
                e.validate()?;
                insert_row(models, event, clients, id, ClientRow::registered(id, e, event));
            }
            ClientEvent::Admitted(e) => {
                update_row(models, event, clients, TABLE, &id, AuditOperation::Update, |row| {
                    row.status = ClientStatus::Active;
                    row.admission_date = Some(e.admission_date);
                    row.discharge_date = None;
                    row.discharge_reason = None;
                    Ok(())
                })?;
            }
            ClientEvent::InformationUpdated(e) => {
                update_row(models, event, clients, TABLE, &id, AuditOperation::Update, |row| {
                    row.apply_update(e);
                    Ok(())
                })?;
            }
            ClientEvent::Discharged(e) => {
                update_row(models, event, clients, TABLE, &id, AuditOperation::Update, |row| {
                    row.discharge(e);
                    Ok(())
                })?;
            }
            ClientEvent::Archived(_) => {
                update_row(models, event, clients, TABLE, &id, AuditOperation::Delete, |row| {
                    row.status = ClientStatus::Archived;
                    Ok(())
                })?;
            }
        }

        Ok(HandlerOutput::none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebase_core::DomainError;
    use serde_json::json;

    use crate::projections::fixtures::{client, event, organization};

    #[test]
    fn information_update_coalesces() {
        let mut models = ReadModels::default();
        let org = organization(&mut models, "root.acme", "provider");
        let id = client(&mut models, org);

        let first = json!({"preferred_name": "JJ", "allergies": ["penicillin"], "blood_type": "O+"});
        ClientProjection
            .apply(&event(id, "client", 2, "client.information_updated", first), &mut models)
            .unwrap();
        let second = json!({"notes": "prefers mornings"});
        ClientProjection
            .apply(&event(id, "client", 3, "client.information_updated", second), &mut models)
            .unwrap();

        let row = models.clients().get(&id).unwrap();
        assert_eq!(row.first_name, "Jane");
        assert_eq!(row.preferred_name.as_deref(), Some("JJ"));
        assert_eq!(row.allergies, vec!["penicillin".to_string()]);
        assert_eq!(row.blood_type.as_deref(), Some("O+"));
        assert_eq!(row.notes.as_deref(), Some("prefers mornings"));
    }

    #[test]
    fn readmission_clears_the_discharge() {
        let mut models = ReadModels::default();
        let org = organization(&mut models, "root.acme", "provider");
        let id = client(&mut models, org);

        let discharged = json!({"discharge_date": "2026-02-01", "discharge_reason": "transfer"});
        ClientProjection
            .apply(&event(id, "client", 2, "client.discharged", discharged), &mut models)
            .unwrap();
        assert_eq!(models.clients().get(&id).unwrap().status, ClientStatus::Inactive);

        let admitted = json!({"admission_date": "2026-03-01"});
        ClientProjection
            .apply(&event(id, "client", 3, "client.admitted", admitted), &mut models)
            .unwrap();
        let row = models.clients().get(&id).unwrap();
        assert_eq!(row.status, ClientStatus::Active);
        assert_eq!(row.admission_date, NaiveDate::from_ymd_opt(2026, 3, 1));
        assert_eq!(row.discharge_date, None);
        assert_eq!(row.discharge_reason, None);
    }

    #[test]
    fn archive_is_audited_as_a_delete() {
        let mut models = ReadModels::default();
        let org = organization(&mut models, "root.acme", "provider");
        let id = client(&mut models, org);

        ClientProjection
            .apply(&event(id, "client", 2, "client.archived", json!({"reason": "records retention"})), &mut models)
            .unwrap();
        assert_eq!(models.clients().get(&id).unwrap().status, ClientStatus::Archived);

        let mut ops: Vec<_> = models
            .audit_log()
            .values()
            .filter(|a| a.resource_id == id)
            .map(|a| a.operation)
            .collect();
        ops.sort_by_key(|op| *op as u8);
        assert_eq!(ops, vec![AuditOperation::Insert, AuditOperation::Delete]);
    }

    #[test]
    fn redelivered_registration_is_a_no_op() {
        let mut models = ReadModels::default();
        let org = organization(&mut models, "root.acme", "provider");
        let registered = event(
            StreamId::new(),
            "client",
            1,
            "client.registered",
            json!({"organization_id": org, "first_name": "Ann", "last_name": "Lee", "date_of_birth": "1970-05-05"}),
        );
        ClientProjection.apply(&registered, &mut models).unwrap();
        let once = models.clone();
        ClientProjection.apply(&registered, &mut models).unwrap();
        assert_eq!(models, once);
    }

    #[test]
    fn admission_before_birth_is_rejected() {
        let mut models = ReadModels::default();
        let org = organization(&mut models, "root.acme", "provider");
        let registered = json!({
            "organization_id": org,
            "first_name": "Ann",
            "last_name": "Lee",
            "date_of_birth": "1970-05-05",
            "admission_date": "1960-01-01"
        });
        let err = ClientProjection
            .apply(&event(StreamId::new(), "client", 1, "client.registered", registered), &mut models)
            .unwrap_err();
        assert!(matches!(err, ProjectionError::Domain(DomainError::Validation(_))));
        assert!(models.clients().is_empty());
    }
}
