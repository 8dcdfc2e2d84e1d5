//! Dose administration records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use carebase_clinical::administration::{DoseNotGiven, DoseScheduled};
use carebase_clinical::{DoseEvent, DoseStatus, PrescriptionStatus};
use carebase_core::{DomainError, OrganizationId, StreamId, UserId};
use carebase_events::{DomainEvent, EventRecord};

use super::audit::AuditOperation;
use super::store::{ReadModels, Table};
use super::{ProjectionError, ProjectionRow, insert_row, update_row};
use crate::router::{HandlerOutput, ProjectionHandler, RouteKey};

const TABLE: &str = "doses";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseRow {
    pub id: StreamId,
    pub organization_id: OrganizationId,
    pub client_id: StreamId,
    pub medication_history_id: StreamId,
    pub scheduled_datetime: DateTime<Utc>,
    pub scheduled_amount: f64,
    pub unit: String,
    pub status: DoseStatus,
    pub administered_at: Option<DateTime<Utc>>,
    pub administered_amount: Option<f64>,
    pub administered_by: Option<UserId>,
    pub vitals_before: Option<JsonValue>,
    pub vitals_after: Option<JsonValue>,
    pub side_effects: Vec<String>,
    pub not_given_reason: Option<String>,
    pub notes: Option<String>,
    pub verified_by: Option<UserId>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DoseRow {
    fn scheduled(id: StreamId, e: DoseScheduled, event: &EventRecord) -> Self {
        Self {
            id,
            organization_id: e.organization_id,
            client_id: e.client_id,
            medication_history_id: e.medication_history_id,
            scheduled_datetime: e.scheduled_datetime,
            scheduled_amount: e.scheduled_amount,
            unit: e.unit,
            status: DoseStatus::Scheduled,
            administered_at: None,
            administered_amount: None,
            administered_by: None,
            vitals_before: None,
            vitals_after: None,
            side_effects: Vec::new(),
            not_given_reason: None,
            notes: None,
            verified_by: None,
            verified_at: None,
            created_by: event.event_metadata.user_id,
            updated_by: event.event_metadata.user_id,
            created_at: event.created_at,
            updated_at: event.created_at,
        }
    }

    fn not_given(&mut self, status: DoseStatus, e: DoseNotGiven) -> Result<(), ProjectionError> {
        self.status.ensure_open()?;
        self.status = status;
        self.not_given_reason = Some(e.reason);
        self.notes = e.notes;
        Ok(())
    }
}

impl ProjectionRow for DoseRow {
    fn organization_id(&self) -> Option<OrganizationId> {
        Some(self.organization_id)
    }

    fn touch(&mut self, at: DateTime<Utc>, by: Option<UserId>) {
        self.updated_at = at;
        self.updated_by = by;
    }
}

fn doses(models: &mut ReadModels) -> &mut Table<StreamId, DoseRow> {
    &mut models.doses
}

/// Doses can only be scheduled against an active prescription of the same client.
fn check_prescription(models: &ReadModels, e: &DoseScheduled) -> Result<(), ProjectionError> {
    let prescription = models.prescriptions.require("prescriptions", &e.medication_history_id)?;
    if prescription.client_id != e.client_id {
        return Err(DomainError::invariant(format!(
            "prescription {} belongs to a different client",
            e.medication_history_id
        ))
        .into());
    }
    if prescription.status != PrescriptionStatus::Active {
        return Err(DomainError::invariant(format!(
            "cannot schedule a dose on a prescription that is {}",
            prescription.status.as_str()
        ))
        .into());
    }
    if e.scheduled_amount.is_nan() || e.scheduled_amount <= 0.0 {
        return Err(DomainError::validation("scheduled_amount must be positive").into());
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DoseProjection;

impl ProjectionHandler for DoseProjection {
    fn name(&self) -> &'static str {
        "dose"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(DoseEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = event.stream_id;
        let op = AuditOperation::Update;

        match event.decode::<DoseEvent>()? {
            DoseEvent::Scheduled(e) => {
                check_prescription(models, &e)?;
                insert_row(models, event, doses, id, DoseRow::scheduled(id, e, event));
            }
            DoseEvent::Administered(e) => {
                update_row(models, event, doses, TABLE, &id, op, |row| {
                    row.status.ensure_open()?;
                    row.status = DoseStatus::for_administration(row.scheduled_datetime, e.administered_at);
                    row.administered_at = Some(e.administered_at);
                    row.administered_amount = e.administered_amount.or(Some(row.scheduled_amount));
                    row.administered_by = e.administered_by.or(event.event_metadata.user_id);
                    row.vitals_before = e.vitals_before;
                    row.vitals_after = e.vitals_after;
                    row.side_effects = e.side_effects;
                    row.notes = e.notes;
                    Ok(())
                })?;
            }
            DoseEvent::Skipped(e) => {
                update_row(models, event, doses, TABLE, &id, op, |row| row.not_given(DoseStatus::Skipped, e))?;
            }
            DoseEvent::Refused(e) => {
                update_row(models, event, doses, TABLE, &id, op, |row| row.not_given(DoseStatus::Refused, e))?;
            }
            DoseEvent::Missed(e) => {
                update_row(models, event, doses, TABLE, &id, op, |row| {
                    row.status.ensure_open()?;
                    row.status = DoseStatus::Missed;
                    row.not_given_reason = e.reason;
                    Ok(())
                })?;
            }
            DoseEvent::Verified(e) => {
                update_row(models, event, doses, TABLE, &id, op, |row| {
                    row.status.ensure_verifiable()?;
                    row.verified_by = Some(e.verified_by);
                    row.verified_at = Some(event.created_at);
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
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use crate::projections::fixtures::{client, event, organization};
    use crate::projections::{MedicationProjection, PrescriptionProjection};

    fn scheduled_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    /// A dose scheduled on a fresh active prescription; returns (dose, prescription).
    fn schedule(models: &mut ReadModels) -> (StreamId, StreamId) {
        let org = organization(models, "root.acme", "provider");
        let client = client(models, org);
        let medication = StreamId::new();
        MedicationProjection
            .apply(
                &event(medication, "medication", 1, "medication.added", json!({"organization_id": org, "name": "Lithium"})),
                models,
            )
            .unwrap();
        let prescription = StreamId::new();
        let prescribed = json!({
            "organization_id": org,
            "client_id": client,
            "medication_id": medication,
            "prescription_date": "2026-02-01",
            "start_date": "2026-02-01",
            "dosage_amount": 300.0,
            "dosage_unit": "mg",
            "frequency": "BID"
        });
        PrescriptionProjection
            .apply(&event(prescription, "medication_history", 1, "medication.prescribed", prescribed), models)
            .unwrap();

        let dose = StreamId::new();
        let scheduled = json!({
            "organization_id": org,
            "client_id": client,
            "medication_history_id": prescription,
            "scheduled_datetime": scheduled_at(),
            "scheduled_amount": 300.0,
            "unit": "mg"
        });
        DoseProjection
            .apply(&event(dose, "medication_administration", 1, "dose.scheduled", scheduled), models)
            .unwrap();
        (dose, prescription)
    }

    fn administered(dose: StreamId, version: u64, at: DateTime<Utc>) -> EventRecord {
        event(dose, "medication_administration", version, "dose.administered", json!({"administered_at": at}))
    }

    fn verified(dose: StreamId, version: u64, nurse: UserId) -> EventRecord {
        event(dose, "medication_administration", version, "dose.verified", json!({"verified_by": nurse}))
    }

    #[test]
    fn verification_waits_for_administration() {
        let mut models = ReadModels::default();
        let (dose, _) = schedule(&mut models);
        let nurse = UserId::new();

        let err = DoseProjection.apply(&verified(dose, 2, nurse), &mut models).unwrap_err();
        assert!(matches!(err, ProjectionError::Domain(DomainError::InvalidTransition(_))));
        assert_eq!(models.doses().get(&dose).unwrap().verified_by, None);

        DoseProjection
            .apply(&administered(dose, 2, scheduled_at() + Duration::minutes(10)), &mut models)
            .unwrap();
        DoseProjection.apply(&verified(dose, 3, nurse), &mut models).unwrap();

        let row = models.doses().get(&dose).unwrap();
        assert_eq!(row.status, DoseStatus::Administered);
        assert_eq!(row.administered_amount, Some(300.0));
        assert_eq!(row.verified_by, Some(nurse));
        assert!(row.verified_at.is_some());
    }

    #[test]
    fn skipped_dose_cannot_be_verified_or_given() {
        let mut models = ReadModels::default();
        let (dose, _) = schedule(&mut models);

        let skipped = event(dose, "medication_administration", 2, "dose.skipped", json!({"reason": "client asleep"}));
        DoseProjection.apply(&skipped, &mut models).unwrap();
        assert_eq!(models.doses().get(&dose).unwrap().not_given_reason.as_deref(), Some("client asleep"));

        assert!(DoseProjection.apply(&verified(dose, 3, UserId::new()), &mut models).is_err());
        assert!(DoseProjection.apply(&administered(dose, 3, scheduled_at()), &mut models).is_err());
        assert_eq!(models.doses().get(&dose).unwrap().status, DoseStatus::Skipped);
    }

    #[test]
    fn late_administration_is_flagged_and_still_verifiable() {
        let mut models = ReadModels::default();
        let (dose, _) = schedule(&mut models);

        DoseProjection
            .apply(&administered(dose, 2, scheduled_at() + Duration::hours(3)), &mut models)
            .unwrap();
        assert_eq!(models.doses().get(&dose).unwrap().status, DoseStatus::Late);
        DoseProjection.apply(&verified(dose, 3, UserId::new()), &mut models).unwrap();
    }

    #[test]
    fn doses_need_an_active_prescription() {
        let mut models = ReadModels::default();
        let (dose, prescription) = schedule(&mut models);
        let hold = event(prescription, "medication_history", 2, "medication.placed_on_hold", json!({"reason": "review"}));
        PrescriptionProjection.apply(&hold, &mut models).unwrap();

        let mut again = models.doses().get(&dose).unwrap().clone();
        again.id = StreamId::new();
        let scheduled = json!({
            "organization_id": again.organization_id,
            "client_id": again.client_id,
            "medication_history_id": prescription,
            "scheduled_datetime": scheduled_at(),
            "scheduled_amount": 300.0,
            "unit": "mg"
        });
        let err = DoseProjection
            .apply(&event(again.id, "medication_administration", 1, "dose.scheduled", scheduled), &mut models)
            .unwrap_err();
        assert!(matches!(err, ProjectionError::Domain(DomainError::InvariantViolation(_))));
        assert_eq!(models.doses().len(), 1);
    }
}
