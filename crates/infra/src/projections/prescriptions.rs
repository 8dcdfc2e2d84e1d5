//! Prescription (medication history) projection.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use carebase_clinical::prescription::{MedicationPrescribed, ensure_refill_available};
use carebase_clinical::{PrescriptionEvent, PrescriptionStatus};
use carebase_core::{DomainError, OrganizationId, StreamId, UserId};
use carebase_events::{DomainEvent, EventRecord};

use super::audit::AuditOperation;
use super::store::{ReadModels, Table};
use super::{ProjectionError, ProjectionRow, insert_row, update_row};
use crate::router::{HandlerOutput, ProjectionHandler, RouteKey};

const TABLE: &str = "prescriptions";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionRow {
    pub id: StreamId,
    pub organization_id: OrganizationId,
    pub client_id: StreamId,
    pub medication_id: StreamId,
    pub prescription_date: NaiveDate,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub prescriber_name: Option<String>,
    pub prescriber_npi: Option<String>,
    pub dosage_amount: f64,
    pub dosage_unit: String,
    pub dosage_form: Option<String>,
    pub frequency: String,
    pub timings: Vec<String>,
    pub route: Option<String>,
    pub instructions: Option<String>,
    pub is_prn: bool,
    pub prn_reason: Option<String>,
    pub status: PrescriptionStatus,
    pub status_reason: Option<String>,
    pub refills_authorized: u32,
    pub refills_used: u32,
    pub last_filled_date: Option<NaiveDate>,
    pub pharmacy_name: Option<String>,
    pub discontinue_date: Option<NaiveDate>,
    pub discontinue_reason: Option<String>,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PrescriptionRow {
    fn prescribed(id: StreamId, e: MedicationPrescribed, event: &EventRecord) -> Self {
        Self {
            id,
            organization_id: e.organization_id,
            client_id: e.client_id,
            medication_id: e.medication_id,
            prescription_date: e.prescription_date,
            start_date: e.start_date,
            end_date: e.end_date,
            prescriber_name: e.prescriber_name,
            prescriber_npi: e.prescriber_npi,
            dosage_amount: e.dosage_amount,
            dosage_unit: e.dosage_unit,
            dosage_form: e.dosage_form,
            frequency: e.frequency,
            timings: e.timings,
            route: e.route,
            instructions: e.instructions,
            is_prn: e.is_prn,
            prn_reason: e.prn_reason,
            status: PrescriptionStatus::Active,
            status_reason: None,
            refills_authorized: e.refills_authorized,
            refills_used: 0,
            last_filled_date: None,
            pharmacy_name: e.pharmacy_name,
            discontinue_date: None,
            discontinue_reason: None,
            created_by: event.event_metadata.user_id,
            updated_by: event.event_metadata.user_id,
            created_at: event.created_at,
            updated_at: event.created_at,
        }
    }
}

impl ProjectionRow for PrescriptionRow {
    fn organization_id(&self) -> Option<OrganizationId> {
        Some(self.organization_id)
    }

    fn touch(&mut self, at: DateTime<Utc>, by: Option<UserId>) {
        self.updated_at = at;
        self.updated_by = by;
    }
}

fn prescriptions(models: &mut ReadModels) -> &mut Table<StreamId, PrescriptionRow> {
    &mut models.prescriptions
}

/// The client must exist and the catalog entry must be active, both in the
/// prescribing organization.
fn check_references(models: &ReadModels, e: &MedicationPrescribed) -> Result<(), ProjectionError> {
    let client = models.clients.require("clients", &e.client_id)?;
    if client.organization_id != e.organization_id {
        return Err(DomainError::invariant(format!(
            "client {} does not belong to organization {}",
            e.client_id, e.organization_id
        ))
        .into());
    }

    let medication = models.medications.require("medications", &e.medication_id)?;
    if !medication.is_active {
        return Err(DomainError::invariant(format!("medication {} is inactive", e.medication_id)).into());
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PrescriptionProjection;

impl ProjectionHandler for PrescriptionProjection {
    fn name(&self) -> &'static str {
        "prescription"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(PrescriptionEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = event.stream_id;
        let op = AuditOperation::Update;

        match event.decode::<PrescriptionEvent>()? {
            PrescriptionEvent::Prescribed(e) => {
                e.validate()?;
                check_references(models, &e)?;
                insert_row(models, event, prescriptions, id, PrescriptionRow::prescribed(id, e, event));
            }
            PrescriptionEvent::Refilled(e) => {
                update_row(models, event, prescriptions, TABLE, &id, op, |row| {
                    row.status.refill()?;
                    ensure_refill_available(row.refills_used, row.refills_authorized)?;
                    row.refills_used += 1;
                    row.last_filled_date = Some(e.filled_date);
                    if e.pharmacy_name.is_some() {
                        row.pharmacy_name = e.pharmacy_name;
                    }
                    Ok(())
                })?;
            }
            PrescriptionEvent::PlacedOnHold(e) => {
                update_row(models, event, prescriptions, TABLE, &id, op, |row| {
                    row.status = row.status.hold()?;
                    row.status_reason = Some(e.reason);
                    Ok(())
                })?;
            }
            PrescriptionEvent::Resumed(e) => {
                update_row(models, event, prescriptions, TABLE, &id, op, |row| {
                    row.status = row.status.resume()?;
                    row.status_reason = e.reason;
                    Ok(())
                })?;
            }
            PrescriptionEvent::Discontinued(e) => {
                update_row(models, event, prescriptions, TABLE, &id, op, |row| {
                    row.status = row.status.discontinue()?;
                    row.discontinue_date = Some(e.discontinue_date);
                    row.discontinue_reason = Some(e.discontinue_reason);
                    Ok(())
                })?;
            }
            PrescriptionEvent::Completed(e) => {
                update_row(models, event, prescriptions, TABLE, &id, op, |row| {
                    row.status = row.status.complete()?;
                    row.end_date = Some(e.end_date);
                    Ok(())
                })?;
            }
        }

        Ok(HandlerOutput::none())
    }
}
