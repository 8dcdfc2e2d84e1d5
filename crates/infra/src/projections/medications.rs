//! Medication catalog projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use carebase_clinical::MedicationEvent;
use carebase_clinical::medication::{MedicationAdded, MedicationUpdated, validate_schedule};
use carebase_core::{DomainError, OrganizationId, StreamId, UserId};
use carebase_events::{DomainEvent, EventRecord};

use super::audit::AuditOperation;
use super::store::{ReadModels, Table};
use super::{ProjectionError, ProjectionRow, coalesce, coalesce_opt, insert_row, update_row};
use crate::router::{HandlerOutput, ProjectionHandler, RouteKey};

const TABLE: &str = "medications";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationRow {
    pub id: StreamId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub generic_name: Option<String>,
    pub brand_names: Vec<String>,
    pub rxnorm_cui: Option<String>,
    pub ndc_codes: Vec<String>,
    pub category_broad: Option<String>,
    pub category_specific: Option<String>,
    pub drug_class: Option<String>,
    pub is_psychotropic: bool,
    pub is_controlled: bool,
    pub controlled_substance_schedule: Option<String>,
    pub is_narcotic: bool,
    pub requires_monitoring: bool,
    pub is_high_alert: bool,
    pub is_formulary: bool,
    pub available_forms: Vec<String>,
    pub available_strengths: Vec<String>,
    pub warnings: Vec<String>,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MedicationRow {
    fn added(id: StreamId, e: MedicationAdded, event: &EventRecord) -> Self {
        Self {
            id,
            organization_id: e.organization_id,
            name: e.name,
            generic_name: e.generic_name,
            brand_names: e.brand_names,
            rxnorm_cui: e.rxnorm_cui,
            ndc_codes: e.ndc_codes,
            category_broad: e.category_broad,
            category_specific: e.category_specific,
            drug_class: e.drug_class,
            is_psychotropic: e.is_psychotropic,
            is_controlled: e.is_controlled,
            controlled_substance_schedule: e.controlled_substance_schedule,
            is_narcotic: e.is_narcotic,
            requires_monitoring: e.requires_monitoring,
            is_high_alert: e.is_high_alert,
            is_formulary: e.is_formulary,
            available_forms: e.available_forms,
            available_strengths: e.available_strengths,
            warnings: e.warnings,
            notes: e.notes,
            is_active: true,
            created_by: event.event_metadata.user_id,
            updated_by: event.event_metadata.user_id,
            created_at: event.created_at,
            updated_at: event.created_at,
        }
    }

    /// Coalesce the update, re-checking the controlled-substance rule on the
    /// merged values before anything is written.
    fn apply_update(&mut self, e: MedicationUpdated) -> Result<(), ProjectionError> {
        let is_controlled = e.is_controlled.unwrap_or(self.is_controlled);
        let schedule = match (&e.controlled_substance_schedule, is_controlled) {
            (Some(s), _) => Some(s.clone()),
            (None, true) => self.controlled_substance_schedule.clone(),
            (None, false) => None,
        };
        validate_schedule(is_controlled, schedule.as_deref())?;
        if let Some(name) = &e.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("medication name cannot be empty").into());
            }
        }

        self.is_controlled = is_controlled;
        self.controlled_substance_schedule = schedule;
        coalesce(&mut self.name, e.name);
        coalesce_opt(&mut self.generic_name, e.generic_name);
        coalesce(&mut self.brand_names, e.brand_names);
        coalesce_opt(&mut self.drug_class, e.drug_class);
        coalesce(&mut self.is_psychotropic, e.is_psychotropic);
        coalesce(&mut self.is_narcotic, e.is_narcotic);
        coalesce(&mut self.requires_monitoring, e.requires_monitoring);
        coalesce(&mut self.is_high_alert, e.is_high_alert);
        coalesce(&mut self.is_formulary, e.is_formulary);
        coalesce(&mut self.warnings, e.warnings);
        coalesce_opt(&mut self.notes, e.notes);
        Ok(())
    }
}

impl ProjectionRow for MedicationRow {
    fn organization_id(&self) -> Option<OrganizationId> {
        Some(self.organization_id)
    }

    fn touch(&mut self, at: DateTime<Utc>, by: Option<UserId>) {
        self.updated_at = at;
        self.updated_by = by;
    }
}

fn medications(models: &mut ReadModels) -> &mut Table<StreamId, MedicationRow> {
    &mut models.medications
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MedicationProjection;

impl ProjectionHandler for MedicationProjection {
    fn name(&self) -> &'static str {
        "medication"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(MedicationEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = event.stream_id;
        match event.decode::<MedicationEvent>()? {
            MedicationEvent::Added(e) => {
                e.validate()?;
                insert_row(models, event, medications, id, MedicationRow::added(id, e, event));
            }
            MedicationEvent::Updated(e) => {
                update_row(models, event, medications, TABLE, &id, AuditOperation::Update, |row| row.apply_update(e))?;
            }
            MedicationEvent::Deactivated(_) => {
                update_row(models, event, medications, TABLE, &id, AuditOperation::Update, |row| {
                    row.is_active = false;
                    Ok(())
                })?;
            }
            MedicationEvent::Reactivated(_) => {
                update_row(models, event, medications, TABLE, &id, AuditOperation::Update, |row| {
                    row.is_active = true;
                    Ok(())
                })?;
            }
        }

        Ok(HandlerOutput::none())
    }
}
