//! Medication catalog (formulary) entries.

use serde::{Deserialize, Serialize};

use carebase_core::{DomainError, DomainResult, OrganizationId};
use carebase_events::domain_events;

/// DEA schedules accepted for controlled substances.
pub const CONTROLLED_SCHEDULES: [&str; 5] = ["I", "II", "III", "IV", "V"];

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationAdded {
    pub organization_id: OrganizationId,
    pub name: String,
    #[serde(default)]
    pub generic_name: Option<String>,
    #[serde(default)]
    pub brand_names: Vec<String>,
    #[serde(default)]
    pub rxnorm_cui: Option<String>,
    #[serde(default)]
    pub ndc_codes: Vec<String>,
    #[serde(default)]
    pub category_broad: Option<String>,
    #[serde(default)]
    pub category_specific: Option<String>,
    #[serde(default)]
    pub drug_class: Option<String>,
    #[serde(default)]
    pub is_psychotropic: bool,
    #[serde(default)]
    pub is_controlled: bool,
    #[serde(default)]
    pub controlled_substance_schedule: Option<String>,
    #[serde(default)]
    pub is_narcotic: bool,
    #[serde(default)]
    pub requires_monitoring: bool,
    #[serde(default)]
    pub is_high_alert: bool,
    #[serde(default = "default_true")]
    pub is_formulary: bool,
    #[serde(default)]
    pub available_forms: Vec<String>,
    #[serde(default)]
    pub available_strengths: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl MedicationAdded {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("medication name cannot be empty"));
        }
        validate_schedule(self.is_controlled, self.controlled_substance_schedule.as_deref())
    }
}

/// Controlled substances carry a known schedule; others carry none.
pub fn validate_schedule(is_controlled: bool, schedule: Option<&str>) -> DomainResult<()> {
    match (is_controlled, schedule) {
        (true, Some(s)) if CONTROLLED_SCHEDULES.contains(&s) => Ok(()),
        (true, Some(s)) => Err(DomainError::validation(format!("unknown controlled substance schedule `{s}`"))),
        (true, None) => Err(DomainError::validation("controlled medication requires a schedule")),
        (false, Some(_)) => Err(DomainError::validation("schedule given for a non-controlled medication")),
        (false, None) => Ok(()),
    }
}

/// Partial update: `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicationUpdated {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub generic_name: Option<String>,
    #[serde(default)]
    pub brand_names: Option<Vec<String>>,
    #[serde(default)]
    pub drug_class: Option<String>,
    #[serde(default)]
    pub is_psychotropic: Option<bool>,
    #[serde(default)]
    pub is_controlled: Option<bool>,
    #[serde(default)]
    pub controlled_substance_schedule: Option<String>,
    #[serde(default)]
    pub is_narcotic: Option<bool>,
    #[serde(default)]
    pub requires_monitoring: Option<bool>,
    #[serde(default)]
    pub is_high_alert: Option<bool>,
    #[serde(default)]
    pub is_formulary: Option<bool>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationStatusChanged {
    #[serde(default)]
    pub reason: Option<String>,
}

domain_events! {
    /// Catalog entry lifecycle (stream per medication id).
    pub enum MedicationEvent in "medication" {
        Added(MedicationAdded) = "medication.added",
        Updated(MedicationUpdated) = "medication.updated",
        Deactivated(MedicationStatusChanged) = "medication.deactivated",
        Reactivated(MedicationStatusChanged) = "medication.reactivated",
    }
}
