//! Prescriptions (a client's medication history entries).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use carebase_core::{DomainError, DomainResult, OrganizationId, StreamId};
use carebase_events::domain_events;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Active,
    OnHold,
    Discontinued,
    Completed,
}

impl PrescriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PrescriptionStatus::Active => "active",
            PrescriptionStatus::OnHold => "on_hold",
            PrescriptionStatus::Discontinued => "discontinued",
            PrescriptionStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PrescriptionStatus::Discontinued | PrescriptionStatus::Completed)
    }

    fn require(self, allowed: &[PrescriptionStatus], action: &str) -> DomainResult<()> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(format!(
                "cannot {action} a prescription that is {}",
                self.as_str()
            )))
        }
    }

    pub fn hold(self) -> DomainResult<Self> {
        self.require(&[PrescriptionStatus::Active], "hold")?;
        Ok(PrescriptionStatus::OnHold)
    }

    pub fn resume(self) -> DomainResult<Self> {
        self.require(&[PrescriptionStatus::OnHold], "resume")?;
        Ok(PrescriptionStatus::Active)
    }

    pub fn discontinue(self) -> DomainResult<Self> {
        self.require(&[PrescriptionStatus::Active, PrescriptionStatus::OnHold], "discontinue")?;
        Ok(PrescriptionStatus::Discontinued)
    }

    pub fn complete(self) -> DomainResult<Self> {
        self.require(&[PrescriptionStatus::Active, PrescriptionStatus::OnHold], "complete")?;
        Ok(PrescriptionStatus::Completed)
    }

    pub fn refill(self) -> DomainResult<Self> {
        self.require(&[PrescriptionStatus::Active], "refill")?;
        Ok(self)
    }
}

/// Check that another refill is still authorized.
pub fn ensure_refill_available(refills_used: u32, refills_authorized: u32) -> DomainResult<()> {
    if refills_used < refills_authorized {
        Ok(())
    } else {
        Err(DomainError::invariant(format!(
            "all {refills_authorized} authorized refills have been used"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationPrescribed {
    pub organization_id: OrganizationId,
    pub client_id: StreamId,
    pub medication_id: StreamId,
    pub prescription_date: NaiveDate,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub prescriber_name: Option<String>,
    #[serde(default)]
    pub prescriber_npi: Option<String>,
    pub dosage_amount: f64,
    pub dosage_unit: String,
    #[serde(default)]
    pub dosage_form: Option<String>,
    pub frequency: String,
    #[serde(default)]
    pub timings: Vec<String>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub is_prn: bool,
    #[serde(default)]
    pub prn_reason: Option<String>,
    #[serde(default)]
    pub refills_authorized: u32,
    #[serde(default)]
    pub pharmacy_name: Option<String>,
}

impl MedicationPrescribed {
    pub fn validate(&self) -> DomainResult<()> {
        if self.dosage_amount.is_nan() || self.dosage_amount <= 0.0 {
            return Err(DomainError::validation("dosage_amount must be positive"));
        }
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(DomainError::validation("end_date precedes start_date"));
            }
        }
        if self.is_prn && self.prn_reason.as_deref().is_none_or(|r| r.trim().is_empty()) {
            return Err(DomainError::validation("PRN prescriptions require prn_reason"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationRefilled {
    pub filled_date: NaiveDate,
    #[serde(default)]
    pub pharmacy_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationHeld {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationResumed {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationDiscontinued {
    pub discontinue_date: NaiveDate,
    pub discontinue_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationCompleted {
    pub end_date: NaiveDate,
}

domain_events! {
    /// Prescription lifecycle (stream per medication history id).
    pub enum PrescriptionEvent in "medication_history" {
        Prescribed(MedicationPrescribed) = "medication.prescribed",
        Refilled(MedicationRefilled) = "medication.refilled",
        PlacedOnHold(MedicationHeld) = "medication.placed_on_hold",
        Resumed(MedicationResumed) = "medication.resumed",
        Discontinued(MedicationDiscontinued) = "medication.discontinued",
        Completed(MedicationCompleted) = "medication.completed",
    }
}
