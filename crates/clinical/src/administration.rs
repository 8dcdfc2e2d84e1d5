//! Individual dose administration records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use carebase_core::{DomainError, DomainResult, OrganizationId, StreamId, UserId};
use carebase_events::domain_events;

/// A dose given further than this from its scheduled time is `late` or `early`.
pub const ON_TIME_WINDOW_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoseStatus {
    Scheduled,
    Administered,
    Late,
    Early,
    Skipped,
    Refused,
    Missed,
}

impl DoseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DoseStatus::Scheduled => "scheduled",
            DoseStatus::Administered => "administered",
            DoseStatus::Late => "late",
            DoseStatus::Early => "early",
            DoseStatus::Skipped => "skipped",
            DoseStatus::Refused => "refused",
            DoseStatus::Missed => "missed",
        }
    }

    /// The dose was actually given (on time or not).
    pub fn was_given(self) -> bool {
        matches!(self, DoseStatus::Administered | DoseStatus::Late | DoseStatus::Early)
    }

    /// Status for a dose given at `administered_at`.
    pub fn for_administration(scheduled: DateTime<Utc>, administered_at: DateTime<Utc>) -> DoseStatus {
        let window = Duration::minutes(ON_TIME_WINDOW_MINUTES);
        if administered_at > scheduled + window {
            DoseStatus::Late
        } else if administered_at < scheduled - window {
            DoseStatus::Early
        } else {
            DoseStatus::Administered
        }
    }

    /// Only a scheduled dose can be resolved (given, skipped, refused, missed).
    pub fn ensure_open(self) -> DomainResult<()> {
        if self == DoseStatus::Scheduled {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(format!(
                "dose is already {}",
                self.as_str()
            )))
        }
    }

    pub fn ensure_verifiable(self) -> DomainResult<()> {
        if self.was_given() {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(format!(
                "cannot verify a dose that is {}",
                self.as_str()
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseScheduled {
    pub organization_id: OrganizationId,
    pub client_id: StreamId,
    pub medication_history_id: StreamId,
    pub scheduled_datetime: DateTime<Utc>,
    pub scheduled_amount: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseAdministered {
    pub administered_at: DateTime<Utc>,
    #[serde(default)]
    pub administered_amount: Option<f64>,
    #[serde(default)]
    pub administered_by: Option<UserId>,
    #[serde(default)]
    pub vitals_before: Option<serde_json::Value>,
    #[serde(default)]
    pub vitals_after: Option<serde_json::Value>,
    #[serde(default)]
    pub side_effects: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseNotGiven {
    pub reason: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseMissed {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseVerified {
    pub verified_by: UserId,
}

domain_events! {
    /// Dose record lifecycle (stream per administration record id).
    pub enum DoseEvent in "medication_administration" {
        Scheduled(DoseScheduled) = "dose.scheduled",
        Administered(DoseAdministered) = "dose.administered",
        Skipped(DoseNotGiven) = "dose.skipped",
        Refused(DoseNotGiven) = "dose.refused",
        Missed(DoseMissed) = "dose.missed",
        Verified(DoseVerified) = "dose.verified",
    }
}
