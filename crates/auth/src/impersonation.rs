//! Super-admin impersonation sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use carebase_core::{DomainError, DomainResult, OrganizationId, UserId};
use carebase_events::domain_events;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpersonationStatus {
    Active,
    Ended,
    Expired,
}

impl ImpersonationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ImpersonationStatus::Active => "active",
            ImpersonationStatus::Ended => "ended",
            ImpersonationStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpersonationEndReason {
    ManualLogout,
    Timeout,
    RenewalDeclined,
    ForcedByAdmin,
}

impl ImpersonationEndReason {
    /// Sessions that ran out of time end as `expired`; the rest as `ended`.
    pub fn final_status(self) -> ImpersonationStatus {
        match self {
            ImpersonationEndReason::Timeout | ImpersonationEndReason::RenewalDeclined => ImpersonationStatus::Expired,
            ImpersonationEndReason::ManualLogout | ImpersonationEndReason::ForcedByAdmin => ImpersonationStatus::Ended,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpersonationStarted {
    pub super_admin_user_id: UserId,
    pub target_user_id: UserId,
    pub target_org_id: OrganizationId,
    pub justification_reason: String,
    #[serde(default)]
    pub justification_reference: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl ImpersonationStarted {
    pub fn validate(&self, started_at: DateTime<Utc>) -> DomainResult<()> {
        if self.super_admin_user_id == self.target_user_id {
            return Err(DomainError::validation("a user cannot impersonate themselves"));
        }
        if self.justification_reason.trim().is_empty() {
            return Err(DomainError::validation("impersonation requires a justification"));
        }
        if self.expires_at <= started_at {
            return Err(DomainError::validation("impersonation must expire after it starts"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpersonationRenewed {
    pub new_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpersonationEnded {
    pub reason: ImpersonationEndReason,
    #[serde(default)]
    pub ended_by: Option<UserId>,
    #[serde(default)]
    pub actions_performed: u32,
}

domain_events! {
    /// Impersonation session lifecycle (stream per session id).
    pub enum ImpersonationEvent in "impersonation" {
        Started(ImpersonationStarted) = "impersonation.started",
        Renewed(ImpersonationRenewed) = "impersonation.renewed",
        Ended(ImpersonationEnded) = "impersonation.ended",
    }
}
