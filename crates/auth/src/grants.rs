//! Cross-tenant access grants.
//!
//! A partner organization's staff may act on a provider organization's data for
//! a bounded time and scope. The lifecycle is:
//!
//! ```text
//! active ──revoke──▶ revoked
//!   │ ▲
//!   │ └─reactivate── suspended ──revoke──▶ revoked
//!   ├──suspend──────▶ suspended
//!   └──expire───────▶ expired
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use carebase_core::{DomainError, DomainResult, OrganizationId, UserId};
use carebase_events::domain_events;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Active,
    Suspended,
    Revoked,
    Expired,
}

/// Event-driven moves of the grant state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantTransition {
    Revoke,
    Suspend,
    Reactivate,
    Expire,
}

impl GrantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GrantStatus::Active => "active",
            GrantStatus::Suspended => "suspended",
            GrantStatus::Revoked => "revoked",
            GrantStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, GrantStatus::Revoked | GrantStatus::Expired)
    }

    pub fn transition(self, transition: GrantTransition) -> DomainResult<GrantStatus> {
        use GrantStatus::*;
        use GrantTransition::*;

        match (self, transition) {
            (Active, Revoke) | (Suspended, Revoke) => Ok(Revoked),
            (Active, Suspend) => Ok(Suspended),
            (Active, Expire) => Ok(Expired),
            (Suspended, Reactivate) => Ok(Active),
            (from, t) => Err(DomainError::invalid_transition(format!(
                "access grant cannot {t:?} from {}",
                from.as_str()
            ))),
        }
    }
}

/// How much of the provider organization a grant exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantScope {
    FullOrg,
    Facility,
    Program,
    ClientSpecific,
}

impl GrantScope {
    /// `full_org` subsumes every narrower scope; others only match themselves.
    pub fn satisfies(self, requested: GrantScope) -> bool {
        self == GrantScope::FullOrg || self == requested
    }
}

/// Legal or business basis for a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationType {
    VarContract,
    CourtOrder,
    ParentalConsent,
    SocialServicesAssignment,
    EmergencyAccess,
}

/// The fields that decide whether a grant is usable right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantCoverage {
    pub status: GrantStatus,
    pub expires_at: Option<DateTime<Utc>>,
    /// `None` means every user of the consultant organization.
    pub consultant_user_id: Option<UserId>,
    pub scope: GrantScope,
    /// Facility, program or client a narrower grant is limited to.
    pub scope_id: Option<Uuid>,
}

impl GrantCoverage {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && self.expires_at.is_none_or(|at| at > now)
    }

    /// `scope_id` names the resource being accessed; `None` asks about the
    /// scope kind as a whole.
    pub fn covers(&self, user_id: UserId, requested: GrantScope, scope_id: Option<Uuid>, now: DateTime<Utc>) -> bool {
        self.is_live(now) && self.consultant_user_id.is_none_or(|u| u == user_id) && self.reaches(requested, scope_id)
    }

    /// `full_org` reaches every resource; a narrower grant only its own.
    fn reaches(&self, requested: GrantScope, scope_id: Option<Uuid>) -> bool {
        if self.scope == GrantScope::FullOrg {
            return true;
        }
        self.scope.satisfies(requested) && scope_id.is_none_or(|id| self.scope_id == Some(id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGrantCreated {
    pub consultant_org_id: OrganizationId,
    pub provider_org_id: OrganizationId,
    #[serde(default)]
    pub consultant_user_id: Option<UserId>,
    pub scope: GrantScope,
    /// Facility, program or client id for narrower scopes.
    #[serde(default)]
    pub scope_id: Option<Uuid>,
    pub authorization_type: AuthorizationType,
    #[serde(default)]
    pub legal_reference: Option<String>,
    #[serde(default)]
    pub granted_by: Option<UserId>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub terms: Option<serde_json::Value>,
}

impl AccessGrantCreated {
    /// Shape checks that need no other projection.
    pub fn validate(&self) -> DomainResult<()> {
        if self.consultant_org_id == self.provider_org_id {
            return Err(DomainError::validation(
                "consultant and provider organizations must differ",
            ));
        }
        if self.scope != GrantScope::FullOrg && self.scope_id.is_none() {
            return Err(DomainError::validation(format!(
                "{:?} grant requires scope_id",
                self.scope
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGrantRevoked {
    pub revocation_reason: String,
    #[serde(default)]
    pub revoked_by: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGrantSuspended {
    pub suspension_reason: String,
    #[serde(default)]
    pub expected_resolution_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGrantReactivated {
    pub resolution_details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGrantExpired {
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiration_type: Option<String>,
}

domain_events! {
    /// Cross-tenant access grant lifecycle (stream per grant id).
    pub enum AccessGrantEvent in "access_grant" {
        Created(AccessGrantCreated) = "access_grant.created",
        Revoked(AccessGrantRevoked) = "access_grant.revoked",
        Suspended(AccessGrantSuspended) = "access_grant.suspended",
        Reactivated(AccessGrantReactivated) = "access_grant.reactivated",
        Expired(AccessGrantExpired) = "access_grant.expired",
    }
}

impl AccessGrantEvent {
    /// The state machine move this event drives (`None` for creation).
    pub fn transition(&self) -> Option<GrantTransition> {
        match self {
            AccessGrantEvent::Created(_) => None,
            AccessGrantEvent::Revoked(_) => Some(GrantTransition::Revoke),
            AccessGrantEvent::Suspended(_) => Some(GrantTransition::Suspend),
            AccessGrantEvent::Reactivated(_) => Some(GrantTransition::Reactivate),
            AccessGrantEvent::Expired(_) => Some(GrantTransition::Expire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn legal_transitions() {
        use GrantStatus::*;
        use GrantTransition::*;

        assert_eq!(Active.transition(Revoke).unwrap(), Revoked);
        assert_eq!(Active.transition(Suspend).unwrap(), Suspended);
        assert_eq!(Active.transition(Expire).unwrap(), Expired);
        assert_eq!(Suspended.transition(Reactivate).unwrap(), Active);
        assert_eq!(Suspended.transition(Revoke).unwrap(), Revoked);
    }

    #[test]
    fn illegal_transitions() {
        use GrantStatus::*;
        use GrantTransition::*;

        for (from, t) in [
            (Active, Reactivate),
            (Suspended, Suspend),
            (Suspended, Expire),
            (Revoked, Reactivate),
            (Revoked, Revoke),
            (Expired, Reactivate),
            (Expired, Suspend),
        ] {
            assert!(matches!(from.transition(t), Err(DomainError::InvalidTransition(_))), "{from:?} {t:?}");
        }
    }

    #[test]
    fn full_org_subsumes_narrower_scopes() {
        for requested in [GrantScope::FullOrg, GrantScope::Facility, GrantScope::Program, GrantScope::ClientSpecific] {
            assert!(GrantScope::FullOrg.satisfies(requested));
        }
        assert!(GrantScope::Facility.satisfies(GrantScope::Facility));
        assert!(!GrantScope::Facility.satisfies(GrantScope::FullOrg));
        assert!(!GrantScope::Program.satisfies(GrantScope::ClientSpecific));
    }

    #[test]
    fn coverage_respects_status_expiry_and_grantee() {
        let now = Utc::now();
        let user = UserId::new();
        let mut c = GrantCoverage {
            status: GrantStatus::Active,
            expires_at: Some(now + Duration::days(1)),
            consultant_user_id: None,
            scope: GrantScope::FullOrg,
            scope_id: None,
        };
        assert!(c.covers(user, GrantScope::ClientSpecific, None, now));

        c.expires_at = Some(now - Duration::seconds(1));
        assert!(!c.covers(user, GrantScope::FullOrg, None, now));

        c.expires_at = None;
        c.consultant_user_id = Some(UserId::new());
        assert!(!c.covers(user, GrantScope::FullOrg, None, now));

        c.consultant_user_id = Some(user);
        assert!(c.covers(user, GrantScope::FullOrg, None, now));

        c.status = GrantStatus::Suspended;
        assert!(!c.covers(user, GrantScope::FullOrg, None, now));
    }

    #[test]
    fn narrow_grants_only_reach_their_own_resource() {
        let now = Utc::now();
        let user = UserId::new();
        let facility = Uuid::now_v7();
        let mut c = GrantCoverage {
            status: GrantStatus::Active,
            expires_at: None,
            consultant_user_id: None,
            scope: GrantScope::Facility,
            scope_id: Some(facility),
        };
        assert!(c.covers(user, GrantScope::Facility, Some(facility), now));
        assert!(c.covers(user, GrantScope::Facility, None, now));
        assert!(!c.covers(user, GrantScope::Facility, Some(Uuid::now_v7()), now));
        assert!(!c.covers(user, GrantScope::Program, Some(facility), now));

        c.scope = GrantScope::FullOrg;
        c.scope_id = None;
        assert!(c.covers(user, GrantScope::Facility, Some(Uuid::now_v7()), now));
    }

    #[test]
    fn created_shape_validation() {
        let org = OrganizationId::new();
        let mut ev = AccessGrantCreated {
            consultant_org_id: OrganizationId::new(),
            provider_org_id: org,
            consultant_user_id: None,
            scope: GrantScope::Facility,
            scope_id: None,
            authorization_type: AuthorizationType::VarContract,
            legal_reference: None,
            granted_by: None,
            expires_at: None,
            terms: None,
        };
        assert!(ev.validate().is_err());
        ev.scope_id = Some(Uuid::now_v7());
        assert!(ev.validate().is_ok());
        ev.consultant_org_id = org;
        assert!(ev.validate().is_err());
    }
}
