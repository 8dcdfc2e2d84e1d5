use serde::{Deserialize, Serialize};

use carebase_core::{DomainError, DomainResult, OrganizationId, RoleId, ScopePath};
use carebase_events::domain_events;

/// Where a user's role assignment applies.
///
/// A null organization means platform-wide access and never carries a scope;
/// an organization assignment always carries one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssignmentScope {
    Global,
    Organization {
        organization_id: OrganizationId,
        scope_path: ScopePath,
    },
}

impl AssignmentScope {
    pub fn from_parts(organization_id: Option<OrganizationId>, scope_path: Option<ScopePath>) -> DomainResult<Self> {
        match (organization_id, scope_path) {
            (None, None) => Ok(AssignmentScope::Global),
            (Some(organization_id), Some(scope_path)) => Ok(AssignmentScope::Organization {
                organization_id,
                scope_path,
            }),
            _ => Err(DomainError::invariant(
                "organization_id and scope_path must both be set or both be null",
            )),
        }
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        match self {
            AssignmentScope::Global => None,
            AssignmentScope::Organization { organization_id, .. } => Some(*organization_id),
        }
    }

    pub fn scope_path(&self) -> Option<&ScopePath> {
        match self {
            AssignmentScope::Global => None,
            AssignmentScope::Organization { scope_path, .. } => Some(scope_path),
        }
    }

    /// Does this assignment reach `organization_id` (and `requested`, if given)?
    ///
    /// Global assignments reach everything. Organization assignments need an
    /// exact organization match and, when a scope is requested, either path
    /// must contain the other.
    pub fn covers(&self, organization_id: OrganizationId, requested: Option<&ScopePath>) -> bool {
        match self {
            AssignmentScope::Global => true,
            AssignmentScope::Organization {
                organization_id: assigned,
                scope_path,
            } => *assigned == organization_id && requested.is_none_or(|r| r.overlaps(scope_path)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCreated {
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatusChanged {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRoleAssigned {
    pub role_id: RoleId,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub scope_path: Option<ScopePath>,
}

impl UserRoleAssigned {
    pub fn scope(&self) -> DomainResult<AssignmentScope> {
        AssignmentScope::from_parts(self.organization_id, self.scope_path.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRoleRevoked {
    pub role_id: RoleId,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
}

domain_events! {
    /// User identity and role assignment events (stream per user id).
    pub enum UserEvent in "user" {
        Created(UserCreated) = "user.created",
        Deactivated(UserStatusChanged) = "user.deactivated",
        Reactivated(UserStatusChanged) = "user.reactivated",
        RoleAssigned(UserRoleAssigned) = "user.role.assigned",
        RoleRevoked(UserRoleRevoked) = "user.role.revoked",
    }
}
