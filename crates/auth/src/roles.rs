use serde::{Deserialize, Serialize};

use carebase_core::{DomainError, DomainResult, OrganizationId, PermissionId, ScopePath};
use carebase_events::domain_events;

/// Where a role applies.
///
/// Global template roles have no organization scope; organization roles are
/// pinned to one organization subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoleScope {
    Template,
    Organization {
        organization_id: OrganizationId,
        org_hierarchy_scope: ScopePath,
    },
}

impl RoleScope {
    /// Both parts present or both absent.
    pub fn from_parts(organization_id: Option<OrganizationId>, scope: Option<ScopePath>) -> DomainResult<Self> {
        match (organization_id, scope) {
            (None, None) => Ok(RoleScope::Template),
            (Some(organization_id), Some(org_hierarchy_scope)) => Ok(RoleScope::Organization {
                organization_id,
                org_hierarchy_scope,
            }),
            (Some(_), None) => Err(DomainError::invariant(
                "organization-scoped role requires org_hierarchy_scope",
            )),
            (None, Some(_)) => Err(DomainError::invariant(
                "template role cannot carry org_hierarchy_scope",
            )),
        }
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        match self {
            RoleScope::Template => None,
            RoleScope::Organization { organization_id, .. } => Some(*organization_id),
        }
    }

    pub fn scope_path(&self) -> Option<&ScopePath> {
        match self {
            RoleScope::Template => None,
            RoleScope::Organization { org_hierarchy_scope, .. } => Some(org_hierarchy_scope),
        }
    }

    /// Whether the role's subtree lies under or over `path`.
    ///
    /// Used when an organization is deleted: such roles are deleted with it.
    pub fn intersects(&self, path: &ScopePath) -> bool {
        self.scope_path().is_some_and(|scope| scope.overlaps(path))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleCreated {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub org_hierarchy_scope: Option<ScopePath>,
}

impl RoleCreated {
    pub fn scope(&self) -> DomainResult<RoleScope> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("role name cannot be empty"));
        }
        RoleScope::from_parts(self.organization_id, self.org_hierarchy_scope.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleUpdated {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleStatusChanged {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePermissionChanged {
    pub permission_id: PermissionId,
}

domain_events! {
    /// Role lifecycle and permission bundle events (stream per role id).
    pub enum RoleEvent in "role" {
        Created(RoleCreated) = "role.created",
        Updated(RoleUpdated) = "role.updated",
        Deactivated(RoleStatusChanged) = "role.deactivated",
        Reactivated(RoleStatusChanged) = "role.reactivated",
        Deleted(RoleStatusChanged) = "role.deleted",
        PermissionGranted(RolePermissionChanged) = "role.permission.granted",
        PermissionRevoked(RolePermissionChanged) = "role.permission.revoked",
    }
}
