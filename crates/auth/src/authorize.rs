//! Hierarchical permission decision.
//!
//! Inputs are already-resolved `(permission, assignment scope)` pairs, one per
//! permission reachable through each of the user's active role assignments. The
//! read side in `carebase-infra` builds them from RBAC projections; callers
//! holding only claims use [`authorize`] / [`authorize_in`] instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use carebase_core::{OrganizationId, ScopePath};

use crate::{Actor, AssignmentScope, PermissionName};

/// One permission a user holds, together with where the granting assignment applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectivePermission {
    pub permission: PermissionName,
    pub scope: AssignmentScope,
}

impl EffectivePermission {
    pub fn permits(&self, permission: &PermissionName, organization_id: OrganizationId, scope: Option<&ScopePath>) -> bool {
        self.permission == *permission && self.scope.covers(organization_id, scope)
    }
}

/// True if any effective permission matches `permission` and reaches the target.
///
/// - a global assignment (null organization) reaches every organization and scope;
/// - an organization assignment needs the same organization and, when `scope` is
///   given, a scope that contains it or is contained by it.
pub fn user_has_permission<'a>(
    effective: impl IntoIterator<Item = &'a EffectivePermission>,
    permission: &PermissionName,
    organization_id: OrganizationId,
    scope: Option<&ScopePath>,
) -> bool {
    effective
        .into_iter()
        .any(|e| e.permits(permission, organization_id, scope))
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error("forbidden: '{permission}' not granted for organization {organization_id}")]
    OutOfScope {
        permission: String,
        organization_id: OrganizationId,
    },
}

/// Claims-only check: does the actor hold `required` anywhere?
pub fn authorize(actor: &Actor, required: &PermissionName) -> Result<(), AuthzError> {
    if actor.claims_permit(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.to_string()))
    }
}

/// Claims-only check against a target organization and optional scope.
///
/// Claims without an organization represent platform-wide access.
pub fn authorize_in(
    actor: &Actor,
    required: &PermissionName,
    organization_id: OrganizationId,
    scope: Option<&ScopePath>,
) -> Result<(), AuthzError> {
    authorize(actor, required)?;

    let reaches = match actor.claims.organization_id {
        None => true,
        Some(org) if org != organization_id => false,
        Some(_) => match (scope, actor.claims.scope_path.as_ref()) {
            (Some(requested), Some(held)) => requested.overlaps(held),
            _ => true,
        },
    };

    if reaches {
        Ok(())
    } else {
        Err(AuthzError::OutOfScope {
            permission: required.to_string(),
            organization_id,
        })
    }
}
