//! RBAC read models: permission catalog, roles, users and their joins.
//!
//! These tables are what the hierarchical permission check reads. Role grants
//! and user assignments are keyed join rows, so re-delivering a grant never
//! creates a second row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use carebase_auth::permissions::PermissionDefined;
use carebase_auth::roles::{RoleCreated, RoleUpdated};
use carebase_auth::users::{UserCreated, UserRoleAssigned};
use carebase_auth::{AssignmentScope, PermissionEvent, PermissionName, RoleEvent, RoleScope, ScopeKind, UserEvent};
use carebase_core::{DomainError, OrganizationId, PermissionId, RoleId, UserId};
use carebase_events::{DomainEvent, EventRecord};

use super::audit::{self, AuditOperation};
use super::store::{ReadModels, Table};
use super::{ProjectionError, ProjectionRow, coalesce, coalesce_opt, insert_row, update_row};
use crate::router::{HandlerOutput, ProjectionHandler, RouteKey};

// ─────────────────────────────────────────────────────────────────────────────
// Permissions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRow {
    pub id: PermissionId,
    pub name: PermissionName,
    pub applet: String,
    pub action: String,
    pub scope_type: ScopeKind,
    pub requires_mfa: bool,
    pub description: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectionRow for PermissionRow {
    fn organization_id(&self) -> Option<OrganizationId> {
        None
    }

    fn touch(&mut self, at: DateTime<Utc>, _by: Option<UserId>) {
        self.updated_at = at;
    }
}

fn permissions(models: &mut ReadModels) -> &mut Table<PermissionId, PermissionRow> {
    &mut models.permissions
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionProjection;

impl ProjectionHandler for PermissionProjection {
    fn name(&self) -> &'static str {
        "permission"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(PermissionEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = PermissionId::from(event.stream_id);
        match event.decode::<PermissionEvent>()? {
            PermissionEvent::Defined(e) => {
                let name = e.name()?;
                if models.permissions.values().any(|p| p.id != id && p.name == name) {
                    return Err(DomainError::conflict(format!("permission `{name}` is already defined")).into());
                }
                let PermissionDefined {
                    applet,
                    action,
                    scope_type,
                    requires_mfa,
                    description,
                } = e;
                let row = PermissionRow {
                    id,
                    name,
                    applet,
                    action,
                    scope_type,
                    requires_mfa,
                    description,
                    created_by: event.event_metadata.user_id,
                    created_at: event.created_at,
                    updated_at: event.created_at,
                };
                insert_row(models, event, permissions, id, row);
            }
        }
        Ok(HandlerOutput::none())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRow {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub scope: RoleScope,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoleRow {
    /// Active and not deleted: the only roles that confer permissions.
    pub fn is_effective(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }

    fn ensure_live(&self) -> Result<(), ProjectionError> {
        if self.deleted_at.is_some() {
            return Err(DomainError::invalid_transition(format!("role `{}` is deleted", self.name)).into());
        }
        Ok(())
    }

    fn apply_update(&mut self, e: RoleUpdated) -> Result<(), ProjectionError> {
        self.ensure_live()?;
        if e.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(DomainError::validation("role name cannot be empty").into());
        }
        coalesce(&mut self.name, e.name);
        coalesce_opt(&mut self.description, e.description);
        Ok(())
    }
}

impl ProjectionRow for RoleRow {
    fn organization_id(&self) -> Option<OrganizationId> {
        self.scope.organization_id()
    }

    fn touch(&mut self, at: DateTime<Utc>, by: Option<UserId>) {
        self.updated_at = at;
        self.updated_by = by;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePermissionRow {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
    pub granted_by: Option<UserId>,
    pub granted_at: DateTime<Utc>,
}

fn roles(models: &mut ReadModels) -> &mut Table<RoleId, RoleRow> {
    &mut models.roles
}

/// Organization roles must sit inside a live organization's subtree.
fn check_role_scope(models: &ReadModels, e: &RoleCreated) -> Result<RoleScope, ProjectionError> {
    if e.name.trim().is_empty() {
        return Err(DomainError::validation("role name cannot be empty").into());
    }
    let scope = e.scope()?;
    if let RoleScope::Organization {
        organization_id,
        org_hierarchy_scope,
    } = &scope
    {
        let org = models.organizations.require("organizations", organization_id)?;
        if !org.is_live() {
            return Err(DomainError::invariant(format!("organization `{}` is deleted", org.path)).into());
        }
        if !org_hierarchy_scope.is_descendant_of(&org.path) {
            return Err(DomainError::invariant(format!(
                "role scope `{org_hierarchy_scope}` lies outside organization `{}`",
                org.path
            ))
            .into());
        }
    }
    Ok(scope)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RoleProjection;

impl ProjectionHandler for RoleProjection {
    fn name(&self) -> &'static str {
        "role"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(RoleEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = RoleId::from(event.stream_id);
        let op = AuditOperation::Update;

        match event.decode::<RoleEvent>()? {
            RoleEvent::Created(e) => {
                let scope = check_role_scope(models, &e)?;
                let row = RoleRow {
                    id,
                    name: e.name,
                    description: e.description,
                    scope,
                    is_active: true,
                    deleted_at: None,
                    created_by: event.event_metadata.user_id,
                    updated_by: event.event_metadata.user_id,
                    created_at: event.created_at,
                    updated_at: event.created_at,
                };
                insert_row(models, event, roles, id, row);
            }
            RoleEvent::Updated(e) => {
                update_row(models, event, roles, "roles", &id, op, |row| row.apply_update(e))?;
            }
            RoleEvent::Deactivated(_) => {
                update_row(models, event, roles, "roles", &id, op, |row| {
                    row.ensure_live()?;
                    row.is_active = false;
                    Ok(())
                })?;
            }
            RoleEvent::Reactivated(_) => {
                update_row(models, event, roles, "roles", &id, op, |row| {
                    row.ensure_live()?;
                    row.is_active = true;
                    Ok(())
                })?;
            }
            RoleEvent::Deleted(_) => {
                // Cascades can target a role that is already gone.
                if models.roles.require("roles", &id)?.deleted_at.is_some() {
                    return Ok(HandlerOutput::none());
                }
                update_row(models, event, roles, "roles", &id, AuditOperation::Delete, |row| {
                    row.is_active = false;
                    row.deleted_at = Some(event.created_at);
                    Ok(())
                })?;
            }
            RoleEvent::PermissionGranted(e) => {
                let role = models.roles.require("roles", &id)?;
                role.ensure_live()?;
                let org = role.scope.organization_id();
                models.permissions.require("permissions", &e.permission_id)?;

                let row = RolePermissionRow {
                    role_id: id,
                    permission_id: e.permission_id,
                    granted_by: event.event_metadata.user_id,
                    granted_at: event.created_at,
                };
                if models.role_permissions.insert_if_absent((id, e.permission_id), row.clone()) {
                    audit::record(models, event, org, AuditOperation::Insert, None, Some(&row));
                }
            }
            RoleEvent::PermissionRevoked(e) => {
                let org = models.roles.require("roles", &id)?.scope.organization_id();
                if let Some(removed) = models.role_permissions.remove(&(id, e.permission_id)) {
                    audit::record(models, event, org, AuditOperation::Delete, Some(&removed), None);
                }
            }
        }
        Ok(HandlerOutput::none())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub organization_id: Option<OrganizationId>,
    pub is_active: bool,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectionRow for UserRow {
    fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    fn touch(&mut self, at: DateTime<Utc>, by: Option<UserId>) {
        self.updated_at = at;
        self.updated_by = by;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRoleRow {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub scope: AssignmentScope,
    pub assigned_by: Option<UserId>,
    pub assigned_at: DateTime<Utc>,
}

fn users(models: &mut ReadModels) -> &mut Table<UserId, UserRow> {
    &mut models.users
}

fn check_user(models: &ReadModels, e: &UserCreated) -> Result<(), ProjectionError> {
    if !e.email.contains('@') {
        return Err(DomainError::validation(format!("`{}` is not an email address", e.email)).into());
    }
    if let Some(org) = &e.organization_id {
        models.organizations.require("organizations", org)?;
    }
    Ok(())
}

/// The role must be live, the organization must exist, and an organization
/// role can only be assigned inside its own organization.
fn check_assignment(models: &ReadModels, user: UserId, e: &UserRoleAssigned) -> Result<AssignmentScope, ProjectionError> {
    let scope = e.scope()?;
    models.users.require("users", &user)?;

    let role = models.roles.require("roles", &e.role_id)?;
    role.ensure_live()?;

    if let Some(org) = scope.organization_id() {
        models.organizations.require("organizations", &org)?;
        if role.scope.organization_id().is_some_and(|owner| owner != org) {
            return Err(DomainError::invariant(format!(
                "role `{}` belongs to another organization",
                role.name
            ))
            .into());
        }
    }
    Ok(scope)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UserProjection;

impl ProjectionHandler for UserProjection {
    fn name(&self) -> &'static str {
        "user"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(UserEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = UserId::from(event.stream_id);

        match event.decode::<UserEvent>()? {
            UserEvent::Created(e) => {
                check_user(models, &e)?;
                let row = UserRow {
                    id,
                    email: e.email,
                    display_name: e.display_name,
                    organization_id: e.organization_id,
                    is_active: true,
                    created_by: event.event_metadata.user_id,
                    updated_by: event.event_metadata.user_id,
                    created_at: event.created_at,
                    updated_at: event.created_at,
                };
                insert_row(models, event, users, id, row);
            }
            UserEvent::Deactivated(_) => {
                update_row(models, event, users, "users", &id, AuditOperation::Update, |row| {
                    row.is_active = false;
                    Ok(())
                })?;
            }
            UserEvent::Reactivated(_) => {
                update_row(models, event, users, "users", &id, AuditOperation::Update, |row| {
                    row.is_active = true;
                    Ok(())
                })?;
            }
            UserEvent::RoleAssigned(e) => {
                let scope = check_assignment(models, id, &e)?;
                let org = scope.organization_id();
                let row = UserRoleRow {
                    user_id: id,
                    role_id: e.role_id,
                    scope,
                    assigned_by: event.event_metadata.user_id,
                    assigned_at: event.created_at,
                };
                if models.user_roles.insert_if_absent((id, e.role_id, org), row.clone()) {
                    audit::record(models, event, org, AuditOperation::Insert, None, Some(&row));
                }
            }
            UserEvent::RoleRevoked(e) => {
                models.users.require("users", &id)?;
                if let Some(removed) = models.user_roles.remove(&(id, e.role_id, e.organization_id)) {
                    audit::record(models, event, e.organization_id, AuditOperation::Delete, Some(&removed), None);
                }
            }
        }
        Ok(HandlerOutput::none())
    }
}
