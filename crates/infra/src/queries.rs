//! Read-only queries over the projections.
//!
//! Authorization decisions read only from here, never from the event log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use carebase_auth::{EffectivePermission, GrantScope, PermissionName};
use carebase_core::{OrganizationId, RoleId, ScopePath, StreamId, UserId};

use crate::projections::{
    AccessGrantRow, AuditRow, ClientRow, ContactRow, DoseRow, ImpersonationSessionRow, MedicationRow, OrganizationRow,
    PrescriptionRow, ProjectionError, ProjectionStore, ReadModels, RoleRow, WorkflowQueueRow, WorkflowQueueStatus,
};

#[derive(Debug, Clone)]
pub struct ReadQueries {
    store: Arc<ProjectionStore>,
}

impl ReadQueries {
    pub fn new(store: Arc<ProjectionStore>) -> Self {
        Self { store }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Clinical
    // ─────────────────────────────────────────────────────────────────────

    pub fn client(&self, id: StreamId) -> Result<Option<ClientRow>, ProjectionError> {
        self.store.read(|m| m.clients.get(&id).cloned())
    }

    pub fn clients_for_organization(&self, organization_id: OrganizationId) -> Result<Vec<ClientRow>, ProjectionError> {
        self.store.read(|m| {
            m.clients
                .values()
                .filter(|c| c.organization_id == organization_id)
                .cloned()
                .collect()
        })
    }

    pub fn medication(&self, id: StreamId) -> Result<Option<MedicationRow>, ProjectionError> {
        self.store.read(|m| m.medications.get(&id).cloned())
    }

    pub fn prescriptions_for_client(&self, client_id: StreamId) -> Result<Vec<PrescriptionRow>, ProjectionError> {
        self.store.read(|m| {
            let mut rows: Vec<_> = m
                .prescriptions
                .values()
                .filter(|p| p.client_id == client_id)
                .cloned()
                .collect();
            rows.sort_by_key(|p| (p.start_date, p.created_at));
            rows
        })
    }

    /// Doses in schedule order.
    pub fn doses_for_prescription(&self, prescription_id: StreamId) -> Result<Vec<DoseRow>, ProjectionError> {
        self.store.read(|m| {
            let mut rows: Vec<_> = m
                .doses
                .values()
                .filter(|d| d.medication_history_id == prescription_id)
                .cloned()
                .collect();
            rows.sort_by_key(|d| d.scheduled_datetime);
            rows
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Organization hierarchy
    // ─────────────────────────────────────────────────────────────────────

    pub fn organization(&self, id: OrganizationId) -> Result<Option<OrganizationRow>, ProjectionError> {
        self.store.read(|m| m.organizations.get(&id).cloned())
    }

    /// The live organization at `path`.
    pub fn organization_by_path(&self, path: &ScopePath) -> Result<Option<OrganizationRow>, ProjectionError> {
        self.store.read(|m| live_at(m, path).cloned())
    }

    /// Live direct children of the organization at `parent`.
    pub fn organization_children(&self, parent: &ScopePath) -> Result<Vec<OrganizationRow>, ProjectionError> {
        self.store.read(|m| {
            let mut rows: Vec<_> = m
                .organizations
                .values()
                .filter(|o| o.is_live() && o.parent_path.as_ref() == Some(parent))
                .cloned()
                .collect();
            rows.sort_by(|a, b| a.path.cmp(&b.path));
            rows
        })
    }

    /// Every live organization strictly below `id`, shallowest first.
    pub fn organization_descendants(&self, id: OrganizationId) -> Result<Vec<OrganizationRow>, ProjectionError> {
        self.store.read(|m| -> Result<Vec<OrganizationRow>, ProjectionError> {
            let root = m.organizations.require("organizations", &id)?;
            let mut rows: Vec<_> = m
                .organizations
                .values()
                .filter(|o| o.is_live() && o.path.is_strict_descendant_of(&root.path))
                .cloned()
                .collect();
            rows.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.path.cmp(&b.path)));
            Ok(rows)
        })?
    }

    /// Live organizations strictly above `id`, root first.
    pub fn organization_ancestors(&self, id: OrganizationId) -> Result<Vec<OrganizationRow>, ProjectionError> {
        self.store.read(|m| -> Result<Vec<OrganizationRow>, ProjectionError> {
            let leaf = m.organizations.require("organizations", &id)?;
            let mut rows: Vec<_> = m
                .organizations
                .values()
                .filter(|o| o.is_live() && leaf.path.is_strict_descendant_of(&o.path))
                .cloned()
                .collect();
            rows.sort_by_key(|o| o.depth);
            Ok(rows)
        })?
    }

    pub fn contacts_for_organization(&self, organization_id: OrganizationId) -> Result<Vec<ContactRow>, ProjectionError> {
        self.store.read(|m| {
            m.contacts
                .values()
                .filter(|c| c.organization_id == organization_id && c.deleted_at.is_none())
                .cloned()
                .collect()
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Authorization
    // ─────────────────────────────────────────────────────────────────────

    pub fn role(&self, id: RoleId) -> Result<Option<RoleRow>, ProjectionError> {
        self.store.read(|m| m.roles.get(&id).cloned())
    }

    /// Permissions the user holds through effective roles.
    ///
    /// With `organization_id`, only assignments reaching that organization
    /// (global ones included) are listed.
    pub fn permissions_for_user(
        &self,
        user_id: UserId,
        organization_id: Option<OrganizationId>,
    ) -> Result<Vec<EffectivePermission>, ProjectionError> {
        self.store.read(|m| {
            effective_permissions(m, user_id)
                .into_iter()
                .filter(|e| organization_id.is_none_or(|org| e.scope.covers(org, None)))
                .collect()
        })
    }

    /// Hierarchical permission check.
    ///
    /// Global assignments reach every organization and scope. Organization
    /// assignments need the same organization and, when `scope` is given, a
    /// scope path that contains or is contained by the assignment's.
    pub fn user_has_permission(
        &self,
        user_id: UserId,
        permission: &PermissionName,
        organization_id: OrganizationId,
        scope: Option<&ScopePath>,
    ) -> Result<bool, ProjectionError> {
        self.store.read(|m| {
            let effective = effective_permissions(m, user_id);
            carebase_auth::user_has_permission(&effective, permission, organization_id, scope)
        })
    }

    pub fn active_grants_for_consultant(
        &self,
        consultant_org_id: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccessGrantRow>, ProjectionError> {
        self.store.read(|m| {
            m.access_grants
                .values()
                .filter(|g| g.consultant_org_id == consultant_org_id && g.coverage().is_live(now))
                .cloned()
                .collect()
        })
    }

    /// Does any live grant let `user_id` act on `provider_org_id` at `requested`?
    ///
    /// A `scope_id` narrows the check to one facility, program or client; only
    /// grants for that resource (or `full_org` grants) match it.
    ///
    /// Org-wide grants (no named user) cover every user holding a role in, or
    /// belonging to, the consultant organization.
    pub fn has_cross_tenant_access(
        &self,
        user_id: UserId,
        provider_org_id: OrganizationId,
        requested: GrantScope,
        scope_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<bool, ProjectionError> {
        self.store.read(|m| {
            m.access_grants.values().any(|g| {
                g.provider_org_id == provider_org_id
                    && g.coverage().covers(user_id, requested, scope_id, now)
                    && (g.consultant_user_id == Some(user_id) || belongs_to(m, user_id, g.consultant_org_id))
            })
        })
    }

    pub fn active_impersonation_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ImpersonationSessionRow>, ProjectionError> {
        self.store
            .read(|m| m.impersonation_sessions.values().filter(|s| s.is_live(now)).cloned().collect())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queue + audit
    // ─────────────────────────────────────────────────────────────────────

    /// Entries in `status`, highest priority first, then oldest first.
    pub fn workflow_queue(&self, status: WorkflowQueueStatus) -> Result<Vec<WorkflowQueueRow>, ProjectionError> {
        self.store.read(|m| {
            let mut rows: Vec<_> = m
                .workflow_queue
                .values()
                .filter(|w| w.status == status)
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
            rows
        })
    }

    /// Audit rows for one resource in event order.
    pub fn audit_trail(&self, resource_id: StreamId) -> Result<Vec<AuditRow>, ProjectionError> {
        self.store.read(|m| {
            let mut rows: Vec<_> = m
                .audit_log
                .values()
                .filter(|a| a.resource_id == resource_id)
                .cloned()
                .collect();
            rows.sort_by_key(|a| a.created_at);
            rows
        })
    }
}

fn live_at<'a>(m: &'a ReadModels, path: &ScopePath) -> Option<&'a OrganizationRow> {
    m.organizations.values().find(|o| o.is_live() && o.path == *path)
}

fn effective_permissions(m: &ReadModels, user_id: UserId) -> Vec<EffectivePermission> {
    if !m.users.get(&user_id).is_some_and(|u| u.is_active) {
        return Vec::new();
    }

    m.user_roles
        .values()
        .filter(|ur| ur.user_id == user_id)
        .filter(|ur| m.roles.get(&ur.role_id).is_some_and(RoleRow::is_effective))
        .flat_map(move |ur| {
            m.role_permissions
                .values()
                .filter(move |rp| rp.role_id == ur.role_id)
                .filter_map(move |rp| m.permissions.get(&rp.permission_id))
                .map(move |p| EffectivePermission {
                    permission: p.name.clone(),
                    scope: ur.scope.clone(),
                })
        })
        .collect()
}

fn belongs_to(m: &ReadModels, user_id: UserId, organization_id: OrganizationId) -> bool {
    m.users
        .get(&user_id)
        .is_some_and(|u| u.organization_id == Some(organization_id))
        || m.user_roles
            .values()
            .any(|ur| ur.user_id == user_id && ur.scope.organization_id() == Some(organization_id))
}
