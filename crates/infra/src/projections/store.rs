//! In-process projection tables.
//!
//! Every table is owned by exactly one handler family. Outside this crate the
//! tables are read-only: mutation goes through `ProjectionStore::write`, which
//! only the router and replay reach.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::RwLock;

use carebase_core::{EventId, OrganizationId, PermissionId, RoleId, StreamId, UserId};
use carebase_organizations::Link;

use super::access_grants::AccessGrantRow;
use super::audit::AuditRow;
use super::clients::ClientRow;
use super::contacts::{AddressRow, ContactRow, PhoneRow};
use super::doses::DoseRow;
use super::error::ProjectionError;
use super::impersonation::ImpersonationSessionRow;
use super::medications::MedicationRow;
use super::organizations::OrganizationRow;
use super::prescriptions::PrescriptionRow;
use super::rbac::{PermissionRow, RolePermissionRow, RoleRow, UserRoleRow, UserRow};
use super::relationships::LinkRow;
use super::workflow_queue::WorkflowQueueRow;

/// Ordered key/value table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table<K: Ord, V> {
    rows: BTreeMap<K, V>,
}

impl<K: Ord, V> Default for Table<K, V> {
    fn default() -> Self {
        Self { rows: BTreeMap::new() }
    }
}

impl<K: Ord, V> Table<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.rows.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.rows.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// "Do nothing on duplicate key": returns whether the row was inserted.
    pub(crate) fn insert_if_absent(&mut self, key: K, value: V) -> bool {
        if self.rows.contains_key(&key) {
            return false;
        }
        self.rows.insert(key, value);
        true
    }

    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        self.rows.remove(key)
    }
}

impl<K: Ord + Display, V> Table<K, V> {
    pub(crate) fn require(&self, table: &'static str, key: &K) -> Result<&V, ProjectionError> {
        self.rows.get(key).ok_or_else(|| ProjectionError::not_found(table, key))
    }

    pub(crate) fn require_mut(&mut self, table: &'static str, key: &K) -> Result<&mut V, ProjectionError> {
        self.rows.get_mut(key).ok_or_else(|| ProjectionError::not_found(table, key))
    }
}

/// Every projection table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadModels {
    // Clinical
    pub(crate) clients: Table<StreamId, ClientRow>,
    pub(crate) medications: Table<StreamId, MedicationRow>,
    pub(crate) prescriptions: Table<StreamId, PrescriptionRow>,
    pub(crate) doses: Table<StreamId, DoseRow>,

    // Organizations
    pub(crate) organizations: Table<OrganizationId, OrganizationRow>,
    pub(crate) contacts: Table<StreamId, ContactRow>,
    pub(crate) addresses: Table<StreamId, AddressRow>,
    pub(crate) phones: Table<StreamId, PhoneRow>,
    pub(crate) links: Table<Link, LinkRow>,

    // RBAC
    pub(crate) permissions: Table<PermissionId, PermissionRow>,
    pub(crate) roles: Table<RoleId, RoleRow>,
    pub(crate) role_permissions: Table<(RoleId, PermissionId), RolePermissionRow>,
    pub(crate) users: Table<UserId, UserRow>,
    pub(crate) user_roles: Table<(UserId, RoleId, Option<OrganizationId>), UserRoleRow>,

    // Cross-tenant access and support tooling
    pub(crate) access_grants: Table<StreamId, AccessGrantRow>,
    pub(crate) impersonation_sessions: Table<StreamId, ImpersonationSessionRow>,
    pub(crate) workflow_queue: Table<StreamId, WorkflowQueueRow>,

    pub(crate) audit_log: Table<(EventId, StreamId), AuditRow>,
}

impl ReadModels {
    pub fn clients(&self) -> &Table<StreamId, ClientRow> {
        &self.clients
    }

    pub fn medications(&self) -> &Table<StreamId, MedicationRow> {
        &self.medications
    }

    pub fn prescriptions(&self) -> &Table<StreamId, PrescriptionRow> {
        &self.prescriptions
    }

    pub fn doses(&self) -> &Table<StreamId, DoseRow> {
        &self.doses
    }

    pub fn organizations(&self) -> &Table<OrganizationId, OrganizationRow> {
        &self.organizations
    }

    pub fn contacts(&self) -> &Table<StreamId, ContactRow> {
        &self.contacts
    }

    pub fn addresses(&self) -> &Table<StreamId, AddressRow> {
        &self.addresses
    }

    pub fn phones(&self) -> &Table<StreamId, PhoneRow> {
        &self.phones
    }

    pub fn links(&self) -> &Table<Link, LinkRow> {
        &self.links
    }

    pub fn permissions(&self) -> &Table<PermissionId, PermissionRow> {
        &self.permissions
    }

    pub fn roles(&self) -> &Table<RoleId, RoleRow> {
        &self.roles
    }

    pub fn role_permissions(&self) -> &Table<(RoleId, PermissionId), RolePermissionRow> {
        &self.role_permissions
    }

    pub fn users(&self) -> &Table<UserId, UserRow> {
        &self.users
    }

    pub fn user_roles(&self) -> &Table<(UserId, RoleId, Option<OrganizationId>), UserRoleRow> {
        &self.user_roles
    }

    pub fn access_grants(&self) -> &Table<StreamId, AccessGrantRow> {
        &self.access_grants
    }

    pub fn impersonation_sessions(&self) -> &Table<StreamId, ImpersonationSessionRow> {
        &self.impersonation_sessions
    }

    pub fn workflow_queue(&self) -> &Table<StreamId, WorkflowQueueRow> {
        &self.workflow_queue
    }

    pub fn audit_log(&self) -> &Table<(EventId, StreamId), AuditRow> {
        &self.audit_log
    }
}

/// Shared, lock-guarded projection state.
#[derive(Debug, Default)]
pub struct ProjectionStore {
    inner: RwLock<ReadModels>,
}

impl ProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a read-only closure over the tables.
    pub fn read<T>(&self, f: impl FnOnce(&ReadModels) -> T) -> Result<T, ProjectionError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| ProjectionError::Storage("projection lock poisoned".to_string()))?;
        Ok(f(&guard))
    }

    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut ReadModels) -> T) -> Result<T, ProjectionError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| ProjectionError::Storage("projection lock poisoned".to_string()))?;
        Ok(f(&mut guard))
    }

    pub fn snapshot(&self) -> Result<ReadModels, ProjectionError> {
        self.read(ReadModels::clone)
    }
}
