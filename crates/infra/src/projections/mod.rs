//! Projection handlers and the read models they own.
//!
//! One handler per aggregate family, each registered under its stream type
//! (plus a shared handler for junction events). All projections are:
//! - **Rebuildable**: replaying the log from empty yields the same tables
//! - **Idempotent**: creation is "insert if absent", links are "insert if absent"
//! - **Exclusive**: a table family is written by exactly one handler

pub mod access_grants;
pub mod audit;
pub mod clients;
pub mod contacts;
pub mod doses;
pub mod error;
pub mod impersonation;
pub mod medications;
pub mod organizations;
pub mod prescriptions;
pub mod rbac;
pub mod relationships;
pub mod store;
pub mod workflow_queue;

use std::fmt::Display;

use serde::Serialize;

use carebase_core::{OrganizationId, UserId};
use carebase_events::EventRecord;

use crate::router::HandlerRegistry;

pub use access_grants::{AccessGrantProjection, AccessGrantRow};
pub use audit::{AuditOperation, AuditRow};
pub use clients::{ClientProjection, ClientRow};
pub use contacts::{AddressProjection, AddressRow, ContactProjection, ContactRow, PhoneProjection, PhoneRow};
pub use doses::{DoseProjection, DoseRow};
pub use error::ProjectionError;
pub use impersonation::{ImpersonationProjection, ImpersonationSessionRow};
pub use medications::{MedicationProjection, MedicationRow};
pub use organizations::{OrganizationProjection, OrganizationRow, OrganizationStatus};
pub use prescriptions::{PrescriptionProjection, PrescriptionRow};
pub use rbac::{
    PermissionProjection, PermissionRow, RolePermissionRow, RoleProjection, RoleRow, UserProjection, UserRoleRow,
    UserRow,
};
pub use relationships::{LinkRow, RelationshipProjection};
pub use store::{ProjectionStore, ReadModels, Table};
pub use workflow_queue::{WorkflowQueueEvent, WorkflowQueueProjection, WorkflowQueueRow, WorkflowQueueStatus};

/// Registry with every built-in projection family.
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(ClientProjection));
    registry.register(Box::new(MedicationProjection));
    registry.register(Box::new(PrescriptionProjection));
    registry.register(Box::new(DoseProjection));
    registry.register(Box::new(OrganizationProjection));
    registry.register(Box::new(ContactProjection));
    registry.register(Box::new(AddressProjection));
    registry.register(Box::new(PhoneProjection));
    registry.register(Box::new(RelationshipProjection));
    registry.register(Box::new(PermissionProjection));
    registry.register(Box::new(RoleProjection));
    registry.register(Box::new(UserProjection));
    registry.register(Box::new(AccessGrantProjection));
    registry.register(Box::new(ImpersonationProjection));
    registry.register(Box::new(WorkflowQueueProjection));
    registry
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared row plumbing
// ─────────────────────────────────────────────────────────────────────────────

/// A lifecycle row mirrored into the audit log.
pub(crate) trait ProjectionRow: Clone + Serialize {
    /// Tenant the row belongs to (`None` for platform-level rows).
    fn organization_id(&self) -> Option<OrganizationId>;

    /// Stamp `updated_at` / `updated_by` from the event.
    fn touch(&mut self, at: chrono::DateTime<chrono::Utc>, by: Option<UserId>);
}

/// Insert a new row unless one already exists for `key`; audits the insert.
///
/// Returns whether the row was inserted.
pub(crate) fn insert_row<K, V, T>(
    models: &mut ReadModels,
    event: &EventRecord,
    table: T,
    key: K,
    row: V,
) -> bool
where
    K: Ord,
    V: ProjectionRow,
    T: FnOnce(&mut ReadModels) -> &mut Table<K, V>,
{
    let org = row.organization_id();
    let image = row.clone();
    if !table(models).insert_if_absent(key, row) {
        return false;
    }
    audit::record(models, event, org, AuditOperation::Insert, None, Some(&image));
    true
}

/// Targeted update of an existing row; audits before/after images.
///
/// A returned error from `mutate` restores the row as it was found.
pub(crate) fn update_row<K, V, T, F>(
    models: &mut ReadModels,
    event: &EventRecord,
    table: T,
    table_name: &'static str,
    key: &K,
    operation: AuditOperation,
    mutate: F,
) -> Result<V, ProjectionError>
where
    K: Ord + Display,
    V: ProjectionRow,
    T: FnOnce(&mut ReadModels) -> &mut Table<K, V>,
    F: FnOnce(&mut V) -> Result<(), ProjectionError>,
{
    let row = table(models).require_mut(table_name, key)?;
    let before = row.clone();
    if let Err(err) = mutate(row) {
        *row = before;
        return Err(err);
    }
    row.touch(event.created_at, event.event_metadata.user_id);
    let after = row.clone();

    audit::record(models, event, after.organization_id(), operation, Some(&before), Some(&after));
    Ok(after)
}

/// "New value or keep old" for partial updates.
pub(crate) fn coalesce<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

/// Like `coalesce`, for nullable columns.
pub(crate) fn coalesce_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}
