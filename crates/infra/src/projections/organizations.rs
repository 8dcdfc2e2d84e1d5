//! Organization hierarchy projection.
//!
//! Rows are addressed by id and by materialized path. Deletion is logical and
//! cascades by event: deleting an organization emits one `organization.deleted`
//! per live strict descendant and one `role.deleted` per live role whose scope
//! lies under or over the deleted path. Cascaded deletions never re-cascade;
//! the originating deletion already enumerated the whole subtree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use carebase_auth::RoleEvent;
use carebase_auth::roles::RoleStatusChanged;
use carebase_core::{DomainError, OrganizationId, ScopePath, StreamId, UserId};
use carebase_events::{DomainEvent, EventMetadata, EventRecord, NewEvent};
use carebase_organizations::organization::{OrganizationCreated, OrganizationStatusChanged, OrganizationUpdated};
use carebase_organizations::{OrganizationEvent, OrganizationKind};

use super::audit::AuditOperation;
use super::store::{ReadModels, Table};
use super::{ProjectionError, ProjectionRow, coalesce, coalesce_opt, insert_row, update_row};
use crate::router::{HandlerOutput, ProjectionHandler, RouteKey};

const TABLE: &str = "organizations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationStatus {
    Active,
    Inactive,
    Deleted,
}

// ─────────────────────────────────────────────────────────────────────────────
// Read Model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationRow {
    pub id: OrganizationId,
    pub name: String,
    pub display_name: Option<String>,
    pub kind: OrganizationKind,
    pub path: ScopePath,
    pub parent_path: Option<ScopePath>,
    pub depth: usize,
    pub tax_number: Option<String>,
    pub timezone: Option<String>,
    pub metadata: Option<JsonValue>,
    pub status: OrganizationStatus,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrganizationRow {
    fn created(id: OrganizationId, e: OrganizationCreated, event: &EventRecord) -> Self {
        Self {
            id,
            depth: e.path.depth(),
            name: e.name,
            display_name: e.display_name,
            kind: e.kind,
            path: e.path,
            parent_path: e.parent_path,
            tax_number: e.tax_number,
            timezone: e.timezone,
            metadata: e.metadata,
            status: OrganizationStatus::Active,
            deactivated_at: None,
            deleted_at: None,
            created_by: event.event_metadata.user_id,
            updated_by: event.event_metadata.user_id,
            created_at: event.created_at,
            updated_at: event.created_at,
        }
    }

    /// Not soft-deleted.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn is_active(&self) -> bool {
        self.status == OrganizationStatus::Active
    }

    fn ensure_live(&self) -> Result<(), ProjectionError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(format!("organization {} is deleted", self.path)).into())
        }
    }

    fn apply_update(&mut self, e: OrganizationUpdated) -> Result<(), ProjectionError> {
        self.ensure_live()?;
        if e.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(DomainError::validation("organization name cannot be empty").into());
        }
        coalesce(&mut self.name, e.name);
        coalesce_opt(&mut self.display_name, e.display_name);
        coalesce_opt(&mut self.tax_number, e.tax_number);
        coalesce_opt(&mut self.timezone, e.timezone);
        coalesce_opt(&mut self.metadata, e.metadata);
        Ok(())
    }
}

impl ProjectionRow for OrganizationRow {
    fn organization_id(&self) -> Option<OrganizationId> {
        Some(self.id)
    }

    fn touch(&mut self, at: DateTime<Utc>, by: Option<UserId>) {
        self.updated_at = at;
        self.updated_by = by;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Projection
// ─────────────────────────────────────────────────────────────────────────────

fn organizations(models: &mut ReadModels) -> &mut Table<OrganizationId, OrganizationRow> {
    &mut models.organizations
}

/// Live path uniqueness and a live parent.
fn check_placement(models: &ReadModels, id: OrganizationId, e: &OrganizationCreated) -> Result<(), ProjectionError> {
    let taken = models
        .organizations
        .values()
        .any(|org| org.id != id && org.is_live() && org.path == e.path);
    if taken {
        return Err(DomainError::conflict(format!("organization path `{}` is already in use", e.path)).into());
    }

    if let Some(parent) = &e.parent_path {
        let found = models
            .organizations
            .values()
            .any(|org| org.is_live() && org.path == *parent);
        if !found {
            return Err(DomainError::not_found(format!("parent organization `{parent}`")).into());
        }
    }
    Ok(())
}

/// Deletion events for everything still live under or over `path`.
fn cascade(models: &ReadModels, cause: &EventRecord, path: &ScopePath) -> Result<Vec<NewEvent>, ProjectionError> {
    let reason = format!("organization `{path}` deleted");
    let metadata = || EventMetadata::cascaded_from(cause.event_id, &cause.event_metadata, reason.clone());

    let mut follow_ups = Vec::new();
    for child in models
        .organizations
        .values()
        .filter(|org| org.is_live() && org.path.is_strict_descendant_of(path))
    {
        let deleted = OrganizationEvent::Deleted(OrganizationStatusChanged {
            reason: Some(reason.clone()),
        });
        follow_ups.push(NewEvent::typed(StreamId::from(child.id), &deleted, metadata())?);
    }

    for role in models
        .roles
        .values()
        .filter(|role| role.deleted_at.is_none() && role.scope.intersects(path))
    {
        let deleted = RoleEvent::Deleted(RoleStatusChanged {
            reason: Some(reason.clone()),
        });
        follow_ups.push(NewEvent::typed(StreamId::from(role.id), &deleted, metadata())?);
    }

    Ok(follow_ups)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OrganizationProjection;

impl ProjectionHandler for OrganizationProjection {
    fn name(&self) -> &'static str {
        "organization"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(OrganizationEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = OrganizationId::from(event.stream_id);
        let op = AuditOperation::Update;

        match event.decode::<OrganizationEvent>()? {
            OrganizationEvent::Created(e) => {
                e.validate()?;
                check_placement(models, id, &e)?;
                insert_row(models, event, organizations, id, OrganizationRow::created(id, e, event));
            }
            OrganizationEvent::Updated(e) => {
                update_row(models, event, organizations, TABLE, &id, op, |row| row.apply_update(e))?;
            }
            OrganizationEvent::Deactivated(_) => {
                update_row(models, event, organizations, TABLE, &id, op, |row| {
                    row.ensure_live()?;
                    row.status = OrganizationStatus::Inactive;
                    row.deactivated_at = Some(event.created_at);
                    Ok(())
                })?;
            }
            OrganizationEvent::Reactivated(_) => {
                update_row(models, event, organizations, TABLE, &id, op, |row| {
                    row.ensure_live()?;
                    row.status = OrganizationStatus::Active;
                    row.deactivated_at = None;
                    Ok(())
                })?;
            }
            OrganizationEvent::Deleted(_) => {
                let path = models.organizations.require(TABLE, &id)?.path.clone();
                // Computed from live state so a redelivery after a failed
                // follow-up append still cascades.
                let follow_ups = if event.event_metadata.is_cascade() {
                    Vec::new()
                } else {
                    cascade(models, event, &path)?
                };

                update_row(models, event, organizations, TABLE, &id, AuditOperation::Delete, |row| {
                    row.status = OrganizationStatus::Deleted;
                    row.deleted_at.get_or_insert(event.created_at);
                    Ok(())
                })?;
                return Ok(HandlerOutput::with_follow_ups(follow_ups));
            }
        }

        Ok(HandlerOutput::none())
    }
}
