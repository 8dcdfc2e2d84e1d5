//! Audit mirror.
//!
//! One denormalized row per row an event changes, keyed by (event id, resource
//! id) so replays and re-deliveries overwrite nothing. Not authoritative: the
//! event log is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use carebase_core::{EventId, OrganizationId, StreamId, UserId};
use carebase_events::EventRecord;

use super::store::ReadModels;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditOperation {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRow {
    pub event_id: EventId,
    pub organization_id: Option<OrganizationId>,
    pub event_type: String,
    /// First label of the event type (`client` for `client.discharged`).
    pub event_category: String,
    /// Last label of the event type.
    pub event_name: String,
    pub event_description: String,
    pub user_id: Option<UserId>,
    pub resource_type: String,
    pub resource_id: StreamId,
    pub operation: AuditOperation,
    pub old_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Mirror `event` into the audit log with before/after row images.
///
/// Serialization failures degrade to `None` images rather than failing the
/// projection.
pub(crate) fn record<T: Serialize>(
    models: &mut ReadModels,
    event: &EventRecord,
    organization_id: Option<OrganizationId>,
    operation: AuditOperation,
    before: Option<&T>,
    after: Option<&T>,
) {
    record_resource(models, event, event.stream_id, organization_id, operation, before, after);
}

/// Like `record`, for a row of the same family on another stream that `event`
/// changed as a side effect.
pub(crate) fn record_resource<T: Serialize>(
    models: &mut ReadModels,
    event: &EventRecord,
    resource_id: StreamId,
    organization_id: Option<OrganizationId>,
    operation: AuditOperation,
    before: Option<&T>,
    after: Option<&T>,
) {
    let image = |row: Option<&T>| row.and_then(|r| serde_json::to_value(r).ok());

    let description = event
        .event_metadata
        .reason
        .clone()
        .unwrap_or_else(|| format!("{} on {}", event.event_type, event.stream_key()));

    let row = AuditRow {
        event_id: event.event_id,
        organization_id,
        event_type: event.event_type.to_string(),
        event_category: event.event_type.domain().to_string(),
        event_name: event.event_type.action().to_string(),
        event_description: description,
        user_id: event.event_metadata.user_id,
        resource_type: event.stream_type.clone(),
        resource_id,
        operation,
        old_values: image(before),
        new_values: image(after),
        metadata: serde_json::to_value(&event.event_metadata).unwrap_or(JsonValue::Null),
        created_at: event.created_at,
    };

    models.audit_log.insert_if_absent((event.event_id, resource_id), row);
}
