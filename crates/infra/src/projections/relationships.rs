//! Junction rows for `.linked` / `.unlinked` events.
//!
//! Links are plain set membership: linking twice keeps one row, unlinking
//! removes the row outright. No version guard and no audit row.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use carebase_core::{EventId, UserId};
use carebase_events::EventRecord;
use carebase_organizations::{Link, LinkAction, Relationship};

use super::ProjectionError;
use super::store::ReadModels;
use crate::router::{HandlerOutput, ProjectionHandler, RouteKey};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkRow {
    pub table: &'static str,
    pub left: Uuid,
    pub right: Uuid,
    pub linked_by: Option<UserId>,
    pub linked_at: DateTime<Utc>,
    pub event_id: EventId,
}

impl LinkRow {
    fn new(link: &Link, event: &EventRecord) -> Self {
        Self {
            table: link.relationship.table_name(),
            left: link.left,
            right: link.right,
            linked_by: event.event_metadata.user_id,
            linked_at: event.created_at,
            event_id: event.event_id,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RelationshipProjection;

impl ProjectionHandler for RelationshipProjection {
    fn name(&self) -> &'static str {
        "relationship"
    }

    fn route(&self) -> RouteKey {
        RouteKey::Relationship
    }

    fn requires_version_guard(&self) -> bool {
        false
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let (relationship, action) = Relationship::classify(&event.event_type)?;
        let link = relationship.link_from(&event.event_type, &event.event_data)?;

        match action {
            LinkAction::Link => {
                models.links.insert_if_absent(link, LinkRow::new(&link, event));
            }
            LinkAction::Unlink => {
                models.links.remove(&link);
            }
        }
        Ok(HandlerOutput::none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebase_core::StreamId;
    use carebase_events::{EventMetadata, NewEvent};
    use serde_json::json;

    fn link_event(event_type: &str, contact: Uuid, phone: Uuid) -> EventRecord {
        let new = NewEvent::new(
            StreamId::new(),
            "contact",
            event_type,
            json!({ "contact_id": contact, "phone_id": phone }),
            EventMetadata::new(),
        )
        .unwrap();
        EventRecord::commit(new, 1, 1, Utc::now())
    }

    #[test]
    fn linking_twice_keeps_one_row_and_unlink_removes_it() {
        let mut models = ReadModels::default();
        let (contact, phone) = (Uuid::now_v7(), Uuid::now_v7());

        let first = link_event("contact.phone.linked", contact, phone);
        RelationshipProjection.apply(&first, &mut models).unwrap();
        RelationshipProjection
            .apply(&link_event("contact.phone.linked", contact, phone), &mut models)
            .unwrap();
        assert_eq!(models.links().len(), 1);
        let row = models.links().values().next().unwrap();
        assert_eq!(row.table, "contact_phones");
        assert_eq!(row.event_id, first.event_id);

        RelationshipProjection
            .apply(&link_event("contact.phone.unlinked", contact, phone), &mut models)
            .unwrap();
        assert!(models.links().is_empty());
        assert!(models.audit_log().is_empty());
    }

    #[test]
    fn missing_ids_fail() {
        let new = NewEvent::new(
            StreamId::new(),
            "contact",
            "contact.phone.linked",
            json!({ "contact_id": Uuid::now_v7() }),
            EventMetadata::new(),
        )
        .unwrap();
        let err = RelationshipProjection
            .apply(&EventRecord::commit(new, 1, 1, Utc::now()), &mut ReadModels::default())
            .unwrap_err();
        assert!(matches!(err, ProjectionError::Link(_)));
    }
}
