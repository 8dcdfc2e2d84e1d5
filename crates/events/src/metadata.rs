use serde::{Deserialize, Serialize};
use uuid::Uuid;

use carebase_core::{EventId, UserId};

/// Source tag carried by events synthesized inside the projection pipeline.
pub const CASCADE_SOURCE: &str = "cascade";

/// Structured context stored alongside every event.
///
/// None of these fields influence projection semantics except `source`, which
/// marks synthesized follow-up events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Human-readable justification for the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl EventMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Metadata for an event synthesized in reaction to `cause`.
    ///
    /// Keeps the acting user and correlation chain; the correlation id falls back
    /// to the causing event id when the cause had none.
    pub fn cascaded_from(cause_id: EventId, cause: &EventMetadata, reason: impl Into<String>) -> Self {
        Self {
            user_id: cause.user_id,
            reason: Some(reason.into()),
            correlation_id: cause.correlation_id.or(Some(*cause_id.as_uuid())),
            causation_id: Some(cause_id),
            source: Some(CASCADE_SOURCE.to_string()),
            tags: cause.tags.clone(),
        }
    }

    pub fn is_cascade(&self) -> bool {
        self.source.as_deref() == Some(CASCADE_SOURCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascade_metadata_links_back_to_cause() {
        let user = UserId::new();
        let cause_id = EventId::new();
        let cause = EventMetadata::by_user(user).with_reason("closing campus");

        let derived = EventMetadata::cascaded_from(cause_id, &cause, "parent deleted");

        assert_eq!(derived.user_id, Some(user));
        assert_eq!(derived.causation_id, Some(cause_id));
        assert_eq!(derived.correlation_id, Some(*cause_id.as_uuid()));
        assert!(derived.is_cascade());
        assert!(!cause.is_cascade());
    }

    #[test]
    fn empty_metadata_serializes_compactly() {
        let json = serde_json::to_value(EventMetadata::new()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
