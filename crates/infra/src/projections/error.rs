use thiserror::Error;

use carebase_core::DomainError;
use carebase_events::{EventDecodeError, EventValidationError, VersionConflict};
use carebase_organizations::LinkError;

/// Handler-time failure.
///
/// Never returned to the original writer: the router records it on the event
/// row (`processing_error`, `retry_count`) and leaves the event unprocessed.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    VersionConflict(#[from] VersionConflict),

    #[error("{0}")]
    Decode(EventDecodeError),

    #[error("{table} row {id} not found")]
    NotFound { table: &'static str, id: String },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("no `{stream_type}` projection case for `{event_type}`")]
    UnhandledEventType { stream_type: String, event_type: String },

    /// A synthesized follow-up event failed shape validation.
    #[error("invalid follow-up event: {0}")]
    FollowUp(#[from] EventValidationError),

    #[error("projection storage failure: {0}")]
    Storage(String),
}

impl ProjectionError {
    pub fn not_found(table: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            table,
            id: id.to_string(),
        }
    }
}

impl From<EventDecodeError> for ProjectionError {
    fn from(err: EventDecodeError) -> Self {
        match err {
            EventDecodeError::UnknownEventType { stream_type, event_type } => {
                ProjectionError::UnhandledEventType { stream_type, event_type }
            }
            other => ProjectionError::Decode(other),
        }
    }
}
