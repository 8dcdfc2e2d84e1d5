use chrono::{DateTime, Utc};
use thiserror::Error;

use carebase_core::{EventId, ExpectedVersion};
use carebase_events::{EventRecord, EventValidationError, NewEvent, StreamKey};
use std::sync::Arc;

/// Event store operation error.
///
/// Append-time errors are reported synchronously to the writer. Processing
/// failures never surface here; they are recorded on the event row instead.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Malformed event shape, rejected before append.
    #[error("invalid event: {0}")]
    Validation(#[from] EventValidationError),

    /// Another writer already claimed the version; recompute and retry.
    #[error("version conflict on {stream}: expected head {expected:?}, found {actual}")]
    VersionConflict {
        stream: StreamKey,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("event not found: {0}")]
    NotFound(EventId),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Append-only domain event log.
///
/// Streams are keyed by `(stream_id, stream_type)`. Within a stream
/// `stream_version` is contiguous from 1; across all streams `sequence_number` is
/// a single monotonically increasing counter.
///
/// The fact columns of a stored event never change. Only its processing outcome
/// (`processed_at`, `processing_error`, `retry_count`, `last_attempt_at`) is
/// updated, through `mark_processed` / `record_failure`.
pub trait EventStore: Send + Sync {
    /// Append one event.
    ///
    /// `ExpectedVersion::Exact(v)` requires the stream head to be `v`; the event
    /// lands at `v + 1`. `Any` appends at `head + 1`. The check and the insert are
    /// atomic per stream.
    fn append(&self, event: NewEvent, expected: ExpectedVersion) -> Result<EventRecord, EventStoreError>;

    fn get(&self, event_id: EventId) -> Result<Option<EventRecord>, EventStoreError>;

    /// All events of one stream in `stream_version` order.
    fn load_stream(&self, stream: &StreamKey) -> Result<Vec<EventRecord>, EventStoreError>;

    /// Every event in global `sequence_number` order.
    fn load_all(&self) -> Result<Vec<EventRecord>, EventStoreError>;

    /// Highest `stream_version` with `processed_at` set (0 if none).
    fn last_processed_version(&self, stream: &StreamKey) -> Result<u64, EventStoreError>;

    /// Events with `processed_at` unset, in global sequence order.
    fn unprocessed(&self) -> Result<Vec<EventRecord>, EventStoreError>;

    fn mark_processed(&self, event_id: EventId, at: DateTime<Utc>) -> Result<(), EventStoreError>;

    /// Store the error text, bump `retry_count`; returns the updated record.
    fn record_failure(&self, event_id: EventId, error: &str, at: DateTime<Utc>) -> Result<EventRecord, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(&self, event: NewEvent, expected: ExpectedVersion) -> Result<EventRecord, EventStoreError> {
        (**self).append(event, expected)
    }

    fn get(&self, event_id: EventId) -> Result<Option<EventRecord>, EventStoreError> {
        (**self).get(event_id)
    }

    fn load_stream(&self, stream: &StreamKey) -> Result<Vec<EventRecord>, EventStoreError> {
        (**self).load_stream(stream)
    }

    fn load_all(&self) -> Result<Vec<EventRecord>, EventStoreError> {
        (**self).load_all()
    }

    fn last_processed_version(&self, stream: &StreamKey) -> Result<u64, EventStoreError> {
        (**self).last_processed_version(stream)
    }

    fn unprocessed(&self) -> Result<Vec<EventRecord>, EventStoreError> {
        (**self).unprocessed()
    }

    fn mark_processed(&self, event_id: EventId, at: DateTime<Utc>) -> Result<(), EventStoreError> {
        (**self).mark_processed(event_id, at)
    }

    fn record_failure(&self, event_id: EventId, error: &str, at: DateTime<Utc>) -> Result<EventRecord, EventStoreError> {
        (**self).record_failure(event_id, error, at)
    }
}
