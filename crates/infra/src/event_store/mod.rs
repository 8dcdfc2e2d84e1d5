//! Append-only domain event log.
//!
//! The store is the single source of truth: projections are derived from it and
//! can be rebuilt by replaying it. Only the processing-outcome columns of a row
//! ever change after append.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

use chrono::{DateTime, Utc};
use tracing::warn;

use carebase_core::{EventId, ExpectedVersion};
use carebase_events::{EventBus, EventRecord, NewEvent, StreamKey};

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError};

/// Adapter that publishes committed events to an `EventBus` after a successful append.
///
/// Publication is best-effort: the append already made the event durable, so a
/// failed publish is logged and the event waits for the retry sweep.
pub struct PublishingEventStore<S, B> {
    store: S,
    bus: B,
}

impl<S, B> PublishingEventStore<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> EventStore for PublishingEventStore<S, B>
where
    S: EventStore,
    B: EventBus<EventRecord>,
{
    fn append(&self, event: NewEvent, expected: ExpectedVersion) -> Result<EventRecord, EventStoreError> {
        let committed = self.store.append(event, expected)?;

        if let Err(err) = self.bus.publish(committed.clone()) {
            warn!(
                event_id = %committed.event_id,
                stream = %committed.stream_key(),
                error = ?err,
                "failed to publish committed event; left for retry sweep"
            );
        }

        Ok(committed)
    }

    fn get(&self, event_id: EventId) -> Result<Option<EventRecord>, EventStoreError> {
        self.store.get(event_id)
    }

    fn load_stream(&self, stream: &StreamKey) -> Result<Vec<EventRecord>, EventStoreError> {
        self.store.load_stream(stream)
    }

    fn load_all(&self) -> Result<Vec<EventRecord>, EventStoreError> {
        self.store.load_all()
    }

    fn last_processed_version(&self, stream: &StreamKey) -> Result<u64, EventStoreError> {
        self.store.last_processed_version(stream)
    }

    fn unprocessed(&self) -> Result<Vec<EventRecord>, EventStoreError> {
        self.store.unprocessed()
    }

    fn mark_processed(&self, event_id: EventId, at: DateTime<Utc>) -> Result<(), EventStoreError> {
        self.store.mark_processed(event_id, at)
    }

    fn record_failure(&self, event_id: EventId, error: &str, at: DateTime<Utc>) -> Result<EventRecord, EventStoreError> {
        self.store.record_failure(event_id, error, at)
    }
}
