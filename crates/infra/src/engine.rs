//! Engine facade: the write entry point, processing, monitoring and rebuild.
//!
//! ```text
//! emit_event ─▶ EventStore::append ─┬─ inline ─▶ router (follow-ups too)
//!                                   └─ async ──▶ bus ─▶ StreamWorkerPool ─▶ router
//!                                                     RetrySweeper ─────────┘
//! ```
//!
//! Callers see only the outcome of the append. Processing failures are stored
//! on the event row and surface through `unprocessed_events`.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info, instrument};

use carebase_core::{EventId, ExpectedVersion, StreamId};
use carebase_events::{DomainEvent, EventBus, EventMetadata, EventRecord, EventValidationError, NewEvent, StreamKey};

use crate::config::{EngineConfig, ProcessingMode};
use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore};
use crate::projections::{ProjectionError, ProjectionStore, default_registry};
use crate::queries::ReadQueries;
use crate::retry::{RetryPolicy, RetrySweeper};
use crate::router::{EventRouter, ProcessOutcome, ReplayReport, RouterError};
use crate::workers::{StreamWorkerPool, WorkerHandle};

#[derive(Debug, Error)]
pub enum EngineError {
    /// `stream_version_expected_next` must be at least 1.
    #[error("expected next stream version must be at least 1")]
    InvalidExpectedVersion,

    #[error(transparent)]
    Validation(#[from] EventValidationError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

impl EngineError {
    /// The caller should recompute the next version and retry.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, EngineError::Store(EventStoreError::VersionConflict { .. }))
    }
}

/// One row of the unprocessed-events monitoring feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedEvent {
    pub event_id: EventId,
    pub stream: StreamKey,
    pub event_type: String,
    pub age: chrono::Duration,
    pub processing_error: Option<String>,
    pub retry_count: u32,
    /// Out of automatic retries; only `Engine::retry_event` re-attempts it.
    pub dead_lettered: bool,
}

pub struct Engine<S> {
    router: Arc<EventRouter<S>>,
    queries: ReadQueries,
    config: EngineConfig,
    policy: RetryPolicy,
}

impl Engine<Arc<InMemoryEventStore>> {
    /// In-memory engine with every built-in projection registered.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(InMemoryEventStore::new()), config)
    }
}

impl Engine<PostgresEventStore> {
    /// Postgres engine on `config.database_url`, creating the schema if missing.
    ///
    /// `runtime` drives the store's queries; the engine itself may be used from
    /// any thread.
    pub fn postgres(config: EngineConfig, runtime: tokio::runtime::Handle) -> Result<Self, EngineError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| EventStoreError::Storage("DATABASE_URL is not set".to_string()))?;
        let store = PostgresEventStore::connect(url, runtime)?;
        store.ensure_schema()?;
        Ok(Self::new(store, config))
    }
}

impl<S> Engine<S>
where
    S: EventStore + 'static,
{
    pub fn new(store: S, config: EngineConfig) -> Self {
        let projections = Arc::new(ProjectionStore::new());
        let router = EventRouter::new(store, Arc::clone(&projections), Arc::new(default_registry()))
            .with_slow_threshold(config.slow_event_threshold());
        Self {
            router: Arc::new(router),
            queries: ReadQueries::new(projections),
            policy: config.retry_policy(),
            config,
        }
    }

    pub fn store(&self) -> &S {
        self.router.store()
    }

    pub fn router(&self) -> &Arc<EventRouter<S>> {
        &self.router
    }

    pub fn queries(&self) -> &ReadQueries {
        &self.queries
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Append a fact at an explicit stream position.
    ///
    /// `stream_version_expected_next` is the version the new event must take;
    /// a concurrent writer that got there first yields a version conflict.
    #[instrument(skip(self, event_data, event_metadata))]
    pub fn emit_event(
        &self,
        stream_id: StreamId,
        stream_type: &str,
        stream_version_expected_next: u64,
        event_type: &str,
        event_data: JsonValue,
        event_metadata: EventMetadata,
    ) -> Result<EventId, EngineError> {
        if stream_version_expected_next == 0 {
            return Err(EngineError::InvalidExpectedVersion);
        }
        let event = NewEvent::new(stream_id, stream_type, event_type, event_data, event_metadata)?;
        let expected = ExpectedVersion::Exact(stream_version_expected_next - 1);
        Ok(self.commit(event, expected)?.event_id)
    }

    /// Typed variant of `emit_event`.
    pub fn emit<E: DomainEvent>(
        &self,
        stream_id: StreamId,
        stream_version_expected_next: u64,
        event: &E,
        metadata: EventMetadata,
    ) -> Result<EventId, EngineError> {
        if stream_version_expected_next == 0 {
            return Err(EngineError::InvalidExpectedVersion);
        }
        let event = NewEvent::typed(stream_id, event, metadata)?;
        let expected = ExpectedVersion::Exact(stream_version_expected_next - 1);
        Ok(self.commit(event, expected)?.event_id)
    }

    /// Append at the stream head, whatever it is.
    pub fn append(&self, event: NewEvent) -> Result<EventRecord, EngineError> {
        self.commit(event, ExpectedVersion::Any)
    }

    fn commit(&self, event: NewEvent, expected: ExpectedVersion) -> Result<EventRecord, EngineError> {
        let committed = self.router.store().append(event, expected)?;
        if self.config.processing_mode == ProcessingMode::Inline {
            // The append stands even if projecting it fails.
            if let Err(err) = self.process_cascade(committed.event_id) {
                error!(event_id = %committed.event_id, error = %err, "inline processing failed; left for retry sweep");
            }
        }
        Ok(committed)
    }

    /// Process one event (no follow-ups).
    pub fn process(&self, event_id: EventId) -> Result<ProcessOutcome, EngineError> {
        Ok(self.router.process(event_id)?)
    }

    /// Explicitly re-attempt one event, dead-lettered or not.
    ///
    /// Follow-ups of a successful attempt are processed too.
    pub fn retry_event(&self, event_id: EventId) -> Result<ProcessOutcome, EngineError> {
        info!(%event_id, "manual retry requested");
        self.process_cascade(event_id)
    }

    /// Process an event and, breadth-first, every follow-up it caused.
    fn process_cascade(&self, event_id: EventId) -> Result<ProcessOutcome, EngineError> {
        let first = self.router.process(event_id)?;

        let mut queue: VecDeque<EventRecord> = match &first {
            ProcessOutcome::Processed { follow_ups } => follow_ups.iter().cloned().collect(),
            _ => VecDeque::new(),
        };
        while let Some(next) = queue.pop_front() {
            if let ProcessOutcome::Processed { follow_ups } = self.router.process_record(&next)? {
                queue.extend(follow_ups);
            }
        }
        Ok(first)
    }

    /// Rebuild every projection from the log.
    pub fn rebuild_projections(&self) -> Result<ReplayReport, EngineError> {
        let report = self.router.replay()?;
        info!(
            replayed = report.replayed,
            pending = report.pending,
            rejected = report.rejected,
            "projections rebuilt from the event log"
        );
        Ok(report)
    }

    /// Monitoring feed: every event not yet successfully processed.
    pub fn unprocessed_events(&self, now: DateTime<Utc>) -> Result<Vec<FailedEvent>, EngineError> {
        Ok(self
            .router
            .store()
            .unprocessed()?
            .into_iter()
            .map(|event| FailedEvent {
                dead_lettered: self.policy.is_dead_lettered(&event),
                age: now - event.created_at,
                stream: event.stream_key(),
                event_id: event.event_id,
                event_type: event.event_type.to_string(),
                processing_error: event.processing_error,
                retry_count: event.retry_count,
            })
            .collect())
    }

    /// Start the retry sweeper at the configured interval.
    pub fn spawn_retry_sweeper(&self) -> std::io::Result<WorkerHandle> {
        RetrySweeper::new(Arc::clone(&self.router), self.policy.clone()).spawn(self.config.sweep_interval())
    }

    /// Start the sharded stream consumers on `bus`.
    ///
    /// Only meaningful when the store publishes to the same bus.
    pub fn spawn_stream_workers<B>(&self, bus: &B) -> std::io::Result<WorkerHandle>
    where
        B: EventBus<EventRecord>,
    {
        StreamWorkerPool::new(Arc::clone(&self.router), self.config.worker_shards).spawn(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebase_clinical::ClientStatus;
    use serde_json::json;

    fn engine() -> Engine<Arc<InMemoryEventStore>> {
        Engine::in_memory(EngineConfig::default())
    }

    fn registered() -> JsonValue {
        json!({
            "organization_id": carebase_core::OrganizationId::new(),
            "first_name": "Ada",
            "last_name": "Okafor",
            "date_of_birth": "1950-03-14"
        })
    }

    #[test]
    fn postgres_engine_requires_a_database_url() {
        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
        let err = Engine::postgres(EngineConfig::default(), runtime.handle().clone()).err().unwrap();
        assert!(matches!(err, EngineError::Store(EventStoreError::Storage(_))));
    }

    #[test]
    fn zero_expected_version_is_rejected() {
        let err = engine()
            .emit_event(StreamId::new(), "client", 0, "client.registered", registered(), EventMetadata::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidExpectedVersion));
    }

    #[test]
    fn malformed_event_type_is_rejected_before_append() {
        let engine = engine();
        let err = engine
            .emit_event(StreamId::new(), "client", 1, "Registered", registered(), EventMetadata::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(engine.store().load_all().unwrap().is_empty());
    }

    #[test]
    fn stale_writer_gets_a_version_conflict() {
        let engine = engine();
        let stream = StreamId::new();
        engine
            .emit_event(stream, "client", 1, "client.registered", registered(), EventMetadata::new())
            .unwrap();

        let err = engine
            .emit_event(stream, "client", 1, "client.registered", registered(), EventMetadata::new())
            .unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[test]
    fn inline_mode_projects_on_append() {
        let engine = engine();
        let stream = StreamId::new();
        engine
            .emit_event(stream, "client", 1, "client.registered", registered(), EventMetadata::new())
            .unwrap();

        let client = engine.queries().client(stream).unwrap().unwrap();
        assert_eq!(client.status, ClientStatus::Active);
        assert!(engine.unprocessed_events(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn handler_failure_surfaces_only_in_the_monitoring_feed() {
        let engine = engine();
        let stream = StreamId::new();
        // Discharging an unknown client fails in the handler, not at append.
        let id = engine
            .emit_event(
                stream,
                "client",
                1,
                "client.discharged",
                json!({"discharge_date": "2026-01-02", "discharge_reason": "moved"}),
                EventMetadata::new(),
            )
            .unwrap();

        let feed = engine.unprocessed_events(Utc::now()).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].event_id, id);
        assert_eq!(feed[0].retry_count, 1);
        assert!(feed[0].processing_error.is_some());
        assert!(!feed[0].dead_lettered);
    }
}
