//! Event router: one stored event in, one handler invocation out.
//!
//! ```text
//! get(event_id) ─▶ stream lock ─▶ processed? ─yes─▶ Skipped
//!                                     │no
//!                     ▼
//!               route lookup ─none─▶ warn + mark processed ─▶ Unrouted
//!                     │
//!                     ▼
//!        version guard + handler.apply (projection write lock)
//!             │ok                         │err
//!             ▼                           ▼
//!   append new follow-ups ──────err────▶ record_failure ─▶ Failed
//!   mark processed ─▶ Processed
//! ```
//!
//! Processing of one stream is serialized: concurrent deliveries of the same
//! event (worker pool plus retry sweeper) apply it at most once.
//!
//! Handler failures never propagate to the caller as `Err`: they are stored on
//! the event row. `Err(RouterError)` means the store itself failed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, warn};

use carebase_core::{EventId, ExpectedVersion};
use carebase_events::{EventRecord, NewEvent, StreamKey, ensure_next_version};

use crate::event_store::{EventStore, EventStoreError};
use crate::projections::{ProjectionError, ProjectionStore, ReadModels};

/// Default slow-path threshold for a single event.
pub const DEFAULT_SLOW_EVENT: Duration = Duration::from_millis(100);

/// Registry key: an aggregate stream type, or the shared junction handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteKey {
    Stream(String),
    Relationship,
}

impl RouteKey {
    pub fn stream(stream_type: impl Into<String>) -> Self {
        RouteKey::Stream(stream_type.into())
    }

    pub fn for_event(event: &EventRecord) -> Self {
        if event.is_relationship() {
            RouteKey::Relationship
        } else {
            RouteKey::Stream(event.stream_type.clone())
        }
    }
}

impl core::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RouteKey::Stream(s) => f.write_str(s),
            RouteKey::Relationship => f.write_str("relationship"),
        }
    }
}

/// What a handler asks the runtime to do besides its table writes.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HandlerOutput {
    /// Events to append after the projection succeeds.
    pub follow_ups: Vec<NewEvent>,
}

impl HandlerOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_follow_ups(follow_ups: Vec<NewEvent>) -> Self {
        Self { follow_ups }
    }
}

/// One projection family.
///
/// `apply` must be idempotent: at-least-once delivery may hand it the same event
/// again after a failure elsewhere in the pipeline.
pub trait ProjectionHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn route(&self) -> RouteKey;

    /// Lifecycle handlers require strict per-stream version order.
    fn requires_version_guard(&self) -> bool {
        true
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError>;
}

/// Route → handler table.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<RouteKey, Box<dyn ProjectionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its route, returning any handler it replaced.
    pub fn register(&mut self, handler: Box<dyn ProjectionHandler>) -> Option<Box<dyn ProjectionHandler>> {
        self.handlers.insert(handler.route(), handler)
    }

    pub fn get(&self, route: &RouteKey) -> Option<&dyn ProjectionHandler> {
        self.handlers.get(route).map(|h| h.as_ref())
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteKey> {
        self.handlers.keys()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("routes", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Already processed; nothing done.
    Skipped,
    /// Projected and marked processed; carries the appended follow-up events.
    Processed { follow_ups: Vec<EventRecord> },
    /// No handler for the route; marked processed so the stream is not blocked.
    Unrouted,
    /// Handler failed; error stored on the event row, left unprocessed.
    Failed { error: String },
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("event {0} not found")]
    NotFound(EventId),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Result of rebuilding the projections from the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Processed events re-applied to the fresh tables.
    pub replayed: usize,
    /// Events never successfully processed; left to normal processing.
    pub pending: usize,
    /// Processed events with no handler registered any more.
    pub unrouted: usize,
    /// Processed events whose handler now rejects them.
    pub rejected: usize,
}

/// One mutex per stream seen by this router.
#[derive(Debug, Default)]
struct StreamLocks {
    inner: Mutex<HashMap<StreamKey, Arc<Mutex<()>>>>,
}

impl StreamLocks {
    fn for_stream(&self, key: StreamKey) -> Arc<Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key).or_default())
    }
}

pub struct EventRouter<S> {
    store: S,
    projections: Arc<ProjectionStore>,
    registry: Arc<HandlerRegistry>,
    slow_threshold: Duration,
    locks: StreamLocks,
}

impl<S> EventRouter<S>
where
    S: EventStore,
{
    pub fn new(store: S, projections: Arc<ProjectionStore>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            projections,
            registry,
            slow_threshold: DEFAULT_SLOW_EVENT,
            locks: StreamLocks::default(),
        }
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn projections(&self) -> &Arc<ProjectionStore> {
        &self.projections
    }

    pub fn process(&self, event_id: EventId) -> Result<ProcessOutcome, RouterError> {
        let event = self.store.get(event_id)?.ok_or(RouterError::NotFound(event_id))?;
        self.process_record(&event)
    }

    pub fn process_record(&self, event: &EventRecord) -> Result<ProcessOutcome, RouterError> {
        if event.is_processed() {
            debug!(event_id = %event.event_id, "event already processed; skipping");
            return Ok(ProcessOutcome::Skipped);
        }

        let lock = self.locks.for_stream(event.stream_key());
        let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);

        // The caller's copy may be stale by the time the lock is ours.
        let current = self
            .store
            .get(event.event_id)?
            .ok_or(RouterError::NotFound(event.event_id))?;
        if current.is_processed() {
            debug!(event_id = %event.event_id, "event processed concurrently; skipping");
            return Ok(ProcessOutcome::Skipped);
        }
        self.dispatch(&current)
    }

    fn dispatch(&self, event: &EventRecord) -> Result<ProcessOutcome, RouterError> {
        let started = Instant::now();
        let route = RouteKey::for_event(event);

        let Some(handler) = self.registry.get(&route) else {
            warn!(
                event_id = %event.event_id,
                stream = %event.stream_key(),
                event_type = %event.event_type,
                "no projection handler for route; marking processed"
            );
            self.store.mark_processed(event.event_id, Utc::now())?;
            return Ok(ProcessOutcome::Unrouted);
        };

        let output = match self.apply(handler, event) {
            Ok(output) => output,
            Err(err) => return self.fail(event, handler, err.to_string()),
        };
        // The projection write above stands either way; a redelivery re-applies
        // it idempotently and reuses the follow-ups already in the log.
        let follow_ups = match self.commit_follow_ups(event, output.follow_ups) {
            Ok(follow_ups) => follow_ups,
            Err(err) => return self.fail(event, handler, format!("follow-up append failed: {err}")),
        };

        let elapsed = started.elapsed();
        debug!(
            event_id = %event.event_id,
            stream = %event.stream_key(),
            event_type = %event.event_type,
            handler = handler.name(),
            follow_ups = follow_ups.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "event processed"
        );
        if elapsed > self.slow_threshold {
            warn!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                handler = handler.name(),
                elapsed_ms = elapsed.as_millis() as u64,
                "slow event processing"
            );
        }

        Ok(ProcessOutcome::Processed { follow_ups })
    }

    /// Append the follow-ups `event` caused, then mark it processed.
    ///
    /// A follow-up whose target stream already holds an event of the same type
    /// caused by `event` is not appended again.
    fn commit_follow_ups(&self, event: &EventRecord, follow_ups: Vec<NewEvent>) -> Result<Vec<EventRecord>, EventStoreError> {
        let mut committed = Vec::with_capacity(follow_ups.len());
        for next in follow_ups {
            let prior = self.store.load_stream(&next.stream_key())?.into_iter().find(|prior| {
                prior.event_metadata.causation_id == Some(event.event_id) && prior.event_type == next.event_type
            });
            let record = match prior {
                Some(prior) => {
                    debug!(event_id = %prior.event_id, cause = %event.event_id, "follow-up already appended");
                    prior
                }
                None => self.store.append(next, ExpectedVersion::Any)?,
            };
            committed.push(record);
        }
        self.store.mark_processed(event.event_id, Utc::now())?;
        Ok(committed)
    }

    fn fail(&self, event: &EventRecord, handler: &dyn ProjectionHandler, message: String) -> Result<ProcessOutcome, RouterError> {
        let updated = self.store.record_failure(event.event_id, &message, Utc::now())?;
        error!(
            event_id = %event.event_id,
            stream = %event.stream_key(),
            event_type = %event.event_type,
            handler = handler.name(),
            retry_count = updated.retry_count,
            error = %message,
            "projection handler failed"
        );
        Ok(ProcessOutcome::Failed { error: message })
    }

    /// Clear every table and re-apply all processed events in global sequence
    /// order.
    ///
    /// Processing state in the store is left untouched and follow-ups are not
    /// re-emitted: they are already in the log. Workers should be quiet while
    /// this runs.
    pub fn replay(&self) -> Result<ReplayReport, RouterError> {
        let events = self.store.load_all()?;
        let started = Instant::now();

        let report = self.projections.write(|models| {
            *models = ReadModels::default();
            let mut report = ReplayReport::default();

            for event in &events {
                if !event.is_processed() {
                    report.pending += 1;
                    continue;
                }
                let Some(handler) = self.registry.get(&RouteKey::for_event(event)) else {
                    report.unrouted += 1;
                    continue;
                };
                match handler.apply(event, models) {
                    Ok(_) => report.replayed += 1,
                    Err(err) => {
                        warn!(
                            event_id = %event.event_id,
                            event_type = %event.event_type,
                            handler = handler.name(),
                            error = %err,
                            "processed event rejected during replay"
                        );
                        report.rejected += 1;
                    }
                }
            }
            report
        })?;

        debug!(
            replayed = report.replayed,
            pending = report.pending,
            rejected = report.rejected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "projections rebuilt"
        );
        Ok(report)
    }

    fn apply(&self, handler: &dyn ProjectionHandler, event: &EventRecord) -> Result<HandlerOutput, ProjectionError> {
        if handler.requires_version_guard() {
            let last = self
                .store
                .last_processed_version(&event.stream_key())
                .map_err(|e| ProjectionError::Storage(e.to_string()))?;
            ensure_next_version(last, event)?;
        }
        self.projections.write(|models| handler.apply(event, models))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use carebase_core::{DomainError, StreamId};
    use carebase_events::EventMetadata;
    use serde_json::json;

    /// Fails on any payload containing `"fail": true`; otherwise emits nothing.
    struct Switch;

    impl ProjectionHandler for Switch {
        fn name(&self) -> &'static str {
            "switch"
        }

        fn route(&self) -> RouteKey {
            RouteKey::stream("switch")
        }

        fn apply(&self, event: &EventRecord, _models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
            if event.event_data.get("fail") == Some(&json!(true)) {
                return Err(DomainError::validation("switch asked to fail").into());
            }
            Ok(HandlerOutput::none())
        }
    }

    fn router() -> EventRouter<Arc<InMemoryEventStore>> {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(Switch));
        EventRouter::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(ProjectionStore::new()),
            Arc::new(registry),
        )
    }

    fn append(router: &EventRouter<Arc<InMemoryEventStore>>, stream: StreamId, stream_type: &str, data: serde_json::Value) -> EventRecord {
        let ev = NewEvent::new(stream, stream_type, "switch.touched", data, EventMetadata::new()).unwrap();
        router.store().append(ev, ExpectedVersion::Any).unwrap()
    }

    #[test]
    fn unknown_stream_type_is_marked_processed() {
        let router = router();
        let ev = append(&router, StreamId::new(), "nowhere", json!({"a": 1}));

        assert_eq!(router.process(ev.event_id).unwrap(), ProcessOutcome::Unrouted);
        assert!(router.store().get(ev.event_id).unwrap().unwrap().is_processed());
    }

    #[test]
    fn failure_is_recorded_and_event_left_unprocessed() {
        let router = router();
        let ev = append(&router, StreamId::new(), "switch", json!({"fail": true}));

        let outcome = router.process(ev.event_id).unwrap();
        assert!(matches!(outcome, ProcessOutcome::Failed { ref error } if error.contains("switch asked to fail")));

        let stored = router.store().get(ev.event_id).unwrap().unwrap();
        assert!(!stored.is_processed());
        assert_eq!(stored.retry_count, 1);
    }

    #[test]
    fn processed_event_is_skipped() {
        let router = router();
        let ev = append(&router, StreamId::new(), "switch", json!({"ok": true}));

        assert!(matches!(router.process(ev.event_id).unwrap(), ProcessOutcome::Processed { .. }));
        assert_eq!(router.process(ev.event_id).unwrap(), ProcessOutcome::Skipped);
    }

    #[test]
    fn out_of_order_event_fails_the_version_guard() {
        let router = router();
        let stream = StreamId::new();
        let _v1 = append(&router, stream, "switch", json!({"n": 1}));
        let v2 = append(&router, stream, "switch", json!({"n": 2}));

        let outcome = router.process(v2.event_id).unwrap();
        assert!(matches!(outcome, ProcessOutcome::Failed { ref error } if error.contains("expected version 1, found 2")));
    }

    #[test]
    fn missing_event_is_an_error() {
        let router = router();
        assert!(matches!(router.process(EventId::new()), Err(RouterError::NotFound(_))));
    }

    /// Fans one event out to a follow-up on each target stream.
    struct Fanout {
        targets: Vec<StreamId>,
    }

    impl ProjectionHandler for Fanout {
        fn name(&self) -> &'static str {
            "fanout"
        }

        fn route(&self) -> RouteKey {
            RouteKey::stream("fanout")
        }

        fn apply(&self, event: &EventRecord, _models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
            let follow_ups = self
                .targets
                .iter()
                .map(|target| {
                    let metadata = EventMetadata::cascaded_from(event.event_id, &event.event_metadata, "fanned out");
                    NewEvent::new(*target, "sink", "sink.touched", json!({"from": event.event_id}), metadata)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(HandlerOutput::with_follow_ups(follow_ups))
        }
    }

    /// Lets `budget` cascade appends through, then fails the next ones.
    struct MeteredStore {
        inner: InMemoryEventStore,
        budget: Mutex<Option<usize>>,
    }

    impl EventStore for MeteredStore {
        fn append(&self, event: NewEvent, expected: ExpectedVersion) -> Result<EventRecord, EventStoreError> {
            if event.event_metadata.is_cascade() {
                let mut budget = self.budget.lock().unwrap();
                match *budget {
                    Some(0) => return Err(EventStoreError::Storage("disk full".into())),
                    Some(n) => *budget = Some(n - 1),
                    None => {}
                }
            }
            self.inner.append(event, expected)
        }

        fn get(&self, event_id: EventId) -> Result<Option<EventRecord>, EventStoreError> {
            self.inner.get(event_id)
        }

        fn load_stream(&self, stream: &StreamKey) -> Result<Vec<EventRecord>, EventStoreError> {
            self.inner.load_stream(stream)
        }

        fn load_all(&self) -> Result<Vec<EventRecord>, EventStoreError> {
            self.inner.load_all()
        }

        fn last_processed_version(&self, stream: &StreamKey) -> Result<u64, EventStoreError> {
            self.inner.last_processed_version(stream)
        }

        fn unprocessed(&self) -> Result<Vec<EventRecord>, EventStoreError> {
            self.inner.unprocessed()
        }

        fn mark_processed(&self, event_id: EventId, at: chrono::DateTime<Utc>) -> Result<(), EventStoreError> {
            self.inner.mark_processed(event_id, at)
        }

        fn record_failure(&self, event_id: EventId, error: &str, at: chrono::DateTime<Utc>) -> Result<EventRecord, EventStoreError> {
            self.inner.record_failure(event_id, error, at)
        }
    }

    #[test]
    fn failed_follow_up_append_is_recorded_and_not_repeated_on_retry() {
        let targets = vec![StreamId::new(), StreamId::new()];
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(Fanout { targets: targets.clone() }));
        let router = EventRouter::new(
            MeteredStore {
                inner: InMemoryEventStore::new(),
                budget: Mutex::new(Some(1)),
            },
            Arc::new(ProjectionStore::new()),
            Arc::new(registry),
        );

        let ev = NewEvent::new(StreamId::new(), "fanout", "fanout.started", json!({"n": 1}), EventMetadata::new()).unwrap();
        let ev = router.store().append(ev, ExpectedVersion::Any).unwrap();

        let outcome = router.process(ev.event_id).unwrap();
        assert!(matches!(outcome, ProcessOutcome::Failed { ref error } if error.contains("disk full")));
        let stored = router.store().get(ev.event_id).unwrap().unwrap();
        assert!(!stored.is_processed());
        assert_eq!(stored.retry_count, 1);
        assert!(stored.processing_error.is_some());

        *router.store().budget.lock().unwrap() = None;
        let ProcessOutcome::Processed { follow_ups } = router.process(ev.event_id).unwrap() else {
            panic!("retry should succeed");
        };
        assert_eq!(follow_ups.len(), 2);
        for target in targets {
            let sink = router.store().load_stream(&StreamKey::new(target, "sink")).unwrap();
            assert_eq!(sink.len(), 1, "one follow-up per target");
            assert_eq!(sink[0].event_metadata.causation_id, Some(ev.event_id));
        }
    }
}
