use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use carebase_events::{EventBus, EventRecord, StreamKey, Subscription};

use super::WorkerHandle;
use crate::event_store::EventStore;
use crate::router::{EventRouter, ProcessOutcome, RouterError};

/// Process a stream's unprocessed backlog in version order.
///
/// Stops at the first failure: later events of the stream cannot pass the
/// version guard until it is fixed. Returns how many events were processed.
pub fn drain_stream<S>(router: &EventRouter<S>, stream: &StreamKey) -> Result<usize, RouterError>
where
    S: EventStore,
{
    let mut processed = 0;
    for event in router.store().load_stream(stream)? {
        if event.is_processed() {
            continue;
        }
        match router.process_record(&event)? {
            ProcessOutcome::Failed { .. } => break,
            ProcessOutcome::Skipped => {}
            ProcessOutcome::Processed { .. } | ProcessOutcome::Unrouted => processed += 1,
        }
    }
    Ok(processed)
}

/// Sharded single-consumer pool fed by the event bus.
///
/// ```text
/// bus ─▶ dispatcher ─hash(stream) % n─▶ shard[i] ─▶ drain_stream
/// ```
///
/// Every stream maps to exactly one shard, so a stream is consumed by one
/// thread in version order while unrelated streams proceed in parallel.
/// Bus notices are hints; the shard re-reads the backlog from the store.
pub struct StreamWorkerPool<S> {
    router: Arc<EventRouter<S>>,
    shards: usize,
}

impl<S> StreamWorkerPool<S>
where
    S: EventStore + 'static,
{
    pub fn new(router: Arc<EventRouter<S>>, shards: usize) -> Self {
        Self {
            router,
            shards: shards.max(1),
        }
    }

    /// Subscribe to `bus` and start the dispatcher plus one thread per shard.
    pub fn spawn<B>(self, bus: &B) -> std::io::Result<WorkerHandle>
    where
        B: EventBus<EventRecord>,
    {
        let subscription = bus.subscribe();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let mut joins = Vec::with_capacity(self.shards + 1);
        let mut senders = Vec::with_capacity(self.shards);
        for shard in 0..self.shards {
            let (tx, rx) = mpsc::channel::<StreamKey>();
            let router = Arc::clone(&self.router);
            joins.push(
                thread::Builder::new()
                    .name(format!("carebase-stream-shard-{shard}"))
                    .spawn(move || shard_loop(shard, &router, rx))?,
            );
            senders.push(tx);
        }

        joins.push(
            thread::Builder::new()
                .name("carebase-stream-dispatcher".to_string())
                .spawn(move || dispatch_loop(subscription, shutdown_rx, senders))?,
        );

        info!(shards = self.shards, "stream worker pool started");
        Ok(WorkerHandle::new(shutdown_tx, joins))
    }
}

fn shard_for(stream: &StreamKey, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    stream.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

fn dispatch_loop(subscription: Subscription<EventRecord>, shutdown_rx: Receiver<()>, shards: Vec<Sender<StreamKey>>) {
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(tick) {
            Ok(event) => {
                let stream = event.stream_key();
                let shard = shard_for(&stream, shards.len());
                if shards[shard].send(stream).is_err() {
                    warn!(shard, event_id = %event.event_id, "stream shard is gone; notice dropped");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    // Dropping the senders stops the shards once their queues are empty.
    debug!("stream dispatcher stopped");
}

fn shard_loop<S>(shard: usize, router: &EventRouter<S>, notices: Receiver<StreamKey>)
where
    S: EventStore,
{
    while let Ok(stream) = notices.recv() {
        // Coalesce queued notices for the same stream.
        let mut pending = vec![stream];
        while let Ok(next) = notices.try_recv() {
            if !pending.contains(&next) {
                pending.push(next);
            }
        }

        for stream in pending {
            if let Err(err) = drain_stream(router, &stream) {
                warn!(shard, stream = %stream, error = %err, "stream worker failed to drain stream");
            }
        }
    }
    debug!(shard, "stream shard stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{InMemoryEventStore, PublishingEventStore};
    use crate::projections::{ProjectionError, ProjectionStore, ReadModels};
    use crate::router::{HandlerOutput, HandlerRegistry, ProjectionHandler, RouteKey};
    use carebase_core::{ExpectedVersion, StreamId};
    use carebase_events::{EventMetadata, InMemoryEventBus, NewEvent};
    use serde_json::json;
    use std::time::Instant;

    struct Noop;

    impl ProjectionHandler for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }

        fn route(&self) -> RouteKey {
            RouteKey::stream("noop")
        }

        fn apply(&self, _event: &EventRecord, _models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
            Ok(HandlerOutput::none())
        }
    }

    type Store = PublishingEventStore<InMemoryEventStore, Arc<InMemoryEventBus<EventRecord>>>;

    fn router(bus: &Arc<InMemoryEventBus<EventRecord>>) -> Arc<EventRouter<Arc<Store>>> {
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(Noop));
        Arc::new(EventRouter::new(
            Arc::new(PublishingEventStore::new(InMemoryEventStore::new(), bus.clone())),
            Arc::new(ProjectionStore::new()),
            Arc::new(registry),
        ))
    }

    #[test]
    fn shard_assignment_is_stable() {
        let key = StreamKey::new(StreamId::new(), "client");
        assert_eq!(shard_for(&key, 4), shard_for(&key.clone(), 4));
        assert!(shard_for(&key, 4) < 4);
        assert_eq!(shard_for(&key, 1), 0);
    }

    #[test]
    fn drain_processes_backlog_in_order() {
        let bus = Arc::new(InMemoryEventBus::new());
        let router = router(&bus);
        let stream = StreamId::new();
        for n in 0..3 {
            let ev = NewEvent::new(stream, "noop", "noop.touched", json!({ "n": n }), EventMetadata::new()).unwrap();
            router.store().append(ev, ExpectedVersion::Any).unwrap();
        }

        let key = StreamKey::new(stream, "noop");
        assert_eq!(drain_stream(&router, &key).unwrap(), 3);
        assert_eq!(router.store().last_processed_version(&key).unwrap(), 3);
        assert_eq!(drain_stream(&router, &key).unwrap(), 0);
    }

    #[test]
    fn pool_processes_published_events() {
        let bus = Arc::new(InMemoryEventBus::new());
        let router = router(&bus);
        let handle = StreamWorkerPool::new(router.clone(), 3).spawn(&bus).unwrap();

        let streams: Vec<_> = (0..5).map(|_| StreamId::new()).collect();
        for stream in &streams {
            for n in 0..4 {
                let ev = NewEvent::new(*stream, "noop", "noop.touched", json!({ "n": n }), EventMetadata::new()).unwrap();
                router.store().append(ev, ExpectedVersion::Any).unwrap();
            }
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while !router.store().unprocessed().unwrap().is_empty() {
            assert!(Instant::now() < deadline, "pool left events unprocessed");
            thread::sleep(Duration::from_millis(10));
        }
        for stream in streams {
            let key = StreamKey::new(stream, "noop");
            assert_eq!(router.store().last_processed_version(&key).unwrap(), 4);
        }
        handle.shutdown();
    }
}
