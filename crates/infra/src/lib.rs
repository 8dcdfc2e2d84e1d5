//! Infrastructure layer: event store, router, projections, workers, engine.

pub mod config;
pub mod engine;
pub mod event_store;
pub mod projections;
pub mod queries;
pub mod retry;
pub mod router;
pub mod workers;


pub use config::{EngineConfig, ProcessingMode};
pub use engine::{Engine, EngineError, FailedEvent};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, PublishingEventStore};
pub use queries::ReadQueries;
pub use retry::{BackoffStrategy, RetryPolicy, RetrySweeper, SweepReport};
pub use router::{
    EventRouter, HandlerOutput, HandlerRegistry, ProcessOutcome, ProjectionHandler, ReplayReport, RouteKey, RouterError,
};
pub use workers::{StreamWorkerPool, WorkerHandle};
