//! Event primitives for the append-only domain event log.
//!
//! - `NewEvent` is what writers hand to the store; `EventRecord` is what the store
//!   hands back (global sequence, stream version, processing state).
//! - `DomainEvent` + `domain_events!` give each aggregate family a typed payload enum
//!   that round-trips through `(event_type, event_data)`.
//! - `guard` holds the per-stream "exactly one more than last processed" check.
//! - `bus` distributes committed records to consumers.

pub mod bus;
pub mod event;
pub mod event_type;
pub mod guard;
pub mod in_memory_bus;
pub mod metadata;
pub mod record;

pub use bus::{EventBus, Subscription};
pub use event::{DomainEvent, EventDecodeError};
pub use event_type::{EventType, EventValidationError};
pub use guard::{VersionConflict, ensure_next_version};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use metadata::EventMetadata;
pub use record::{EventRecord, NewEvent, StreamKey};

#[doc(hidden)]
pub use serde_json as __serde_json;
