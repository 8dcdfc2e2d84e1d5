//! Distribution of committed events to asynchronous consumers.
//!
//! The event store is the source of truth; the bus only tells consumers that
//! something new landed. Delivery is at-least-once and consumers must be
//! idempotent: the stream worker re-reads the stream's unprocessed backlog from
//! the store on every notice, so a duplicated or dropped notice never changes
//! what gets projected.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Receiving end of a bus subscription.
///
/// Each subscription gets its own copy of every published message. Meant for a
/// single consuming thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout`; workers use this to poll their shutdown signal.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Publish/subscribe transport for committed events.
///
/// ```text
/// emit_event → EventStore::append → EventBus::publish → StreamWorkerPool → router
/// ```
///
/// Publication happens only after a successful append. A failed publish leaves
/// the event unprocessed in the store, where the retry sweep picks it up.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
