//! Background workers: the sharded stream consumer pool.

pub mod stream_worker;

use std::sync::mpsc;
use std::thread;

pub use stream_worker::{StreamWorkerPool, drain_stream};

/// Handle to stop and join a background worker and its helper threads.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    joins: Vec<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn new(shutdown: mpsc::Sender<()>, joins: Vec<thread::JoinHandle<()>>) -> Self {
        Self { shutdown, joins }
    }

    /// Request graceful shutdown and wait for every thread to stop.
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
        for join in self.joins {
            let _ = join.join();
        }
    }
}
