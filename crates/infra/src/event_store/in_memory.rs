use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use carebase_core::{EventId, ExpectedVersion};
use carebase_events::{EventRecord, NewEvent, StreamKey};

use super::r#trait::{EventStore, EventStoreError};

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<StreamKey, Vec<EventRecord>>,
    /// event id -> (stream, index into that stream)
    index: HashMap<EventId, (StreamKey, usize)>,
    next_sequence: u64,
}

impl Inner {
    fn locate(&self, event_id: EventId) -> Option<&EventRecord> {
        let (key, idx) = self.index.get(&event_id)?;
        self.streams.get(key)?.get(*idx)
    }

    fn locate_mut(&mut self, event_id: EventId) -> Result<&mut EventRecord, EventStoreError> {
        let (key, idx) = self
            .index
            .get(&event_id)
            .ok_or(EventStoreError::NotFound(event_id))?;
        self.streams
            .get_mut(key)
            .and_then(|s| s.get_mut(*idx))
            .ok_or(EventStoreError::NotFound(event_id))
    }
}

/// In-memory append-only event store.
///
/// Intended for tests/dev and the inline processing mode. Not optimized for
/// performance: whole-log scans are linear.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, EventStoreError> {
        self.inner
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, EventStoreError> {
        self.inner
            .write()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))
    }

    fn head(stream: &[EventRecord]) -> u64 {
        stream.last().map(|e| e.stream_version).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, event: NewEvent, expected: ExpectedVersion) -> Result<EventRecord, EventStoreError> {
        let key = event.stream_key();
        let mut inner = self.write()?;

        if inner.index.contains_key(&event.event_id) {
            return Err(EventStoreError::Storage(format!(
                "duplicate event_id {}",
                event.event_id
            )));
        }

        let head = inner.streams.get(&key).map(|s| Self::head(s)).unwrap_or(0);
        if !expected.matches(head) {
            return Err(EventStoreError::VersionConflict {
                stream: key,
                expected,
                actual: head,
            });
        }

        inner.next_sequence += 1;
        let sequence = inner.next_sequence;
        let record = EventRecord::commit(event, sequence, head + 1, Utc::now());

        let stream = inner.streams.entry(key.clone()).or_default();
        let idx = stream.len();
        stream.push(record.clone());
        inner.index.insert(record.event_id, (key, idx));

        Ok(record)
    }

    fn get(&self, event_id: EventId) -> Result<Option<EventRecord>, EventStoreError> {
        Ok(self.read()?.locate(event_id).cloned())
    }

    fn load_stream(&self, stream: &StreamKey) -> Result<Vec<EventRecord>, EventStoreError> {
        Ok(self.read()?.streams.get(stream).cloned().unwrap_or_default())
    }

    fn load_all(&self) -> Result<Vec<EventRecord>, EventStoreError> {
        let inner = self.read()?;
        let mut all: Vec<EventRecord> = inner.streams.values().flatten().cloned().collect();
        all.sort_by_key(|e| e.sequence_number);
        Ok(all)
    }

    fn last_processed_version(&self, stream: &StreamKey) -> Result<u64, EventStoreError> {
        let inner = self.read()?;
        Ok(inner
            .streams
            .get(stream)
            .and_then(|s| s.iter().filter(|e| e.is_processed()).map(|e| e.stream_version).max())
            .unwrap_or(0))
    }

    fn unprocessed(&self) -> Result<Vec<EventRecord>, EventStoreError> {
        let inner = self.read()?;
        let mut pending: Vec<EventRecord> = inner
            .streams
            .values()
            .flatten()
            .filter(|e| !e.is_processed())
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.sequence_number);
        Ok(pending)
    }

    fn mark_processed(&self, event_id: EventId, at: DateTime<Utc>) -> Result<(), EventStoreError> {
        let mut inner = self.write()?;
        inner.locate_mut(event_id)?.mark_processed(at);
        Ok(())
    }

    fn record_failure(&self, event_id: EventId, error: &str, at: DateTime<Utc>) -> Result<EventRecord, EventStoreError> {
        let mut inner = self.write()?;
        let record = inner.locate_mut(event_id)?;
        record.record_failure(error, at);
        Ok(record.clone())
    }
}
