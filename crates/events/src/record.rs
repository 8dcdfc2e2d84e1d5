use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use carebase_core::{EventId, StreamId};

use crate::event::{DomainEvent, EventDecodeError};
use crate::event_type::{EventType, EventValidationError, validate_stream_type};
use crate::metadata::EventMetadata;

/// Identity of one event stream: `(stream_id, stream_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub stream_id: StreamId,
    pub stream_type: String,
}

impl StreamKey {
    pub fn new(stream_id: StreamId, stream_type: impl Into<String>) -> Self {
        Self {
            stream_id,
            stream_type: stream_type.into(),
        }
    }
}

impl core::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.stream_type, self.stream_id)
    }
}

/// An event ready to be appended (no sequence number or stream version yet).
///
/// Construction validates the shape: `event_type` is dotted lowercase,
/// `stream_type` is a lowercase identifier and `event_data` is a non-empty object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_id: EventId,
    pub stream_id: StreamId,
    pub stream_type: String,
    pub event_type: EventType,
    pub event_data: JsonValue,
    pub event_metadata: EventMetadata,
}

impl NewEvent {
    pub fn new(
        stream_id: StreamId,
        stream_type: impl Into<String>,
        event_type: &str,
        event_data: JsonValue,
        event_metadata: EventMetadata,
    ) -> Result<Self, EventValidationError> {
        let stream_type = stream_type.into();
        validate_stream_type(&stream_type)?;
        let event_type = EventType::parse(event_type)?;
        validate_event_data(&event_data)?;

        Ok(Self {
            event_id: EventId::new(),
            stream_id,
            stream_type,
            event_type,
            event_data,
            event_metadata,
        })
    }

    /// Build from a typed domain event; the stream type comes from the event family.
    pub fn typed<E: DomainEvent>(
        stream_id: StreamId,
        event: &E,
        event_metadata: EventMetadata,
    ) -> Result<Self, EventValidationError> {
        let data = event
            .to_data()
            .map_err(|e| EventValidationError::Payload(e.to_string()))?;
        Self::new(stream_id, E::STREAM_TYPE, event.event_type(), data, event_metadata)
    }

    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(self.stream_id, self.stream_type.clone())
    }
}

fn validate_event_data(data: &JsonValue) -> Result<(), EventValidationError> {
    match data {
        JsonValue::Object(map) if map.is_empty() => Err(EventValidationError::EmptyData),
        JsonValue::Object(_) => Ok(()),
        _ => Err(EventValidationError::NonObjectData),
    }
}

/// A stored event: the immutable fact plus its mutable processing outcome.
///
/// `sequence_number` is the global total order (auditing only);
/// `stream_version` is the 1-based, contiguous position inside the stream and is
/// what processing order is based on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: EventId,
    pub sequence_number: u64,
    pub stream_id: StreamId,
    pub stream_type: String,
    pub stream_version: u64,
    pub event_type: EventType,
    pub event_data: JsonValue,
    pub event_metadata: EventMetadata,
    pub created_at: DateTime<Utc>,

    // Processing state
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_error: Option<String>,
    pub retry_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl EventRecord {
    /// Commit an uncommitted event at the given position.
    pub fn commit(event: NewEvent, sequence_number: u64, stream_version: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            event_id: event.event_id,
            sequence_number,
            stream_id: event.stream_id,
            stream_type: event.stream_type,
            stream_version,
            event_type: event.event_type,
            event_data: event.event_data,
            event_metadata: event.event_metadata,
            created_at,
            processed_at: None,
            processing_error: None,
            retry_count: 0,
            last_attempt_at: None,
        }
    }

    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(self.stream_id, self.stream_type.clone())
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    pub fn is_relationship(&self) -> bool {
        self.event_type.is_relationship()
    }

    /// Deserialize `event_data` into a payload struct.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.event_data.clone())
    }

    /// Decode into the typed event family for this stream.
    pub fn decode<E: DomainEvent>(&self) -> Result<E, EventDecodeError> {
        E::decode(self.event_type.as_str(), &self.event_data)
    }

    pub fn mark_processed(&mut self, at: DateTime<Utc>) {
        self.processed_at = Some(at);
        self.processing_error = None;
        self.last_attempt_at = Some(at);
    }

    pub fn record_failure(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.processing_error = Some(error.into());
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_attempt_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_event(data: JsonValue) -> Result<NewEvent, EventValidationError> {
        NewEvent::new(StreamId::new(), "client", "client.registered", data, EventMetadata::new())
    }

    #[test]
    fn rejects_empty_or_non_object_data() {
        assert_eq!(new_event(json!({})).unwrap_err(), EventValidationError::EmptyData);
        assert_eq!(new_event(json!([1, 2])).unwrap_err(), EventValidationError::NonObjectData);
        assert_eq!(new_event(json!(null)).unwrap_err(), EventValidationError::NonObjectData);
        assert!(new_event(json!({"first_name": "Jane"})).is_ok());
    }

    #[test]
    fn rejects_bad_stream_type() {
        let err = NewEvent::new(StreamId::new(), "Client", "client.registered", json!({"a": 1}), EventMetadata::new())
            .unwrap_err();
        assert!(matches!(err, EventValidationError::InvalidStreamType(_)));
    }

    #[test]
    fn failure_then_success_updates_processing_state() {
        let event = new_event(json!({"first_name": "Jane"})).unwrap();
        let mut record = EventRecord::commit(event, 1, 1, Utc::now());
        assert!(!record.is_processed());

        record.record_failure("boom", Utc::now());
        record.record_failure("boom again", Utc::now());
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.processing_error.as_deref(), Some("boom again"));
        assert!(!record.is_processed());

        record.mark_processed(Utc::now());
        assert!(record.is_processed());
        assert_eq!(record.processing_error, None);
        assert_eq!(record.retry_count, 2);
    }
}
