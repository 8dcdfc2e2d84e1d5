//! Dotted event type names (`domain.action`, `domain.subdomain.action`).

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shape errors detected before an event is accepted for append.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventValidationError {
    #[error("invalid event_type `{0}`: expected two or more dotted lowercase labels")]
    InvalidEventType(String),

    #[error("invalid stream_type `{0}`: expected a lowercase identifier")]
    InvalidStreamType(String),

    #[error("event_data must be a JSON object")]
    NonObjectData,

    #[error("event_data must not be empty")]
    EmptyData,

    #[error("event_data could not be serialized: {0}")]
    Payload(String),
}

/// Validated event type name.
///
/// Two or more labels joined by `.`; each label starts with a lowercase letter and
/// continues with lowercase letters, digits or `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventType(String);

impl EventType {
    pub fn parse(raw: &str) -> Result<Self, EventValidationError> {
        let mut labels = 0usize;
        for label in raw.split('.') {
            if !is_identifier(label) {
                return Err(EventValidationError::InvalidEventType(raw.to_string()));
            }
            labels += 1;
        }
        if labels < 2 {
            return Err(EventValidationError::InvalidEventType(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First label, e.g. `organization` for `organization.contact.linked`.
    pub fn domain(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    /// Last label, e.g. `linked` for `organization.contact.linked`.
    pub fn action(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or_default()
    }

    /// Link/unlink events manage junction rows rather than an aggregate.
    pub fn is_relationship(&self) -> bool {
        matches!(self.action(), "linked" | "unlinked")
    }
}

/// Validate a `stream_type` (single lowercase identifier, e.g. `medication_history`).
pub fn validate_stream_type(raw: &str) -> Result<(), EventValidationError> {
    if is_identifier(raw) {
        Ok(())
    } else {
        Err(EventValidationError::InvalidStreamType(raw.to_string()))
    }
}

fn is_identifier(label: &str) -> bool {
    let mut chars = label.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EventType {
    type Error = EventValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        EventType::parse(&value)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.0
    }
}

impl PartialEq<str> for EventType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for EventType {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
