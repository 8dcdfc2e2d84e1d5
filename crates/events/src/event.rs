//! Typed event families.
//!
//! Stored events are `(stream_type, event_type, event_data)` triples. A family
//! enum maps each `event_type` string to one payload struct so handlers can
//! `match` instead of poking at raw JSON.

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Failure to turn a stored `(event_type, event_data)` pair back into a typed event.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("event type `{event_type}` is not part of the `{stream_type}` family")]
    UnknownEventType { stream_type: String, event_type: String },

    #[error("payload of `{event_type}` is malformed: {source}")]
    Payload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A family of domain events belonging to one aggregate stream type.
///
/// Events are facts: immutable once stored. Implementations are normally
/// generated by [`domain_events!`](crate::domain_events).
pub trait DomainEvent: Sized + Clone + core::fmt::Debug + Send + Sync + 'static {
    /// The `stream_type` every event of this family is stored under.
    const STREAM_TYPE: &'static str;

    /// Stable dotted event type (e.g. `client.discharged`).
    fn event_type(&self) -> &'static str;

    fn to_data(&self) -> Result<JsonValue, serde_json::Error>;

    fn decode(event_type: &str, data: &JsonValue) -> Result<Self, EventDecodeError>;
}

/// Declare a typed event family.
///
/// ```ignore
/// domain_events! {
///     /// Client lifecycle.
///     pub enum ClientEvent in "client" {
///         Registered(ClientRegistered) = "client.registered",
///         Discharged(ClientDischarged) = "client.discharged",
///     }
/// }
/// ```
#[macro_export]
macro_rules! domain_events {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident in $stream:literal {
            $( $(#[$vmeta:meta])* $variant:ident($payload:ty) = $etype:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant($payload) ),+
        }

        impl $name {
            /// Every event type in this family.
            pub const EVENT_TYPES: &'static [&'static str] = &[$($etype),+];
        }

        impl $crate::DomainEvent for $name {
            const STREAM_TYPE: &'static str = $stream;

            fn event_type(&self) -> &'static str {
                match self {
                    $( Self::$variant(_) => $etype ),+
                }
            }

            fn to_data(&self) -> Result<$crate::__serde_json::Value, $crate::__serde_json::Error> {
                match self {
                    $( Self::$variant(payload) => $crate::__serde_json::to_value(payload) ),+
                }
            }

            fn decode(
                event_type: &str,
                data: &$crate::__serde_json::Value,
            ) -> Result<Self, $crate::EventDecodeError> {
                match event_type {
                    $(
                        $etype => $crate::__serde_json::from_value::<$payload>(data.clone())
                            .map(Self::$variant)
                            .map_err(|source| $crate::EventDecodeError::Payload {
                                event_type: event_type.to_string(),
                                source,
                            }),
                    )+
                    other => Err($crate::EventDecodeError::UnknownEventType {
                        stream_type: $stream.to_string(),
                        event_type: other.to_string(),
                    }),
                }
            }
        }
    };
}
