//! Stream versioning guard.
//!
//! A lifecycle projection may only accept the event whose `stream_version` is
//! exactly one past the last version it successfully projected for that stream.
//! Anything else would apply facts out of causal order.

use thiserror::Error;

use crate::record::{EventRecord, StreamKey};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stream {stream} expected version {expected}, found {found}")]
pub struct VersionConflict {
    pub stream: StreamKey,
    pub expected: u64,
    pub found: u64,
}

/// Require `event.stream_version == last_processed + 1`.
pub fn ensure_next_version(last_processed: u64, event: &EventRecord) -> Result<(), VersionConflict> {
    let expected = last_processed + 1;
    if event.stream_version == expected {
        Ok(())
    } else {
        Err(VersionConflict {
            stream: event.stream_key(),
            expected,
            found: event.stream_version,
        })
    }
}
