//! Tracing and logging setup shared by every process embedding the engine.

/// Initialize process-wide observability (JSON logs, `RUST_LOG` filter).
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::{LogFormat, init_with};
