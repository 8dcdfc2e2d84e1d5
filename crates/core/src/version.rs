//! Optimistic concurrency expectations for event streams.

use crate::error::{DomainError, DomainResult};

/// Optimistic concurrency expectation for a stream append.
///
/// `Exact(v)` states the stream head (highest appended `stream_version`) the
/// writer observed; the append lands at `v + 1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking; the store assigns `head + 1`.
    Any,
    /// Require the stream head to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Build an expectation from the caller's view of the *next* version.
    ///
    /// Versions are 1-based, so `0` is never a valid next version.
    pub fn from_next(next: u64) -> DomainResult<Self> {
        if next == 0 {
            return Err(DomainError::validation("stream_version is 1-based; 0 is not a valid next version"));
        }
        Ok(ExpectedVersion::Exact(next - 1))
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_next_is_one_based() {
        assert_eq!(ExpectedVersion::from_next(1).unwrap(), ExpectedVersion::Exact(0));
        assert_eq!(ExpectedVersion::from_next(7).unwrap(), ExpectedVersion::Exact(6));
        assert!(ExpectedVersion::from_next(0).is_err());
    }

    #[test]
    fn any_matches_everything() {
        assert!(ExpectedVersion::Any.matches(0));
        assert!(ExpectedVersion::Any.matches(42));
    }

    #[test]
    fn exact_reports_conflict() {
        let err = ExpectedVersion::Exact(2).check(3).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }
}
