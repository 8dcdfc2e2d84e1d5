//! Materialized tree paths for the organization hierarchy.
//!
//! A `ScopePath` enumerates every ancestor label from the root down to the
//! node itself, e.g. `root.acme.north_campus`. Containment checks are pure
//! prefix comparisons over labels, so they hold for arbitrarily deep trees.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Ancestor-enumerated path, labels joined by `.`.
///
/// Labels are non-empty and restricted to `[A-Za-z0-9_]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopePath {
    labels: Vec<String>,
}

impl ScopePath {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DomainError::validation("scope path cannot be empty"));
        }

        let mut labels = Vec::new();
        for label in raw.split('.') {
            if label.is_empty() {
                return Err(DomainError::validation(format!("scope path `{raw}` has an empty label")));
            }
            if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(DomainError::validation(format!(
                    "scope path label `{label}` must match [A-Za-z0-9_]+"
                )));
            }
            labels.push(label.to_string());
        }

        Ok(Self { labels })
    }

    /// Number of labels; `root.acme` has depth 2.
    pub fn depth(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Last label of the path.
    pub fn leaf(&self) -> &str {
        // `parse` never yields an empty label list.
        self.labels.last().map(String::as_str).unwrap_or_default()
    }

    /// Path with the leaf removed, or `None` for a single-label path.
    pub fn parent(&self) -> Option<ScopePath> {
        if self.labels.len() <= 1 {
            return None;
        }
        Some(Self {
            labels: self.labels[..self.labels.len() - 1].to_vec(),
        })
    }

    /// Append a label below this path.
    pub fn child(&self, label: &str) -> DomainResult<ScopePath> {
        ScopePath::parse(&format!("{self}.{label}"))
    }

    /// Inclusive containment: `self` lies at or below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &ScopePath) -> bool {
        self.labels.len() >= ancestor.labels.len()
            && self.labels[..ancestor.labels.len()] == ancestor.labels[..]
    }

    /// Inclusive containment: `self` lies at or above `descendant`.
    pub fn is_ancestor_of(&self, descendant: &ScopePath) -> bool {
        descendant.is_descendant_of(self)
    }

    /// Strictly below `ancestor` (not equal).
    pub fn is_strict_descendant_of(&self, ancestor: &ScopePath) -> bool {
        self.labels.len() > ancestor.labels.len() && self.is_descendant_of(ancestor)
    }

    /// Either path contains the other.
    pub fn overlaps(&self, other: &ScopePath) -> bool {
        self.is_descendant_of(other) || other.is_descendant_of(self)
    }
}

impl ValueObject for ScopePath {}

impl fmt::Display for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.labels.join("."))
    }
}

impl FromStr for ScopePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScopePath::parse(s)
    }
}

impl TryFrom<String> for ScopePath {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ScopePath::parse(&value)
    }
}

impl From<ScopePath> for String {
    fn from(value: ScopePath) -> Self {
        value.to_string()
    }
}
