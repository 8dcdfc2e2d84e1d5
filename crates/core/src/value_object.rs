//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two instances
/// with the same attributes are interchangeable. `ScopePath` is the canonical
/// example in this workspace; permission names and grant scopes follow suit.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
