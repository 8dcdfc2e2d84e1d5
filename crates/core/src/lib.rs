//! `carebase-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, optimistic version expectations and the
//! materialized tree path used by the organization hierarchy.

pub mod error;
pub mod id;
pub mod scope_path;
pub mod value_object;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{EventId, OrganizationId, PermissionId, RoleId, StreamId, UserId};
pub use scope_path::ScopePath;
pub use value_object::ValueObject;
pub use version::ExpectedVersion;
