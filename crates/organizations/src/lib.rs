//! Organization hierarchy and its contact details.
//!
//! Organizations form a tree addressed by materialized `ScopePath`s. Contacts,
//! addresses and phones hang off an organization and are associated with each
//! other through link/unlink (junction) events.

pub mod contact;
pub mod organization;
pub mod relationship;

pub use contact::{AddressEvent, ContactEvent, PhoneEvent};
pub use organization::{OrganizationEvent, OrganizationKind, validate_hierarchy};
pub use relationship::{Link, LinkAction, LinkError, Relationship};
