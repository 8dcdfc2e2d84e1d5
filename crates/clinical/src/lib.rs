//! Clinical aggregates: clients, the medication catalog, prescriptions
//! (medication history) and individual dose administrations.
//!
//! Each module defines the event payloads for one stream type plus the status
//! rules the projection handlers enforce.

pub mod administration;
pub mod client;
pub mod medication;
pub mod prescription;

pub use administration::{DoseEvent, DoseStatus};
pub use client::{ClientEvent, ClientStatus, Gender};
pub use medication::MedicationEvent;
pub use prescription::{PrescriptionEvent, PrescriptionStatus};
