//! Contacts, addresses and phones owned by an organization.
//!
//! The three families share a shape: owned by one organization, at most one
//! live primary per organization, logical deletion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use carebase_core::{DomainError, OrganizationId, StreamId, UserId};
use carebase_events::{DomainEvent, EventRecord};
use carebase_organizations::contact::{
    AddressCreated, AddressType, AddressUpdated, ContactCreated, ContactType, ContactUpdated, PhoneCreated, PhoneType,
    PhoneUpdated,
};
use carebase_organizations::{AddressEvent, ContactEvent, PhoneEvent};

use super::audit::{self, AuditOperation};
use super::store::{ReadModels, Table};
use super::{ProjectionError, ProjectionRow, coalesce, coalesce_opt, insert_row, update_row};
use crate::router::{HandlerOutput, ProjectionHandler, RouteKey};

// ─────────────────────────────────────────────────────────────────────────────
// Shared plumbing
// ─────────────────────────────────────────────────────────────────────────────

trait OwnedDetail: ProjectionRow {
    fn id(&self) -> StreamId;
    fn owner(&self) -> OrganizationId;
    fn is_primary(&self) -> bool;
    fn primary_mut(&mut self) -> &mut bool;
    fn deleted_at(&self) -> Option<DateTime<Utc>>;
    fn mark_deleted(&mut self, at: DateTime<Utc>);
}

/// Demote every other live primary row of the same organization.
///
/// Each demoted row is stamped and audited under the triggering event.
fn clear_other_primaries<V, T>(
    models: &mut ReadModels,
    event: &EventRecord,
    table: T,
    table_name: &'static str,
    organization_id: OrganizationId,
    keep: StreamId,
) -> Result<(), ProjectionError>
where
    V: OwnedDetail,
    T: Fn(&mut ReadModels) -> &mut Table<StreamId, V>,
{
    let demoted: Vec<V> = table(models)
        .values()
        .filter(|row| row.id() != keep && row.owner() == organization_id && row.deleted_at().is_none())
        .filter(|row| row.is_primary())
        .cloned()
        .collect();

    for before in demoted {
        let row = table(models).require_mut(table_name, &before.id())?;
        *row.primary_mut() = false;
        row.touch(event.created_at, event.event_metadata.user_id);
        let after = row.clone();
        audit::record_resource(
            models,
            event,
            before.id(),
            Some(organization_id),
            AuditOperation::Update,
            Some(&before),
            Some(&after),
        );
    }
    Ok(())
}

fn require_live_organization(models: &ReadModels, organization_id: OrganizationId) -> Result<(), ProjectionError> {
    let org = models.organizations.require("organizations", &organization_id)?;
    if org.is_live() {
        Ok(())
    } else {
        Err(DomainError::invariant(format!("organization {} is deleted", org.path)).into())
    }
}

fn require_live<V: OwnedDetail>(
    table: &Table<StreamId, V>,
    name: &'static str,
    id: &StreamId,
) -> Result<OrganizationId, ProjectionError> {
    let row = table.require(name, id)?;
    if row.deleted_at().is_some() {
        return Err(DomainError::invalid_transition(format!("{name} row {id} is deleted")).into());
    }
    Ok(row.owner())
}

fn non_empty(field: &str, value: &str) -> Result<(), ProjectionError> {
    if value.trim().is_empty() {
        Err(DomainError::validation(format!("{field} cannot be empty")).into())
    } else {
        Ok(())
    }
}

fn non_empty_opt(field: &str, value: Option<&str>) -> Result<(), ProjectionError> {
    value.map_or(Ok(()), |v| non_empty(field, v))
}

macro_rules! owned_detail {
    ($row:ty) => {
        impl ProjectionRow for $row {
            fn organization_id(&self) -> Option<OrganizationId> {
                Some(self.organization_id)
            }

            fn touch(&mut self, at: DateTime<Utc>, by: Option<UserId>) {
                self.updated_at = at;
                self.updated_by = by;
            }
        }

        impl OwnedDetail for $row {
            fn id(&self) -> StreamId {
                self.id
            }

            fn owner(&self) -> OrganizationId {
                self.organization_id
            }

            fn is_primary(&self) -> bool {
                self.is_primary
            }

            fn primary_mut(&mut self) -> &mut bool {
                &mut self.is_primary
            }

            fn deleted_at(&self) -> Option<DateTime<Utc>> {
                self.deleted_at
            }

            fn mark_deleted(&mut self, at: DateTime<Utc>) {
                self.is_primary = false;
                self.deleted_at.get_or_insert(at);
            }
        }
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Contact
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRow {
    pub id: StreamId,
    pub organization_id: OrganizationId,
    pub label: String,
    pub contact_type: ContactType,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub title: Option<String>,
    pub department: Option<String>,
    pub is_primary: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

owned_detail!(ContactRow);

impl ContactRow {
    fn created(id: StreamId, e: ContactCreated, event: &EventRecord) -> Self {
        Self {
            id,
            organization_id: e.organization_id,
            label: e.label,
            contact_type: e.contact_type,
            first_name: e.first_name,
            last_name: e.last_name,
            email: e.email,
            title: e.title,
            department: e.department,
            is_primary: e.is_primary,
            deleted_at: None,
            created_by: event.event_metadata.user_id,
            updated_by: event.event_metadata.user_id,
            created_at: event.created_at,
            updated_at: event.created_at,
        }
    }

    fn apply_update(&mut self, e: ContactUpdated) {
        coalesce(&mut self.label, e.label);
        coalesce(&mut self.contact_type, e.contact_type);
        coalesce(&mut self.first_name, e.first_name);
        coalesce(&mut self.last_name, e.last_name);
        coalesce(&mut self.email, e.email);
        coalesce_opt(&mut self.title, e.title);
        coalesce_opt(&mut self.department, e.department);
        coalesce(&mut self.is_primary, e.is_primary);
    }
}

fn validate_email(email: &str) -> Result<(), ProjectionError> {
    non_empty("email", email)?;
    if email.contains('@') {
        Ok(())
    } else {
        Err(DomainError::validation(format!("`{email}` is not an email address")).into())
    }
}

fn contacts(models: &mut ReadModels) -> &mut Table<StreamId, ContactRow> {
    &mut models.contacts
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ContactProjection;

impl ProjectionHandler for ContactProjection {
    fn name(&self) -> &'static str {
        "contact"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(ContactEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = event.stream_id;
        match event.decode::<ContactEvent>()? {
            ContactEvent::Created(e) => {
                non_empty("label", &e.label)?;
                non_empty("first_name", &e.first_name)?;
                non_empty("last_name", &e.last_name)?;
                validate_email(&e.email)?;
                require_live_organization(models, e.organization_id)?;
                if e.is_primary {
                    clear_other_primaries(models, event, contacts, "contacts", e.organization_id, id)?;
                }
                insert_row(models, event, contacts, id, ContactRow::created(id, e, event));
            }
            ContactEvent::Updated(e) => {
                non_empty_opt("label", e.label.as_deref())?;
                if let Some(email) = &e.email {
                    validate_email(email)?;
                }
                let org = require_live(&models.contacts, "contacts", &id)?;
                if e.is_primary == Some(true) {
                    clear_other_primaries(models, event, contacts, "contacts", org, id)?;
                }
                update_row(models, event, contacts, "contacts", &id, AuditOperation::Update, |row| {
                    row.apply_update(e);
                    Ok(())
                })?;
            }
            ContactEvent::Deleted(_) => {
                update_row(models, event, contacts, "contacts", &id, AuditOperation::Delete, |row| {
                    row.mark_deleted(event.created_at);
                    Ok(())
                })?;
            }
        }
        Ok(HandlerOutput::none())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Address
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRow {
    pub id: StreamId,
    pub organization_id: OrganizationId,
    pub label: String,
    pub address_type: AddressType,
    pub street1: String,
    pub street2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub is_primary: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

owned_detail!(AddressRow);

impl AddressRow {
    fn created(id: StreamId, e: AddressCreated, event: &EventRecord) -> Self {
        Self {
            id,
            organization_id: e.organization_id,
            label: e.label,
            address_type: e.address_type,
            street1: e.street1,
            street2: e.street2,
            city: e.city,
            state: e.state,
            zip_code: e.zip_code,
            country: e.country,
            is_primary: e.is_primary,
            deleted_at: None,
            created_by: event.event_metadata.user_id,
            updated_by: event.event_metadata.user_id,
            created_at: event.created_at,
            updated_at: event.created_at,
        }
    }

    fn apply_update(&mut self, e: AddressUpdated) {
        coalesce(&mut self.label, e.label);
        coalesce(&mut self.address_type, e.address_type);
        coalesce(&mut self.street1, e.street1);
        coalesce_opt(&mut self.street2, e.street2);
        coalesce(&mut self.city, e.city);
        coalesce(&mut self.state, e.state);
        coalesce(&mut self.zip_code, e.zip_code);
        coalesce(&mut self.country, e.country);
        coalesce(&mut self.is_primary, e.is_primary);
    }
}

fn addresses(models: &mut ReadModels) -> &mut Table<StreamId, AddressRow> {
    &mut models.addresses
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AddressProjection;

impl ProjectionHandler for AddressProjection {
    fn name(&self) -> &'static str {
        "address"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(AddressEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = event.stream_id;
        match event.decode::<AddressEvent>()? {
            AddressEvent::Created(e) => {
                non_empty("label", &e.label)?;
                non_empty("street1", &e.street1)?;
                non_empty("city", &e.city)?;
                non_empty("zip_code", &e.zip_code)?;
                require_live_organization(models, e.organization_id)?;
                if e.is_primary {
                    clear_other_primaries(models, event, addresses, "addresses", e.organization_id, id)?;
                }
                insert_row(models, event, addresses, id, AddressRow::created(id, e, event));
            }
            AddressEvent::Updated(e) => {
                non_empty_opt("street1", e.street1.as_deref())?;
                non_empty_opt("city", e.city.as_deref())?;
                let org = require_live(&models.addresses, "addresses", &id)?;
                if e.is_primary == Some(true) {
                    clear_other_primaries(models, event, addresses, "addresses", org, id)?;
                }
                update_row(models, event, addresses, "addresses", &id, AuditOperation::Update, |row| {
                    row.apply_update(e);
                    Ok(())
                })?;
            }
            AddressEvent::Deleted(_) => {
                update_row(models, event, addresses, "addresses", &id, AuditOperation::Delete, |row| {
                    row.mark_deleted(event.created_at);
                    Ok(())
                })?;
            }
        }
        Ok(HandlerOutput::none())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Phone
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneRow {
    pub id: StreamId,
    pub organization_id: OrganizationId,
    pub label: String,
    pub phone_type: PhoneType,
    pub number: String,
    pub extension: Option<String>,
    pub is_primary: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

owned_detail!(PhoneRow);

impl PhoneRow {
    fn created(id: StreamId, e: PhoneCreated, event: &EventRecord) -> Self {
        Self {
            id,
            organization_id: e.organization_id,
            label: e.label,
            phone_type: e.phone_type,
            number: e.number,
            extension: e.extension,
            is_primary: e.is_primary,
            deleted_at: None,
            created_by: event.event_metadata.user_id,
            updated_by: event.event_metadata.user_id,
            created_at: event.created_at,
            updated_at: event.created_at,
        }
    }

    fn apply_update(&mut self, e: PhoneUpdated) {
        coalesce(&mut self.label, e.label);
        coalesce(&mut self.phone_type, e.phone_type);
        coalesce(&mut self.number, e.number);
        coalesce_opt(&mut self.extension, e.extension);
        coalesce(&mut self.is_primary, e.is_primary);
    }
}

fn phones(models: &mut ReadModels) -> &mut Table<StreamId, PhoneRow> {
    &mut models.phones
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PhoneProjection;

impl ProjectionHandler for PhoneProjection {
    fn name(&self) -> &'static str {
        "phone"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(PhoneEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = event.stream_id;
        match event.decode::<PhoneEvent>()? {
            PhoneEvent::Created(e) => {
                non_empty("label", &e.label)?;
                non_empty("number", &e.number)?;
                require_live_organization(models, e.organization_id)?;
                if e.is_primary {
                    clear_other_primaries(models, event, phones, "phones", e.organization_id, id)?;
                }
                insert_row(models, event, phones, id, PhoneRow::created(id, e, event));
            }
            PhoneEvent::Updated(e) => {
                non_empty_opt("number", e.number.as_deref())?;
                let org = require_live(&models.phones, "phones", &id)?;
                if e.is_primary == Some(true) {
                    clear_other_primaries(models, event, phones, "phones", org, id)?;
                }
                update_row(models, event, phones, "phones", &id, AuditOperation::Update, |row| {
                    row.apply_update(e);
                    Ok(())
                })?;
            }
            PhoneEvent::Deleted(_) => {
                update_row(models, event, phones, "phones", &id, AuditOperation::Delete, |row| {
                    row.mark_deleted(event.created_at);
                    Ok(())
                })?;
            }
        }
        Ok(HandlerOutput::none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebase_events::{EventMetadata, NewEvent};
    use carebase_organizations::OrganizationEvent;
    use carebase_organizations::contact::Removed;
    use carebase_organizations::organization::OrganizationCreated;

    use crate::projections::OrganizationProjection;

    fn record<E: DomainEvent>(stream: StreamId, version: u64, event: &E) -> EventRecord {
        let new = NewEvent::typed(stream, event, EventMetadata::new()).unwrap();
        EventRecord::commit(new, version, version, Utc::now())
    }

    fn organization(models: &mut ReadModels) -> OrganizationId {
        let stream = StreamId::new();
        let created = OrganizationEvent::Created(OrganizationCreated {
            name: "Acme".into(),
            display_name: None,
            kind: carebase_organizations::OrganizationKind::Provider,
            path: "root.acme".parse().unwrap(),
            parent_path: None,
            tax_number: None,
            timezone: None,
            metadata: None,
        });
        OrganizationProjection.apply(&record(stream, 1, &created), models).unwrap();
        OrganizationId::from(stream)
    }

    fn phone(models: &mut ReadModels, org: OrganizationId, number: &str, primary: bool) -> StreamId {
        let stream = StreamId::new();
        let created = PhoneEvent::Created(PhoneCreated {
            organization_id: org,
            label: "Main".into(),
            phone_type: PhoneType::Office,
            number: number.into(),
            extension: None,
            is_primary: primary,
        });
        PhoneProjection.apply(&record(stream, 1, &created), models).unwrap();
        stream
    }

    fn primaries(models: &ReadModels) -> Vec<StreamId> {
        models.phones().values().filter(|p| p.is_primary).map(|p| p.id).collect()
    }

    #[test]
    fn new_primary_replaces_the_old_one() {
        let mut models = ReadModels::default();
        let org = organization(&mut models);
        let first = phone(&mut models, org, "555-0100", true);
        assert_eq!(primaries(&models), vec![first]);

        let second = phone(&mut models, org, "555-0101", true);
        assert_eq!(primaries(&models), vec![second]);
    }

    #[test]
    fn redelivered_primary_update_is_stable() {
        let mut models = ReadModels::default();
        let org = organization(&mut models);
        let first = phone(&mut models, org, "555-0100", true);
        let second = phone(&mut models, org, "555-0101", false);

        let promote = record(
            second,
            2,
            &PhoneEvent::Updated(PhoneUpdated {
                label: None,
                phone_type: None,
                number: None,
                extension: None,
                is_primary: Some(true),
            }),
        );
        PhoneProjection.apply(&promote, &mut models).unwrap();
        let once = primaries(&models);
        PhoneProjection.apply(&promote, &mut models).unwrap();
        assert_eq!(primaries(&models), once);
        assert_eq!(once, vec![second]);
        assert!(!models.phones().get(&first).unwrap().is_primary);
    }

    #[test]
    fn demoted_primary_is_stamped_and_audited() {
        let mut models = ReadModels::default();
        let org = organization(&mut models);
        let first = phone(&mut models, org, "555-0100", true);
        let untouched = phone(&mut models, org, "555-0102", false);
        let stamped_before = models.phones().get(&first).unwrap().updated_at;

        let clerk = UserId::new();
        let second = StreamId::new();
        let created = PhoneEvent::Created(PhoneCreated {
            organization_id: org,
            label: "Front desk".into(),
            phone_type: PhoneType::Office,
            number: "555-0101".into(),
            extension: None,
            is_primary: true,
        });
        let new = NewEvent::typed(second, &created, EventMetadata::by_user(clerk)).unwrap();
        let event = EventRecord::commit(new, 1, 1, Utc::now());
        PhoneProjection.apply(&event, &mut models).unwrap();

        let demoted = models.phones().get(&first).unwrap();
        assert!(!demoted.is_primary);
        assert_eq!(demoted.updated_by, Some(clerk));
        assert!(demoted.updated_at >= stamped_before);

        let rows: Vec<_> = models
            .audit_log()
            .values()
            .filter(|a| a.event_id == event.event_id)
            .collect();
        assert_eq!(rows.len(), 2);
        let sibling = rows.iter().find(|a| a.resource_id == first).unwrap();
        assert_eq!(sibling.operation, AuditOperation::Update);
        assert_eq!(sibling.old_values.as_ref().unwrap()["is_primary"], true);
        assert_eq!(sibling.new_values.as_ref().unwrap()["is_primary"], false);
        assert!(rows.iter().all(|a| a.resource_id != untouched));
    }

    #[test]
    fn deletion_is_logical() {
        let mut models = ReadModels::default();
        let org = organization(&mut models);
        let id = phone(&mut models, org, "555-0100", true);
        PhoneProjection
            .apply(&record(id, 2, &PhoneEvent::Deleted(Removed { reason: None })), &mut models)
            .unwrap();
        let row = models.phones().get(&id).unwrap();
        assert!(row.deleted_at.is_some());
        assert!(!row.is_primary);
    }

    #[test]
    fn contacts_need_a_live_organization() {
        let mut models = ReadModels::default();
        let created = ContactEvent::Created(ContactCreated {
            organization_id: OrganizationId::new(),
            label: "Billing".into(),
            contact_type: ContactType::Billing,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            title: None,
            department: None,
            is_primary: false,
        });
        let err = ContactProjection
            .apply(&record(StreamId::new(), 1, &created), &mut models)
            .unwrap_err();
        assert!(matches!(err, ProjectionError::NotFound { table: "organizations", .. }));
    }
}
