//! Cross-tenant access grants.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use carebase_auth::grants::AccessGrantCreated;
use carebase_auth::{AccessGrantEvent, AuthorizationType, GrantCoverage, GrantScope, GrantStatus, GrantTransition};
use carebase_core::{DomainError, OrganizationId, StreamId, UserId};
use carebase_events::{DomainEvent, EventRecord};
use carebase_organizations::OrganizationKind;

use super::audit::AuditOperation;
use super::store::{ReadModels, Table};
use super::{ProjectionError, ProjectionRow, insert_row, update_row};
use crate::router::{HandlerOutput, ProjectionHandler, RouteKey};

const TABLE: &str = "access_grants";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGrantRow {
    pub id: StreamId,
    pub consultant_org_id: OrganizationId,
    pub provider_org_id: OrganizationId,
    pub consultant_user_id: Option<UserId>,
    pub scope: GrantScope,
    pub scope_id: Option<Uuid>,
    pub authorization_type: AuthorizationType,
    pub legal_reference: Option<String>,
    pub granted_by: Option<UserId>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub terms: Option<JsonValue>,
    pub status: GrantStatus,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<UserId>,
    pub revocation_reason: Option<String>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub suspension_reason: Option<String>,
    pub expected_resolution_date: Option<NaiveDate>,
    pub reactivated_at: Option<DateTime<Utc>>,
    pub resolution_details: Option<String>,
    pub expired_at: Option<DateTime<Utc>>,
    pub expiration_type: Option<String>,
    pub updated_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

impl AccessGrantRow {
    fn created(id: StreamId, e: AccessGrantCreated, event: &EventRecord) -> Self {
        Self {
            id,
            consultant_org_id: e.consultant_org_id,
            provider_org_id: e.provider_org_id,
            consultant_user_id: e.consultant_user_id,
            scope: e.scope,
            scope_id: e.scope_id,
            authorization_type: e.authorization_type,
            legal_reference: e.legal_reference,
            granted_by: e.granted_by.or(event.event_metadata.user_id),
            granted_at: event.created_at,
            expires_at: e.expires_at,
            terms: e.terms,
            status: GrantStatus::Active,
            revoked_at: None,
            revoked_by: None,
            revocation_reason: None,
            suspended_at: None,
            suspension_reason: None,
            expected_resolution_date: None,
            reactivated_at: None,
            resolution_details: None,
            expired_at: None,
            expiration_type: None,
            updated_by: event.event_metadata.user_id,
            updated_at: event.created_at,
        }
    }

    /// The fields the query-time access check needs.
    pub fn coverage(&self) -> GrantCoverage {
        GrantCoverage {
            status: self.status,
            expires_at: self.expires_at,
            consultant_user_id: self.consultant_user_id,
            scope: self.scope,
            scope_id: self.scope_id,
        }
    }
}

impl ProjectionRow for AccessGrantRow {
    fn organization_id(&self) -> Option<OrganizationId> {
        Some(self.provider_org_id)
    }

    fn touch(&mut self, at: DateTime<Utc>, by: Option<UserId>) {
        self.updated_at = at;
        self.updated_by = by;
    }
}

fn access_grants(models: &mut ReadModels) -> &mut Table<StreamId, AccessGrantRow> {
    &mut models.access_grants
}

fn require_active_org(models: &ReadModels, id: OrganizationId, kind: OrganizationKind) -> Result<(), ProjectionError> {
    let org = models.organizations.require("organizations", &id)?;
    if !org.is_live() || !org.is_active() {
        return Err(DomainError::invariant(format!("organization `{}` is not active", org.path)).into());
    }
    if org.kind != kind {
        return Err(DomainError::invariant(format!(
            "organization `{}` is {}, expected {}",
            org.path,
            org.kind.as_str(),
            kind.as_str()
        ))
        .into());
    }
    Ok(())
}

/// Both organizations active and of the right kind; a named consultant must
/// already hold a role inside the consultant organization.
fn check_grant(models: &ReadModels, e: &AccessGrantCreated, at: DateTime<Utc>) -> Result<(), ProjectionError> {
    e.validate()?;
    if e.expires_at.is_some_and(|expires| expires <= at) {
        return Err(DomainError::validation("access grant cannot expire before it is granted").into());
    }
    require_active_org(models, e.consultant_org_id, OrganizationKind::ProviderPartner)?;
    require_active_org(models, e.provider_org_id, OrganizationKind::Provider)?;

    if let Some(user) = e.consultant_user_id {
        let holds_role = models
            .user_roles
            .values()
            .any(|ur| ur.user_id == user && ur.scope.organization_id() == Some(e.consultant_org_id));
        if !holds_role {
            return Err(DomainError::invariant(format!(
                "user {user} holds no role in consultant organization {}",
                e.consultant_org_id
            ))
            .into());
        }
    }
    Ok(())
}

fn advance(row: &mut AccessGrantRow, transition: Option<GrantTransition>) -> Result<(), ProjectionError> {
    if let Some(t) = transition {
        row.status = row.status.transition(t)?;
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AccessGrantProjection;

impl ProjectionHandler for AccessGrantProjection {
    fn name(&self) -> &'static str {
        "access_grant"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(AccessGrantEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = event.stream_id;
        let decoded = event.decode::<AccessGrantEvent>()?;
        let transition = decoded.transition();
        let op = AuditOperation::Update;
        let at = event.created_at;

        match decoded {
            AccessGrantEvent::Created(e) => {
                check_grant(models, &e, at)?;
                insert_row(models, event, access_grants, id, AccessGrantRow::created(id, e, event));
            }
            AccessGrantEvent::Revoked(e) => {
                update_row(models, event, access_grants, TABLE, &id, op, |row| {
                    advance(row, transition)?;
                    row.revoked_at = Some(at);
                    row.revoked_by = e.revoked_by.or(event.event_metadata.user_id);
                    row.revocation_reason = Some(e.revocation_reason);
                    Ok(())
                })?;
            }
            AccessGrantEvent::Suspended(e) => {
                update_row(models, event, access_grants, TABLE, &id, op, |row| {
                    advance(row, transition)?;
                    row.suspended_at = Some(at);
                    row.suspension_reason = Some(e.suspension_reason);
                    row.expected_resolution_date = e.expected_resolution_date;
                    Ok(())
                })?;
            }
            AccessGrantEvent::Reactivated(e) => {
                update_row(models, event, access_grants, TABLE, &id, op, |row| {
                    advance(row, transition)?;
                    row.reactivated_at = Some(at);
                    row.resolution_details = Some(e.resolution_details);
                    Ok(())
                })?;
            }
            AccessGrantEvent::Expired(e) => {
                update_row(models, event, access_grants, TABLE, &id, op, |row| {
                    advance(row, transition)?;
                    row.expired_at = Some(e.expired_at.unwrap_or(at));
                    row.expiration_type = e.expiration_type;
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
    use serde_json::json;

    use crate::projections::fixtures::{event, organization, user};

    struct Parties {
        partner: OrganizationId,
        provider: OrganizationId,
    }

    fn parties(models: &mut ReadModels) -> Parties {
        Parties {
            partner: organization(models, "root.partner", "provider_partner"),
            provider: organization(models, "root.provider", "provider"),
        }
    }

    fn grant(models: &mut ReadModels, p: &Parties) -> StreamId {
        let stream = StreamId::new();
        let created = json!({
            "consultant_org_id": p.partner,
            "provider_org_id": p.provider,
            "scope": "full_org",
            "authorization_type": "var_contract"
        });
        AccessGrantProjection
            .apply(&event(stream, "access_grant", 1, "access_grant.created", created), models)
            .unwrap();
        stream
    }

    fn suspend(id: StreamId, version: u64) -> EventRecord {
        let data = json!({"suspension_reason": "billing dispute", "expected_resolution_date": "2026-04-01"});
        event(id, "access_grant", version, "access_grant.suspended", data)
    }

    fn status(models: &ReadModels, id: StreamId) -> GrantStatus {
        models.access_grants().get(&id).unwrap().status
    }

    #[test]
    fn suspended_grant_can_be_reactivated() {
        let mut models = ReadModels::default();
        let p = parties(&mut models);
        let id = grant(&mut models, &p);

        AccessGrantProjection.apply(&suspend(id, 2), &mut models).unwrap();
        let row = models.access_grants().get(&id).unwrap();
        assert_eq!(row.status, GrantStatus::Suspended);
        assert_eq!(row.expected_resolution_date, NaiveDate::from_ymd_opt(2026, 4, 1));

        let reactivated = event(id, "access_grant", 3, "access_grant.reactivated", json!({"resolution_details": "paid"}));
        AccessGrantProjection.apply(&reactivated, &mut models).unwrap();
        let row = models.access_grants().get(&id).unwrap();
        assert_eq!(row.status, GrantStatus::Active);
        assert_eq!(row.resolution_details.as_deref(), Some("paid"));
        assert!(row.coverage().is_live(Utc::now()));
    }

    #[test]
    fn suspended_grant_can_be_revoked_but_not_expired() {
        let mut models = ReadModels::default();
        let p = parties(&mut models);
        let id = grant(&mut models, &p);
        AccessGrantProjection.apply(&suspend(id, 2), &mut models).unwrap();

        let expired = event(id, "access_grant", 3, "access_grant.expired", json!({"expiration_type": "time_based"}));
        let err = AccessGrantProjection.apply(&expired, &mut models).unwrap_err();
        assert!(matches!(err, ProjectionError::Domain(DomainError::InvalidTransition(_))));
        assert_eq!(status(&models, id), GrantStatus::Suspended);
        assert_eq!(models.access_grants().get(&id).unwrap().expired_at, None);

        let revoked = event(id, "access_grant", 3, "access_grant.revoked", json!({"revocation_reason": "contract ended"}));
        AccessGrantProjection.apply(&revoked, &mut models).unwrap();
        assert_eq!(status(&models, id), GrantStatus::Revoked);

        let reactivated = event(id, "access_grant", 4, "access_grant.reactivated", json!({"resolution_details": "oops"}));
        assert!(AccessGrantProjection.apply(&reactivated, &mut models).is_err());
        assert_eq!(status(&models, id), GrantStatus::Revoked);
    }

    #[test]
    fn active_grant_expires() {
        let mut models = ReadModels::default();
        let p = parties(&mut models);
        let id = grant(&mut models, &p);

        let expired = event(id, "access_grant", 2, "access_grant.expired", json!({"expiration_type": "time_based"}));
        AccessGrantProjection.apply(&expired, &mut models).unwrap();
        let row = models.access_grants().get(&id).unwrap();
        assert_eq!(row.status, GrantStatus::Expired);
        assert!(row.expired_at.is_some());
        assert_eq!(row.expiration_type.as_deref(), Some("time_based"));
    }

    #[test]
    fn grant_direction_follows_organization_kinds() {
        let mut models = ReadModels::default();
        let p = parties(&mut models);
        let swapped = json!({
            "consultant_org_id": p.provider,
            "provider_org_id": p.partner,
            "scope": "full_org",
            "authorization_type": "var_contract"
        });
        let err = AccessGrantProjection
            .apply(&event(StreamId::new(), "access_grant", 1, "access_grant.created", swapped), &mut models)
            .unwrap_err();
        assert!(matches!(err, ProjectionError::Domain(DomainError::InvariantViolation(_))));
        assert!(models.access_grants().is_empty());
    }

    #[test]
    fn named_consultant_needs_a_role_in_the_partner() {
        let mut models = ReadModels::default();
        let p = parties(&mut models);
        let consultant = user(&mut models, Some(p.partner));
        let created = json!({
            "consultant_org_id": p.partner,
            "provider_org_id": p.provider,
            "consultant_user_id": consultant,
            "scope": "full_org",
            "authorization_type": "court_order"
        });
        let err = AccessGrantProjection
            .apply(&event(StreamId::new(), "access_grant", 1, "access_grant.created", created), &mut models)
            .unwrap_err();
        assert!(matches!(err, ProjectionError::Domain(DomainError::InvariantViolation(_))));
    }
}
