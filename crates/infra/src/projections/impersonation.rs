//! Impersonation sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use carebase_auth::impersonation::ImpersonationStarted;
use carebase_auth::{ImpersonationEndReason, ImpersonationEvent, ImpersonationStatus};
use carebase_core::{DomainError, OrganizationId, StreamId, UserId};
use carebase_events::{DomainEvent, EventRecord};

use super::audit::AuditOperation;
use super::store::{ReadModels, Table};
use super::{ProjectionError, ProjectionRow, insert_row, update_row};
use crate::router::{HandlerOutput, ProjectionHandler, RouteKey};

const TABLE: &str = "impersonation_sessions";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpersonationSessionRow {
    pub id: StreamId,
    pub super_admin_user_id: UserId,
    pub target_user_id: UserId,
    pub target_org_id: OrganizationId,
    pub justification_reason: String,
    pub justification_reference: Option<String>,
    pub status: ImpersonationStatus,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<ImpersonationEndReason>,
    pub ended_by: Option<UserId>,
    pub renewal_count: u32,
    pub actions_performed: u32,
    pub duration_ms: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub updated_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

impl ImpersonationSessionRow {
    fn started(id: StreamId, e: ImpersonationStarted, event: &EventRecord) -> Self {
        Self {
            id,
            super_admin_user_id: e.super_admin_user_id,
            target_user_id: e.target_user_id,
            target_org_id: e.target_org_id,
            justification_reason: e.justification_reason,
            justification_reference: e.justification_reference,
            status: ImpersonationStatus::Active,
            started_at: event.created_at,
            expires_at: e.expires_at,
            ended_at: None,
            end_reason: None,
            ended_by: None,
            renewal_count: 0,
            actions_performed: 0,
            duration_ms: None,
            ip_address: e.ip_address,
            user_agent: e.user_agent,
            updated_by: event.event_metadata.user_id,
            updated_at: event.created_at,
        }
    }

    /// Active and not past its expiry at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == ImpersonationStatus::Active && self.expires_at > now
    }

    fn ensure_active(&self) -> Result<(), ProjectionError> {
        if self.status == ImpersonationStatus::Active {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(format!(
                "impersonation session {} is {}",
                self.id,
                self.status.as_str()
            ))
            .into())
        }
    }
}

impl ProjectionRow for ImpersonationSessionRow {
    fn organization_id(&self) -> Option<OrganizationId> {
        Some(self.target_org_id)
    }

    fn touch(&mut self, at: DateTime<Utc>, by: Option<UserId>) {
        self.updated_at = at;
        self.updated_by = by;
    }
}

fn sessions(models: &mut ReadModels) -> &mut Table<StreamId, ImpersonationSessionRow> {
    &mut models.impersonation_sessions
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImpersonationProjection;

impl ProjectionHandler for ImpersonationProjection {
    fn name(&self) -> &'static str {
        "impersonation"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(ImpersonationEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = event.stream_id;
        let op = AuditOperation::Update;

        match event.decode::<ImpersonationEvent>()? {
            ImpersonationEvent::Started(e) => {
                e.validate(event.created_at)?;
                models.users.require("users", &e.target_user_id)?;
                models.organizations.require("organizations", &e.target_org_id)?;
                insert_row(models, event, sessions, id, ImpersonationSessionRow::started(id, e, event));
            }
            ImpersonationEvent::Renewed(e) => {
                update_row(models, event, sessions, TABLE, &id, op, |row| {
                    row.ensure_active()?;
                    if e.new_expires_at <= row.expires_at {
                        return Err(DomainError::validation("renewal must extend the session").into());
                    }
                    row.expires_at = e.new_expires_at;
                    row.renewal_count += 1;
                    Ok(())
                })?;
            }
            ImpersonationEvent::Ended(e) => {
                update_row(models, event, sessions, TABLE, &id, op, |row| {
                    row.ensure_active()?;
                    row.status = e.reason.final_status();
                    row.end_reason = Some(e.reason);
                    row.ended_at = Some(event.created_at);
                    row.ended_by = e.ended_by.or(event.event_metadata.user_id);
                    row.actions_performed = e.actions_performed;
                    row.duration_ms = Some((event.created_at - row.started_at).num_milliseconds());
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
    use chrono::Duration;
    use serde_json::json;

    use crate::projections::fixtures::{event, organization, user};

    fn start(models: &mut ReadModels) -> StreamId {
        let org = organization(models, "root.acme", "provider");
        let admin = user(models, None);
        let target = user(models, Some(org));
        let session = StreamId::new();
        let started = json!({
            "super_admin_user_id": admin,
            "target_user_id": target,
            "target_org_id": org,
            "justification_reason": "support ticket 4411",
            "expires_at": Utc::now() + Duration::minutes(30)
        });
        ImpersonationProjection
            .apply(&event(session, "impersonation", 1, "impersonation.started", started), models)
            .unwrap();
        session
    }

    fn renew(session: StreamId, version: u64, until: DateTime<Utc>) -> EventRecord {
        event(session, "impersonation", version, "impersonation.renewed", json!({"new_expires_at": until}))
    }

    #[test]
    fn renewal_must_move_the_expiry_forward() {
        let mut models = ReadModels::default();
        let session = start(&mut models);
        let expires = models.impersonation_sessions().get(&session).unwrap().expires_at;

        for until in [expires - Duration::minutes(5), expires] {
            let err = ImpersonationProjection.apply(&renew(session, 2, until), &mut models).unwrap_err();
            assert!(matches!(err, ProjectionError::Domain(DomainError::Validation(_))));
        }
        let row = models.impersonation_sessions().get(&session).unwrap();
        assert_eq!(row.expires_at, expires);
        assert_eq!(row.renewal_count, 0);

        let extended = expires + Duration::minutes(30);
        ImpersonationProjection.apply(&renew(session, 2, extended), &mut models).unwrap();
        let row = models.impersonation_sessions().get(&session).unwrap();
        assert_eq!(row.expires_at, extended);
        assert_eq!(row.renewal_count, 1);
        assert!(row.is_live(Utc::now()));
    }

    #[test]
    fn timed_out_session_expires_and_cannot_be_renewed() {
        let mut models = ReadModels::default();
        let session = start(&mut models);

        let ended = event(session, "impersonation", 2, "impersonation.ended", json!({"reason": "timeout", "actions_performed": 7}));
        ImpersonationProjection.apply(&ended, &mut models).unwrap();
        let row = models.impersonation_sessions().get(&session).unwrap();
        assert_eq!(row.status, ImpersonationStatus::Expired);
        assert_eq!(row.end_reason, Some(ImpersonationEndReason::Timeout));
        assert_eq!(row.actions_performed, 7);
        assert!(row.duration_ms.is_some_and(|ms| ms >= 0));
        assert!(!row.is_live(Utc::now()));

        let later = Utc::now() + Duration::hours(1);
        assert!(ImpersonationProjection.apply(&renew(session, 3, later), &mut models).is_err());
    }

    #[test]
    fn manual_logout_ends_the_session() {
        let mut models = ReadModels::default();
        let session = start(&mut models);
        let ended = event(session, "impersonation", 2, "impersonation.ended", json!({"reason": "manual_logout"}));
        ImpersonationProjection.apply(&ended, &mut models).unwrap();
        assert_eq!(models.impersonation_sessions().get(&session).unwrap().status, ImpersonationStatus::Ended);
    }

    #[test]
    fn target_user_must_exist() {
        let mut models = ReadModels::default();
        let org = organization(&mut models, "root.acme", "provider");
        let started = json!({
            "super_admin_user_id": UserId::new(),
            "target_user_id": UserId::new(),
            "target_org_id": org,
            "justification_reason": "audit",
            "expires_at": Utc::now() + Duration::minutes(30)
        });
        let err = ImpersonationProjection
            .apply(&event(StreamId::new(), "impersonation", 1, "impersonation.started", started), &mut models)
            .unwrap_err();
        assert!(matches!(err, ProjectionError::NotFound { table: "users", .. }));
    }
}
