//! Workflow queue mirror.
//!
//! External workers poll this table, claim entries and report back through new
//! events. The projection only mirrors queue state; it never runs work.
//!
//! ```text
//! pending ──claimed──▶ processing ──completed──▶ completed
//!    ▲                     │
//!    └──────pending────── failed ◀──failed──┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use carebase_core::{DomainError, DomainResult, OrganizationId, StreamId, UserId};
use carebase_events::{DomainEvent, EventRecord, domain_events};

use super::audit::AuditOperation;
use super::store::{ReadModels, Table};
use super::{ProjectionError, ProjectionRow, insert_row, update_row};
use crate::router::{HandlerOutput, ProjectionHandler, RouteKey};

const TABLE: &str = "workflow_queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowQueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WorkflowQueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowQueueStatus::Pending => "pending",
            WorkflowQueueStatus::Processing => "processing",
            WorkflowQueueStatus::Completed => "completed",
            WorkflowQueueStatus::Failed => "failed",
        }
    }

    fn advance(self, to: WorkflowQueueStatus) -> DomainResult<WorkflowQueueStatus> {
        use WorkflowQueueStatus::*;
        match (self, to) {
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed) | (Failed, Pending) => Ok(to),
            (from, to) => Err(DomainError::invalid_transition(format!(
                "workflow queue entry cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowQueued {
    pub workflow_type: String,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub payload: Option<JsonValue>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowClaimed {
    pub worker_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCompleted {
    #[serde(default)]
    pub result: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFailed {
    pub error: String,
}

domain_events! {
    /// Queue entry lifecycle (stream per queue entry).
    pub enum WorkflowQueueEvent in "workflow_queue" {
        Pending(WorkflowQueued) = "workflow.queue.pending",
        Claimed(WorkflowClaimed) = "workflow.queue.claimed",
        Completed(WorkflowCompleted) = "workflow.queue.completed",
        Failed(WorkflowFailed) = "workflow.queue.failed",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Read Model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowQueueRow {
    pub id: StreamId,
    pub workflow_type: String,
    pub organization_id: Option<OrganizationId>,
    pub workflow_id: Option<String>,
    pub payload: Option<JsonValue>,
    pub priority: i32,
    pub status: WorkflowQueueStatus,
    pub attempts: u32,
    pub worker_id: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub result: Option<JsonValue>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowQueueRow {
    fn queued(id: StreamId, e: WorkflowQueued, event: &EventRecord) -> Self {
        Self {
            id,
            workflow_type: e.workflow_type,
            organization_id: e.organization_id,
            workflow_id: e.workflow_id,
            payload: e.payload,
            priority: e.priority,
            status: WorkflowQueueStatus::Pending,
            attempts: 0,
            worker_id: None,
            claimed_at: None,
            completed_at: None,
            failed_at: None,
            result: None,
            last_error: None,
            created_at: event.created_at,
            updated_by: event.event_metadata.user_id,
            updated_at: event.created_at,
        }
    }

    fn move_to(&mut self, to: WorkflowQueueStatus) -> Result<(), ProjectionError> {
        self.status = self.status.advance(to)?;
        Ok(())
    }
}

impl ProjectionRow for WorkflowQueueRow {
    fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    fn touch(&mut self, at: DateTime<Utc>, by: Option<UserId>) {
        self.updated_at = at;
        self.updated_by = by;
    }
}

fn queue(models: &mut ReadModels) -> &mut Table<StreamId, WorkflowQueueRow> {
    &mut models.workflow_queue
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WorkflowQueueProjection;

impl ProjectionHandler for WorkflowQueueProjection {
    fn name(&self) -> &'static str {
        "workflow_queue"
    }

    fn route(&self) -> RouteKey {
        RouteKey::stream(WorkflowQueueEvent::STREAM_TYPE)
    }

    fn apply(&self, event: &EventRecord, models: &mut ReadModels) -> Result<HandlerOutput, ProjectionError> {
        let id = event.stream_id;
        let op = AuditOperation::Update;

        match event.decode::<WorkflowQueueEvent>()? {
            WorkflowQueueEvent::Pending(e) => {
                if e.workflow_type.trim().is_empty() {
                    return Err(DomainError::validation("workflow_type cannot be empty").into());
                }
                match models.workflow_queue.get(&id).map(|row| row.status) {
                    None => {
                        insert_row(models, event, queue, id, WorkflowQueueRow::queued(id, e, event));
                    }
                    Some(WorkflowQueueStatus::Pending) => {}
                    Some(_) => {
                        update_row(models, event, queue, TABLE, &id, op, |row| {
                            row.move_to(WorkflowQueueStatus::Pending)?;
                            row.worker_id = None;
                            row.claimed_at = None;
                            if e.payload.is_some() {
                                row.payload = e.payload;
                            }
                            row.priority = e.priority;
                            Ok(())
                        })?;
                    }
                }
            }
            WorkflowQueueEvent::Claimed(e) => {
                update_row(models, event, queue, TABLE, &id, op, |row| {
                    row.move_to(WorkflowQueueStatus::Processing)?;
                    row.attempts += 1;
                    row.worker_id = Some(e.worker_id);
                    row.claimed_at = Some(event.created_at);
                    Ok(())
                })?;
            }
            WorkflowQueueEvent::Completed(e) => {
                update_row(models, event, queue, TABLE, &id, op, |row| {
                    row.move_to(WorkflowQueueStatus::Completed)?;
                    row.completed_at = Some(event.created_at);
                    row.result = e.result;
                    Ok(())
                })?;
            }
            WorkflowQueueEvent::Failed(e) => {
                update_row(models, event, queue, TABLE, &id, op, |row| {
                    row.move_to(WorkflowQueueStatus::Failed)?;
                    row.failed_at = Some(event.created_at);
                    row.last_error = Some(e.error);
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

    fn apply(models: &mut ReadModels, stream: StreamId, version: u64, event: WorkflowQueueEvent) -> Result<(), ProjectionError> {
        let new = NewEvent::typed(stream, &event, EventMetadata::new()).unwrap();
        WorkflowQueueProjection
            .apply(&EventRecord::commit(new, version, version, Utc::now()), models)
            .map(|_| ())
    }

    fn pending() -> WorkflowQueueEvent {
        WorkflowQueueEvent::Pending(WorkflowQueued {
            workflow_type: "organization_bootstrap".into(),
            organization_id: None,
            workflow_id: None,
            payload: None,
            priority: 0,
        })
    }

    #[test]
    fn failed_entries_can_be_requeued() {
        let mut models = ReadModels::default();
        let id = StreamId::new();
        apply(&mut models, id, 1, pending()).unwrap();
        apply(&mut models, id, 2, WorkflowQueueEvent::Claimed(WorkflowClaimed { worker_id: "w1".into() })).unwrap();
        apply(&mut models, id, 3, WorkflowQueueEvent::Failed(WorkflowFailed { error: "boom".into() })).unwrap();
        apply(&mut models, id, 4, pending()).unwrap();

        let row = models.workflow_queue().get(&id).unwrap();
        assert_eq!(row.status, WorkflowQueueStatus::Pending);
        assert_eq!(row.attempts, 1);
        assert_eq!(row.last_error.as_deref(), Some("boom"));
        assert!(row.worker_id.is_none());
    }

    #[test]
    fn completion_requires_a_claim() {
        let mut models = ReadModels::default();
        let id = StreamId::new();
        apply(&mut models, id, 1, pending()).unwrap();
        let err = apply(&mut models, id, 2, WorkflowQueueEvent::Completed(WorkflowCompleted { result: None })).unwrap_err();
        assert!(matches!(err, ProjectionError::Domain(DomainError::InvalidTransition(_))));
        assert_eq!(models.workflow_queue().get(&id).unwrap().status, WorkflowQueueStatus::Pending);
    }

    #[test]
    fn completed_entries_stay_completed() {
        let mut models = ReadModels::default();
        let id = StreamId::new();
        apply(&mut models, id, 1, pending()).unwrap();
        apply(&mut models, id, 2, WorkflowQueueEvent::Claimed(WorkflowClaimed { worker_id: "w1".into() })).unwrap();
        apply(&mut models, id, 3, WorkflowQueueEvent::Completed(WorkflowCompleted { result: None })).unwrap();
        assert!(apply(&mut models, id, 4, pending()).is_err());
    }
}
