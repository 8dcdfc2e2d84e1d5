//! Postgres-backed event store implementation.
//!
//! Persists the log in the `domain_events` table (see
//! `migrations/0001_domain_events.sql`). Shape rules are enforced twice: by
//! `NewEvent` construction and by CHECK constraints in the schema.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError | Scenario |
//! |------------|----------------------|-----------------|----------|
//! | Database (unique violation) | `23505` | `VersionConflict` | Concurrent append claimed the same `stream_version` |
//! | Database (check constraint violation) | `23514` | `Storage` | Row rejected by a shape CHECK |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed / RowNotFound / Other | N/A | `Storage` | Connection or driver failures |
//!
//! ## Runtime
//!
//! The store owns a `tokio` runtime handle and drives every query of the
//! synchronous `EventStore` impl on it, so plain worker threads can call it.
//! Inside a multi-threaded runtime the calling worker is parked with
//! `block_in_place`; a current-thread runtime cannot block on itself and gets a
//! storage error instead.
//!
//! ## Concurrency
//!
//! `append` takes a transaction-scoped advisory lock on the stream key before
//! reading the head, so appends to one stream serialize while unrelated streams
//! proceed in parallel. The `(stream_id, stream_type, stream_version)` unique
//! constraint is the backstop.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{Span, instrument};
use uuid::Uuid;

use carebase_core::{EventId, ExpectedVersion, StreamId};
use carebase_events::{EventMetadata, EventRecord, EventType, NewEvent, StreamKey};

use super::r#trait::{EventStore, EventStoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_domain_events.sql");

const SELECT_COLUMNS: &str = r#"
    event_id,
    sequence_number,
    stream_id,
    stream_type,
    stream_version,
    event_type,
    event_data,
    event_metadata,
    created_at,
    processed_at,
    processing_error,
    retry_count,
    last_attempt_at
"#;

/// Postgres-backed append-only event store.
///
/// `Send + Sync`; all access goes through the SQLx pool.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresEventStore {
    /// `runtime` drives the queries issued through the synchronous `EventStore`
    /// impl.
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Open a pool on `database_url` from synchronous code.
    pub fn connect(database_url: &str, runtime: Handle) -> Result<Self, EventStoreError> {
        let pool = block_on(&runtime, async {
            PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .map_err(|e| map_sqlx_error("connect", e))
        })?;
        Ok(Self::new(pool, runtime))
    }

    /// Create the `domain_events` table and its indexes if missing.
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// `migrate` from synchronous code.
    pub fn ensure_schema(&self) -> Result<(), EventStoreError> {
        self.block_on(self.migrate())
    }

    /// Append one event with an optimistic head check.
    #[instrument(
        skip(self, event),
        fields(
            event_id = %event.event_id,
            stream = %event.stream_key(),
            event_type = %event.event_type,
            expected = ?expected,
            sequence_number = tracing::field::Empty,
            stream_version = tracing::field::Empty
        ),
        err
    )]
    pub async fn append_event(&self, event: NewEvent, expected: ExpectedVersion) -> Result<EventRecord, EventStoreError> {
        let key = event.stream_key();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        lock_stream(&mut tx, &key).await?;
        let head = stream_head(&mut tx, &key).await?;

        if !expected.matches(head) {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(EventStoreError::VersionConflict {
                stream: key,
                expected,
                actual: head,
            });
        }

        let version = head + 1;
        let row = sqlx::query(
            r#"
            INSERT INTO domain_events (
                event_id,
                stream_id,
                stream_type,
                stream_version,
                event_type,
                event_data,
                event_metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING sequence_number, created_at
            "#,
        )
        .bind(event.event_id.as_uuid())
        .bind(event.stream_id.as_uuid())
        .bind(&event.stream_type)
        .bind(version as i64)
        .bind(event.event_type.as_str())
        .bind(&event.event_data)
        .bind(metadata_json(&event.event_metadata)?)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                EventStoreError::VersionConflict {
                    stream: key.clone(),
                    expected,
                    actual: version,
                }
            } else {
                map_sqlx_error("insert_event", e)
            }
        })?;

        let sequence: i64 = row
            .try_get("sequence_number")
            .map_err(|e| map_sqlx_error("read_sequence_number", e))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("read_created_at", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let span = Span::current();
        span.record("sequence_number", sequence);
        span.record("stream_version", version);

        Ok(EventRecord::commit(event, sequence as u64, version, created_at))
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    pub async fn fetch_event(&self, event_id: EventId) -> Result<Option<EventRecord>, EventStoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM domain_events WHERE event_id = $1");
        let row = sqlx::query(&sql)
            .bind(event_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_event", e))?;

        row.map(|r| decode_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(stream = %stream, event_count = tracing::field::Empty), err)]
    pub async fn fetch_stream(&self, stream: &StreamKey) -> Result<Vec<EventRecord>, EventStoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM domain_events \
             WHERE stream_id = $1 AND stream_type = $2 \
             ORDER BY stream_version ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(stream.stream_id.as_uuid())
            .bind(&stream.stream_type)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_stream", e))?;

        let events = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("event_count", events.len());
        Ok(events)
    }

    /// Whole log (or only the unprocessed tail) in sequence order.
    #[instrument(skip(self), fields(event_count = tracing::field::Empty), err)]
    pub async fn fetch_all(&self, unprocessed_only: bool) -> Result<Vec<EventRecord>, EventStoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM domain_events \
             WHERE ($1 = FALSE OR processed_at IS NULL) \
             ORDER BY sequence_number ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(unprocessed_only)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_all", e))?;

        let events = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("event_count", events.len());
        Ok(events)
    }

    #[instrument(skip(self), fields(stream = %stream), err)]
    pub async fn fetch_last_processed_version(&self, stream: &StreamKey) -> Result<u64, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(stream_version) FILTER (WHERE processed_at IS NOT NULL), 0) AS version
            FROM domain_events
            WHERE stream_id = $1 AND stream_type = $2
            "#,
        )
        .bind(stream.stream_id.as_uuid())
        .bind(&stream.stream_type)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("last_processed_version", e))?;

        let version: i64 = row
            .try_get("version")
            .map_err(|e| map_sqlx_error("read_version", e))?;
        Ok(version as u64)
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    pub async fn set_processed(&self, event_id: EventId, at: DateTime<Utc>) -> Result<(), EventStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE domain_events
            SET processed_at = $2, processing_error = NULL, last_attempt_at = $2
            WHERE event_id = $1
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_processed", e))?;

        if result.rows_affected() == 0 {
            return Err(EventStoreError::NotFound(event_id));
        }
        Ok(())
    }

    #[instrument(skip(self, error), fields(event_id = %event_id), err)]
    pub async fn set_failure(&self, event_id: EventId, error: &str, at: DateTime<Utc>) -> Result<EventRecord, EventStoreError> {
        let sql = format!(
            "UPDATE domain_events \
             SET processing_error = $2, retry_count = retry_count + 1, last_attempt_at = $3 \
             WHERE event_id = $1 \
             RETURNING {SELECT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(event_id.as_uuid())
            .bind(error)
            .bind(at)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_failure", e))?;

        match row {
            Some(row) => decode_row(&row),
            None => Err(EventStoreError::NotFound(event_id)),
        }
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T, EventStoreError>
    where
        F: Future<Output = Result<T, EventStoreError>>,
    {
        block_on(&self.runtime, fut)
    }
}

fn block_on<F, T>(runtime: &Handle, fut: F) -> Result<T, EventStoreError>
where
    F: Future<Output = Result<T, EventStoreError>>,
{
    match Handle::try_current() {
        Err(_) => runtime.block_on(fut),
        Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| runtime.block_on(fut))
        }
        Ok(_) => Err(EventStoreError::Storage(
            "PostgresEventStore cannot block a current-thread runtime; call it from a worker thread".to_string(),
        )),
    }
}

/// Serialize appends per stream for the life of the transaction.
async fn lock_stream(tx: &mut Transaction<'_, Postgres>, key: &StreamKey) -> Result<(), EventStoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(key.to_string())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_stream", e))?;
    Ok(())
}

async fn stream_head(tx: &mut Transaction<'_, Postgres>, key: &StreamKey) -> Result<u64, EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(stream_version), 0) AS head
        FROM domain_events
        WHERE stream_id = $1 AND stream_type = $2
        "#,
    )
    .bind(key.stream_id.as_uuid())
    .bind(&key.stream_type)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("stream_head", e))?;

    let head: i64 = row.try_get("head").map_err(|e| map_sqlx_error("read_head", e))?;
    Ok(head as u64)
}

fn metadata_json(metadata: &EventMetadata) -> Result<serde_json::Value, EventStoreError> {
    serde_json::to_value(metadata).map_err(|e| EventStoreError::Storage(format!("failed to encode metadata: {e}")))
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23514") => EventStoreError::Storage(format!("{msg} (check constraint)")),
                _ => EventStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => EventStoreError::Storage(format!("connection pool closed in {operation}")),
        sqlx::Error::RowNotFound => EventStoreError::Storage(format!("unexpected row not found in {operation}")),
        _ => EventStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct EventRow {
    event_id: Uuid,
    sequence_number: i64,
    stream_id: Uuid,
    stream_type: String,
    stream_version: i64,
    event_type: String,
    event_data: serde_json::Value,
    event_metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    processing_error: Option<String>,
    retry_count: i32,
    last_attempt_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for EventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(EventRow {
            event_id: row.try_get("event_id")?,
            sequence_number: row.try_get("sequence_number")?,
            stream_id: row.try_get("stream_id")?,
            stream_type: row.try_get("stream_type")?,
            stream_version: row.try_get("stream_version")?,
            event_type: row.try_get("event_type")?,
            event_data: row.try_get("event_data")?,
            event_metadata: row.try_get("event_metadata")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            processing_error: row.try_get("processing_error")?,
            retry_count: row.try_get("retry_count")?,
            last_attempt_at: row.try_get("last_attempt_at")?,
        })
    }
}

impl TryFrom<EventRow> for EventRecord {
    type Error = EventStoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_metadata: EventMetadata = serde_json::from_value(row.event_metadata)
            .map_err(|e| EventStoreError::Storage(format!("failed to decode event_metadata: {e}")))?;

        Ok(EventRecord {
            event_id: EventId::from_uuid(row.event_id),
            sequence_number: row.sequence_number as u64,
            stream_id: StreamId::from_uuid(row.stream_id),
            stream_type: row.stream_type,
            stream_version: row.stream_version as u64,
            event_type: EventType::parse(&row.event_type)?,
            event_data: row.event_data,
            event_metadata,
            created_at: row.created_at,
            processed_at: row.processed_at,
            processing_error: row.processing_error,
            retry_count: row.retry_count.max(0) as u32,
            last_attempt_at: row.last_attempt_at,
        })
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<EventRecord, EventStoreError> {
    EventRow::from_row(row)
        .map_err(|e| EventStoreError::Storage(format!("failed to deserialize event row: {e}")))?
        .try_into()
}

// Synchronous boundary used by the router and workers.

impl EventStore for PostgresEventStore {
    fn append(&self, event: NewEvent, expected: ExpectedVersion) -> Result<EventRecord, EventStoreError> {
        self.block_on(self.append_event(event, expected))
    }

    fn get(&self, event_id: EventId) -> Result<Option<EventRecord>, EventStoreError> {
        self.block_on(self.fetch_event(event_id))
    }

    fn load_stream(&self, stream: &StreamKey) -> Result<Vec<EventRecord>, EventStoreError> {
        self.block_on(self.fetch_stream(stream))
    }

    fn load_all(&self) -> Result<Vec<EventRecord>, EventStoreError> {
        self.block_on(self.fetch_all(false))
    }

    fn last_processed_version(&self, stream: &StreamKey) -> Result<u64, EventStoreError> {
        self.block_on(self.fetch_last_processed_version(stream))
    }

    fn unprocessed(&self) -> Result<Vec<EventRecord>, EventStoreError> {
        self.block_on(self.fetch_all(true))
    }

    fn mark_processed(&self, event_id: EventId, at: DateTime<Utc>) -> Result<(), EventStoreError> {
        self.block_on(self.set_processed(event_id, at))
    }

    fn record_failure(&self, event_id: EventId, error: &str, at: DateTime<Utc>) -> Result<EventRecord, EventStoreError> {
        self.block_on(self.set_failure(event_id, error, at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn multi_thread() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn row(event_type: &str) -> EventRow {
        let now = Utc::now();
        EventRow {
            event_id: Uuid::now_v7(),
            sequence_number: 7,
            stream_id: Uuid::now_v7(),
            stream_type: "client".to_string(),
            stream_version: 3,
            event_type: event_type.to_string(),
            event_data: json!({"first_name": "Ada"}),
            event_metadata: json!({"reason": "intake"}),
            created_at: now,
            processed_at: None,
            processing_error: Some("client row not found".to_string()),
            retry_count: 2,
            last_attempt_at: Some(now),
        }
    }

    #[test]
    fn row_decodes_into_a_record() {
        let raw = row("client.registered");
        let (event_id, stream_id) = (raw.event_id, raw.stream_id);

        let record = EventRecord::try_from(raw).unwrap();
        assert_eq!(*record.event_id.as_uuid(), event_id);
        assert_eq!(record.stream_key(), StreamKey::new(StreamId::from_uuid(stream_id), "client"));
        assert_eq!((record.sequence_number, record.stream_version), (7, 3));
        assert_eq!(record.event_type.as_str(), "client.registered");
        assert_eq!(record.event_metadata.reason.as_deref(), Some("intake"));
        assert_eq!(record.retry_count, 2);
        assert!(!record.is_processed());
    }

    #[test]
    fn malformed_rows_are_rejected() {
        assert!(matches!(
            EventRecord::try_from(row("Registered")),
            Err(EventStoreError::Validation(_))
        ));

        let mut bad_metadata = row("client.registered");
        bad_metadata.event_metadata = json!(["not", "an", "object"]);
        assert!(matches!(EventRecord::try_from(bad_metadata), Err(EventStoreError::Storage(_))));

        let mut negative = row("client.registered");
        negative.retry_count = -1;
        assert_eq!(EventRecord::try_from(negative).unwrap().retry_count, 0);
    }

    #[test]
    fn driver_errors_map_to_storage() {
        let closed = map_sqlx_error("append", sqlx::Error::PoolClosed);
        assert!(matches!(closed, EventStoreError::Storage(ref m) if m.contains("pool closed in append")));

        let missing = map_sqlx_error("get", sqlx::Error::RowNotFound);
        assert!(matches!(missing, EventStoreError::Storage(ref m) if m.contains("row not found in get")));

        assert!(!is_unique_violation(&sqlx::Error::PoolClosed));
    }

    #[test]
    fn sync_calls_work_from_threads_outside_the_runtime() {
        let runtime = multi_thread();
        let store = {
            let _entered = runtime.enter();
            let pool = PgPoolOptions::new().connect_lazy("postgres://localhost/carebase").unwrap();
            PostgresEventStore::new(pool, runtime.handle().clone())
        };

        let answer = std::thread::spawn(move || store.block_on(async { Ok(42) }))
            .join()
            .unwrap();
        assert_eq!(answer.unwrap(), 42);
    }

    #[test]
    fn runtime_worker_threads_can_block() {
        let runtime = multi_thread();
        let handle = runtime.handle().clone();

        let answer = runtime
            .block_on(async move { tokio::spawn(async move { block_on(&handle, async { Ok(7) }) }).await })
            .unwrap();
        assert_eq!(answer.unwrap(), 7);
    }

    #[test]
    fn current_thread_runtime_gets_an_error_not_a_panic() {
        let runtime = multi_thread();
        let current = tokio::runtime::Builder::new_current_thread().build().unwrap();

        let result = current.block_on(async { block_on(runtime.handle(), async { Ok(1) }) });
        assert!(matches!(result, Err(EventStoreError::Storage(_))));
    }

    /// Live database; run with `DATABASE_URL=... cargo test -- --ignored`.
    fn database() -> Option<(tokio::runtime::Runtime, PostgresEventStore)> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let runtime = multi_thread();
        let store = PostgresEventStore::connect(&url, runtime.handle().clone()).unwrap();
        runtime.block_on(store.migrate()).unwrap();
        Some((runtime, store))
    }

    fn event(stream: StreamId, n: u32) -> NewEvent {
        NewEvent::new(stream, "client", "client.information_updated", json!({ "notes": format!("visit {n}") }), EventMetadata::new())
            .unwrap()
    }

    #[test]
    #[ignore = "requires DATABASE_URL"]
    fn append_conflicts_and_processing_state_round_trip() {
        let Some((_runtime, store)) = database() else {
            return;
        };
        let stream = StreamId::new();
        let key = StreamKey::new(stream, "client");

        let first = store.append(event(stream, 1), ExpectedVersion::Exact(0)).unwrap();
        assert_eq!(first.stream_version, 1);
        let stale = store.append(event(stream, 2), ExpectedVersion::Exact(0)).unwrap_err();
        assert!(matches!(stale, EventStoreError::VersionConflict { actual: 1, .. }));
        let second = store.append(event(stream, 2), ExpectedVersion::Exact(1)).unwrap();
        assert!(second.sequence_number > first.sequence_number);

        assert_eq!(store.last_processed_version(&key).unwrap(), 0);
        store.mark_processed(first.event_id, Utc::now()).unwrap();
        assert_eq!(store.last_processed_version(&key).unwrap(), 1);

        let failed = store.record_failure(second.event_id, "client row not found", Utc::now()).unwrap();
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.processing_error.as_deref(), Some("client row not found"));
        assert_eq!(store.last_processed_version(&key).unwrap(), 1);

        let unprocessed: Vec<_> = store.unprocessed().unwrap().into_iter().map(|e| e.event_id).collect();
        assert!(unprocessed.contains(&second.event_id));
        assert!(!unprocessed.contains(&first.event_id));
        assert_eq!(store.load_stream(&key).unwrap().len(), 2);
    }

    #[test]
    #[ignore = "requires DATABASE_URL"]
    fn duplicate_stream_version_is_a_unique_violation() {
        let Some((runtime, store)) = database() else {
            return;
        };
        let stream = StreamId::new();
        let first = store.append(event(stream, 1), ExpectedVersion::Any).unwrap();

        let err = runtime
            .block_on(
                sqlx::query(
                    "INSERT INTO domain_events (event_id, stream_id, stream_type, stream_version, event_type, event_data) \
                     VALUES ($1, $2, 'client', 1, 'client.information_updated', '{\"notes\": \"dup\"}')",
                )
                .bind(Uuid::now_v7())
                .bind(first.stream_id.as_uuid())
                .execute(&*store.pool),
            )
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }
}
