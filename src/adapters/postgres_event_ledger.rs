//! Postgres implementation of EventLedger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{InboundEvent, MAX_PROCESSING_ATTEMPTS};
use crate::ports::{EventLedger, RepositoryError, RepositoryResult};

#[derive(Clone)]
pub struct PostgresEventLedger {
    pool: PgPool,
}

impl PostgresEventLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLedger for PostgresEventLedger {
    async fn record(
        &self,
        channel_id: &str,
        event_type: &str,
        payload: &str,
    ) -> RepositoryResult<InboundEvent> {
        let event = InboundEvent::new(
            channel_id.to_string(),
            event_type.to_string(),
            payload.to_string(),
        );

        let inserted = sqlx::query_as::<_, EventRow>(
            r#"
            INSERT INTO inbound_events (
                id, channel_id, event_type, payload, payload_digest,
                processed, processing_attempts, processing_error, received_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, FALSE, 0, NULL, $6, $6)
            ON CONFLICT (channel_id, payload_digest) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(event.id)
        .bind(&event.channel_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(&event.payload_digest)
        .bind(event.received_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(row.into());
        }

        // Identical body already on record: a provider redelivery.
        let existing = sqlx::query_as::<_, EventRow>(
            "SELECT * FROM inbound_events WHERE channel_id = $1 AND payload_digest = $2",
        )
        .bind(&event.channel_id)
        .bind(&event.payload_digest)
        .fetch_one(&self.pool)
        .await?;

        Ok(existing.into())
    }

    async fn mark_processed(
        &self,
        event_id: Uuid,
        success: bool,
        error: Option<String>,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE inbound_events
            SET processing_attempts = LEAST(processing_attempts + 1, $4),
                processed = processed OR $2,
                processing_error = CASE WHEN processed AND (NOT $2 OR $3::TEXT IS NULL) THEN processing_error ELSE $3 END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .bind(success)
        .bind(&error)
        .bind(MAX_PROCESSING_ATTEMPTS)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(event_id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, event_id: Uuid) -> RepositoryResult<Option<InboundEvent>> {
        let row = sqlx::query_as::<_, EventRow>("SELECT * FROM inbound_events WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list_unprocessed(&self, limit: i64) -> RepositoryResult<Vec<InboundEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT * FROM inbound_events
            WHERE processed = FALSE AND processing_attempts < $1
            ORDER BY received_at ASC
            LIMIT $2
            "#,
        )
        .bind(MAX_PROCESSING_ATTEMPTS)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_stalled(&self, limit: i64) -> RepositoryResult<Vec<InboundEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT * FROM inbound_events
            WHERE processed = FALSE AND processing_attempts >= $1
            ORDER BY received_at ASC
            LIMIT $2
            "#,
        )
        .bind(MAX_PROCESSING_ATTEMPTS)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_anomalies(&self, limit: i64) -> RepositoryResult<Vec<InboundEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT * FROM inbound_events
            WHERE processed = TRUE AND processing_error IS NOT NULL
            ORDER BY received_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    channel_id: String,
    event_type: String,
    payload: String,
    payload_digest: String,
    processed: bool,
    processing_attempts: i32,
    processing_error: Option<String>,
    received_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EventRow> for InboundEvent {
    fn from(row: EventRow) -> Self {
        InboundEvent {
            id: row.id,
            channel_id: row.channel_id,
            event_type: row.event_type,
            payload: row.payload,
            payload_digest: row.payload_digest,
            processed: row.processed,
            processing_attempts: row.processing_attempts,
            processing_error: row.processing_error,
            received_at: row.received_at,
            updated_at: row.updated_at,
        }
    }
}
