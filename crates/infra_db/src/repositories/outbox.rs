//! Outbox repository implementation
//!
//! Events are written on the same transaction as the rows they describe and
//! read back in insertion order by the dispatcher.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use domain_billing::{BillingEventType, OutboxEvent};

use crate::error::DatabaseError;

/// Repository for the transactional outbox
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(conn: &mut PgConnection, row: &OutboxEventRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (
                event_id, tenant_id, event_type, aggregate_id, payload, occurred_at, dispatched_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(row.event_id)
        .bind(row.tenant_id)
        .bind(&row.event_type)
        .bind(&row.aggregate_id)
        .bind(&row.payload)
        .bind(row.occurred_at)
        .bind(row.dispatched_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Undispatched events of the tenant in insertion order
    pub async fn pending(&self, tenant_id: Uuid, limit: i64) -> Result<Vec<OutboxEventRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, OutboxEventRow>(
            r#"
            SELECT event_id, tenant_id, event_type, aggregate_id, payload, occurred_at, dispatched_at
            FROM outbox_events
            WHERE tenant_id = $1 AND dispatched_at IS NULL
            ORDER BY seq
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Stamps the dispatch time; an already dispatched event keeps its first stamp
    pub async fn mark_dispatched(
        &self,
        tenant_id: Uuid,
        event_id: Uuid,
        dispatched_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET dispatched_at = COALESCE(dispatched_at, $3)
            WHERE tenant_id = $1 AND event_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(event_id)
        .bind(dispatched_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("OutboxEvent", event_id));
        }
        Ok(())
    }
}

/// Database row for an outbox event
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxEventRow {
    pub event_id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl From<&OutboxEvent> for OutboxEventRow {
    fn from(event: &OutboxEvent) -> Self {
        Self {
            event_id: event.id.into(),
            tenant_id: event.tenant_id.into(),
            event_type: event.event_type.as_str().to_string(),
            aggregate_id: event.aggregate_id.clone(),
            payload: event.payload.clone(),
            occurred_at: event.occurred_at,
            dispatched_at: event.dispatched_at,
        }
    }
}

impl TryFrom<OutboxEventRow> for OutboxEvent {
    type Error = DatabaseError;

    fn try_from(row: OutboxEventRow) -> Result<Self, Self::Error> {
        let event_type: BillingEventType = row.event_type.parse().map_err(DatabaseError::corrupt)?;
        Ok(OutboxEvent {
            id: row.event_id.into(),
            tenant_id: row.tenant_id.into(),
            event_type,
            aggregate_id: row.aggregate_id,
            payload: row.payload,
            occurred_at: row.occurred_at,
            dispatched_at: row.dispatched_at,
        })
    }
}
