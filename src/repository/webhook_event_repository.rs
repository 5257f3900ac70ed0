use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{error::Result, repository::WebhookEventRepository};

pub struct SqliteWebhookEventRepository {
    pool: SqlitePool,
}

impl SqliteWebhookEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventRepository for SqliteWebhookEventRepository {
    async fn claim(&self, event_id: &str, event_type: &str, stale_before: DateTime<Utc>) -> Result<Option<i64>> {
        let attempt = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO processed_webhook_events (event_id, event_type, received_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(event_id) DO UPDATE
            SET event_type = excluded.event_type,
                received_at = excluded.received_at,
                released = 0
            WHERE processed_at IS NULL AND (released = 1 OR received_at < ?4)
            RETURNING attempts
            "#
        )
        .bind(event_id)
        .bind(event_type)
        .bind(Utc::now().naive_utc())
        .bind(stale_before.naive_utc())
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempt)
    }

    async fn complete(&self, event_id: &str, evaluation_id: Option<Uuid>, outcome: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE processed_webhook_events
            SET evaluation_id = ?, outcome = ?, processed_at = ?
            WHERE event_id = ?
            "#
        )
        .bind(evaluation_id.map(|id| id.to_string()))
        .bind(outcome)
        .bind(Utc::now().naive_utc())
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn release(&self, event_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE processed_webhook_events
            SET released = 1, attempts = attempts + 1
            WHERE event_id = ? AND processed_at IS NULL
            "#
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
