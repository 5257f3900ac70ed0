use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{
        Evaluation, EvaluationStatus, EvaluationTransition, NewEvaluation, PaymentStatus,
        StatusChange,
    },
    error::{AppError, Result},
    repository::{EvaluationRepository, SettlementKind},
};

const EVALUATION_COLUMNS: &str = r#"
    SELECT id, player_id, scout_id, purchased_by, status,
           price_cents, platform_fee_cents, scout_payout_cents, payment_status,
           checkout_session_id, checkout_url, payment_reference,
           payout_reference, refund_reference,
           notes, denied_reason, cancelled_reason,
           created_at, confirmed_at, paid_at, completed_at,
           denied_at, cancelled_at, refunded_at,
           settlement_token, capture_attempts, refund_attempts, updated_at
    FROM evaluations
"#;

#[derive(FromRow)]
struct EvaluationRow {
    id: String,
    player_id: String,
    scout_id: String,
    purchased_by: Option<String>,
    status: String,
    price_cents: i64,
    platform_fee_cents: i64,
    scout_payout_cents: i64,
    payment_status: String,
    checkout_session_id: Option<String>,
    checkout_url: Option<String>,
    payment_reference: Option<String>,
    payout_reference: Option<String>,
    refund_reference: Option<String>,
    notes: Option<String>,
    denied_reason: Option<String>,
    cancelled_reason: Option<String>,
    created_at: NaiveDateTime,
    confirmed_at: Option<NaiveDateTime>,
    paid_at: Option<NaiveDateTime>,
    completed_at: Option<NaiveDateTime>,
    denied_at: Option<NaiveDateTime>,
    cancelled_at: Option<NaiveDateTime>,
    refunded_at: Option<NaiveDateTime>,
    settlement_token: Option<String>,
    capture_attempts: i64,
    refund_attempts: i64,
    updated_at: NaiveDateTime,
}

#[derive(FromRow)]
struct StatusChangeRow {
    id: String,
    evaluation_id: String,
    from_status: String,
    to_status: String,
    trigger: String,
    actor_id: Option<String>,
    created_at: NaiveDateTime,
}

pub struct SqliteEvaluationRepository {
    pool: SqlitePool,
}

impl SqliteEvaluationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_evaluation(row: EvaluationRow) -> Result<Evaluation> {
        Ok(Evaluation {
            id: parse_uuid(&row.id)?,
            player_id: parse_uuid(&row.player_id)?,
            scout_id: parse_uuid(&row.scout_id)?,
            purchased_by: row.purchased_by.as_deref().map(parse_uuid).transpose()?,
            status: row.status.parse::<EvaluationStatus>().map_err(AppError::Database)?,
            price_cents: row.price_cents,
            platform_fee_cents: row.platform_fee_cents,
            scout_payout_cents: row.scout_payout_cents,
            payment_status: row.payment_status.parse::<PaymentStatus>().map_err(AppError::Database)?,
            checkout_session_id: row.checkout_session_id,
            checkout_url: row.checkout_url,
            payment_reference: row.payment_reference,
            payout_reference: row.payout_reference,
            refund_reference: row.refund_reference,
            notes: row.notes,
            denied_reason: row.denied_reason,
            cancelled_reason: row.cancelled_reason,
            created_at: to_utc(row.created_at),
            confirmed_at: row.confirmed_at.map(to_utc),
            paid_at: row.paid_at.map(to_utc),
            completed_at: row.completed_at.map(to_utc),
            denied_at: row.denied_at.map(to_utc),
            cancelled_at: row.cancelled_at.map(to_utc),
            refunded_at: row.refunded_at.map(to_utc),
            settlement_token: row.settlement_token,
            capture_attempts: row.capture_attempts,
            refund_attempts: row.refund_attempts,
            updated_at: to_utc(row.updated_at),
        })
    }

    fn row_to_status_change(row: StatusChangeRow) -> Result<StatusChange> {
        Ok(StatusChange {
            id: parse_uuid(&row.id)?,
            evaluation_id: parse_uuid(&row.evaluation_id)?,
            from_status: row.from_status.parse::<EvaluationStatus>().map_err(AppError::Database)?,
            to_status: row.to_status.parse::<EvaluationStatus>().map_err(AppError::Database)?,
            trigger: row.trigger,
            actor_id: row.actor_id.as_deref().map(parse_uuid).transpose()?,
            created_at: to_utc(row.created_at),
        })
    }

    async fn fetch_optional_where(&self, clause: &str, value: &str) -> Result<Option<Evaluation>> {
        let sql = format!("{} WHERE {} = ? ORDER BY created_at DESC LIMIT 1", EVALUATION_COLUMNS, clause);
        let row = sqlx::query_as::<_, EvaluationRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_evaluation).transpose()
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| AppError::Database(e.to_string()))
}

fn to_utc(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(dt, Utc)
}

fn status_placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[async_trait]
impl EvaluationRepository for SqliteEvaluationRepository {
    async fn create(&self, evaluation: NewEvaluation) -> Result<Evaluation> {
        let id_str = evaluation.id.to_string();
        let now = Utc::now().naive_utc();
        let confirmed_at = (evaluation.status == EvaluationStatus::InProgress).then_some(now);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO evaluations (
                id, player_id, scout_id, purchased_by, status,
                price_cents, platform_fee_cents, scout_payout_cents, payment_status,
                created_at, confirmed_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(&id_str)
        .bind(evaluation.player_id.to_string())
        .bind(evaluation.scout_id.to_string())
        .bind(evaluation.purchased_by.map(|id| id.to_string()))
        .bind(evaluation.status.as_str())
        .bind(evaluation.price_cents)
        .bind(evaluation.platform_fee_cents)
        .bind(evaluation.scout_payout_cents)
        .bind(evaluation.payment_status.as_str())
        .bind(now)
        .bind(confirmed_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::Conflict(
                "An active evaluation already exists for this player and scout".to_string(),
            ),
            other => AppError::Database(other.to_string()),
        })?;

        sqlx::query(
            r#"
            INSERT INTO evaluation_events (id, evaluation_id, from_status, to_status, trigger, actor_id, created_at)
            VALUES (?, ?, ?, ?, 'created', NULL, ?)
            "#
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&id_str)
        .bind(evaluation.status.as_str())
        .bind(evaluation.status.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.find_by_id(evaluation.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created evaluation".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Evaluation>> {
        self.fetch_optional_where("id", &id.to_string()).await
    }

    async fn find_active_for_pair(&self, player_id: Uuid, scout_id: Uuid) -> Result<Option<Evaluation>> {
        let sql = format!(
            "{} WHERE player_id = ? AND scout_id = ? AND status IN ({})",
            EVALUATION_COLUMNS,
            status_placeholders(EvaluationStatus::ACTIVE.len()),
        );
        let mut query = sqlx::query_as::<_, EvaluationRow>(&sql)
            .bind(player_id.to_string())
            .bind(scout_id.to_string());
        for status in EvaluationStatus::ACTIVE {
            query = query.bind(status.as_str());
        }

        let row = query.fetch_optional(&self.pool).await?;
        row.map(Self::row_to_evaluation).transpose()
    }

    async fn find_by_checkout_session(&self, session_id: &str) -> Result<Option<Evaluation>> {
        self.fetch_optional_where("checkout_session_id", session_id).await
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Evaluation>> {
        self.fetch_optional_where("payment_reference", reference).await
    }

    async fn list_for_profile(&self, profile_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Evaluation>> {
        let sql = format!(
            "{} WHERE player_id = ?1 OR scout_id = ?1 OR purchased_by = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            EVALUATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, EvaluationRow>(&sql)
            .bind(profile_id.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_evaluation).collect()
    }

    async fn list_active_for_profile(&self, profile_id: Uuid) -> Result<Vec<Evaluation>> {
        let sql = format!(
            "{} WHERE (player_id = ? OR scout_id = ?) AND status IN ({}) ORDER BY created_at",
            EVALUATION_COLUMNS,
            status_placeholders(EvaluationStatus::ACTIVE.len()),
        );
        let id_str = profile_id.to_string();
        let mut query = sqlx::query_as::<_, EvaluationRow>(&sql)
            .bind(&id_str)
            .bind(&id_str);
        for status in EvaluationStatus::ACTIVE {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_evaluation).collect()
    }

    async fn list_unanswered_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Evaluation>> {
        let sql = format!(
            r#"{} WHERE (status = ?2 AND created_at < ?1)
                  OR (status = ?3 AND COALESCE(confirmed_at, created_at) < ?1)
                  OR (status = ?4 AND COALESCE(paid_at, created_at) < ?1)
               ORDER BY created_at"#,
            EVALUATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, EvaluationRow>(&sql)
            .bind(cutoff.naive_utc())
            .bind(EvaluationStatus::Requested.as_str())
            .bind(EvaluationStatus::ConfirmedAwaitingPayment.as_str())
            .bind(EvaluationStatus::Paid.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_evaluation).collect()
    }

    async fn begin_settlement(
        &self,
        id: Uuid,
        from: EvaluationStatus,
        token: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE evaluations
            SET settlement_token = ?, settlement_started_at = ?
            WHERE id = ? AND status = ?
              AND (settlement_token IS NULL OR settlement_started_at < ?)
            "#
        )
        .bind(token)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .bind(from.as_str())
        .bind(stale_before.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn end_settlement(&self, id: Uuid, token: &str, failed: Option<SettlementKind>) -> Result<()> {
        let capture_failed = i64::from(failed == Some(SettlementKind::Capture));
        let refund_failed = i64::from(failed == Some(SettlementKind::Refund));

        sqlx::query(
            r#"
            UPDATE evaluations
            SET settlement_token = NULL,
                settlement_started_at = NULL,
                capture_attempts = capture_attempts + ?,
                refund_attempts = refund_attempts + ?
            WHERE id = ? AND settlement_token = ?
            "#
        )
        .bind(capture_failed)
        .bind(refund_failed)
        .bind(id.to_string())
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: EvaluationStatus,
        change: EvaluationTransition,
    ) -> Result<Option<Evaluation>> {
        let id_str = id.to_string();
        let now = Utc::now().naive_utc();
        let to = change.to;
        let stamp = |applies: bool| applies.then_some(now);

        let confirmed_at = stamp(
            from != to
                && matches!(to, EvaluationStatus::ConfirmedAwaitingPayment | EvaluationStatus::InProgress),
        );
        let paid_at = stamp(change.payment_status == Some(PaymentStatus::Held));
        let completed_at = stamp(to == EvaluationStatus::Completed);
        let denied_at = stamp(to == EvaluationStatus::Denied);
        let cancelled_at = stamp(to == EvaluationStatus::Cancelled);
        let refunded_at = stamp(change.payment_status == Some(PaymentStatus::Refunded));

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE evaluations
            SET status = ?,
                payment_status = COALESCE(?, payment_status),
                checkout_session_id = COALESCE(?, checkout_session_id),
                checkout_url = COALESCE(?, checkout_url),
                payment_reference = COALESCE(?, payment_reference),
                payout_reference = COALESCE(?, payout_reference),
                refund_reference = COALESCE(?, refund_reference),
                notes = COALESCE(?, notes),
                denied_reason = COALESCE(?, denied_reason),
                cancelled_reason = COALESCE(?, cancelled_reason),
                confirmed_at = COALESCE(confirmed_at, ?),
                paid_at = COALESCE(paid_at, ?),
                completed_at = COALESCE(completed_at, ?),
                denied_at = COALESCE(denied_at, ?),
                cancelled_at = COALESCE(cancelled_at, ?),
                refunded_at = COALESCE(refunded_at, ?),
                settlement_token = NULL,
                settlement_started_at = NULL,
                updated_at = ?
            WHERE id = ? AND status = ?
              AND (settlement_token IS NULL OR settlement_token = ?)
            "#
        )
        .bind(to.as_str())
        .bind(change.payment_status.map(|s| s.as_str()))
        .bind(&change.checkout_session_id)
        .bind(&change.checkout_url)
        .bind(&change.payment_reference)
        .bind(&change.payout_reference)
        .bind(&change.refund_reference)
        .bind(&change.notes)
        .bind(&change.denied_reason)
        .bind(&change.cancelled_reason)
        .bind(confirmed_at)
        .bind(paid_at)
        .bind(completed_at)
        .bind(denied_at)
        .bind(cancelled_at)
        .bind(refunded_at)
        .bind(now)
        .bind(&id_str)
        .bind(from.as_str())
        .bind(&change.settlement_token)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            r#"
            INSERT INTO evaluation_events (id, evaluation_id, from_status, to_status, trigger, actor_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&id_str)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(change.trigger)
        .bind(change.actor_id.map(|id| id.to_string()))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let sql = format!("{} WHERE id = ?", EVALUATION_COLUMNS);
        let row = sqlx::query_as::<_, EvaluationRow>(&sql)
            .bind(&id_str)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Self::row_to_evaluation(row).map(Some)
    }

    async fn history(&self, id: Uuid) -> Result<Vec<StatusChange>> {
        let rows = sqlx::query_as::<_, StatusChangeRow>(
            r#"
            SELECT id, evaluation_id, from_status, to_status, trigger, actor_id, created_at
            FROM evaluation_events
            WHERE evaluation_id = ?
            ORDER BY created_at, rowid
            "#
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_status_change).collect()
    }
}
