use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    auth::AuthService,
    domain::{CreateProfileRequest, Profile, Role},
    error::{AppError, Result},
    repository::ProfileRepository,
};

// Database row struct that matches SQLite schema
#[derive(FromRow)]
struct ProfileRow {
    id: String,
    email: String,
    full_name: String,
    role: String,
    school: Option<String>,
    price_per_eval_cents: Option<i64>,
    payout_account_id: Option<String>,
    suspended_until: Option<NaiveDateTime>,
    suspended_reason: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteProfileRepository {
    pool: SqlitePool,
}

impl SqliteProfileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_profile(row: ProfileRow) -> Result<Profile> {
        Ok(Profile {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            email: row.email,
            full_name: row.full_name,
            role: row.role.parse::<Role>().map_err(AppError::Database)?,
            school: row.school,
            price_per_eval_cents: row.price_per_eval_cents,
            payout_account_id: row.payout_account_id,
            suspended_until: row.suspended_until.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            suspended_reason: row.suspended_reason,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }

    async fn fetch_required(&self, id: Uuid) -> Result<Profile> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))
    }

    fn ensure_updated(rows_affected: u64) -> Result<()> {
        if rows_affected == 0 {
            return Err(AppError::NotFound("Profile not found".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileRepository for SqliteProfileRepository {
    async fn create(&self, request: CreateProfileRequest) -> Result<Profile> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();

        let password_hash = match request.password.as_deref() {
            Some(password) => Some(AuthService::hash_password(password).await?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO profiles (
                id, email, full_name, role, school, password_hash, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(id.to_string())
        .bind(&request.email)
        .bind(&request.full_name)
        .bind(request.role.as_str())
        .bind(&request.school)
        .bind(password_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict("Email already exists".to_string())
            }
            other => AppError::Database(other.to_string()),
        })?;

        self.fetch_required(id).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Profile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT id, email, full_name, role, school, price_per_eval_cents,
                   payout_account_id, suspended_until, suspended_reason,
                   created_at, updated_at
            FROM profiles
            WHERE id = ?
            "#
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_profile).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Profile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT id, email, full_name, role, school, price_per_eval_cents,
                   payout_account_id, suspended_until, suspended_reason,
                   created_at, updated_at
            FROM profiles
            WHERE email = ?
            "#
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_profile).transpose()
    }

    async fn set_role(&self, id: Uuid, role: Role) -> Result<Profile> {
        // Leaving the scout role drops scout-only pricing.
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET role = ?1,
                price_per_eval_cents = CASE WHEN ?1 = 'scout' THEN price_per_eval_cents ELSE NULL END,
                updated_at = ?2
            WHERE id = ?3
            "#
        )
        .bind(role.as_str())
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(result.rows_affected())?;
        self.fetch_required(id).await
    }

    async fn set_price(&self, id: Uuid, price_cents: Option<i64>) -> Result<Profile> {
        let result = sqlx::query(
            "UPDATE profiles SET price_per_eval_cents = ?, updated_at = ? WHERE id = ?"
        )
        .bind(price_cents)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(result.rows_affected())?;
        self.fetch_required(id).await
    }

    async fn set_payout_account(&self, id: Uuid, account_id: Option<String>) -> Result<Profile> {
        let result = sqlx::query(
            "UPDATE profiles SET payout_account_id = ?, updated_at = ? WHERE id = ?"
        )
        .bind(account_id)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(result.rows_affected())?;
        self.fetch_required(id).await
    }

    async fn set_suspension(
        &self,
        id: Uuid,
        until: Option<DateTime<Utc>>,
        reason: Option<String>,
    ) -> Result<Profile> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET suspended_until = ?, suspended_reason = ?, updated_at = ?
            WHERE id = ?
            "#
        )
        .bind(until.map(|dt| dt.naive_utc()))
        .bind(reason)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Self::ensure_updated(result.rows_affected())?;
        self.fetch_required(id).await
    }

    async fn link_parent(&self, parent_id: Uuid, player_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO parent_links (parent_id, player_id, created_at) VALUES (?, ?, ?)"
        )
        .bind(parent_id.to_string())
        .bind(player_id.to_string())
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_parent_of(&self, parent_id: Uuid, player_id: Uuid) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM parent_links WHERE parent_id = ? AND player_id = ?"
        )
        .bind(parent_id.to_string())
        .bind(player_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }
}
