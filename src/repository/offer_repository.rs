use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{CreateOfferRequest, PlayerOffer},
    error::{AppError, Result},
    repository::OfferRepository,
};

#[derive(FromRow)]
struct OfferRow {
    id: String,
    player_id: String,
    school: String,
    division: Option<String>,
    offered_on: Option<NaiveDate>,
    created_at: NaiveDateTime,
}

pub struct SqliteOfferRepository {
    pool: SqlitePool,
}

impl SqliteOfferRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_offer(row: OfferRow) -> Result<PlayerOffer> {
        Ok(PlayerOffer {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            player_id: Uuid::parse_str(&row.player_id).map_err(|e| AppError::Database(e.to_string()))?,
            school: row.school,
            division: row.division,
            offered_on: row.offered_on,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        })
    }
}

#[async_trait]
impl OfferRepository for SqliteOfferRepository {
    async fn create(&self, player_id: Uuid, offer: CreateOfferRequest) -> Result<PlayerOffer> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO player_offers (id, player_id, school, division, offered_on, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(id.to_string())
        .bind(player_id.to_string())
        .bind(&offer.school)
        .bind(&offer.division)
        .bind(offer.offered_on)
        .bind(now.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(PlayerOffer {
            id,
            player_id,
            school: offer.school,
            division: offer.division,
            offered_on: offer.offered_on,
            created_at: now,
        })
    }

    async fn list_for_player(&self, player_id: Uuid) -> Result<Vec<PlayerOffer>> {
        let rows = sqlx::query_as::<_, OfferRow>(
            r#"
            SELECT id, player_id, school, division, offered_on, created_at
            FROM player_offers
            WHERE player_id = ?
            ORDER BY offered_on DESC, created_at DESC
            "#
        )
        .bind(player_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_offer).collect()
    }
}
