use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerOffer {
    pub id: Uuid,
    pub player_id: Uuid,
    pub school: String,
    pub division: Option<String>,
    pub offered_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOfferRequest {
    pub school: String,
    pub division: Option<String>,
    pub offered_on: Option<NaiveDate>,
}
