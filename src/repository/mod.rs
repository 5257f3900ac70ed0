use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::domain::*;
use crate::error::Result;

pub mod evaluation_repository;
pub mod profile_repository;
pub mod notification_repository;
pub mod webhook_event_repository;
pub mod offer_repository;

pub use evaluation_repository::SqliteEvaluationRepository;
pub use profile_repository::SqliteProfileRepository;
pub use notification_repository::SqliteNotificationRepository;
pub use webhook_event_repository::SqliteWebhookEventRepository;
pub use offer_repository::SqliteOfferRepository;

#[async_trait]
pub trait EvaluationRepository: Send + Sync {
    /// Fails with `AppError::Conflict` when the pair already has an active
    /// evaluation.
    async fn create(&self, evaluation: NewEvaluation) -> Result<Evaluation>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Evaluation>>;
    async fn find_active_for_pair(&self, player_id: Uuid, scout_id: Uuid) -> Result<Option<Evaluation>>;
    async fn find_by_checkout_session(&self, session_id: &str) -> Result<Option<Evaluation>>;
    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Evaluation>>;
    async fn list_for_profile(&self, profile_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Evaluation>>;
    async fn list_active_for_profile(&self, profile_id: Uuid) -> Result<Vec<Evaluation>>;
    /// Evaluations still waiting on the scout or the player since before
    /// `cutoff`: requests from creation, confirmations from confirmation and
    /// paid evaluations from payment.
    async fn list_unanswered_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Evaluation>>;
    /// Reserves the evaluation for a refund or payout while it is still in
    /// `from`. A reservation started before `stale_before` can be taken over.
    async fn begin_settlement(
        &self,
        id: Uuid,
        from: EvaluationStatus,
        token: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;
    /// Drops a reservation without a status change. A failed gateway call is
    /// counted so the next attempt uses a new idempotency key.
    async fn end_settlement(&self, id: Uuid, token: &str, failed: Option<SettlementKind>) -> Result<()>;
    /// Applies `change` only if the evaluation is still in `from` and no
    /// other writer holds a settlement reservation. Returns `None` when
    /// another writer got there first.
    async fn transition(
        &self,
        id: Uuid,
        from: EvaluationStatus,
        change: EvaluationTransition,
    ) -> Result<Option<Evaluation>>;
    async fn history(&self, id: Uuid) -> Result<Vec<StatusChange>>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn create(&self, request: CreateProfileRequest) -> Result<Profile>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Profile>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Profile>>;
    async fn set_role(&self, id: Uuid, role: Role) -> Result<Profile>;
    async fn set_price(&self, id: Uuid, price_cents: Option<i64>) -> Result<Profile>;
    async fn set_payout_account(&self, id: Uuid, account_id: Option<String>) -> Result<Profile>;
    async fn set_suspension(
        &self,
        id: Uuid,
        until: Option<DateTime<Utc>>,
        reason: Option<String>,
    ) -> Result<Profile>;
    async fn link_parent(&self, parent_id: Uuid, player_id: Uuid) -> Result<()>;
    async fn is_parent_of(&self, parent_id: Uuid, player_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: NewNotification) -> Result<Notification>;
    async fn list_for_user(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Notification>>;
    async fn count_unread(&self, user_id: Uuid) -> Result<i64>;
    /// Returns false when the notification does not belong to `user_id`.
    async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Records the event id and returns the attempt number, or `None` if the
    /// event was processed or is being processed. An unfinished claim taken
    /// before `stale_before` is taken over.
    async fn claim(&self, event_id: &str, event_type: &str, stale_before: DateTime<Utc>) -> Result<Option<i64>>;
    async fn complete(&self, event_id: &str, evaluation_id: Option<Uuid>, outcome: &str) -> Result<()>;
    /// Gives up a claim after a failed attempt so a redelivery is applied again.
    async fn release(&self, event_id: &str) -> Result<()>;
}

#[async_trait]
pub trait OfferRepository: Send + Sync {
    async fn create(&self, player_id: Uuid, offer: CreateOfferRequest) -> Result<PlayerOffer>;
    async fn list_for_player(&self, player_id: Uuid) -> Result<Vec<PlayerOffer>>;
}
