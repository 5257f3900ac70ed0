use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    domain::*,
    error::{AppError, Result},
    notifications::{LifecycleEvent, NotificationDispatcher},
    repository::{EvaluationRepository, OfferRepository, ProfileRepository},
    service::evaluation_service::EvaluationService,
};

pub const MAX_SUSPENSION_DAYS: i64 = 365;

/// Profile writes that carry invariants: roles, scout pricing, moderation,
/// parent links and offers.
pub struct ProfileService {
    profiles: Arc<dyn ProfileRepository>,
    evaluations: Arc<dyn EvaluationRepository>,
    offers: Arc<dyn OfferRepository>,
    evaluation_service: Arc<EvaluationService>,
    dispatcher: Arc<NotificationDispatcher>,
    max_price_cents: i64,
}

impl ProfileService {
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        evaluations: Arc<dyn EvaluationRepository>,
        offers: Arc<dyn OfferRepository>,
        evaluation_service: Arc<EvaluationService>,
        dispatcher: Arc<NotificationDispatcher>,
        max_price_cents: i64,
    ) -> Self {
        Self {
            profiles,
            evaluations,
            offers,
            evaluation_service,
            dispatcher,
            max_price_cents,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Profile> {
        self.profiles
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))
    }

    /// The only path that writes a role. A profile with evaluations in flight
    /// keeps its role until they settle.
    pub async fn change_role(&self, actor: Actor, id: Uuid, role: Role) -> Result<Profile> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden);
        }

        let profile = self.get(id).await?;
        if profile.role == role {
            return Ok(profile);
        }

        let active = self.evaluations.list_active_for_profile(id).await?;
        if !active.is_empty() {
            return Err(AppError::Conflict(format!(
                "Profile has {} active evaluation(s)",
                active.len()
            )));
        }

        let updated = self.profiles.set_role(id, role).await?;
        tracing::info!("Profile {} role changed from {} to {}", id, profile.role, role);
        Ok(updated)
    }

    pub async fn set_pricing(&self, actor: Actor, price_cents: i64) -> Result<Profile> {
        let id = actor.id().ok_or(AppError::Unauthorized)?;
        if actor.role() != Some(Role::Scout) {
            return Err(AppError::Forbidden);
        }
        if price_cents <= 0 || price_cents > self.max_price_cents {
            return Err(AppError::Validation(format!(
                "Price must be between $0.01 and {}",
                format_cents(self.max_price_cents)
            )));
        }

        self.profiles.set_price(id, Some(price_cents)).await
    }

    pub async fn set_payout_account(&self, actor: Actor, account_id: String) -> Result<Profile> {
        let id = actor.id().ok_or(AppError::Unauthorized)?;
        if actor.role() != Some(Role::Scout) {
            return Err(AppError::Forbidden);
        }
        let account_id = account_id.trim().to_string();
        if account_id.is_empty() {
            return Err(AppError::Validation("Payout account is required".to_string()));
        }

        self.profiles.set_payout_account(id, Some(account_id)).await
    }

    pub async fn suspend_scout(
        &self,
        actor: Actor,
        scout_id: Uuid,
        days: i64,
        reason: Option<String>,
    ) -> Result<Profile> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden);
        }
        if !(1..=MAX_SUSPENSION_DAYS).contains(&days) {
            return Err(AppError::Validation(format!(
                "Suspension must last between 1 and {} days",
                MAX_SUSPENSION_DAYS
            )));
        }

        let scout = self.get(scout_id).await?;
        if scout.role != Role::Scout {
            return Err(AppError::BadRequest("Profile is not a scout".to_string()));
        }

        let until = Utc::now() + Duration::days(days);
        let updated = self.profiles.set_suspension(scout_id, Some(until), reason.clone()).await?;
        tracing::info!("Scout {} suspended until {}", scout_id, until);

        self.dispatcher
            .dispatch(LifecycleEvent::ScoutSuspended {
                scout: updated.clone(),
                until,
                reason,
            })
            .await;

        Ok(updated)
    }

    pub async fn unsuspend_scout(&self, actor: Actor, scout_id: Uuid) -> Result<Profile> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden);
        }

        self.get(scout_id).await?;
        let updated = self.profiles.set_suspension(scout_id, None, None).await?;
        tracing::info!("Scout {} unsuspended", scout_id);
        Ok(updated)
    }

    /// Cancels the scout's open evaluations (refunding held funds), then
    /// demotes the profile to a basic account.
    pub async fn revoke_scout(&self, actor: Actor, scout_id: Uuid, reason: Option<String>) -> Result<Profile> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden);
        }

        let scout = self.get(scout_id).await?;
        if scout.role != Role::Scout {
            return Err(AppError::BadRequest("Profile is not a scout".to_string()));
        }

        let active = self.evaluations.list_active_for_profile(scout_id).await?;
        let mut failures = 0;
        for evaluation in active.iter().filter(|e| e.scout_id == scout_id) {
            let cancel_reason = Some("Scout status revoked".to_string());
            if let Err(e) = self.evaluation_service.cancel(actor, evaluation.id, cancel_reason).await {
                tracing::error!(
                    "Failed to cancel evaluation {} while revoking scout {}: {:?}",
                    evaluation.id,
                    scout_id,
                    e
                );
                failures += 1;
            }
        }
        if failures > 0 {
            return Err(AppError::Conflict(format!(
                "{} evaluation(s) could not be cancelled; scout not revoked",
                failures
            )));
        }

        self.profiles.set_price(scout_id, None).await?;
        let updated = self.change_role(actor, scout_id, Role::User).await?;
        tracing::info!("Scout {} revoked", scout_id);

        self.dispatcher
            .dispatch(LifecycleEvent::ScoutRevoked {
                scout: updated.clone(),
                reason,
            })
            .await;

        Ok(updated)
    }

    pub async fn link_parent(&self, actor: Actor, parent_id: Uuid, player_id: Uuid) -> Result<()> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden);
        }

        let parent = self.get(parent_id).await?;
        let player = self.get(player_id).await?;
        if parent.role != Role::Parent || player.role != Role::Player {
            return Err(AppError::BadRequest(
                "Links must go from a parent to a player".to_string(),
            ));
        }

        self.profiles.link_parent(parent_id, player_id).await
    }

    pub async fn add_offer(&self, actor: Actor, player_id: Uuid, offer: CreateOfferRequest) -> Result<PlayerOffer> {
        let allowed = match actor {
            Actor::System => true,
            Actor::Profile { id, role } => {
                id == player_id
                    || role == Role::Admin
                    || (role == Role::Parent && self.profiles.is_parent_of(id, player_id).await?)
            }
        };
        if !allowed {
            return Err(AppError::Forbidden);
        }

        let player = self.get(player_id).await?;
        if player.role != Role::Player {
            return Err(AppError::BadRequest("Offers can only be added to players".to_string()));
        }
        if offer.school.trim().is_empty() {
            return Err(AppError::Validation("School is required".to_string()));
        }

        self.offers.create(player_id, offer).await
    }

    pub async fn list_offers(&self, player_id: Uuid) -> Result<Vec<PlayerOffer>> {
        self.get(player_id).await?;
        self.offers.list_for_player(player_id).await
    }
}
