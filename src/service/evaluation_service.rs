use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    config::{EvaluationConfig, PaymentFlow},
    domain::*,
    error::{AppError, Result},
    notifications::{EvaluationContext, LifecycleEvent, NotificationDispatcher},
    payments::{GatewayEvent, GatewayEventKind, Hold, HoldRequest, PaymentGateway, Payout, RefundRequest},
    repository::{EvaluationRepository, ProfileRepository, WebhookEventRepository},
};

/// Result of asking for an evaluation. A request for a pair that already has
/// an active evaluation hands back that evaluation instead of a new one.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Created(Evaluation),
    Existing(Evaluation),
}

impl RequestOutcome {
    pub fn evaluation(&self) -> &Evaluation {
        match self {
            RequestOutcome::Created(evaluation) | RequestOutcome::Existing(evaluation) => evaluation,
        }
    }

    pub fn into_evaluation(self) -> Evaluation {
        match self {
            RequestOutcome::Created(evaluation) | RequestOutcome::Existing(evaluation) => evaluation,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, RequestOutcome::Created(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    Ignored,
    /// Event id was already processed.
    Duplicate,
    /// Money arrived for an evaluation that could no longer take it and was
    /// sent back.
    OrphanRefunded,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::OrphanRefunded => "orphan_refunded",
        }
    }
}

pub struct EvaluationService {
    evaluations: Arc<dyn EvaluationRepository>,
    profiles: Arc<dyn ProfileRepository>,
    webhook_events: Arc<dyn WebhookEventRepository>,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: Arc<NotificationDispatcher>,
    config: EvaluationConfig,
    base_url: String,
}

/// A settlement reservation older than this is treated as abandoned.
const SETTLEMENT_TIMEOUT_MINUTES: i64 = 15;
/// An unfinished webhook claim older than this is treated as abandoned.
const WEBHOOK_CLAIM_TIMEOUT_MINUTES: i64 = 10;

// The processor replays the stored response for a reused key, failures
// included, so each recorded failure moves on to a new key.
fn capture_key(evaluation: &Evaluation) -> String {
    format!("evaluation-{}-capture-{}", evaluation.id, evaluation.capture_attempts)
}

fn refund_key(evaluation: &Evaluation) -> String {
    format!("evaluation-{}-refund-{}", evaluation.id, evaluation.refund_attempts)
}

fn orphan_refund_key(payment_reference: &str, attempt: i64) -> String {
    format!("payment-{}-orphan-refund-{}", payment_reference, attempt)
}

fn gateway_error(message: String) -> AppError {
    AppError::PaymentGateway {
        message,
        funds_moved: false,
    }
}

/// Webhooks wait for an in-flight refund or payout to land. The failed
/// response makes the processor redeliver later.
fn ensure_not_settling(evaluation: &Evaluation) -> Result<()> {
    if evaluation.settlement_pending() {
        return Err(AppError::ServiceUnavailable(format!(
            "Evaluation {} has a settlement in progress",
            evaluation.id
        )));
    }
    Ok(())
}

impl EvaluationService {
    pub fn new(
        evaluations: Arc<dyn EvaluationRepository>,
        profiles: Arc<dyn ProfileRepository>,
        webhook_events: Arc<dyn WebhookEventRepository>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<NotificationDispatcher>,
        config: EvaluationConfig,
        base_url: String,
    ) -> Self {
        Self {
            evaluations,
            profiles,
            webhook_events,
            gateway,
            dispatcher,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn payment_flow(&self) -> PaymentFlow {
        self.config.payment_flow
    }

    // ----- reads -----

    pub async fn get(&self, actor: Actor, id: Uuid) -> Result<Evaluation> {
        let evaluation = self.load(id).await?;
        self.ensure_can_view(actor, &evaluation).await?;
        Ok(evaluation)
    }

    pub async fn list(&self, actor: Actor, limit: i64, offset: i64) -> Result<Vec<Evaluation>> {
        let profile_id = actor.id().ok_or(AppError::Unauthorized)?;
        self.evaluations
            .list_for_profile(profile_id, limit.clamp(1, 100), offset.max(0))
            .await
    }

    pub async fn history(&self, actor: Actor, id: Uuid) -> Result<Vec<StatusChange>> {
        let evaluation = self.load(id).await?;
        self.ensure_can_view(actor, &evaluation).await?;
        self.evaluations.history(id).await
    }

    // ----- player side -----

    /// Opens an evaluation at the scout's current price. `expected_price_cents`
    /// guards against paying a price the player never saw.
    pub async fn request(
        &self,
        actor: Actor,
        player_id: Uuid,
        scout_id: Uuid,
        expected_price_cents: Option<i64>,
    ) -> Result<RequestOutcome> {
        let purchased_by = self.ensure_acts_for_player(actor, player_id).await?;
        let player = self.load_profile(player_id).await?;
        if player.role != Role::Player {
            return Err(AppError::BadRequest("Evaluations can only be requested for players".to_string()));
        }
        let scout = self.load_active_scout(scout_id).await?;

        if let Some(existing) = self.evaluations.find_active_for_pair(player_id, scout_id).await? {
            tracing::info!(
                "Duplicate request for player {} and scout {}, returning evaluation {}",
                player_id,
                scout_id,
                existing.id
            );
            return Ok(RequestOutcome::Existing(existing));
        }

        let price_cents = scout
            .price_per_eval_cents
            .filter(|price| *price > 0)
            .ok_or_else(|| AppError::BadRequest("Scout has not set an evaluation price".to_string()))?;
        if price_cents > self.config.max_price_cents {
            return Err(AppError::BadRequest("Scout price exceeds the allowed maximum".to_string()));
        }
        if let Some(expected) = expected_price_cents {
            if expected != price_cents {
                return Err(AppError::Conflict(format!(
                    "Scout price changed to {}",
                    format_cents(price_cents)
                )));
            }
        }

        let new_evaluation = NewEvaluation::requested(
            player_id,
            scout_id,
            purchased_by,
            price_cents,
            self.config.platform_fee_bps,
        );

        let evaluation = match self.evaluations.create(new_evaluation).await {
            Ok(evaluation) => evaluation,
            Err(AppError::Conflict(_)) => {
                // Lost a race with a concurrent request for the same pair.
                let existing = self
                    .evaluations
                    .find_active_for_pair(player_id, scout_id)
                    .await?
                    .ok_or_else(|| AppError::Conflict("Evaluation already exists".to_string()))?;
                return Ok(RequestOutcome::Existing(existing));
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            "Evaluation {} requested by {} for scout {} at {}",
            evaluation.id,
            player_id,
            scout_id,
            format_cents(price_cents)
        );

        match self.config.payment_flow {
            PaymentFlow::Upfront => {
                let evaluation = self
                    .start_checkout(actor, evaluation, EvaluationStatus::Requested, "checkout_created")
                    .await?;
                Ok(RequestOutcome::Created(evaluation))
            }
            PaymentFlow::ConfirmThenPay => {
                self.notify(&evaluation, LifecycleEvent::RequestReceived).await;
                Ok(RequestOutcome::Created(evaluation))
            }
        }
    }

    /// Starts a fresh checkout for an evaluation that is waiting on payment.
    pub async fn checkout(&self, actor: Actor, id: Uuid) -> Result<Evaluation> {
        let evaluation = self.load(id).await?;
        self.ensure_acts_for_player(actor, evaluation.player_id).await?;

        let payable = match evaluation.status {
            EvaluationStatus::Requested => self.config.payment_flow == PaymentFlow::Upfront,
            EvaluationStatus::ConfirmedAwaitingPayment => true,
            _ => false,
        };
        if !payable || !evaluation.awaiting_payment() || evaluation.price_cents == 0 {
            return Err(AppError::InvalidTransition {
                from: evaluation.status,
                action: "pay for",
            });
        }

        let status = evaluation.status;
        self.start_checkout(actor, evaluation, status, "checkout_created").await
    }

    /// Cancels an evaluation that has not been delivered, refunding held funds.
    pub async fn cancel(&self, actor: Actor, id: Uuid, reason: Option<String>) -> Result<Evaluation> {
        let evaluation = self.load(id).await?;
        if !actor.is_admin()
            && !actor.is(evaluation.scout_id)
            && !self.acts_for_player(actor, &evaluation).await?
        {
            return Err(AppError::Forbidden);
        }
        self.ensure_can_move(&evaluation, EvaluationStatus::Cancelled, "cancel")?;

        let (evaluation, settlement) = self.reserve(&evaluation, "cancel").await?;
        let refund_reference = self.refund_if_held(&evaluation, &settlement).await?;
        let refunded = refund_reference.is_some();

        let mut change = EvaluationTransition::new(EvaluationStatus::Cancelled, "cancelled", actor.id());
        change.cancelled_reason = reason;
        change.settlement_token = Some(settlement);
        if refunded {
            change.payment_status = Some(PaymentStatus::Refunded);
            change.refund_reference = refund_reference;
        }

        let updated = self.apply(&evaluation, change, "cancel").await?;
        tracing::info!("Evaluation {} cancelled (refunded: {})", id, refunded);

        self.notify(&updated, |context| LifecycleEvent::Cancelled {
            context,
            cancelled_by: actor.id(),
            refunded,
        })
        .await;

        Ok(updated)
    }

    // ----- scout side -----

    pub async fn confirm(&self, actor: Actor, id: Uuid) -> Result<Evaluation> {
        let evaluation = self.load(id).await?;
        if !actor.is(evaluation.scout_id) {
            return Err(AppError::Forbidden);
        }

        match (evaluation.status, self.config.payment_flow) {
            (EvaluationStatus::Paid, _) => {
                let change = EvaluationTransition::new(EvaluationStatus::InProgress, "confirmed", actor.id());
                let updated = self.apply(&evaluation, change, "confirm").await?;
                tracing::info!("Evaluation {} confirmed, funds held", id);

                self.notify(&updated, |context| LifecycleEvent::Confirmed {
                    context,
                    payment_url: None,
                })
                .await;
                Ok(updated)
            }
            (EvaluationStatus::Requested, PaymentFlow::ConfirmThenPay) => {
                let hold = self.create_hold(&evaluation).await?;

                let mut change = EvaluationTransition::new(
                    EvaluationStatus::ConfirmedAwaitingPayment,
                    "confirmed",
                    actor.id(),
                );
                change.checkout_session_id = Some(hold.session_reference);
                change.checkout_url = Some(hold.checkout_url.clone());

                let updated = self.apply(&evaluation, change, "confirm").await?;
                tracing::info!("Evaluation {} confirmed, awaiting payment", id);

                self.notify(&updated, |context| LifecycleEvent::Confirmed {
                    context,
                    payment_url: Some(hold.checkout_url),
                })
                .await;
                Ok(updated)
            }
            (from, _) => Err(AppError::InvalidTransition { from, action: "confirm" }),
        }
    }

    pub async fn deny(&self, actor: Actor, id: Uuid, reason: String) -> Result<Evaluation> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(AppError::Validation("A reason is required to deny an evaluation".to_string()));
        }

        let evaluation = self.load(id).await?;
        if !actor.is(evaluation.scout_id) {
            return Err(AppError::Forbidden);
        }
        self.ensure_can_move(&evaluation, EvaluationStatus::Denied, "deny")?;

        let (evaluation, settlement) = self.reserve(&evaluation, "deny").await?;
        let refund_reference = self.refund_if_held(&evaluation, &settlement).await?;
        let refunded = refund_reference.is_some();

        let mut change = EvaluationTransition::new(EvaluationStatus::Denied, "denied", actor.id());
        change.denied_reason = Some(reason.clone());
        change.settlement_token = Some(settlement);
        if refunded {
            change.payment_status = Some(PaymentStatus::Refunded);
            change.refund_reference = refund_reference;
        }

        let updated = self.apply(&evaluation, change, "deny").await?;
        tracing::info!("Evaluation {} denied (refunded: {})", id, refunded);

        self.notify(&updated, |context| LifecycleEvent::Denied {
            context,
            reason,
            refunded,
        })
        .await;

        Ok(updated)
    }

    /// Delivers feedback. Held funds are released to the scout when they have
    /// a payout account; otherwise they stay held for [`Self::retry_payout`].
    pub async fn complete(&self, actor: Actor, id: Uuid, notes: String) -> Result<Evaluation> {
        let notes = notes.trim().to_string();
        if notes.is_empty() {
            return Err(AppError::Validation("Evaluation notes are required".to_string()));
        }

        let evaluation = self.load(id).await?;
        if !actor.is(evaluation.scout_id) {
            return Err(AppError::Forbidden);
        }
        if evaluation.status != EvaluationStatus::InProgress {
            return Err(AppError::InvalidTransition {
                from: evaluation.status,
                action: "complete",
            });
        }

        let scout = self.load_profile(evaluation.scout_id).await?;
        let (evaluation, settlement) = self.reserve(&evaluation, "complete").await?;
        let payout_reference = match scout.payout_account_id.as_deref() {
            Some(destination) if evaluation.funds_held() && evaluation.price_cents > 0 => {
                Some(self.release_payout(&evaluation, destination, &settlement).await?)
            }
            _ => {
                if evaluation.funds_held() {
                    tracing::warn!(
                        "Scout {} has no payout account, funds for evaluation {} stay held",
                        scout.id,
                        id
                    );
                }
                None
            }
        };
        let payout_released = payout_reference.is_some();

        let mut change = EvaluationTransition::new(EvaluationStatus::Completed, "completed", actor.id());
        change.notes = Some(notes);
        change.settlement_token = Some(settlement);
        if payout_released {
            change.payment_status = Some(PaymentStatus::Released);
            change.payout_reference = payout_reference;
        }

        let updated = self.apply(&evaluation, change, "complete").await?;
        tracing::info!("Evaluation {} completed (payout released: {})", id, payout_released);

        self.notify(&updated, |context| LifecycleEvent::Completed {
            context,
            payout_released,
        })
        .await;

        Ok(updated)
    }

    /// A scout starts an unpaid evaluation for a player.
    pub async fn give_free(&self, actor: Actor, player_id: Uuid) -> Result<RequestOutcome> {
        let scout_id = actor.id().ok_or(AppError::Forbidden)?;
        if actor.role() != Some(Role::Scout) {
            return Err(AppError::Forbidden);
        }
        self.load_active_scout(scout_id).await?;

        let player = self.load_profile(player_id).await?;
        if player.role != Role::Player {
            return Err(AppError::BadRequest("Free evaluations can only be given to players".to_string()));
        }

        if let Some(existing) = self.evaluations.find_active_for_pair(player_id, scout_id).await? {
            return Ok(RequestOutcome::Existing(existing));
        }

        let evaluation = match self.evaluations.create(NewEvaluation::free(player_id, scout_id)).await {
            Ok(evaluation) => evaluation,
            Err(AppError::Conflict(_)) => {
                let existing = self
                    .evaluations
                    .find_active_for_pair(player_id, scout_id)
                    .await?
                    .ok_or_else(|| AppError::Conflict("Evaluation already exists".to_string()))?;
                return Ok(RequestOutcome::Existing(existing));
            }
            Err(e) => return Err(e),
        };

        tracing::info!("Scout {} started free evaluation {} for {}", scout_id, evaluation.id, player_id);
        self.notify(&evaluation, LifecycleEvent::FreeEvaluationStarted).await;

        Ok(RequestOutcome::Created(evaluation))
    }

    // ----- admin -----

    /// Dispute resolution: returns the full price to the player, pulling back
    /// the scout's payout if it was already released.
    pub async fn refund(&self, actor: Actor, id: Uuid, reason: Option<String>) -> Result<Evaluation> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden);
        }

        let evaluation = self.load(id).await?;
        let refundable = matches!(evaluation.payment_status, PaymentStatus::Held | PaymentStatus::Released);
        if !refundable || !evaluation.status.can_transition_to(EvaluationStatus::Refunded) {
            return Err(AppError::InvalidTransition {
                from: evaluation.status,
                action: "refund",
            });
        }

        let (evaluation, settlement) = self.reserve(&evaluation, "refund").await?;
        if !matches!(evaluation.payment_status, PaymentStatus::Held | PaymentStatus::Released) {
            self.end_settlement(&evaluation, &settlement, None).await;
            return Err(AppError::InvalidTransition {
                from: evaluation.status,
                action: "refund",
            });
        }

        let reverse_payout = evaluation.payment_status == PaymentStatus::Released;
        let refund_reference = self.issue_refund(&evaluation, reverse_payout, &settlement).await?;

        let mut change = EvaluationTransition::new(EvaluationStatus::Refunded, "admin_refund", actor.id());
        change.payment_status = Some(PaymentStatus::Refunded);
        change.refund_reference = Some(refund_reference);
        change.cancelled_reason = reason;
        change.settlement_token = Some(settlement);

        let updated = self.apply(&evaluation, change, "refund").await?;
        tracing::info!("Evaluation {} refunded by admin (payout reversed: {})", id, reverse_payout);

        self.notify(&updated, LifecycleEvent::Refunded).await;
        Ok(updated)
    }

    /// Releases escrow for a completed evaluation whose payout was deferred.
    pub async fn retry_payout(&self, actor: Actor, id: Uuid) -> Result<Evaluation> {
        if !actor.is_admin() {
            return Err(AppError::Forbidden);
        }

        let evaluation = self.load(id).await?;
        if evaluation.status != EvaluationStatus::Completed
            || !evaluation.funds_held()
            || evaluation.price_cents == 0
        {
            return Err(AppError::InvalidTransition {
                from: evaluation.status,
                action: "release the payout for",
            });
        }

        let scout = self.load_profile(evaluation.scout_id).await?;
        let destination = scout
            .payout_account_id
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("Scout has no payout account".to_string()))?;

        let (evaluation, settlement) = self.reserve(&evaluation, "release the payout for").await?;
        if !evaluation.funds_held() {
            self.end_settlement(&evaluation, &settlement, None).await;
            return Err(AppError::InvalidTransition {
                from: evaluation.status,
                action: "release the payout for",
            });
        }

        let payout_reference = self.release_payout(&evaluation, destination, &settlement).await?;

        let mut change = EvaluationTransition::new(EvaluationStatus::Completed, "payout_released", actor.id())
            .payment_status(PaymentStatus::Released);
        change.payout_reference = Some(payout_reference);
        change.settlement_token = Some(settlement);

        let updated = self.apply(&evaluation, change, "release the payout for").await?;
        tracing::info!("Payout released for evaluation {}", id);
        Ok(updated)
    }

    /// Cancels evaluations left unanswered for the response window. A paid
    /// request gets the full window from the moment it was paid.
    pub async fn expire_unanswered(&self, now: DateTime<Utc>) -> Result<Vec<Evaluation>> {
        let cutoff = now - Duration::hours(self.config.response_window_hours);
        let stale = self.evaluations.list_unanswered_since(cutoff).await?;

        let mut expired = Vec::new();
        for evaluation in stale {
            let reason = Some("Scout did not respond in time".to_string());
            match self.cancel(Actor::System, evaluation.id, reason).await {
                Ok(cancelled) => expired.push(cancelled),
                Err(e) => {
                    tracing::warn!("Failed to expire evaluation {}: {:?}", evaluation.id, e);
                }
            }
        }

        if !expired.is_empty() {
            tracing::info!("Expired {} unanswered evaluations", expired.len());
        }
        Ok(expired)
    }

    // ----- payment processor -----

    /// Verifies and applies a webhook delivery. Each event id is applied at
    /// most once; a failed application releases the claim so the processor's
    /// retry can apply it.
    pub async fn handle_webhook(&self, payload: &str, signature: &str) -> Result<WebhookOutcome> {
        let event = self.gateway.verify_and_parse_webhook(payload, signature)?;

        let stale_before = Utc::now() - Duration::minutes(WEBHOOK_CLAIM_TIMEOUT_MINUTES);
        let attempt = match self
            .webhook_events
            .claim(&event.event_id, event.kind.name(), stale_before)
            .await?
        {
            Some(attempt) => attempt,
            None => {
                tracing::info!("Webhook event {} already processed", event.event_id);
                return Ok(WebhookOutcome::Duplicate);
            }
        };

        match self.apply_event(&event, attempt).await {
            Ok((outcome, evaluation_id)) => {
                self.webhook_events
                    .complete(&event.event_id, evaluation_id, outcome.as_str())
                    .await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(release_err) = self.webhook_events.release(&event.event_id).await {
                    tracing::error!(
                        "Failed to release webhook event {}: {:?}",
                        event.event_id,
                        release_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn apply_event(&self, event: &GatewayEvent, attempt: i64) -> Result<(WebhookOutcome, Option<Uuid>)> {
        match &event.kind {
            GatewayEventKind::PaymentSucceeded {
                evaluation_id,
                session_reference,
                payment_reference,
            } => {
                let evaluation = match self
                    .locate(*evaluation_id, session_reference.as_deref(), Some(payment_reference))
                    .await?
                {
                    Some(evaluation) => evaluation,
                    None => {
                        tracing::warn!("Payment {} matches no evaluation", payment_reference);
                        return Ok((WebhookOutcome::Ignored, None));
                    }
                };
                let id = evaluation.id;
                let outcome = self.apply_payment(evaluation, payment_reference, attempt).await?;
                Ok((outcome, Some(id)))
            }
            GatewayEventKind::PaymentFailed {
                evaluation_id,
                session_reference,
                reason,
            } => {
                let evaluation = match self.locate(*evaluation_id, session_reference.as_deref(), None).await? {
                    Some(evaluation) => evaluation,
                    None => return Ok((WebhookOutcome::Ignored, None)),
                };
                let id = evaluation.id;

                let stale_session = session_reference.is_some()
                    && evaluation.checkout_session_id.as_deref() != session_reference.as_deref();
                if stale_session || evaluation.status.is_terminal() || !evaluation.awaiting_payment() {
                    tracing::warn!("Ignoring stale payment failure for evaluation {}", id);
                    return Ok((WebhookOutcome::Ignored, Some(id)));
                }
                ensure_not_settling(&evaluation)?;

                let change = EvaluationTransition::new(evaluation.status, "payment_failed", None)
                    .payment_status(PaymentStatus::Failed);
                let updated = match self.evaluations.transition(id, evaluation.status, change).await? {
                    Some(updated) => updated,
                    None => return Err(self.lost_race(&evaluation, "record a payment failure for").await),
                };

                let reason = reason.clone().unwrap_or_else(|| "Payment failed".to_string());
                self.notify(&updated, |context| LifecycleEvent::PaymentFailed { context, reason })
                    .await;
                Ok((WebhookOutcome::Applied, Some(id)))
            }
            GatewayEventKind::RefundSucceeded {
                payment_reference,
                refund_reference,
            } => {
                let evaluation = match self.evaluations.find_by_payment_reference(payment_reference).await? {
                    Some(evaluation) => evaluation,
                    None => return Ok((WebhookOutcome::Ignored, None)),
                };
                let id = evaluation.id;

                // Our own refunds are recorded when they are issued.
                if evaluation.payment_status == PaymentStatus::Refunded {
                    return Ok((WebhookOutcome::Ignored, Some(id)));
                }
                ensure_not_settling(&evaluation)?;

                let to = if evaluation.status.can_transition_to(EvaluationStatus::Refunded) {
                    EvaluationStatus::Refunded
                } else if evaluation.status.is_terminal() {
                    evaluation.status
                } else {
                    return Ok((WebhookOutcome::Ignored, Some(id)));
                };

                let mut change = EvaluationTransition::new(to, "refund_succeeded", None)
                    .payment_status(PaymentStatus::Refunded);
                change.refund_reference = refund_reference.clone();

                let updated = match self.evaluations.transition(id, evaluation.status, change).await? {
                    Some(updated) => updated,
                    None => return Err(self.lost_race(&evaluation, "record a refund for").await),
                };
                tracing::info!("Refund recorded for evaluation {}", id);

                if updated.status == EvaluationStatus::Refunded {
                    self.notify(&updated, LifecycleEvent::Refunded).await;
                }
                Ok((WebhookOutcome::Applied, Some(id)))
            }
            GatewayEventKind::Ignored { event_type } => {
                tracing::debug!("Unhandled webhook event type: {}", event_type);
                Ok((WebhookOutcome::Ignored, None))
            }
        }
    }

    async fn apply_payment(
        &self,
        evaluation: Evaluation,
        payment_reference: &str,
        attempt: i64,
    ) -> Result<WebhookOutcome> {
        let id = evaluation.id;

        if evaluation.payment_reference.as_deref() == Some(payment_reference) && !evaluation.awaiting_payment() {
            return Ok(WebhookOutcome::Ignored);
        }
        ensure_not_settling(&evaluation)?;

        let target = match evaluation.status {
            EvaluationStatus::Requested => Some(EvaluationStatus::Paid),
            EvaluationStatus::ConfirmedAwaitingPayment => Some(EvaluationStatus::InProgress),
            _ => None,
        };

        if let Some(to) = target.filter(|_| evaluation.awaiting_payment()) {
            let mut change = EvaluationTransition::new(to, "payment_succeeded", None)
                .payment_status(PaymentStatus::Held);
            change.payment_reference = Some(payment_reference.to_string());

            if let Some(updated) = self.evaluations.transition(id, evaluation.status, change).await? {
                tracing::info!("Payment {} held for evaluation {}", payment_reference, id);
                self.notify(&updated, LifecycleEvent::PaymentReceived).await;
                return Ok(WebhookOutcome::Applied);
            }

            let current = self.load(id).await?;
            if current.payment_reference.as_deref() == Some(payment_reference) {
                tracing::info!("Payment {} was recorded by a concurrent delivery", payment_reference);
                return Ok(WebhookOutcome::Ignored);
            }
            ensure_not_settling(&current)?;
        }

        // Terminal, already paid, or changed underneath us: the money has
        // nowhere to go.
        tracing::warn!(
            "Refunding orphaned payment {} for evaluation {}",
            payment_reference,
            id
        );
        self.gateway
            .refund(RefundRequest {
                payment_reference: payment_reference.to_string(),
                amount_cents: None,
                reverse_payout: false,
                idempotency_key: orphan_refund_key(payment_reference, attempt),
            })
            .await
            .map_err(|e| {
                tracing::error!("Orphaned payment {} refund failed: {}", payment_reference, e);
                gateway_error(e.to_string())
            })?;

        Ok(WebhookOutcome::OrphanRefunded)
    }

    // ----- helpers -----

    async fn load(&self, id: Uuid) -> Result<Evaluation> {
        self.evaluations
            .find_by_id(id)
            .await?
            .ok_or_else(AppError::evaluation_not_found)
    }

    async fn load_profile(&self, id: Uuid) -> Result<Profile> {
        self.profiles
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))
    }

    async fn load_active_scout(&self, scout_id: Uuid) -> Result<Profile> {
        let scout = self.load_profile(scout_id).await?;
        if scout.role != Role::Scout {
            return Err(AppError::BadRequest("Profile is not a scout".to_string()));
        }
        if scout.is_suspended_at(Utc::now()) {
            return Err(AppError::BadRequest("Scout is not accepting evaluations".to_string()));
        }
        Ok(scout)
    }

    async fn locate(
        &self,
        evaluation_id: Option<Uuid>,
        session_reference: Option<&str>,
        payment_reference: Option<&str>,
    ) -> Result<Option<Evaluation>> {
        if let Some(id) = evaluation_id {
            if let Some(evaluation) = self.evaluations.find_by_id(id).await? {
                return Ok(Some(evaluation));
            }
        }
        if let Some(session) = session_reference {
            if let Some(evaluation) = self.evaluations.find_by_checkout_session(session).await? {
                return Ok(Some(evaluation));
            }
        }
        match payment_reference {
            Some(reference) => self.evaluations.find_by_payment_reference(reference).await,
            None => Ok(None),
        }
    }

    /// Returns the purchasing parent when a linked parent acts for the player.
    async fn ensure_acts_for_player(&self, actor: Actor, player_id: Uuid) -> Result<Option<Uuid>> {
        match actor {
            Actor::System => Ok(None),
            Actor::Profile { id, .. } if id == player_id => Ok(None),
            Actor::Profile { role: Role::Admin, .. } => Ok(None),
            Actor::Profile { id, role: Role::Parent } => {
                if self.profiles.is_parent_of(id, player_id).await? {
                    Ok(Some(id))
                } else {
                    Err(AppError::Forbidden)
                }
            }
            Actor::Profile { .. } => Err(AppError::Forbidden),
        }
    }

    async fn acts_for_player(&self, actor: Actor, evaluation: &Evaluation) -> Result<bool> {
        let id = match actor.id() {
            Some(id) => id,
            None => return Ok(false),
        };
        if id == evaluation.player_id || evaluation.purchased_by == Some(id) {
            return Ok(true);
        }
        if actor.role() == Some(Role::Parent) {
            return self.profiles.is_parent_of(id, evaluation.player_id).await;
        }
        Ok(false)
    }

    async fn ensure_can_view(&self, actor: Actor, evaluation: &Evaluation) -> Result<()> {
        if actor.is_admin() || actor.is(evaluation.scout_id) || self.acts_for_player(actor, evaluation).await? {
            Ok(())
        } else {
            Err(AppError::evaluation_not_found())
        }
    }

    fn ensure_can_move(&self, evaluation: &Evaluation, to: EvaluationStatus, action: &'static str) -> Result<()> {
        if evaluation.status == to || !evaluation.status.can_transition_to(to) {
            return Err(AppError::InvalidTransition {
                from: evaluation.status,
                action,
            });
        }
        Ok(())
    }

    /// Writes `change` if the evaluation is still where we read it. Losing the
    /// race surfaces as an invalid transition from whatever state won, or as
    /// a conflict while another settlement is in flight.
    async fn apply(
        &self,
        evaluation: &Evaluation,
        change: EvaluationTransition,
        action: &'static str,
    ) -> Result<Evaluation> {
        let moved_money = change.payout_reference.is_some() || change.refund_reference.is_some();
        let settlement = change.settlement_token.clone();

        if let Some(updated) = self.evaluations.transition(evaluation.id, evaluation.status, change).await? {
            return Ok(updated);
        }

        if let Some(token) = settlement.as_deref() {
            self.end_settlement(evaluation, token, None).await;
        }

        if moved_money {
            let message = format!(
                "Evaluation {} changed while money was moving to {} it; needs reconciliation",
                evaluation.id, action
            );
            tracing::error!("{}", message);
            return Err(AppError::PaymentGateway {
                message,
                funds_moved: true,
            });
        }
        Err(self.lost_race(evaluation, action).await)
    }

    /// Explains why a write conditioned on `evaluation` did not land.
    async fn lost_race(&self, evaluation: &Evaluation, action: &'static str) -> AppError {
        match self.load(evaluation.id).await {
            Ok(current) if current.status == evaluation.status => {
                AppError::Conflict("Another change to this evaluation is in progress".to_string())
            }
            Ok(current) => AppError::InvalidTransition {
                from: current.status,
                action,
            },
            Err(e) => e,
        }
    }

    /// Reserves the evaluation before any money moves so that two operations
    /// can never both refund or pay out. Returns a fresh copy and the
    /// reservation token the final write must carry.
    async fn reserve(&self, evaluation: &Evaluation, action: &'static str) -> Result<(Evaluation, String)> {
        let token = Uuid::new_v4().to_string();
        let stale_before = Utc::now() - Duration::minutes(SETTLEMENT_TIMEOUT_MINUTES);

        if !self
            .evaluations
            .begin_settlement(evaluation.id, evaluation.status, &token, stale_before)
            .await?
        {
            return Err(self.lost_race(evaluation, action).await);
        }

        match self.load(evaluation.id).await {
            Ok(current) => Ok((current, token)),
            Err(e) => {
                self.end_settlement(evaluation, &token, None).await;
                Err(e)
            }
        }
    }

    async fn end_settlement(&self, evaluation: &Evaluation, token: &str, failed: Option<SettlementKind>) {
        if let Err(e) = self.evaluations.end_settlement(evaluation.id, token, failed).await {
            tracing::error!(
                "Failed to release settlement for evaluation {}: {:?}",
                evaluation.id,
                e
            );
        }
    }

    async fn create_hold(&self, evaluation: &Evaluation) -> Result<Hold> {
        let payer_id = evaluation.purchased_by.unwrap_or(evaluation.player_id);
        let payer = self.load_profile(payer_id).await?;
        let scout = self.load_profile(evaluation.scout_id).await?;
        let link = format!("{}/evaluations/{}", self.base_url, evaluation.id);

        let request = HoldRequest {
            evaluation_id: evaluation.id,
            amount_cents: evaluation.price_cents,
            payer_email: payer.email.clone(),
            description: format!("Evaluation by {}", scout.display_name()),
            success_url: format!("{}?payment=success", link),
            cancel_url: format!("{}?payment=cancelled", link),
        };

        match self.gateway.create_hold(request).await {
            Ok(hold) => Ok(hold),
            Err(e) => {
                tracing::error!("Failed to create hold for evaluation {}: {}", evaluation.id, e);
                let reason = e.to_string();
                self.notify(evaluation, |context| LifecycleEvent::PaymentFailed { context, reason })
                    .await;
                Err(e.into())
            }
        }
    }

    async fn start_checkout(
        &self,
        actor: Actor,
        evaluation: Evaluation,
        status: EvaluationStatus,
        trigger: &'static str,
    ) -> Result<Evaluation> {
        let hold = self.create_hold(&evaluation).await?;

        let mut change = EvaluationTransition::new(status, trigger, actor.id())
            .payment_status(PaymentStatus::Unpaid);
        change.checkout_session_id = Some(hold.session_reference);
        change.checkout_url = Some(hold.checkout_url);

        self.apply(&evaluation, change, "pay for").await
    }

    async fn refund_if_held(&self, evaluation: &Evaluation, settlement: &str) -> Result<Option<String>> {
        if !evaluation.funds_held() {
            return Ok(None);
        }
        self.issue_refund(evaluation, false, settlement).await.map(Some)
    }

    /// Full refund against the evaluation's payment. Callers hold the
    /// settlement reservation; a failure releases it and counts the attempt.
    async fn issue_refund(&self, evaluation: &Evaluation, reverse_payout: bool, settlement: &str) -> Result<String> {
        let payment_reference = match evaluation.payment_reference.clone() {
            Some(reference) => reference,
            None => {
                self.end_settlement(evaluation, settlement, None).await;
                return Err(AppError::Internal(format!(
                    "Evaluation {} holds funds without a payment reference",
                    evaluation.id
                )));
            }
        };

        let request = RefundRequest {
            payment_reference,
            amount_cents: Some(evaluation.price_cents),
            reverse_payout,
            idempotency_key: refund_key(evaluation),
        };

        match self.gateway.refund(request).await {
            Ok(reference) => Ok(reference),
            Err(e) => {
                tracing::error!("Refund failed for evaluation {}: {}", evaluation.id, e);
                self.end_settlement(evaluation, settlement, Some(SettlementKind::Refund)).await;
                let reason = e.to_string();
                self.notify(evaluation, |context| LifecycleEvent::PaymentFailed { context, reason })
                    .await;
                Err(gateway_error(e.to_string()))
            }
        }
    }

    async fn release_payout(&self, evaluation: &Evaluation, destination: &str, settlement: &str) -> Result<String> {
        let payment_reference = match evaluation.payment_reference.as_deref() {
            Some(reference) => reference,
            None => {
                self.end_settlement(evaluation, settlement, None).await;
                return Err(AppError::Internal(format!(
                    "Evaluation {} holds funds without a payment reference",
                    evaluation.id
                )));
            }
        };

        let payout = Payout {
            destination: destination.to_string(),
            amount_cents: evaluation.scout_payout_cents,
            idempotency_key: capture_key(evaluation),
        };

        match self.gateway.capture(payment_reference, &payout).await {
            Ok(reference) => Ok(reference),
            Err(e) => {
                tracing::error!("Payout failed for evaluation {}: {}", evaluation.id, e);
                self.end_settlement(evaluation, settlement, Some(SettlementKind::Capture)).await;
                let reason = e.to_string();
                self.notify(evaluation, |context| LifecycleEvent::PayoutFailed { context, reason })
                    .await;
                Err(gateway_error(e.to_string()))
            }
        }
    }

    async fn context(&self, evaluation: &Evaluation) -> Result<EvaluationContext> {
        let player = self.load_profile(evaluation.player_id).await?;
        let scout = self.load_profile(evaluation.scout_id).await?;
        let purchaser = match evaluation.purchased_by {
            Some(id) => self.profiles.find_by_id(id).await?,
            None => None,
        };

        Ok(EvaluationContext {
            evaluation: evaluation.clone(),
            player,
            scout,
            purchaser,
        })
    }

    /// Best effort: nothing here can fail the operation that triggered it.
    async fn notify<F>(&self, evaluation: &Evaluation, event: F)
    where
        F: FnOnce(EvaluationContext) -> LifecycleEvent + Send,
    {
        match self.context(evaluation).await {
            Ok(context) => self.dispatcher.dispatch(event(context)).await,
            Err(e) => {
                tracing::warn!(
                    "Skipping notifications for evaluation {}: {:?}",
                    evaluation.id,
                    e
                );
            }
        }
    }
}
