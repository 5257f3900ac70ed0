mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{actor, setup, setup_confirm_then_pay, setup_with, BrokenNotifier};
use got1::{
    config::EvaluationConfig,
    domain::{EvaluationStatus, PaymentStatus, Role},
    error::AppError,
    notifications::Notifier,
};

#[tokio::test]
async fn test_denied_paid_evaluation_refunds_player_in_full() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let service = &app.ctx.evaluation_service;

    let outcome = service.request(actor(&player), player.id, scout.id, Some(9900)).await?;
    assert!(outcome.is_new());
    let evaluation = outcome.into_evaluation();
    assert_eq!(evaluation.status, EvaluationStatus::Requested);
    assert_eq!(evaluation.payment_status, PaymentStatus::Unpaid);
    assert_eq!(evaluation.price_cents, 9900);
    assert_eq!(evaluation.platform_fee_cents, 990);
    assert_eq!(evaluation.scout_payout_cents, 8910);
    assert!(evaluation.checkout_url.is_some());

    let holds = app.gateway.holds();
    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0].amount_cents, 9900);
    assert_eq!(holds[0].evaluation_id, evaluation.id);

    app.pay(&evaluation, "pi_deny").await?;
    let paid = service.get(actor(&player), evaluation.id).await?;
    assert_eq!(paid.status, EvaluationStatus::Paid);
    assert_eq!(paid.payment_status, PaymentStatus::Held);
    assert_eq!(paid.payment_reference.as_deref(), Some("pi_deny"));
    assert!(paid.paid_at.is_some());

    let denied = service
        .deny(actor(&scout), evaluation.id, "insufficient film quality".to_string())
        .await?;
    assert_eq!(denied.status, EvaluationStatus::Denied);
    assert_eq!(denied.payment_status, PaymentStatus::Refunded);
    assert_eq!(denied.denied_reason.as_deref(), Some("insufficient film quality"));
    assert!(denied.denied_at.is_some());

    let refunds = app.gateway.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].payment_reference, "pi_deny");
    assert_eq!(refunds[0].amount_cents, Some(9900));
    assert!(!refunds[0].reverse_payout);
    assert!(app.gateway.captures().is_empty());

    let notifications = app.ctx.notification_repo.list_for_user(player.id, 50, 0).await?;
    let denial = notifications
        .iter()
        .find(|n| n.kind == "evaluation_denied")
        .expect("player is told about the denial");
    assert!(denial.message.contains("insufficient film quality"));
    assert_eq!(
        denial.link.as_deref(),
        Some(format!("https://got1.test/evaluations/{}", evaluation.id).as_str())
    );

    let emails = app.emails.sent_to(&player.email);
    assert!(emails.iter().any(|e| e.html.contains("insufficient")));

    let history = service.history(actor(&player), evaluation.id).await?;
    let last = history.last().expect("history is recorded");
    assert_eq!(last.from_status, EvaluationStatus::Paid);
    assert_eq!(last.to_status, EvaluationStatus::Denied);
    assert_eq!(last.actor_id, Some(scout.id));

    Ok(())
}

#[tokio::test]
async fn test_duplicate_request_returns_existing_without_new_hold() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(5000).await?;
    let service = &app.ctx.evaluation_service;

    let first = service.request(actor(&player), player.id, scout.id, None).await?;
    let second = service.request(actor(&player), player.id, scout.id, None).await?;

    assert!(first.is_new());
    assert!(!second.is_new());
    assert_eq!(first.evaluation().id, second.evaluation().id);
    assert_eq!(second.evaluation().checkout_url, first.evaluation().checkout_url);
    assert_eq!(app.gateway.holds().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_request_rejects_stale_price() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;

    let result = app
        .ctx
        .evaluation_service
        .request(actor(&player), player.id, scout.id, Some(4900))
        .await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert!(app.gateway.holds().is_empty());
    assert!(app
        .ctx
        .evaluation_repo
        .find_active_for_pair(player.id, scout.id)
        .await?
        .is_none());

    Ok(())
}

#[tokio::test]
async fn test_request_requires_priced_active_scout() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let unpriced = app.profile("Riley Scout", Role::Scout).await?;
    let other_player = app.profile("Sam Player", Role::Player).await?;
    let service = &app.ctx.evaluation_service;

    let result = service.request(actor(&player), player.id, unpriced.id, None).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    let result = service.request(actor(&player), player.id, other_player.id, None).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    let result = service.request(actor(&other_player), player.id, unpriced.id, None).await;
    assert!(matches!(result, Err(AppError::Forbidden)));

    Ok(())
}

#[tokio::test]
async fn test_deny_without_payment_issues_no_refund() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let service = &app.ctx.evaluation_service;

    let evaluation = service
        .request(actor(&player), player.id, scout.id, None)
        .await?
        .into_evaluation();

    let denied = service
        .deny(actor(&scout), evaluation.id, "schedule is full".to_string())
        .await?;

    assert_eq!(denied.status, EvaluationStatus::Denied);
    assert_eq!(denied.payment_status, PaymentStatus::Unpaid);
    assert!(app.gateway.refunds().is_empty());
    assert_eq!(app.gateway.calls(), 0);

    Ok(())
}

#[tokio::test]
async fn test_deny_requires_reason_and_scout() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let evaluation = app.paid_evaluation(&player, &scout).await?;
    let service = &app.ctx.evaluation_service;

    let result = service.deny(actor(&scout), evaluation.id, "   ".to_string()).await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let result = service.deny(actor(&player), evaluation.id, "nope".to_string()).await;
    assert!(matches!(result, Err(AppError::Forbidden)));

    let unchanged = service.get(actor(&player), evaluation.id).await?;
    assert_eq!(unchanged.status, EvaluationStatus::Paid);
    assert!(app.gateway.refunds().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_concurrent_confirms_apply_exactly_once() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let evaluation = app.paid_evaluation(&player, &scout).await?;

    let attempts = (0..5).map(|_| {
        let service = app.ctx.evaluation_service.clone();
        let scout = actor(&scout);
        let id = evaluation.id;
        async move { service.confirm(scout, id).await }
    });
    let results = futures_util::future::join_all(attempts).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result,
            Err(AppError::InvalidTransition { from: EvaluationStatus::InProgress, .. })
        ));
    }

    let history = app.ctx.evaluation_service.history(actor(&scout), evaluation.id).await?;
    let confirmations = history.iter().filter(|c| c.trigger == "confirmed").count();
    assert_eq!(confirmations, 1);

    Ok(())
}

#[tokio::test]
async fn test_complete_releases_payout_despite_failing_notifier() -> anyhow::Result<()> {
    let broken: Arc<dyn Notifier> = Arc::new(BrokenNotifier);
    let app = setup_with(EvaluationConfig::default(), vec![broken]).await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let evaluation = app.paid_evaluation(&player, &scout).await?;
    let service = &app.ctx.evaluation_service;

    let confirmed = service.confirm(actor(&scout), evaluation.id).await?;
    assert_eq!(confirmed.status, EvaluationStatus::InProgress);
    assert!(confirmed.confirmed_at.is_some());

    let completed = service
        .complete(actor(&scout), evaluation.id, "Quick first step, work on footwork.".to_string())
        .await?;
    assert_eq!(completed.status, EvaluationStatus::Completed);
    assert_eq!(completed.payment_status, PaymentStatus::Released);
    assert!(completed.payout_reference.is_some());
    assert!(completed.completed_at.is_some());

    let captures = app.gateway.captures();
    assert_eq!(captures.len(), 1);
    assert_eq!(captures[0].amount_cents, 8910);
    assert_eq!(captures[0].destination, "acct_casey");

    let kinds = app.notification_kinds(player.id).await?;
    assert!(kinds.contains(&"evaluation_completed".to_string()));
    let kinds = app.notification_kinds(scout.id).await?;
    assert!(kinds.contains(&"payout_sent".to_string()));

    Ok(())
}

#[tokio::test]
async fn test_complete_requires_in_progress_and_notes() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let evaluation = app.paid_evaluation(&player, &scout).await?;
    let service = &app.ctx.evaluation_service;

    let result = service.complete(actor(&scout), evaluation.id, "notes".to_string()).await;
    assert!(matches!(
        result,
        Err(AppError::InvalidTransition { from: EvaluationStatus::Paid, .. })
    ));

    service.confirm(actor(&scout), evaluation.id).await?;
    let result = service.complete(actor(&scout), evaluation.id, String::new()).await;
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(app.gateway.captures().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_payout_failure_keeps_evaluation_in_progress() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let evaluation = app.paid_evaluation(&player, &scout).await?;
    let service = &app.ctx.evaluation_service;
    service.confirm(actor(&scout), evaluation.id).await?;

    app.gateway.fail_captures.store(true, Ordering::SeqCst);
    let result = service
        .complete(actor(&scout), evaluation.id, "Strong arm.".to_string())
        .await;
    assert!(matches!(result, Err(AppError::PaymentGateway { .. })));

    let current = service.get(actor(&scout), evaluation.id).await?;
    assert_eq!(current.status, EvaluationStatus::InProgress);
    assert_eq!(current.payment_status, PaymentStatus::Held);
    assert_eq!(current.capture_attempts, 1);
    assert!(!current.settlement_pending());
    assert!(app.notification_kinds(scout.id).await?.contains(&"payout_failed".to_string()));

    // The failed key stays failed at the processor; the retry uses a new one.
    app.gateway.fail_captures.store(false, Ordering::SeqCst);
    let completed = service
        .complete(actor(&scout), evaluation.id, "Strong arm.".to_string())
        .await?;
    assert_eq!(completed.payment_status, PaymentStatus::Released);
    let captures = app.gateway.captures();
    assert_eq!(captures.len(), 1);
    assert_eq!(
        captures[0].idempotency_key,
        format!("evaluation-{}-capture-1", evaluation.id)
    );

    Ok(())
}

#[tokio::test]
async fn test_missing_payout_account_defers_release_until_retry() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let admin = app.admin().await?;
    let scout = app.profile("Morgan Scout", Role::Scout).await?;
    app.ctx.profile_repo.set_price(scout.id, Some(2500)).await?;
    let evaluation = app.paid_evaluation(&player, &scout).await?;
    let service = &app.ctx.evaluation_service;

    service.confirm(actor(&scout), evaluation.id).await?;
    let completed = service
        .complete(actor(&scout), evaluation.id, "Good vision.".to_string())
        .await?;
    assert_eq!(completed.status, EvaluationStatus::Completed);
    assert_eq!(completed.payment_status, PaymentStatus::Held);
    assert!(app.gateway.captures().is_empty());

    let result = service.retry_payout(actor(&admin), evaluation.id).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    app.ctx
        .profile_repo
        .set_payout_account(scout.id, Some("acct_morgan".to_string()))
        .await?;
    let result = service.retry_payout(actor(&scout), evaluation.id).await;
    assert!(matches!(result, Err(AppError::Forbidden)));

    let released = service.retry_payout(actor(&admin), evaluation.id).await?;
    assert_eq!(released.status, EvaluationStatus::Completed);
    assert_eq!(released.payment_status, PaymentStatus::Released);
    assert_eq!(app.gateway.captures().len(), 1);
    assert_eq!(app.gateway.captures()[0].amount_cents, 2250);

    let result = service.retry_payout(actor(&admin), evaluation.id).await;
    assert!(matches!(result, Err(AppError::InvalidTransition { .. })));

    Ok(())
}

#[tokio::test]
async fn test_confirm_then_pay_flow() -> anyhow::Result<()> {
    let app = setup_confirm_then_pay().await?;
    let player = app.player().await?;
    let scout = app.scout(4000).await?;
    let service = &app.ctx.evaluation_service;

    let evaluation = service
        .request(actor(&player), player.id, scout.id, None)
        .await?
        .into_evaluation();
    assert_eq!(evaluation.status, EvaluationStatus::Requested);
    assert!(evaluation.checkout_url.is_none());
    assert!(app.gateway.holds().is_empty());
    assert!(app.notification_kinds(scout.id).await?.contains(&"evaluation_requested".to_string()));

    let confirmed = service.confirm(actor(&scout), evaluation.id).await?;
    assert_eq!(confirmed.status, EvaluationStatus::ConfirmedAwaitingPayment);
    assert!(confirmed.checkout_url.is_some());
    assert_eq!(app.gateway.holds().len(), 1);

    let notifications = app.ctx.notification_repo.list_for_user(player.id, 50, 0).await?;
    let confirmation = notifications
        .iter()
        .find(|n| n.kind == "evaluation_confirmed")
        .expect("player gets a payment link");
    let payment_url = confirmation
        .metadata
        .as_ref()
        .and_then(|m| m.get("payment_url"))
        .and_then(|v| v.as_str());
    assert_eq!(payment_url, confirmed.checkout_url.as_deref());

    app.pay(&confirmed, "pi_ctp").await?;
    let in_progress = service.get(actor(&player), evaluation.id).await?;
    assert_eq!(in_progress.status, EvaluationStatus::InProgress);
    assert_eq!(in_progress.payment_status, PaymentStatus::Held);

    let completed = service
        .complete(actor(&scout), evaluation.id, "Ready for varsity.".to_string())
        .await?;
    assert_eq!(completed.payment_status, PaymentStatus::Released);
    assert_eq!(app.gateway.captures()[0].amount_cents, 3600);

    Ok(())
}

#[tokio::test]
async fn test_hold_failure_can_be_resumed_through_checkout() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let service = &app.ctx.evaluation_service;

    app.gateway.fail_holds.store(true, Ordering::SeqCst);
    let result = service.request(actor(&player), player.id, scout.id, None).await;
    assert!(matches!(result, Err(AppError::PaymentGateway { .. })));
    assert!(app.notification_kinds(player.id).await?.contains(&"payment_failed".to_string()));

    let pending = app
        .ctx
        .evaluation_repo
        .find_active_for_pair(player.id, scout.id)
        .await?
        .expect("request row survives a failed hold");
    assert!(pending.checkout_url.is_none());

    app.gateway.fail_holds.store(false, Ordering::SeqCst);
    let resumed = service.checkout(actor(&player), pending.id).await?;
    assert_eq!(resumed.status, EvaluationStatus::Requested);
    assert!(resumed.checkout_url.is_some());
    assert_eq!(app.gateway.holds().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_free_evaluation_skips_payment() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let service = &app.ctx.evaluation_service;

    let result = service.give_free(actor(&player), player.id).await;
    assert!(matches!(result, Err(AppError::Forbidden)));

    let evaluation = service.give_free(actor(&scout), player.id).await?.into_evaluation();
    assert_eq!(evaluation.status, EvaluationStatus::InProgress);
    assert_eq!(evaluation.payment_status, PaymentStatus::NotRequired);
    assert_eq!(evaluation.price_cents, 0);
    assert!(app.notification_kinds(player.id).await?.contains(&"evaluation_free".to_string()));

    let completed = service
        .complete(actor(&scout), evaluation.id, "Keep it up.".to_string())
        .await?;
    assert_eq!(completed.status, EvaluationStatus::Completed);
    assert_eq!(completed.payment_status, PaymentStatus::NotRequired);
    assert!(app.gateway.holds().is_empty());
    assert_eq!(app.gateway.calls(), 0);

    Ok(())
}

#[tokio::test]
async fn test_player_cancel_refunds_held_funds_once() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let evaluation = app.paid_evaluation(&player, &scout).await?;
    let service = &app.ctx.evaluation_service;

    let cancelled = service
        .cancel(actor(&player), evaluation.id, Some("Changed my mind".to_string()))
        .await?;
    assert_eq!(cancelled.status, EvaluationStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
    assert_eq!(cancelled.cancelled_reason.as_deref(), Some("Changed my mind"));

    let result = service.cancel(actor(&player), evaluation.id, None).await;
    assert!(matches!(
        result,
        Err(AppError::InvalidTransition { from: EvaluationStatus::Cancelled, .. })
    ));
    assert_eq!(app.gateway.refunds().len(), 1);

    let kinds = app.notification_kinds(scout.id).await?;
    assert!(kinds.contains(&"evaluation_cancelled".to_string()));
    let kinds = app.notification_kinds(player.id).await?;
    assert!(!kinds.contains(&"evaluation_cancelled".to_string()));

    Ok(())
}

#[tokio::test]
async fn test_refund_failure_leaves_status_unchanged() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let evaluation = app.paid_evaluation(&player, &scout).await?;
    let service = &app.ctx.evaluation_service;

    app.gateway.fail_refunds.store(true, Ordering::SeqCst);
    let result = service
        .deny(actor(&scout), evaluation.id, "Not my sport".to_string())
        .await;
    assert!(matches!(result, Err(AppError::PaymentGateway { .. })));

    let current = service.get(actor(&scout), evaluation.id).await?;
    assert_eq!(current.status, EvaluationStatus::Paid);
    assert_eq!(current.payment_status, PaymentStatus::Held);
    assert_eq!(current.refund_attempts, 1);

    app.gateway.fail_refunds.store(false, Ordering::SeqCst);
    let denied = service
        .deny(actor(&scout), evaluation.id, "Not my sport".to_string())
        .await?;
    assert_eq!(denied.payment_status, PaymentStatus::Refunded);
    let refunds = app.gateway.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(
        refunds[0].idempotency_key,
        format!("evaluation-{}-refund-1", evaluation.id)
    );

    Ok(())
}

#[tokio::test]
async fn test_concurrent_cancel_and_complete_move_money_once() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let evaluation = app.paid_evaluation(&player, &scout).await?;
    let service = &app.ctx.evaluation_service;
    service.confirm(actor(&scout), evaluation.id).await?;

    let (cancelled, completed) = tokio::join!(
        service.cancel(actor(&player), evaluation.id, None),
        service.complete(actor(&scout), evaluation.id, "Great film".to_string()),
    );
    assert!(cancelled.is_ok() != completed.is_ok());

    let refunds = app.gateway.refunds().len();
    let captures = app.gateway.captures().len();
    assert_eq!(refunds + captures, 1);

    let current = app.ctx.evaluation_repo.find_by_id(evaluation.id).await?.expect("evaluation exists");
    assert!(!current.settlement_pending());
    if cancelled.is_ok() {
        assert_eq!(current.status, EvaluationStatus::Cancelled);
        assert_eq!(current.payment_status, PaymentStatus::Refunded);
        assert_eq!(refunds, 1);
    } else {
        assert_eq!(current.status, EvaluationStatus::Completed);
        assert_eq!(current.payment_status, PaymentStatus::Released);
        assert_eq!(captures, 1);
    }

    Ok(())
}

#[tokio::test]
async fn test_lost_write_after_refund_reports_moved_funds() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let evaluation = app.paid_evaluation(&player, &scout).await?;
    let service = &app.ctx.evaluation_service;

    // Another worker takes over the reservation while the refund is out.
    app.gateway.interleave(
        &app.pool,
        format!(
            "UPDATE evaluations SET settlement_token = 'other-worker' WHERE id = '{}'",
            evaluation.id
        ),
    );
    let result = service
        .deny(actor(&scout), evaluation.id, "Out of my region".to_string())
        .await;
    assert!(matches!(
        result,
        Err(AppError::PaymentGateway { funds_moved: true, .. })
    ));
    assert_eq!(app.gateway.refunds().len(), 1);

    let current = app.ctx.evaluation_repo.find_by_id(evaluation.id).await?.expect("evaluation exists");
    assert_eq!(current.status, EvaluationStatus::Paid);

    Ok(())
}

#[tokio::test]
async fn test_admin_refund_reverses_released_payout() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let admin = app.admin().await?;
    let evaluation = app.paid_evaluation(&player, &scout).await?;
    let service = &app.ctx.evaluation_service;

    service.confirm(actor(&scout), evaluation.id).await?;
    service
        .complete(actor(&scout), evaluation.id, "Solid footwork.".to_string())
        .await?;

    let result = service.refund(actor(&player), evaluation.id, None).await;
    assert!(matches!(result, Err(AppError::Forbidden)));

    let refunded = service
        .refund(actor(&admin), evaluation.id, Some("Feedback never delivered".to_string()))
        .await?;
    assert_eq!(refunded.status, EvaluationStatus::Refunded);
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    assert!(refunded.refunded_at.is_some());

    let refunds = app.gateway.refunds();
    assert_eq!(refunds.len(), 1);
    assert!(refunds[0].reverse_payout);
    assert_eq!(refunds[0].amount_cents, Some(9900));
    assert!(app.notification_kinds(player.id).await?.contains(&"payment_refunded".to_string()));

    let result = service.refund(actor(&admin), evaluation.id, None).await;
    assert!(matches!(result, Err(AppError::InvalidTransition { .. })));

    Ok(())
}

#[tokio::test]
async fn test_expiry_cancels_unanswered_requests() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let evaluation = app.paid_evaluation(&player, &scout).await?;
    let service = &app.ctx.evaluation_service;

    let expired = service.expire_unanswered(Utc::now()).await?;
    assert!(expired.is_empty());

    let expired = service.expire_unanswered(Utc::now() + Duration::hours(73)).await?;
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, evaluation.id);
    assert_eq!(expired[0].status, EvaluationStatus::Cancelled);
    assert_eq!(expired[0].payment_status, PaymentStatus::Refunded);
    assert_eq!(app.gateway.refunds().len(), 1);

    let history = service.history(actor(&player), evaluation.id).await?;
    assert_eq!(history.last().map(|c| c.actor_id), Some(None));

    Ok(())
}

#[tokio::test]
async fn test_expiry_measures_paid_requests_from_payment() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let service = &app.ctx.evaluation_service;

    let evaluation = service
        .request(actor(&player), player.id, scout.id, None)
        .await?
        .into_evaluation();
    sqlx::query("UPDATE evaluations SET created_at = ? WHERE id = ?")
        .bind((Utc::now() - Duration::hours(71)).naive_utc())
        .bind(evaluation.id.to_string())
        .execute(&app.pool)
        .await?;
    app.pay(&evaluation, "pi_late_payer").await?;

    let expired = service.expire_unanswered(Utc::now() + Duration::hours(2)).await?;
    assert!(expired.is_empty());

    let expired = service.expire_unanswered(Utc::now() + Duration::hours(73)).await?;
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].payment_status, PaymentStatus::Refunded);

    Ok(())
}

#[tokio::test]
async fn test_evaluations_are_hidden_from_unrelated_profiles() -> anyhow::Result<()> {
    let app = setup().await?;
    let player = app.player().await?;
    let scout = app.scout(9900).await?;
    let stranger = app.profile("Taylor Stranger", Role::Player).await?;
    let service = &app.ctx.evaluation_service;

    let evaluation = service
        .request(actor(&player), player.id, scout.id, None)
        .await?
        .into_evaluation();

    let result = service.get(actor(&stranger), evaluation.id).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert!(service.list(actor(&stranger), 50, 0).await?.is_empty());
    assert_eq!(service.list(actor(&scout), 50, 0).await?.len(), 1);

    let result = service.cancel(actor(&stranger), evaluation.id, None).await;
    assert!(matches!(result, Err(AppError::Forbidden)));

    Ok(())
}
