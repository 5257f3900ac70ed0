//! What each lifecycle event tells whom. Both notifiers render from here so
//! in-app and email copy never drift apart.

use serde_json::json;
use uuid::Uuid;

use super::{EvaluationContext, LifecycleEvent};
use crate::domain::{format_cents, EvaluationStatus, Profile};

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub recipient_id: Uuid,
    pub recipient_email: String,
    pub recipient_name: String,
    pub kind: &'static str,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub metadata: serde_json::Value,
}

impl Message {
    fn to(
        recipient: &Profile,
        kind: &'static str,
        title: &str,
        body: String,
        link: Option<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            recipient_id: recipient.id,
            recipient_email: recipient.email.clone(),
            recipient_name: recipient.display_name().to_string(),
            kind,
            title: title.to_string(),
            body,
            link,
            metadata,
        }
    }
}

fn evaluation_link(base_url: &str, context: &EvaluationContext) -> Option<String> {
    Some(format!(
        "{}/evaluations/{}",
        base_url.trim_end_matches('/'),
        context.evaluation.id
    ))
}

/// The player plus the parent who paid, if any.
fn player_side(context: &EvaluationContext) -> Vec<&Profile> {
    let mut recipients = vec![&context.player];
    if let Some(purchaser) = &context.purchaser {
        if purchaser.id != context.player.id {
            recipients.push(purchaser);
        }
    }
    recipients
}

pub fn render(event: &LifecycleEvent, base_url: &str) -> Vec<Message> {
    match event {
        LifecycleEvent::RequestReceived(ctx) => {
            let body = format!(
                "{} has requested an evaluation from you for {}.",
                ctx.player.display_name(),
                format_cents(ctx.evaluation.price_cents)
            );
            vec![Message::to(
                &ctx.scout,
                "evaluation_requested",
                "New Evaluation Request",
                body,
                evaluation_link(base_url, ctx),
                json!({ "evaluation_id": ctx.evaluation.id, "player_id": ctx.player.id }),
            )]
        }
        LifecycleEvent::PaymentReceived(ctx) => {
            let metadata = json!({
                "evaluation_id": ctx.evaluation.id,
                "amount_cents": ctx.evaluation.price_cents,
            });
            let mut messages: Vec<Message> = player_side(ctx)
                .into_iter()
                .map(|recipient| {
                    Message::to(
                        recipient,
                        "payment_received",
                        "Payment Received",
                        format!(
                            "Your payment of {} for an evaluation from {} has been received and is held until the evaluation is delivered.",
                            format_cents(ctx.evaluation.price_cents),
                            ctx.scout.display_name()
                        ),
                        evaluation_link(base_url, ctx),
                        metadata.clone(),
                    )
                })
                .collect();
            // Upfront payments reach the scout as a new request to answer.
            let (kind, title, body) = if ctx.evaluation.status == EvaluationStatus::Paid {
                (
                    "evaluation_requested",
                    "New Evaluation Request",
                    format!(
                        "{} has requested and paid for an evaluation. Confirm or deny the request.",
                        ctx.player.display_name()
                    ),
                )
            } else {
                (
                    "payment_received",
                    "Payment Received",
                    format!(
                        "{} has paid for their evaluation. You can start reviewing their film.",
                        ctx.player.display_name()
                    ),
                )
            };
            messages.push(Message::to(
                &ctx.scout,
                kind,
                title,
                body,
                evaluation_link(base_url, ctx),
                metadata,
            ));
            messages
        }
        LifecycleEvent::PayoutFailed { context: ctx, reason } => vec![Message::to(
            &ctx.scout,
            "payout_failed",
            "Payout Failed",
            format!(
                "We couldn't release your payout of {} for {}'s evaluation. Please try again.",
                format_cents(ctx.evaluation.scout_payout_cents),
                ctx.player.display_name()
            ),
            evaluation_link(base_url, ctx),
            json!({ "evaluation_id": ctx.evaluation.id, "error": reason }),
        )],
        LifecycleEvent::PaymentFailed { context: ctx, reason } => player_side(ctx)
            .into_iter()
            .map(|recipient| {
                Message::to(
                    recipient,
                    "payment_failed",
                    "Payment Failed",
                    format!(
                        "There was an issue processing your payment for an evaluation from {}. Please try again.",
                        ctx.scout.display_name()
                    ),
                    evaluation_link(base_url, ctx),
                    json!({ "evaluation_id": ctx.evaluation.id, "error": reason }),
                )
            })
            .collect(),
        LifecycleEvent::Confirmed { context: ctx, payment_url } => player_side(ctx)
            .into_iter()
            .map(|recipient| {
                let body = match payment_url {
                    Some(_) => format!(
                        "{} confirmed your evaluation request. Complete payment of {} to get started.",
                        ctx.scout.display_name(),
                        format_cents(ctx.evaluation.price_cents)
                    ),
                    None => format!(
                        "{} confirmed your evaluation request and is reviewing your film.",
                        ctx.scout.display_name()
                    ),
                };
                Message::to(
                    recipient,
                    "evaluation_confirmed",
                    "Evaluation Confirmed",
                    body,
                    payment_url.clone().or_else(|| evaluation_link(base_url, ctx)),
                    json!({ "evaluation_id": ctx.evaluation.id, "payment_url": payment_url }),
                )
            })
            .collect(),
        LifecycleEvent::Denied { context: ctx, reason, refunded } => player_side(ctx)
            .into_iter()
            .map(|recipient| {
                let mut body = format!(
                    "{} denied your evaluation request. Reason: {}",
                    ctx.scout.display_name(),
                    reason
                );
                if *refunded {
                    body.push_str(&format!(
                        " Your payment of {} has been refunded.",
                        format_cents(ctx.evaluation.price_cents)
                    ));
                }
                Message::to(
                    recipient,
                    "evaluation_denied",
                    "Evaluation Denied",
                    body,
                    evaluation_link(base_url, ctx),
                    json!({ "evaluation_id": ctx.evaluation.id, "reason": reason, "refunded": refunded }),
                )
            })
            .collect(),
        LifecycleEvent::Completed { context: ctx, payout_released } => {
            let mut messages: Vec<Message> = player_side(ctx)
                .into_iter()
                .map(|recipient| {
                    Message::to(
                        recipient,
                        "evaluation_completed",
                        "Evaluation Completed",
                        format!(
                            "Your evaluation from {} is ready! Check out your feedback.",
                            ctx.scout.display_name()
                        ),
                        evaluation_link(base_url, ctx),
                        json!({ "evaluation_id": ctx.evaluation.id }),
                    )
                })
                .collect();
            if ctx.evaluation.price_cents > 0 {
                let body = if *payout_released {
                    format!(
                        "Your payout of {} for {}'s evaluation is on its way.",
                        format_cents(ctx.evaluation.scout_payout_cents),
                        ctx.player.display_name()
                    )
                } else {
                    format!(
                        "Your payout of {} for {}'s evaluation is pending. Connect a payout account to receive it.",
                        format_cents(ctx.evaluation.scout_payout_cents),
                        ctx.player.display_name()
                    )
                };
                messages.push(Message::to(
                    &ctx.scout,
                    "payout_sent",
                    "Payout",
                    body,
                    evaluation_link(base_url, ctx),
                    json!({
                        "evaluation_id": ctx.evaluation.id,
                        "amount_cents": ctx.evaluation.scout_payout_cents,
                        "released": payout_released,
                    }),
                ));
            }
            messages
        }
        LifecycleEvent::Cancelled { context: ctx, cancelled_by, refunded } => {
            let mut recipients = player_side(ctx);
            recipients.push(&ctx.scout);
            recipients
                .into_iter()
                .filter(|recipient| Some(recipient.id) != *cancelled_by)
                .map(|recipient| {
                    let mut body = "An evaluation request has been cancelled.".to_string();
                    if *refunded && recipient.id != ctx.scout.id {
                        body.push_str(&format!(
                            " Your payment of {} has been refunded.",
                            format_cents(ctx.evaluation.price_cents)
                        ));
                    }
                    Message::to(
                        recipient,
                        "evaluation_cancelled",
                        "Evaluation Cancelled",
                        body,
                        evaluation_link(base_url, ctx),
                        json!({ "evaluation_id": ctx.evaluation.id, "refunded": refunded }),
                    )
                })
                .collect()
        }
        LifecycleEvent::Refunded(ctx) => {
            let mut messages: Vec<Message> = player_side(ctx)
                .into_iter()
                .map(|recipient| {
                    Message::to(
                        recipient,
                        "payment_refunded",
                        "Payment Refunded",
                        format!(
                            "Your payment of {} for an evaluation from {} has been refunded.",
                            format_cents(ctx.evaluation.price_cents),
                            ctx.scout.display_name()
                        ),
                        evaluation_link(base_url, ctx),
                        json!({ "evaluation_id": ctx.evaluation.id, "amount_cents": ctx.evaluation.price_cents }),
                    )
                })
                .collect();
            messages.push(Message::to(
                &ctx.scout,
                "payment_refunded",
                "Payment Refunded",
                format!(
                    "The payment for {}'s evaluation was refunded.",
                    ctx.player.display_name()
                ),
                evaluation_link(base_url, ctx),
                json!({ "evaluation_id": ctx.evaluation.id }),
            ));
            messages
        }
        LifecycleEvent::FreeEvaluationStarted(ctx) => vec![Message::to(
            &ctx.player,
            "evaluation_free",
            "New Free Evaluation",
            format!(
                "{} is giving you a free evaluation. You'll be notified when it's ready.",
                ctx.scout.display_name()
            ),
            evaluation_link(base_url, ctx),
            json!({ "evaluation_id": ctx.evaluation.id, "scout_id": ctx.scout.id }),
        )],
        LifecycleEvent::ScoutSuspended { scout, until, reason } => {
            let mut body = format!(
                "Your scout account is suspended until {}.",
                until.format("%B %-d, %Y")
            );
            if let Some(reason) = reason {
                body.push_str(&format!(" Reason: {}", reason));
            }
            vec![Message::to(
                scout,
                "scout_suspended",
                "Scout Account Suspended",
                body,
                None,
                json!({ "suspended_until": until, "reason": reason }),
            )]
        }
        LifecycleEvent::ScoutRevoked { scout, reason } => {
            let mut body = "Your scout status has been revoked. Your pending evaluations were cancelled and refunded.".to_string();
            if let Some(reason) = reason {
                body.push_str(&format!(" Reason: {}", reason));
            }
            vec![Message::to(
                scout,
                "scout_revoked",
                "Scout Status Revoked",
                body,
                None,
                json!({ "reason": reason }),
            )]
        }
    }
}
