use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{Evaluation, Profile};
use crate::error::Result;

pub mod email;
pub mod in_app;
pub mod messages;

pub use email::{EmailNotifier, EmailSender, LogEmailSender, SmtpEmailSender};
pub use in_app::InAppNotifier;
pub use messages::{render, Message};

/// An evaluation together with the profiles its messages are addressed to.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub evaluation: Evaluation,
    pub player: Profile,
    pub scout: Profile,
    /// Parent who paid, when it was not the player.
    pub purchaser: Option<Profile>,
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    RequestReceived(EvaluationContext),
    PaymentReceived(EvaluationContext),
    PaymentFailed {
        context: EvaluationContext,
        reason: String,
    },
    /// Releasing escrow to the scout failed; the evaluation is unchanged.
    PayoutFailed {
        context: EvaluationContext,
        reason: String,
    },
    Confirmed {
        context: EvaluationContext,
        payment_url: Option<String>,
    },
    Denied {
        context: EvaluationContext,
        reason: String,
        refunded: bool,
    },
    Completed {
        context: EvaluationContext,
        payout_released: bool,
    },
    Cancelled {
        context: EvaluationContext,
        cancelled_by: Option<uuid::Uuid>,
        refunded: bool,
    },
    Refunded(EvaluationContext),
    FreeEvaluationStarted(EvaluationContext),
    ScoutSuspended {
        scout: Profile,
        until: DateTime<Utc>,
        reason: Option<String>,
    },
    ScoutRevoked {
        scout: Profile,
        reason: Option<String>,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::RequestReceived(_) => "request_received",
            LifecycleEvent::PaymentReceived(_) => "payment_received",
            LifecycleEvent::PaymentFailed { .. } => "payment_failed",
            LifecycleEvent::PayoutFailed { .. } => "payout_failed",
            LifecycleEvent::Confirmed { .. } => "confirmed",
            LifecycleEvent::Denied { .. } => "denied",
            LifecycleEvent::Completed { .. } => "completed",
            LifecycleEvent::Cancelled { .. } => "cancelled",
            LifecycleEvent::Refunded(_) => "refunded",
            LifecycleEvent::FreeEvaluationStarted(_) => "free_evaluation_started",
            LifecycleEvent::ScoutSuspended { .. } => "scout_suspended",
            LifecycleEvent::ScoutRevoked { .. } => "scout_revoked",
        }
    }
}

/// A sink for lifecycle side effects (in-app rows, email).
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn handle_event(&self, event: &LifecycleEvent) -> Result<()>;
}

/// Fans lifecycle events out to every registered notifier. Failures are
/// logged and never reach the caller.
pub struct NotificationDispatcher {
    notifiers: RwLock<Vec<Arc<dyn Notifier>>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self {
            notifiers: RwLock::new(Vec::new()),
        }
    }

    pub async fn register(&self, notifier: Arc<dyn Notifier>) {
        tracing::info!("Registered notifier: {}", notifier.name());
        self.notifiers.write().await.push(notifier);
    }

    pub async fn dispatch(&self, event: LifecycleEvent) {
        let notifiers = self.notifiers.read().await;

        for notifier in notifiers.iter() {
            match notifier.handle_event(&event).await {
                Ok(()) => {
                    tracing::debug!("Notifier {} handled {}", notifier.name(), event.name());
                }
                Err(e) => {
                    tracing::warn!(
                        "Notifier {} failed to handle {}: {:?}",
                        notifier.name(),
                        event.name(),
                        e
                    );
                }
            }
        }
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
