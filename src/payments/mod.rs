//! Payment processor seam. The evaluation engine only talks to
//! [`PaymentGateway`]; the Stripe implementation lives in [`stripe_client`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod stripe_client;

pub use stripe_client::StripeGateway;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("payment processor error: {0}")]
    Api(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("payment processing is not configured")]
    NotConfigured,
}

/// Funds to collect from the payer and hold on the platform account.
#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub evaluation_id: Uuid,
    pub amount_cents: i64,
    pub payer_email: String,
    pub description: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hold {
    pub session_reference: String,
    pub checkout_url: String,
}

/// Release of held funds to the scout's payout account.
#[derive(Debug, Clone)]
pub struct Payout {
    pub destination: String,
    pub amount_cents: i64,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub payment_reference: String,
    /// `None` refunds the full amount.
    pub amount_cents: Option<i64>,
    /// Pull back a payout that was already released.
    pub reverse_payout: bool,
    pub idempotency_key: String,
}

/// A verified webhook delivery, reduced to what the lifecycle cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event_id: String,
    #[serde(flatten)]
    pub kind: GatewayEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEventKind {
    PaymentSucceeded {
        evaluation_id: Option<Uuid>,
        session_reference: Option<String>,
        payment_reference: String,
    },
    PaymentFailed {
        evaluation_id: Option<Uuid>,
        session_reference: Option<String>,
        reason: Option<String>,
    },
    RefundSucceeded {
        payment_reference: String,
        refund_reference: Option<String>,
    },
    Ignored {
        event_type: String,
    },
}

impl GatewayEventKind {
    pub fn name(&self) -> &str {
        match self {
            GatewayEventKind::PaymentSucceeded { .. } => "payment_succeeded",
            GatewayEventKind::PaymentFailed { .. } => "payment_failed",
            GatewayEventKind::RefundSucceeded { .. } => "refund_succeeded",
            GatewayEventKind::Ignored { event_type } => event_type,
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &str;
    async fn create_hold(&self, request: HoldRequest) -> Result<Hold, GatewayError>;
    /// Returns the processor's transfer reference.
    async fn capture(&self, payment_reference: &str, payout: &Payout) -> Result<String, GatewayError>;
    /// Returns the processor's refund reference.
    async fn refund(&self, request: RefundRequest) -> Result<String, GatewayError>;
    fn verify_and_parse_webhook(&self, payload: &str, signature: &str) -> Result<GatewayEvent, GatewayError>;
}

/// Used when no processor is configured. Every money movement fails, so paid
/// evaluations cannot be created by accident.
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn create_hold(&self, _request: HoldRequest) -> Result<Hold, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn capture(&self, _payment_reference: &str, _payout: &Payout) -> Result<String, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn refund(&self, _request: RefundRequest) -> Result<String, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    fn verify_and_parse_webhook(&self, _payload: &str, _signature: &str) -> Result<GatewayEvent, GatewayError> {
        Err(GatewayError::NotConfigured)
    }
}
