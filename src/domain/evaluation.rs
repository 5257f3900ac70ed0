use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub player_id: Uuid,
    pub scout_id: Uuid,
    /// Parent who paid on the player's behalf.
    pub purchased_by: Option<Uuid>,
    pub status: EvaluationStatus,
    pub price_cents: i64,
    pub platform_fee_cents: i64,
    pub scout_payout_cents: i64,
    pub payment_status: PaymentStatus,
    pub checkout_session_id: Option<String>,
    pub checkout_url: Option<String>,
    pub payment_reference: Option<String>,
    pub payout_reference: Option<String>,
    pub refund_reference: Option<String>,
    pub notes: Option<String>,
    pub denied_reason: Option<String>,
    pub cancelled_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub denied_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    /// Set while a refund or payout is in flight for this evaluation.
    #[serde(skip)]
    pub settlement_token: Option<String>,
    pub capture_attempts: i64,
    pub refund_attempts: i64,
    pub updated_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn funds_held(&self) -> bool {
        self.payment_status == PaymentStatus::Held
    }

    /// Whether the player still owes money for this evaluation.
    pub fn awaiting_payment(&self) -> bool {
        matches!(self.payment_status, PaymentStatus::Unpaid | PaymentStatus::Failed)
    }

    pub fn settlement_pending(&self) -> bool {
        self.settlement_token.is_some()
    }

    pub fn involves(&self, profile_id: Uuid) -> bool {
        self.player_id == profile_id
            || self.scout_id == profile_id
            || self.purchased_by == Some(profile_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Requested,
    ConfirmedAwaitingPayment,
    Paid,
    InProgress,
    Completed,
    Denied,
    Cancelled,
    Refunded,
}

impl EvaluationStatus {
    pub const ACTIVE: [EvaluationStatus; 4] = [
        EvaluationStatus::Requested,
        EvaluationStatus::ConfirmedAwaitingPayment,
        EvaluationStatus::Paid,
        EvaluationStatus::InProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Requested => "requested",
            EvaluationStatus::ConfirmedAwaitingPayment => "confirmed_awaiting_payment",
            EvaluationStatus::Paid => "paid",
            EvaluationStatus::InProgress => "in_progress",
            EvaluationStatus::Completed => "completed",
            EvaluationStatus::Denied => "denied",
            EvaluationStatus::Cancelled => "cancelled",
            EvaluationStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !Self::ACTIVE.contains(self)
    }

    /// Legal edges of the lifecycle graph. A transition to the same status is
    /// a payment-only update and is always allowed.
    pub fn can_transition_to(&self, next: EvaluationStatus) -> bool {
        use EvaluationStatus::*;

        if *self == next {
            return true;
        }

        match (self, next) {
            (Requested, Paid) | (Requested, ConfirmedAwaitingPayment) => true,
            (ConfirmedAwaitingPayment, InProgress) | (Paid, InProgress) => true,
            (InProgress, Completed) => true,
            (Requested | ConfirmedAwaitingPayment | Paid | InProgress, Denied | Cancelled) => true,
            (Paid | InProgress | Completed, Refunded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(EvaluationStatus::Requested),
            "confirmed_awaiting_payment" => Ok(EvaluationStatus::ConfirmedAwaitingPayment),
            "paid" => Ok(EvaluationStatus::Paid),
            "in_progress" => Ok(EvaluationStatus::InProgress),
            "completed" => Ok(EvaluationStatus::Completed),
            "denied" => Ok(EvaluationStatus::Denied),
            "cancelled" => Ok(EvaluationStatus::Cancelled),
            "refunded" => Ok(EvaluationStatus::Refunded),
            _ => Err(format!("Invalid evaluation status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    /// Collected by the platform and held until the evaluation is delivered.
    Held,
    /// Transferred to the scout.
    Released,
    Refunded,
    Failed,
    NotRequired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Held => "held",
            PaymentStatus::Released => "released",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::NotRequired => "not_required",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "held" => Ok(PaymentStatus::Held),
            "released" => Ok(PaymentStatus::Released),
            "refunded" => Ok(PaymentStatus::Refunded),
            "failed" => Ok(PaymentStatus::Failed),
            "not_required" => Ok(PaymentStatus::NotRequired),
            _ => Err(format!("Invalid payment status: {}", s)),
        }
    }
}

/// Fields for a freshly requested evaluation. The fee split is fixed here and
/// never recomputed.
#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub id: Uuid,
    pub player_id: Uuid,
    pub scout_id: Uuid,
    pub purchased_by: Option<Uuid>,
    pub status: EvaluationStatus,
    pub price_cents: i64,
    pub platform_fee_cents: i64,
    pub scout_payout_cents: i64,
    pub payment_status: PaymentStatus,
}

impl NewEvaluation {
    pub fn requested(
        player_id: Uuid,
        scout_id: Uuid,
        purchased_by: Option<Uuid>,
        price_cents: i64,
        platform_fee_bps: u32,
    ) -> Self {
        let (platform_fee_cents, scout_payout_cents) = split_fee(price_cents, platform_fee_bps);
        Self {
            id: Uuid::new_v4(),
            player_id,
            scout_id,
            purchased_by,
            status: EvaluationStatus::Requested,
            price_cents,
            platform_fee_cents,
            scout_payout_cents,
            payment_status: PaymentStatus::Unpaid,
        }
    }

    pub fn free(player_id: Uuid, scout_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            player_id,
            scout_id,
            purchased_by: None,
            status: EvaluationStatus::InProgress,
            price_cents: 0,
            platform_fee_cents: 0,
            scout_payout_cents: 0,
            payment_status: PaymentStatus::NotRequired,
        }
    }
}

/// Splits a price into (platform fee, scout payout), rounding the fee half up.
pub fn split_fee(price_cents: i64, platform_fee_bps: u32) -> (i64, i64) {
    let fee = (price_cents * i64::from(platform_fee_bps) + 5_000) / 10_000;
    (fee, price_cents - fee)
}

pub fn format_cents(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}

/// A conditional status change. Only the fields that are `Some` are written;
/// the repository stamps the matching timestamp columns.
#[derive(Debug, Clone)]
pub struct EvaluationTransition {
    pub to: EvaluationStatus,
    pub trigger: &'static str,
    pub actor_id: Option<Uuid>,
    pub payment_status: Option<PaymentStatus>,
    pub checkout_session_id: Option<String>,
    pub checkout_url: Option<String>,
    pub payment_reference: Option<String>,
    pub payout_reference: Option<String>,
    pub refund_reference: Option<String>,
    pub notes: Option<String>,
    pub denied_reason: Option<String>,
    pub cancelled_reason: Option<String>,
    /// Settlement reservation held by the writer. Without one, the write
    /// only lands while no settlement is in flight.
    pub settlement_token: Option<String>,
}

impl EvaluationTransition {
    pub fn new(to: EvaluationStatus, trigger: &'static str, actor_id: Option<Uuid>) -> Self {
        Self {
            to,
            trigger,
            actor_id,
            payment_status: None,
            checkout_session_id: None,
            checkout_url: None,
            payment_reference: None,
            payout_reference: None,
            refund_reference: None,
            notes: None,
            denied_reason: None,
            cancelled_reason: None,
            settlement_token: None,
        }
    }

    pub fn payment_status(mut self, status: PaymentStatus) -> Self {
        self.payment_status = Some(status);
        self
    }
}

/// Gateway operation a failed settlement attempt is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementKind {
    Capture,
    Refund,
}

/// One row of an evaluation's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: Uuid,
    pub evaluation_id: Uuid,
    pub from_status: EvaluationStatus,
    pub to_status: EvaluationStatus,
    pub trigger: String,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
