#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use uuid::Uuid;

use got1::{
    auth::AuthService,
    config::{EvaluationConfig, PaymentFlow},
    domain::{Actor, CreateProfileRequest, Evaluation, OutgoingEmail, Profile, Role},
    error::{AppError, Result},
    notifications::{
        EmailNotifier, EmailSender, InAppNotifier, LifecycleEvent, NotificationDispatcher, Notifier,
    },
    payments::{
        GatewayError, GatewayEvent, GatewayEventKind, Hold, HoldRequest, PaymentGateway, Payout,
        RefundRequest,
    },
    repository::{
        SqliteEvaluationRepository, SqliteNotificationRepository, SqliteOfferRepository,
        SqliteProfileRepository, SqliteWebhookEventRepository,
    },
    service::ServiceContext,
};

pub const BASE_URL: &str = "https://got1.test";
pub const TEST_SIGNATURE: &str = "test-signature";

/// In-memory payment processor. Captures and refunds are keyed by their
/// idempotency key the way the real processor dedupes them, and a key that
/// failed once keeps failing.
#[derive(Default)]
pub struct FakeGateway {
    holds: Mutex<Vec<HoldRequest>>,
    captures: Mutex<HashMap<String, Payout>>,
    refunds: Mutex<HashMap<String, RefundRequest>>,
    failed_keys: Mutex<HashMap<String, String>>,
    interleaved: Mutex<Option<(SqlitePool, String)>>,
    calls: AtomicUsize,
    pub fail_holds: AtomicBool,
    pub fail_captures: AtomicBool,
    pub fail_refunds: AtomicBool,
}

impl FakeGateway {
    pub fn holds(&self) -> Vec<HoldRequest> {
        self.holds.lock().unwrap().clone()
    }

    pub fn captures(&self) -> Vec<Payout> {
        self.captures.lock().unwrap().values().cloned().collect()
    }

    pub fn refunds(&self) -> Vec<RefundRequest> {
        self.refunds.lock().unwrap().values().cloned().collect()
    }

    /// Every money-moving call, including retried ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Runs `sql` once while the next capture or refund is in flight, as a
    /// concurrent writer would.
    pub fn interleave(&self, pool: &SqlitePool, sql: impl Into<String>) {
        *self.interleaved.lock().unwrap() = Some((pool.clone(), sql.into()));
    }

    async fn run_interleaved(&self) {
        let pending = self.interleaved.lock().unwrap().take();
        if let Some((pool, sql)) = pending {
            sqlx::query(&sql).execute(&pool).await.unwrap();
        }
    }

    fn settle(&self, key: &str, fail: &AtomicBool, message: &str) -> std::result::Result<(), GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut failed_keys = self.failed_keys.lock().unwrap();
        if let Some(cached) = failed_keys.get(key) {
            return Err(GatewayError::Api(cached.clone()));
        }
        if fail.load(Ordering::SeqCst) {
            failed_keys.insert(key.to_string(), message.to_string());
            return Err(GatewayError::Api(message.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create_hold(&self, request: HoldRequest) -> std::result::Result<Hold, GatewayError> {
        if self.fail_holds.load(Ordering::SeqCst) {
            return Err(GatewayError::Api("card network unavailable".to_string()));
        }
        let mut holds = self.holds.lock().unwrap();
        holds.push(request);
        let n = holds.len();
        Ok(Hold {
            session_reference: format!("cs_test_{}", n),
            checkout_url: format!("https://checkout.test/cs_test_{}", n),
        })
    }

    async fn capture(&self, _payment_reference: &str, payout: &Payout) -> std::result::Result<String, GatewayError> {
        self.settle(&payout.idempotency_key, &self.fail_captures, "destination account restricted")?;
        self.run_interleaved().await;
        self.captures
            .lock()
            .unwrap()
            .entry(payout.idempotency_key.clone())
            .or_insert_with(|| payout.clone());
        Ok(format!("tr_{}", payout.idempotency_key))
    }

    async fn refund(&self, request: RefundRequest) -> std::result::Result<String, GatewayError> {
        self.settle(&request.idempotency_key, &self.fail_refunds, "refund declined")?;
        self.run_interleaved().await;
        let key = request.idempotency_key.clone();
        self.refunds.lock().unwrap().entry(key.clone()).or_insert(request);
        Ok(format!("re_{}", key))
    }

    fn verify_and_parse_webhook(&self, payload: &str, signature: &str) -> std::result::Result<GatewayEvent, GatewayError> {
        if signature != TEST_SIGNATURE {
            return Err(GatewayError::InvalidSignature("signature mismatch".to_string()));
        }
        serde_json::from_str(payload).map_err(|e| GatewayError::Malformed(e.to_string()))
    }
}

#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingEmailSender {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<OutgoingEmail> {
        self.sent().into_iter().filter(|e| e.to == address).collect()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

/// A notifier that always fails, to prove side effects never roll back a
/// transition.
pub struct BrokenNotifier;

#[async_trait]
impl Notifier for BrokenNotifier {
    fn name(&self) -> &str {
        "broken"
    }

    async fn handle_event(&self, _event: &LifecycleEvent) -> Result<()> {
        Err(AppError::ServiceUnavailable("mail relay down".to_string()))
    }
}

pub struct TestApp {
    pub pool: SqlitePool,
    pub ctx: Arc<ServiceContext>,
    pub gateway: Arc<FakeGateway>,
    pub emails: Arc<RecordingEmailSender>,
}

pub async fn test_pool() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

pub async fn setup() -> anyhow::Result<TestApp> {
    setup_with(EvaluationConfig::default(), Vec::new()).await
}

pub async fn setup_confirm_then_pay() -> anyhow::Result<TestApp> {
    let config = EvaluationConfig {
        payment_flow: PaymentFlow::ConfirmThenPay,
        ..EvaluationConfig::default()
    };
    setup_with(config, Vec::new()).await
}

pub async fn setup_with(
    config: EvaluationConfig,
    extra_notifiers: Vec<Arc<dyn Notifier>>,
) -> anyhow::Result<TestApp> {
    let pool = test_pool().await?;

    let profile_repo = Arc::new(SqliteProfileRepository::new(pool.clone()));
    let evaluation_repo = Arc::new(SqliteEvaluationRepository::new(pool.clone()));
    let notification_repo = Arc::new(SqliteNotificationRepository::new(pool.clone()));
    let webhook_event_repo = Arc::new(SqliteWebhookEventRepository::new(pool.clone()));
    let offer_repo = Arc::new(SqliteOfferRepository::new(pool.clone()));

    let gateway = Arc::new(FakeGateway::default());
    let emails = Arc::new(RecordingEmailSender::default());

    let dispatcher = Arc::new(NotificationDispatcher::new());
    for notifier in extra_notifiers {
        dispatcher.register(notifier).await;
    }
    dispatcher
        .register(Arc::new(InAppNotifier::new(notification_repo.clone(), BASE_URL.to_string())))
        .await;
    dispatcher
        .register(Arc::new(EmailNotifier::new(emails.clone(), BASE_URL.to_string())))
        .await;

    let ctx = Arc::new(ServiceContext::new(
        profile_repo,
        evaluation_repo,
        notification_repo,
        webhook_event_repo,
        offer_repo,
        gateway.clone(),
        dispatcher,
        Arc::new(AuthService::new(pool.clone(), 24)),
        config,
        BASE_URL.to_string(),
        pool.clone(),
    ));

    Ok(TestApp {
        pool,
        ctx,
        gateway,
        emails,
    })
}

impl TestApp {
    pub async fn profile(&self, name: &str, role: Role) -> anyhow::Result<Profile> {
        let profile = self
            .ctx
            .profile_repo
            .create(CreateProfileRequest {
                email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
                full_name: name.to_string(),
                role,
                school: None,
                password: Some("correct horse battery".to_string()),
            })
            .await?;
        Ok(profile)
    }

    pub async fn player(&self) -> anyhow::Result<Profile> {
        self.profile("Jordan Player", Role::Player).await
    }

    /// A scout charging `price_cents` with a connected payout account.
    pub async fn scout(&self, price_cents: i64) -> anyhow::Result<Profile> {
        let scout = self.profile("Casey Scout", Role::Scout).await?;
        self.ctx.profile_repo.set_price(scout.id, Some(price_cents)).await?;
        let scout = self
            .ctx
            .profile_repo
            .set_payout_account(scout.id, Some("acct_casey".to_string()))
            .await?;
        Ok(scout)
    }

    pub async fn admin(&self) -> anyhow::Result<Profile> {
        self.profile("Avery Admin", Role::Admin).await
    }

    pub async fn deliver(&self, event: GatewayEvent) -> Result<got1::service::WebhookOutcome> {
        let payload = serde_json::to_string(&event).map_err(|e| AppError::Internal(e.to_string()))?;
        self.ctx
            .evaluation_service
            .handle_webhook(&payload, TEST_SIGNATURE)
            .await
    }

    pub async fn pay(&self, evaluation: &Evaluation, payment_reference: &str) -> Result<got1::service::WebhookOutcome> {
        self.deliver(payment_succeeded(evaluation, payment_reference)).await
    }

    /// Requests an evaluation and settles its checkout, leaving it paid with
    /// funds held.
    pub async fn paid_evaluation(&self, player: &Profile, scout: &Profile) -> anyhow::Result<Evaluation> {
        let evaluation = self
            .ctx
            .evaluation_service
            .request(actor(player), player.id, scout.id, None)
            .await?
            .into_evaluation();
        self.pay(&evaluation, &format!("pi_{}", evaluation.id.simple())).await?;
        let evaluation = self.ctx.evaluation_service.get(actor(player), evaluation.id).await?;
        Ok(evaluation)
    }

    pub async fn notification_kinds(&self, user_id: Uuid) -> anyhow::Result<Vec<String>> {
        let notifications = self.ctx.notification_repo.list_for_user(user_id, 100, 0).await?;
        Ok(notifications.into_iter().map(|n| n.kind).collect())
    }
}

pub fn actor(profile: &Profile) -> Actor {
    Actor::from_profile(profile)
}

pub fn payment_succeeded(evaluation: &Evaluation, payment_reference: &str) -> GatewayEvent {
    GatewayEvent {
        event_id: format!("evt_paid_{}", Uuid::new_v4().simple()),
        kind: GatewayEventKind::PaymentSucceeded {
            evaluation_id: Some(evaluation.id),
            session_reference: evaluation.checkout_session_id.clone(),
            payment_reference: payment_reference.to_string(),
        },
    }
}
