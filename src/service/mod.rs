pub mod evaluation_service;
pub mod profile_service;

use std::sync::Arc;
use sqlx::SqlitePool;
use crate::repository::*;
use crate::auth::AuthService;
use crate::config::EvaluationConfig;
use crate::notifications::NotificationDispatcher;
use crate::payments::PaymentGateway;
use evaluation_service::EvaluationService;
use profile_service::ProfileService;

pub use evaluation_service::{RequestOutcome, WebhookOutcome};

pub struct ServiceContext {
    pub profile_repo: Arc<dyn ProfileRepository>,
    pub evaluation_repo: Arc<dyn EvaluationRepository>,
    pub notification_repo: Arc<dyn NotificationRepository>,
    pub offer_repo: Arc<dyn OfferRepository>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub auth_service: Arc<AuthService>,
    pub evaluation_service: Arc<EvaluationService>,
    pub profile_service: Arc<ProfileService>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        profile_repo: Arc<dyn ProfileRepository>,
        evaluation_repo: Arc<dyn EvaluationRepository>,
        notification_repo: Arc<dyn NotificationRepository>,
        webhook_event_repo: Arc<dyn WebhookEventRepository>,
        offer_repo: Arc<dyn OfferRepository>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<NotificationDispatcher>,
        auth_service: Arc<AuthService>,
        evaluation_config: EvaluationConfig,
        base_url: String,
        db_pool: SqlitePool,
    ) -> Self {
        let max_price_cents = evaluation_config.max_price_cents;

        let evaluation_service = Arc::new(EvaluationService::new(
            evaluation_repo.clone(),
            profile_repo.clone(),
            webhook_event_repo,
            gateway,
            dispatcher.clone(),
            evaluation_config,
            base_url,
        ));

        let profile_service = Arc::new(ProfileService::new(
            profile_repo.clone(),
            evaluation_repo.clone(),
            offer_repo.clone(),
            evaluation_service.clone(),
            dispatcher.clone(),
            max_price_cents,
        ));

        Self {
            profile_repo,
            evaluation_repo,
            notification_repo,
            offer_repo,
            dispatcher,
            auth_service,
            evaluation_service,
            profile_service,
            db_pool,
        }
    }
}
