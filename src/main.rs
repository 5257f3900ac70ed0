use std::sync::Arc;
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use got1::{
    api,
    auth::AuthService,
    config::Settings,
    notifications::{
        EmailNotifier, EmailSender, InAppNotifier, LogEmailSender, NotificationDispatcher,
        SmtpEmailSender,
    },
    payments::{DisabledGateway, PaymentGateway, StripeGateway},
    repository,
    service::ServiceContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "got1=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    tracing::info!("Starting Got1 server on {}:{}", settings.server.host, settings.server.port);

    // Initialize database
    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    let auth_service = Arc::new(AuthService::new(
        db_pool.clone(),
        settings.auth.session_duration_hours,
    ));

    match auth_service.cleanup_expired_sessions().await {
        Ok(removed) if removed > 0 => tracing::info!("Removed {} expired sessions", removed),
        Ok(_) => {}
        Err(e) => tracing::warn!("Session cleanup failed: {:?}", e),
    }

    // Initialize repositories
    let profile_repo = Arc::new(repository::SqliteProfileRepository::new(db_pool.clone()));
    let evaluation_repo = Arc::new(repository::SqliteEvaluationRepository::new(db_pool.clone()));
    let notification_repo = Arc::new(repository::SqliteNotificationRepository::new(db_pool.clone()));
    let webhook_event_repo = Arc::new(repository::SqliteWebhookEventRepository::new(db_pool.clone()));
    let offer_repo = Arc::new(repository::SqliteOfferRepository::new(db_pool.clone()));

    // Payment processor
    let gateway: Arc<dyn PaymentGateway> = if settings.stripe.enabled {
        if let (Some(api_key), Some(webhook_secret)) =
            (settings.stripe.secret_key.clone(), settings.stripe.webhook_secret.clone()) {
            tracing::info!("Stripe payment processing enabled");
            Arc::new(StripeGateway::new(api_key, webhook_secret))
        } else {
            tracing::warn!("Stripe enabled but missing configuration");
            Arc::new(DisabledGateway)
        }
    } else {
        tracing::info!("Stripe payment processing disabled");
        Arc::new(DisabledGateway)
    };

    // Email
    let email_sender: Arc<dyn EmailSender> = if settings.email.enabled {
        match SmtpEmailSender::new(&settings.email) {
            Ok(sender) => {
                tracing::info!("SMTP email enabled");
                Arc::new(sender)
            }
            Err(e) => {
                tracing::warn!("SMTP misconfigured, logging emails instead: {:?}", e);
                Arc::new(LogEmailSender)
            }
        }
    } else {
        tracing::info!("Email disabled, logging emails instead");
        Arc::new(LogEmailSender)
    };

    // Side effects of evaluation lifecycle changes
    let dispatcher = Arc::new(NotificationDispatcher::new());
    dispatcher
        .register(Arc::new(InAppNotifier::new(
            notification_repo.clone(),
            settings.server.base_url.clone(),
        )))
        .await;
    dispatcher
        .register(Arc::new(EmailNotifier::new(
            email_sender,
            settings.server.base_url.clone(),
        )))
        .await;

    let service_context = Arc::new(ServiceContext::new(
        profile_repo,
        evaluation_repo,
        notification_repo,
        webhook_event_repo,
        offer_repo,
        gateway,
        dispatcher,
        auth_service,
        settings.evaluations.clone(),
        settings.server.base_url.clone(),
        db_pool.clone(),
    ));

    let app = api::create_app(service_context, Arc::new(settings.clone()));

    let listener = tokio::net::TcpListener::bind(
        format!("{}:{}", settings.server.host, settings.server.port)
    ).await?;

    tracing::info!("Server listening on http://{}:{}", settings.server.host, settings.server.port);

    axum::serve(listener, app).await?;

    Ok(())
}
