use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use formflow_engine::{
    ActionExecutor, DbDirectory, DeadlineSweeper, EngineConfig, HandlerRegistry, PgActionSource,
    WorkflowOrchestrator,
};
use formflow_events::{
    DigestDispatcher, EmailConfig, LinkBuilder, LogMailer, Mailer, MessageRenderer,
    NotificationScheduler, PgNotificationQueue, SmtpMailer,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "formflow_worker=debug,formflow_engine=debug,formflow_events=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = EngineConfig::from_env().expect("Invalid engine configuration");
    tracing::info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        digest_interval_secs = config.digest_interval.as_secs(),
        "Loaded worker configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = formflow_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    formflow_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    formflow_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Capabilities ---
    let mailer: Arc<dyn Mailer> = match EmailConfig::from_env() {
        Some(email) => {
            tracing::info!(host = %email.smtp_host, "SMTP delivery enabled");
            Arc::new(SmtpMailer::new(email).expect("Failed to build SMTP transport"))
        }
        None => {
            tracing::warn!("SMTP_HOST not set, emails will only be logged");
            Arc::new(LogMailer)
        }
    };
    let queue = Arc::new(PgNotificationQueue::new(pool.clone()));
    let renderer = Arc::new(MessageRenderer::new(
        config.site_name.clone(),
        LinkBuilder::new(config.base_url.clone()),
    ));
    let notifier = NotificationScheduler::new(Arc::clone(&mailer), queue.clone(), Arc::clone(&renderer));
    let actions = ActionExecutor::new(
        Arc::new(PgActionSource::new(pool.clone())),
        HandlerRegistry::with_builtins().expect("Failed to build action handlers"),
    );
    let orchestrator = Arc::new(WorkflowOrchestrator::new(
        pool.clone(),
        Arc::new(DbDirectory::new(pool.clone())),
        notifier,
        actions,
    ));

    // --- Background services ---
    let cancel = CancellationToken::new();

    let sweeper = DeadlineSweeper::new(pool.clone(), orchestrator, config.sweep_interval);
    let sweeper_cancel = cancel.clone();
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(sweeper_cancel).await;
    });

    let dispatcher = DigestDispatcher::new(queue, mailer, renderer, config.digest_interval);
    let dispatcher_cancel = cancel.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_cancel).await;
    });

    tracing::info!("Worker started (deadline sweeper, digest dispatcher)");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl-C handler");
    tracing::info!("Received SIGINT (Ctrl-C), shutting down");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), sweeper_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await;
    tracing::info!("Graceful shutdown complete");
}
