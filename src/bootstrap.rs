use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    api::handler::AppState,
    checkout::{scanner::ScanConfig, CheckoutClient},
    config::Config,
    crm::CrmClient,
    error::AppResult,
    ledger::PgPaymentStore,
    notify::MessengerClient,
    reconcile::{
        analyzer::Thresholds,
        engine::EngineConfig,
        idempotency::PgIdempotencyStore,
        scheduler::{ReconcileScheduleConfig, ReconcileScheduler},
        PaymentStateAnalyzer, ReconciliationEngine,
    },
    schedule::SchedulePolicy,
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url).await?;

    // External collaborators
    let crm = Arc::new(CrmClient::new(
        config.crm_api_url.clone(),
        config.crm_api_token.clone(),
    ));
    info!("✅ CRM client initialized");

    let processor = Arc::new(CheckoutClient::new(
        config.checkout_api_url.clone(),
        config.checkout_api_key.clone(),
    ));
    info!("✅ Checkout client initialized");

    let notifier = Arc::new(MessengerClient::new(
        config.messenger_api_url.clone(),
        config.messenger_api_token.clone(),
    ));
    info!("✅ Messenger client initialized");

    // Durable stores
    let payments = Arc::new(PgPaymentStore::new(pool.clone()));
    let idempotency = Arc::new(PgIdempotencyStore::new(pool.clone()));
    info!("✅ Payment and idempotency stores initialized");

    let analyzer = Arc::new(PaymentStateAnalyzer::new(
        payments.clone(),
        Thresholds::default(),
    ));

    // Engine
    let policy = SchedulePolicy::new(config.business_tz_offset_hours, 30);
    let scan_config = ScanConfig {
        test_customer_pattern: config.test_customer_pattern.clone(),
        ..ScanConfig::default()
    };
    let engine = Arc::new(ReconciliationEngine::new(
        crm.clone(),
        processor,
        payments,
        notifier,
        idempotency,
        policy,
        scan_config,
        EngineConfig::default(),
    ));
    info!("✅ Reconciliation engine initialized");

    // Daily cycle
    let scheduler = ReconcileScheduler::new(
        ReconcileScheduleConfig {
            execution_hour: config.run_hour_utc,
        },
        engine.clone(),
    );
    scheduler.start();
    info!("✅ Daily reconciliation scheduler started (hour {})", config.run_hour_utc);

    Ok(AppState {
        engine,
        crm,
        analyzer,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
