use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{
    get_payment_state, health_check, run_deal_collection, run_expired_sessions, run_reminders,
    AppState,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        // Operator endpoints mirroring the daily cycle
        .nest(
            "/api/v1",
            Router::new()
                .route("/reconcile/deals", post(run_deal_collection))
                .route("/reconcile/reminders", post(run_reminders))
                .route("/reconcile/expired-sessions", post(run_expired_sessions))
                .route("/deals/:deal_id/payment-state", get(get_payment_state)),
        )
        .layer(CorsLayer::very_permissive())
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
