use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::crm::DealSource;
use crate::error::{AppError, AppResult};
use crate::reconcile::idempotency::TriggerSource;
use crate::reconcile::summary::{RecreationSummary, ReminderRunSummary, SessionCreationSummary};
use crate::reconcile::{PaymentStateAnalyzer, ReconciliationEngine};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub crm: Arc<dyn DealSource>,
    pub analyzer: Arc<PaymentStateAnalyzer>,
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Diagnostic read of one deal's reconciled payment state
pub async fn get_payment_state(
    State(state): State<AppState>,
    Path(deal_id): Path<i64>,
) -> AppResult<Json<Value>> {
    let deal = state
        .crm
        .get_deal(deal_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("deal {}", deal_id)))?;

    let first_instalment_paid = state.analyzer.is_first_instalment_paid(deal_id).await?;
    let deal_fully_paid = state.analyzer.is_deal_fully_paid(&deal).await?;
    let second_instalment_paid = state.analyzer.is_second_instalment_paid(&deal).await?;

    Ok(Json(json!({
        "deal_id": deal_id,
        "amount": deal.amount,
        "currency": deal.currency,
        "first_instalment_paid": first_instalment_paid,
        "second_instalment_paid": second_instalment_paid,
        "deal_fully_paid": deal_fully_paid,
    })))
}

/// Operator-triggered twin of the daily session-creation run
pub async fn run_deal_collection(
    State(state): State<AppState>,
) -> AppResult<Json<SessionCreationSummary>> {
    let summary = state.engine.process_all_deals(TriggerSource::Manual).await?;
    Ok(Json(summary))
}

/// Operator-triggered twin of the daily reminder run
pub async fn run_reminders(
    State(state): State<AppState>,
) -> AppResult<Json<ReminderRunSummary>> {
    let summary = state
        .engine
        .process_all_reminders(TriggerSource::Manual)
        .await?;
    Ok(Json(summary))
}

/// Operator-triggered twin of the daily expired-session run
pub async fn run_expired_sessions(
    State(state): State<AppState>,
) -> AppResult<Json<RecreationSummary>> {
    let summary = state
        .engine
        .process_expired_sessions(TriggerSource::Manual)
        .await?;
    Ok(Json(summary))
}
