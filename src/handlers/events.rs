//! Manual reconciliation views over the event ledger.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::Pagination;
use crate::domain::InboundEvent;
use crate::error::AppError;
use crate::services::Disposition;
use crate::AppState;

fn listing(events: Vec<InboundEvent>) -> Json<serde_json::Value> {
    Json(json!({
        "events": events,
        "count": events.len(),
    }))
}

/// Events still eligible for automatic retry.
pub async fn list_unprocessed(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let events = state.ledger.list_unprocessed(pagination.limit()).await?;
    Ok(listing(events))
}

/// Events that exhausted their attempts.
pub async fn list_stalled(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let events = state.ledger.list_stalled(pagination.limit()).await?;
    Ok(listing(events))
}

/// Acknowledged events that carry an error: a conflict, an unknown reference or
/// failed settlement side effects.
pub async fn list_anomalies(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let events = state.ledger.list_anomalies(pagination.limit()).await?;
    Ok(listing(events))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplayParams {
    /// Replays an event that already hit the attempt cap.
    #[serde(default)]
    pub force: bool,
}

pub async fn replay_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Query(params): Query<ReplayParams>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = if params.force {
        tracing::info!(%event_id, "Forced replay requested");
        state.engine.force_replay(event_id).await?
    } else {
        state.engine.replay(event_id).await?
    };

    let message = match &receipt.disposition {
        Disposition::Reconciled(_) => "Event reconciled".to_string(),
        Disposition::Anomaly(e) => format!("Event flagged: {}", e),
        Disposition::AlreadyProcessed => "Event already processed".to_string(),
        Disposition::Held => "Event exhausted its attempts; replay with force=true".to_string(),
    };

    Ok(Json(json!({
        "status": "success",
        "message": message,
        "reference": receipt.reference,
        "event_id": receipt.event_id,
    })))
}
