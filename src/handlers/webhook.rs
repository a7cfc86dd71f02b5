use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::envelope_status;
use crate::error::AppError;
use crate::services::{Disposition, ReconcileOutcome};
use crate::AppState;

/// Provider webhook ingress. The body is taken as raw bytes because the
/// signature covers it exactly as sent.
///
/// Answers 200 once the event is ledgered and handled or acknowledged, 401/400
/// when it is not trustworthy (nothing ledgered), and 5xx when processing
/// failed after recording so the provider redelivers.
pub async fn receive(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let channel = state.providers.channel(&channel_id)?;
    let signature = headers
        .get(channel.provider.signature_header())
        .and_then(|h| h.to_str().ok());

    let receipt = state.engine.ingest(&channel_id, &body, signature).await?;

    let (status, message, anomaly) = match &receipt.disposition {
        Disposition::Reconciled(ReconcileOutcome::Applied {
            transaction,
            dispatch,
            ..
        }) => (
            envelope_status(transaction.status),
            "Transaction updated".to_string(),
            dispatch
                .as_ref()
                .filter(|report| !report.is_clean())
                .map(|report| report.errors.join("; ")),
        ),
        Disposition::Reconciled(ReconcileOutcome::Duplicate(tx)) => (
            envelope_status(tx.status),
            "Transaction already in this state".to_string(),
            None,
        ),
        Disposition::Reconciled(ReconcileOutcome::NoOp(tx)) => {
            (envelope_status(tx.status), "No change".to_string(), None)
        }
        Disposition::Reconciled(ReconcileOutcome::Ignored { event_type }) => (
            "success",
            format!("Event {} acknowledged", event_type),
            None,
        ),
        Disposition::Anomaly(e) => (
            "success",
            "Event acknowledged and flagged for review".to_string(),
            Some(e.to_string()),
        ),
        Disposition::AlreadyProcessed => ("success", "Event already processed".to_string(), None),
        Disposition::Held => (
            "success",
            "Event held for manual reconciliation".to_string(),
            None,
        ),
    };

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": status,
            "message": message,
            "reference": receipt.reference,
            "event_id": receipt.event_id,
            "anomaly": anomaly,
        })),
    ))
}
