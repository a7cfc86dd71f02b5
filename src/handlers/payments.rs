use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::envelope_status;
use crate::error::AppError;
use crate::services::InitializePayment;
use crate::AppState;

pub async fn initialize(
    State(state): State<AppState>,
    payload: Result<Json<InitializePayment>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    let initialized = state.payments.initialize(request).await?;

    Ok(Json(json!({
        "status": "success",
        "message": "Authorization URL created",
        "reference": initialized.transaction.reference,
        "authorization_url": initialized.authorization_url,
        "access_code": initialized.access_code,
    })))
}

pub async fn verify(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.payments.verify(&reference).await?;

    let message = match envelope_status(tx.status) {
        "success" => "Payment completed",
        "failed" => "Payment failed",
        _ => "Payment not yet completed",
    };

    Ok(Json(json!({
        "status": envelope_status(tx.status),
        "message": message,
        "reference": tx.reference,
        "transaction_status": tx.status,
        "amount": tx.amount.to_string(),
        "currency": tx.currency,
        "payment_method": tx.payment_method,
        "amount_mismatch": tx.amount_mismatch,
    })))
}
