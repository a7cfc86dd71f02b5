use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::Pagination;
use crate::error::AppError;
use crate::AppState;

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.payments.get(&reference).await?;
    Ok(Json(tx))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let limit = pagination.limit();
    let offset = pagination.offset();

    let transactions = state.transactions.list(limit, offset).await?;

    Ok(Json(json!({
        "transactions": transactions,
        "count": transactions.len(),
        "limit": limit,
        "offset": offset,
    })))
}
