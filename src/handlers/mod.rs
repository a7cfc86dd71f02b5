pub mod events;
pub mod payments;
pub mod transactions;
pub mod webhook;

use crate::domain::TransactionStatus;
use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// `status` field of the response envelope for a transaction status.
pub fn envelope_status(status: TransactionStatus) -> &'static str {
    match status {
        TransactionStatus::Completed => "success",
        TransactionStatus::Failed => "failed",
        TransactionStatus::Initialized | TransactionStatus::Pending => "pending",
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub store: String,
    pub channels: Vec<String>,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store_status = match state.transactions.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::error!(error = %e, "Health check could not reach the transaction store");
            "disconnected"
        }
    };

    let healthy = store_status == "connected";
    let health_response = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: store_status.to_string(),
        channels: state.providers.channel_ids(),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health_response))
}
