pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod providers;
pub mod services;
pub mod startup;
pub mod utils;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::ports::{EventLedger, InvoiceSettler, ServiceActivator, TransactionStore};
use crate::providers::ProviderRegistry;
use crate::services::{PaymentService, ReconciliationEngine, SideEffectDispatcher};

#[derive(Clone)]
pub struct AppState {
    pub transactions: Arc<dyn TransactionStore>,
    pub ledger: Arc<dyn EventLedger>,
    pub providers: Arc<ProviderRegistry>,
    pub engine: Arc<ReconciliationEngine>,
    pub payments: Arc<PaymentService>,
}

impl AppState {
    /// Wires the engine and the payment service over the given stores.
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        ledger: Arc<dyn EventLedger>,
        providers: Arc<ProviderRegistry>,
        settler: Arc<dyn InvoiceSettler>,
        activator: Arc<dyn ServiceActivator>,
        public_base_url: Option<String>,
    ) -> Self {
        let dispatcher = Arc::new(SideEffectDispatcher::new(settler, activator));
        let engine = Arc::new(ReconciliationEngine::new(
            transactions.clone(),
            ledger.clone(),
            providers.clone(),
            dispatcher,
        ));
        let payments = Arc::new(PaymentService::new(
            transactions.clone(),
            providers.clone(),
            engine.clone(),
            public_base_url,
        ));

        Self {
            transactions,
            ledger,
            providers,
            engine,
            payments,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/payments/initialize", post(handlers::payments::initialize))
        .route("/payments/verify/:reference", get(handlers::payments::verify))
        .route("/webhooks/:channel_id", post(handlers::webhook::receive))
        .route("/transactions", get(handlers::transactions::list_transactions))
        .route("/transactions/:reference", get(handlers::transactions::get_transaction))
        .route("/events/unprocessed", get(handlers::events::list_unprocessed))
        .route("/events/stalled", get(handlers::events::list_stalled))
        .route("/events/anomalies", get(handlers::events::list_anomalies))
        .route("/events/:event_id/replay", post(handlers::events::replay_event))
        .layer(axum::middleware::from_fn(
            middleware::request_logger_middleware,
        ))
        .with_state(state)
}
