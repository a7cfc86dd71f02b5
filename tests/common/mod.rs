#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use paygate_core::adapters::{InMemoryEventLedger, InMemoryTransactionStore};
use paygate_core::config::{ChannelConfig, ProviderKind};
use paygate_core::domain::{Transaction, TransactionStatus};
use paygate_core::ports::{
    DispatchError, InvoiceSettler, RepositoryError, RepositoryResult, ServiceActivator,
    TransactionStore, TransitionMetadata, TransitionResult,
};
use paygate_core::providers::{PaystackProvider, ProviderRegistry};
use paygate_core::services::signature::{self, SignatureAlgorithm};
use paygate_core::{create_app, AppState};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const SECRET: &str = "sk_test_integration";
pub const CHANNEL: &str = "paystack";

/// Records every settlement call so tests can count side effects.
#[derive(Default)]
pub struct RecordingBilling {
    pub calls: Mutex<Vec<String>>,
    pub unreachable: AtomicBool,
}

impl RecordingBilling {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl InvoiceSettler for RecordingBilling {
    async fn settle_invoice(&self, invoice_id: &str, tx: &Transaction) -> Result<(), DispatchError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("settle:{}:{}", invoice_id, tx.reference));
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(DispatchError::Unreachable("billing timed out".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceActivator for RecordingBilling {
    async fn activate_service(&self, service_id: &str, tx: &Transaction) -> Result<(), DispatchError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("activate:{}:{}", service_id, tx.reference));
        Ok(())
    }
}

/// In-memory store whose reads and transitions fail while `down` is set.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: InMemoryTransactionStore,
    down: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> RepositoryResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for FlakyStore {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        self.check()?;
        self.inner.insert(tx).await
    }

    async fn find_by_reference(&self, reference: &str) -> RepositoryResult<Option<Transaction>> {
        self.check()?;
        self.inner.find_by_reference(reference).await
    }

    async fn find_by_provider_reference(
        &self,
        provider_reference: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        self.check()?;
        self.inner.find_by_provider_reference(provider_reference).await
    }

    async fn transition(
        &self,
        reference: &str,
        from: &[TransactionStatus],
        to: TransactionStatus,
        metadata: TransitionMetadata,
    ) -> RepositoryResult<TransitionResult> {
        self.check()?;
        self.inner.transition(reference, from, to, metadata).await
    }

    async fn list(&self, limit: i64, offset: i64) -> RepositoryResult<Vec<Transaction>> {
        self.check()?;
        self.inner.list(limit, offset).await
    }

    async fn ping(&self) -> RepositoryResult<()> {
        self.check()
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub billing: Arc<RecordingBilling>,
    pub paystack: mockito::ServerGuard,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(InMemoryTransactionStore::new())).await
    }

    pub async fn with_store(transactions: Arc<dyn TransactionStore>) -> Self {
        let paystack = mockito::Server::new_async().await;
        let channel = ChannelConfig {
            id: CHANNEL.to_string(),
            provider: ProviderKind::Paystack,
            enabled: true,
            secret_key: SECRET.to_string(),
            webhook_secret: None,
            base_url: Some(paystack.url()),
            signature_header: None,
            signature_algorithm: None,
            callback_url: None,
        };
        let mut registry = ProviderRegistry::new();
        let provider = PaystackProvider::new(&channel, Duration::from_secs(2)).unwrap();
        registry.register(channel, Arc::new(provider));

        let billing = Arc::new(RecordingBilling::default());
        let state = AppState::new(
            transactions,
            Arc::new(InMemoryEventLedger::new()),
            Arc::new(registry),
            billing.clone(),
            billing.clone(),
            Some("https://pay.example.com".to_string()),
        );

        Self {
            router: create_app(state.clone()),
            state,
            billing,
            paystack,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Initializes a 100 KSH payment for `reference` against a mocked Paystack.
    pub async fn initialize(&mut self, reference: &str, invoice_id: Option<&str>) -> (StatusCode, Value) {
        self.paystack
            .mock("POST", "/transaction/initialize")
            .match_body(mockito::Matcher::PartialJson(json!({ "reference": reference })))
            .with_status(200)
            .with_body(
                json!({
                    "status": true,
                    "message": "Authorization URL created",
                    "data": {
                        "authorization_url": format!("https://checkout.paystack.com/{}", reference),
                        "access_code": reference.to_lowercase(),
                        "reference": reference
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let body = json!({
            "amount": 100,
            "currency": "KSH",
            "email": "payer@example.com",
            "channel_id": CHANNEL,
            "description": "Monthly hosting",
            "invoice_id": invoice_id,
            "reference": reference
        });
        self.send(
            Request::builder()
                .method("POST")
                .uri("/payments/initialize")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Mocks Paystack's verify endpoint for `reference` with a raw status.
    pub async fn mock_verify(&mut self, reference: &str, status: &str) -> mockito::Mock {
        self.paystack
            .mock("GET", format!("/transaction/verify/{}", reference).as_str())
            .with_status(200)
            .with_body(
                json!({
                    "status": true,
                    "message": "Verification successful",
                    "data": {
                        "id": 880001,
                        "status": status,
                        "reference": reference,
                        "amount": 10000,
                        "currency": "KSH",
                        "channel": "mobile_money"
                    }
                })
                .to_string(),
            )
            .create_async()
            .await
    }

    pub async fn post(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_webhook(&self, body: &[u8], signature: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/webhooks/{}", CHANNEL))
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("x-paystack-signature", signature);
        }
        self.send(builder.body(Body::from(body.to_vec())).unwrap())
            .await
    }
}

/// A Paystack charge webhook body and its valid signature.
pub fn charge_webhook(event: &str, reference: &str) -> (Vec<u8>, String) {
    let status = match event {
        "charge.success" => "success",
        "charge.failed" => "failed",
        _ => "pending",
    };
    let body = json!({
        "event": event,
        "data": {
            "id": 880001,
            "status": status,
            "reference": reference,
            "amount": 10000,
            "currency": "KSH",
            "channel": "card"
        }
    })
    .to_string()
    .into_bytes();
    let signature = signature::sign(&body, SECRET, SignatureAlgorithm::HmacSha512);
    (body, signature)
}
