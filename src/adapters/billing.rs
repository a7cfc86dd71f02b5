use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::domain::Transaction;
use crate::ports::{DispatchError, InvoiceSettler, ServiceActivator};

/// HTTP client for the billing service that owns invoices and subscriptions.
#[derive(Clone)]
pub struct BillingClient {
    client: Client,
    base_url: String,
}

impl BillingClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, tx: &Transaction) -> Result<(), DispatchError> {
        let url = format!("{}{}", self.base_url, path);
        let body = json!({
            "reference": tx.reference,
            "amount": tx.amount.to_string(),
            "currency": tx.currency,
            "payment_method": tx.payment_method,
            "paid_at": tx.updated_at,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DispatchError::Rejected(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl InvoiceSettler for BillingClient {
    async fn settle_invoice(&self, invoice_id: &str, tx: &Transaction) -> Result<(), DispatchError> {
        self.post(&format!("/invoices/{}/settle", invoice_id), tx).await
    }
}

#[async_trait]
impl ServiceActivator for BillingClient {
    async fn activate_service(&self, service_id: &str, tx: &Transaction) -> Result<(), DispatchError> {
        self.post(&format!("/services/{}/activate", service_id), tx).await
    }
}

/// Stand-in used when no billing service is configured: records intent only.
#[derive(Debug, Default, Clone)]
pub struct LoggingBilling;

#[async_trait]
impl InvoiceSettler for LoggingBilling {
    async fn settle_invoice(&self, invoice_id: &str, tx: &Transaction) -> Result<(), DispatchError> {
        tracing::info!(invoice_id, reference = %tx.reference, "Invoice marked paid (no billing service configured)");
        Ok(())
    }
}

#[async_trait]
impl ServiceActivator for LoggingBilling {
    async fn activate_service(&self, service_id: &str, tx: &Transaction) -> Result<(), DispatchError> {
        tracing::info!(service_id, reference = %tx.reference, "Service activated (no billing service configured)");
        Ok(())
    }
}
