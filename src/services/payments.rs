use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::domain::transaction::generate_reference;
use crate::domain::{NewTransaction, Transaction};
use crate::error::AppError;
use crate::ports::TransactionStore;
use crate::providers::{InitializeRequest, ProviderRegistry};
use crate::services::reconciliation::{ReconcileOutcome, ReconciliationEngine};
use crate::validation::{
    sanitize_string, validate_amount, validate_currency, validate_email, validate_max_len,
    validate_reference, validate_required, DESCRIPTION_MAX_LEN,
};

#[derive(Debug, Clone, Deserialize)]
pub struct InitializePayment {
    pub amount: BigDecimal,
    pub currency: String,
    pub email: String,
    pub channel_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub invoice_id: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
    /// Caller-chosen reference; generated when absent.
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InitializedPayment {
    pub transaction: Transaction,
    pub authorization_url: String,
    pub access_code: Option<String>,
}

/// Merchant-facing operations: starting a charge and checking on it.
pub struct PaymentService {
    transactions: Arc<dyn TransactionStore>,
    providers: Arc<ProviderRegistry>,
    engine: Arc<ReconciliationEngine>,
    public_base_url: Option<String>,
}

impl PaymentService {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        providers: Arc<ProviderRegistry>,
        engine: Arc<ReconciliationEngine>,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            transactions,
            providers,
            engine,
            public_base_url,
        }
    }

    /// Registers the charge with the provider, then records it as `initialized`.
    pub async fn initialize(&self, request: InitializePayment) -> Result<InitializedPayment, AppError> {
        validate_required("channel_id", &request.channel_id)?;
        validate_amount(&request.amount)?;
        let currency = request.currency.trim().to_uppercase();
        validate_currency(&currency)?;
        let email = request.email.trim().to_lowercase();
        validate_email(&email)?;
        let description = request
            .description
            .as_deref()
            .map(sanitize_string)
            .filter(|d| !d.is_empty());
        if let Some(description) = &description {
            validate_max_len("description", description, DESCRIPTION_MAX_LEN)?;
        }

        let channel = self.providers.enabled_channel(&request.channel_id)?;

        let reference = match request.reference {
            Some(reference) => {
                validate_reference(&reference)?;
                if self.transactions.find_by_reference(&reference).await?.is_some() {
                    return Err(AppError::StateConflict(format!(
                        "reference {} is already in use",
                        reference
                    )));
                }
                reference
            }
            None => generate_reference(),
        };

        let callback_url = channel.config.callback_url.clone().or_else(|| {
            self.public_base_url.as_deref().map(|base| {
                format!("{}/payments/verify/{}", base.trim_end_matches('/'), reference)
            })
        });

        let response = channel
            .provider
            .initialize(&InitializeRequest {
                reference: reference.clone(),
                amount: request.amount.clone(),
                currency: currency.clone(),
                email: email.clone(),
                callback_url,
                metadata: request.metadata.clone(),
            })
            .await?;

        let transaction = self
            .transactions
            .insert(&Transaction::new(NewTransaction {
                reference,
                channel_id: request.channel_id,
                amount: request.amount,
                currency,
                email,
                description,
                invoice_id: request.invoice_id.filter(|id| !id.is_empty()),
                service_id: request.service_id.filter(|id| !id.is_empty()),
                metadata: request.metadata,
                provider_reference: response.provider_reference,
                authorization_url: Some(response.authorization_url.clone()),
            }))
            .await?;

        info!(reference = %transaction.reference, channel_id = %transaction.channel_id, amount = %transaction.amount, "Payment initialized");

        Ok(InitializedPayment {
            transaction,
            authorization_url: response.authorization_url,
            access_code: response.access_code,
        })
    }

    /// Asks the provider for the current status and reconciles it. Safe to
    /// call repeatedly; a provider timeout leaves the status untouched.
    pub async fn verify(&self, reference: &str) -> Result<Transaction, AppError> {
        validate_reference(reference)?;
        let transaction = self
            .transactions
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", reference)))?;

        let channel = self.providers.channel(&transaction.channel_id)?;
        let update = channel.provider.verify(reference).await?;
        if update.reference.as_deref() != Some(reference) {
            return Err(AppError::Upstream(format!(
                "provider answered for {:?} when asked about {}",
                update.reference, reference
            )));
        }

        match self.engine.reconcile(&update, None).await? {
            ReconcileOutcome::Ignored { .. } => Ok(transaction),
            outcome => Ok(outcome.transaction().cloned().unwrap_or(transaction)),
        }
    }

    pub async fn get(&self, reference: &str) -> Result<Transaction, AppError> {
        self.transactions
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", reference)))
    }
}
