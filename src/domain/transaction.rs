//! Transaction domain entity.
//! Framework-agnostic representation of a charge delegated to a provider.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a transaction. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Initialized,
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Initialized => "initialized",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown transaction status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for TransactionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(TransactionStatus::Initialized),
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One entry of the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: TransactionStatus,
    pub at: DateTime<Utc>,
    pub source_event_id: Option<Uuid>,
    pub raw_response: Option<serde_json::Value>,
}

/// Domain entity representing a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub reference: String,
    pub provider_reference: Option<String>,
    pub channel_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub email: String,
    pub description: Option<String>,
    pub status: TransactionStatus,
    pub payment_method: Option<String>,
    pub invoice_id: Option<String>,
    pub service_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub authorization_url: Option<String>,
    pub amount_mismatch: bool,
    pub status_history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied at initialization.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub reference: String,
    pub channel_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub email: String,
    pub description: Option<String>,
    pub invoice_id: Option<String>,
    pub service_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub provider_reference: Option<String>,
    pub authorization_url: Option<String>,
}

impl Transaction {
    pub fn new(input: NewTransaction) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reference: input.reference,
            provider_reference: input.provider_reference,
            channel_id: input.channel_id,
            amount: input.amount,
            currency: input.currency,
            email: input.email,
            description: input.description,
            status: TransactionStatus::Initialized,
            payment_method: None,
            invoice_id: input.invoice_id,
            service_id: input.service_id,
            metadata: input.metadata,
            authorization_url: input.authorization_url,
            amount_mismatch: false,
            status_history: vec![StatusChange {
                status: TransactionStatus::Initialized,
                at: now,
                source_event_id: None,
                raw_response: None,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    /// Subscription/service-type transactions carry the service they pay for.
    pub fn is_service_payment(&self) -> bool {
        self.service_id.is_some()
    }
}

/// Generates an opaque reference, e.g. `PG-3F2A...`.
pub fn generate_reference() -> String {
    format!("PG-{}", Uuid::new_v4().simple()).to_uppercase()
}
