//! Storage and collaborator seams.
//! The reconciliation core depends on these traits, never on a concrete backend.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{InboundEvent, Transaction, TransactionStatus};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Audit data attached to a status transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionMetadata {
    pub source_event_id: Option<Uuid>,
    pub raw_response: Option<serde_json::Value>,
    /// Only written when the stored value is still null.
    pub provider_reference: Option<String>,
    /// Only written when the stored value is still null.
    pub payment_method: Option<String>,
    pub reported_amount: Option<BigDecimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    NotFound,
    /// Record already sits in a different terminal state.
    TerminalConflict {
        current: TransactionStatus,
        attempted: TransactionStatus,
    },
    /// Current status is not in the permitted source set.
    InvalidTransition {
        current: TransactionStatus,
        attempted: TransactionStatus,
    },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::NotFound => f.write_str("transaction not found"),
            RejectionReason::TerminalConflict { current, attempted } => write!(
                f,
                "transaction is already {} and cannot become {}",
                current, attempted
            ),
            RejectionReason::InvalidTransition { current, attempted } => {
                write!(f, "no transition from {} to {}", current, attempted)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    Applied(Transaction),
    AlreadyInTargetTerminalState(Transaction),
    Rejected(RejectionReason),
}

/// Classifies a compare-and-transition whose guard did not match.
pub fn classify_unmatched(current: &Transaction, attempted: TransactionStatus) -> TransitionResult {
    if current.status == attempted && attempted.is_terminal() {
        TransitionResult::AlreadyInTargetTerminalState(current.clone())
    } else if current.status.is_terminal() {
        TransitionResult::Rejected(RejectionReason::TerminalConflict {
            current: current.status,
            attempted,
        })
    } else {
        TransitionResult::Rejected(RejectionReason::InvalidTransition {
            current: current.status,
            attempted,
        })
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction>;

    async fn find_by_reference(&self, reference: &str) -> RepositoryResult<Option<Transaction>>;

    async fn find_by_provider_reference(
        &self,
        provider_reference: &str,
    ) -> RepositoryResult<Option<Transaction>>;

    /// Atomically moves `reference` to `to` if its current status is in `from`,
    /// appending one history entry. Must behave as a compare-and-swap.
    async fn transition(
        &self,
        reference: &str,
        from: &[TransactionStatus],
        to: TransactionStatus,
        metadata: TransitionMetadata,
    ) -> RepositoryResult<TransitionResult>;

    async fn list(&self, limit: i64, offset: i64) -> RepositoryResult<Vec<Transaction>>;

    async fn ping(&self) -> RepositoryResult<()>;
}

#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Stores the raw event. An identical body already on record for the
    /// channel returns the existing entry instead of a new one.
    async fn record(
        &self,
        channel_id: &str,
        event_type: &str,
        payload: &str,
    ) -> RepositoryResult<InboundEvent>;

    /// Counts one processing attempt. The counter never exceeds the cap and a
    /// processed event stays processed. Once processed, the stored error is
    /// only replaced by a successful attempt that carries one.
    async fn mark_processed(
        &self,
        event_id: Uuid,
        success: bool,
        error: Option<String>,
    ) -> RepositoryResult<()>;

    async fn get(&self, event_id: Uuid) -> RepositoryResult<Option<InboundEvent>>;

    /// Unprocessed events below the attempt cap, oldest first.
    async fn list_unprocessed(&self, limit: i64) -> RepositoryResult<Vec<InboundEvent>>;

    /// Unprocessed events that reached the attempt cap, oldest first.
    async fn list_stalled(&self, limit: i64) -> RepositoryResult<Vec<InboundEvent>>;

    /// Acknowledged events that carry an anomaly for manual review, oldest first.
    async fn list_anomalies(&self, limit: i64) -> RepositoryResult<Vec<InboundEvent>>;
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("collaborator rejected request: {0}")]
    Rejected(String),

    #[error("collaborator unreachable: {0}")]
    Unreachable(String),
}

/// Marks an invoice as paid.
#[async_trait]
pub trait InvoiceSettler: Send + Sync {
    async fn settle_invoice(&self, invoice_id: &str, tx: &Transaction) -> Result<(), DispatchError>;
}

/// Activates the service a subscription payment was made for.
#[async_trait]
pub trait ServiceActivator: Send + Sync {
    async fn activate_service(&self, service_id: &str, tx: &Transaction) -> Result<(), DispatchError>;
}
