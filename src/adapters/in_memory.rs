use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::event::payload_digest;
use crate::domain::{InboundEvent, StatusChange, Transaction, TransactionStatus, MAX_PROCESSING_ATTEMPTS};
use crate::ports::{
    classify_unmatched, EventLedger, RejectionReason, RepositoryError, RepositoryResult,
    TransactionStore, TransitionMetadata, TransitionResult,
};

/// A thread-safe in-memory transaction store.
///
/// The compare-and-transition runs entirely under one write guard, which gives
/// the same per-record atomicity as the conditional UPDATE of the Postgres store.
/// Used when no `DATABASE_URL` is configured and throughout the tests.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<String, Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&tx.reference) {
            return Err(RepositoryError::Duplicate(tx.reference.clone()));
        }
        transactions.insert(tx.reference.clone(), tx.clone());
        Ok(tx.clone())
    }

    async fn find_by_reference(&self, reference: &str) -> RepositoryResult<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(reference).cloned())
    }

    async fn find_by_provider_reference(
        &self,
        provider_reference: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .find(|tx| tx.provider_reference.as_deref() == Some(provider_reference))
            .cloned())
    }

    async fn transition(
        &self,
        reference: &str,
        from: &[TransactionStatus],
        to: TransactionStatus,
        metadata: TransitionMetadata,
    ) -> RepositoryResult<TransitionResult> {
        let mut transactions = self.transactions.write().await;

        let provider_reference_taken = metadata.provider_reference.as_deref().is_some_and(|p| {
            transactions
                .values()
                .any(|tx| tx.reference != reference && tx.provider_reference.as_deref() == Some(p))
        });

        let Some(current) = transactions.get_mut(reference) else {
            return Ok(TransitionResult::Rejected(RejectionReason::NotFound));
        };

        if !from.contains(&current.status) {
            return Ok(classify_unmatched(current, to));
        }

        if current.provider_reference.is_none() {
            if provider_reference_taken {
                return Err(RepositoryError::Duplicate(format!(
                    "provider reference {} is bound to another transaction",
                    metadata.provider_reference.unwrap_or_default()
                )));
            }
            current.provider_reference = metadata.provider_reference;
        }
        if current.payment_method.is_none() {
            current.payment_method = metadata.payment_method;
        }
        if let Some(reported) = &metadata.reported_amount {
            if *reported != current.amount {
                current.amount_mismatch = true;
            }
        }

        let now = Utc::now();
        current.status = to;
        current.updated_at = now;
        current.status_history.push(StatusChange {
            status: to,
            at: now,
            source_event_id: metadata.source_event_id,
            raw_response: metadata.raw_response,
        });

        Ok(TransitionResult::Applied(current.clone()))
    }

    async fn list(&self, limit: i64, offset: i64) -> RepositoryResult<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut all: Vec<Transaction> = transactions.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

/// A thread-safe in-memory event ledger. Insertion order is receipt order.
#[derive(Default, Clone)]
pub struct InMemoryEventLedger {
    events: Arc<RwLock<Vec<InboundEvent>>>,
}

impl InMemoryEventLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select(&self, limit: i64, keep: impl Fn(&InboundEvent) -> bool) -> Vec<InboundEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|event| keep(event))
            .take(limit.max(0) as usize)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventLedger for InMemoryEventLedger {
    async fn record(
        &self,
        channel_id: &str,
        event_type: &str,
        payload: &str,
    ) -> RepositoryResult<InboundEvent> {
        let mut events = self.events.write().await;
        let digest = payload_digest(payload);
        if let Some(existing) = events
            .iter()
            .find(|event| event.channel_id == channel_id && event.payload_digest == digest)
        {
            return Ok(existing.clone());
        }

        let event = InboundEvent::new(
            channel_id.to_string(),
            event_type.to_string(),
            payload.to_string(),
        );
        events.push(event.clone());
        Ok(event)
    }

    async fn mark_processed(
        &self,
        event_id: Uuid,
        success: bool,
        error: Option<String>,
    ) -> RepositoryResult<()> {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|event| event.id == event_id)
            .ok_or_else(|| RepositoryError::NotFound(event_id.to_string()))?;

        event.processing_attempts = (event.processing_attempts + 1).min(MAX_PROCESSING_ATTEMPTS);
        // a processed event only takes a new error from a successful attempt
        if !event.processed || (success && error.is_some()) {
            event.processing_error = error;
        }
        event.processed = event.processed || success;
        event.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, event_id: Uuid) -> RepositoryResult<Option<InboundEvent>> {
        let events = self.events.read().await;
        Ok(events.iter().find(|event| event.id == event_id).cloned())
    }

    async fn list_unprocessed(&self, limit: i64) -> RepositoryResult<Vec<InboundEvent>> {
        Ok(self.select(limit, InboundEvent::is_retryable).await)
    }

    async fn list_stalled(&self, limit: i64) -> RepositoryResult<Vec<InboundEvent>> {
        Ok(self.select(limit, InboundEvent::is_stalled).await)
    }

    async fn list_anomalies(&self, limit: i64) -> RepositoryResult<Vec<InboundEvent>> {
        Ok(self
            .select(limit, |event| event.processed && event.processing_error.is_some())
            .await)
    }
}
