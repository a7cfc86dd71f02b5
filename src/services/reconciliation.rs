//! Reconciliation engine.
//!
//! Applies provider signals to stored transactions through the store's
//! compare-and-transition, so two deliveries of the same event can never both
//! move a transaction or both trigger settlement. It is the only writer of
//! `Transaction.status`.

use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{InboundEvent, Transaction, TransactionStatus};
use crate::error::AppError;
use crate::ports::{
    EventLedger, RejectionReason, TransactionStore, TransitionMetadata, TransitionResult,
};
use crate::providers::{ProviderRegistry, ProviderSignal, ProviderUpdate};
use crate::services::dispatcher::{DispatchReport, SideEffectDispatcher};

const OPEN: &[TransactionStatus] = &[TransactionStatus::Initialized, TransactionStatus::Pending];
const UNSTARTED: &[TransactionStatus] = &[TransactionStatus::Initialized];

/// A lost compare-and-swap is re-read and re-decided this many times at most.
const MAX_DECISION_ROUNDS: usize = 3;

/// What the transition table prescribes for a signal against a current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Transition {
        from: &'static [TransactionStatus],
        to: TransactionStatus,
    },
    /// Same terminal signal again.
    Duplicate,
    NoOp,
    /// Contradicts a terminal status.
    Conflict,
    Ignore,
}

pub fn decide(signal: &ProviderSignal, current: TransactionStatus) -> Decision {
    use TransactionStatus::*;

    match (signal, current) {
        (ProviderSignal::Unrecognized(_), _) => Decision::Ignore,

        (ProviderSignal::Completed, Initialized | Pending) => Decision::Transition {
            from: OPEN,
            to: Completed,
        },
        (ProviderSignal::Completed, Completed) => Decision::Duplicate,
        (ProviderSignal::Completed, Failed) => Decision::Conflict,

        (ProviderSignal::Failed, Initialized | Pending) => Decision::Transition {
            from: OPEN,
            to: Failed,
        },
        (ProviderSignal::Failed, Failed) => Decision::Duplicate,
        (ProviderSignal::Failed, Completed) => Decision::Conflict,

        (ProviderSignal::Pending, Initialized) => Decision::Transition {
            from: UNSTARTED,
            to: Pending,
        },
        (ProviderSignal::Pending, Pending | Completed | Failed) => Decision::NoOp,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Applied {
        transaction: Transaction,
        from: TransactionStatus,
        /// Present when the transaction just completed.
        dispatch: Option<DispatchReport>,
    },
    Duplicate(Transaction),
    NoOp(Transaction),
    Ignored { event_type: String },
}

impl ReconcileOutcome {
    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            ReconcileOutcome::Applied { transaction, .. } => Some(transaction),
            ReconcileOutcome::Duplicate(tx) | ReconcileOutcome::NoOp(tx) => Some(tx),
            ReconcileOutcome::Ignored { .. } => None,
        }
    }
}

/// How a ledgered webhook was disposed of.
#[derive(Debug)]
pub enum Disposition {
    Reconciled(ReconcileOutcome),
    /// Acknowledged to stop redelivery; the error is kept on the ledger entry.
    Anomaly(AppError),
    /// Identical body already processed.
    AlreadyProcessed,
    /// Attempt cap reached; left for manual reconciliation.
    Held,
}

#[derive(Debug)]
pub struct IngestReceipt {
    pub event_id: Uuid,
    pub reference: Option<String>,
    pub disposition: Disposition,
}

pub struct ReconciliationEngine {
    transactions: Arc<dyn TransactionStore>,
    ledger: Arc<dyn EventLedger>,
    providers: Arc<ProviderRegistry>,
    dispatcher: Arc<SideEffectDispatcher>,
}

impl ReconciliationEngine {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        ledger: Arc<dyn EventLedger>,
        providers: Arc<ProviderRegistry>,
        dispatcher: Arc<SideEffectDispatcher>,
    ) -> Self {
        Self {
            transactions,
            ledger,
            providers,
            dispatcher,
        }
    }

    /// Applies one provider update to the transaction it names.
    pub async fn reconcile(
        &self,
        update: &ProviderUpdate,
        source_event_id: Option<Uuid>,
    ) -> Result<ReconcileOutcome, AppError> {
        if let ProviderSignal::Unrecognized(kind) = &update.signal {
            info!(event_type = %update.event_type, signal = %kind, "Ignoring unrecognized provider signal");
            return Ok(ReconcileOutcome::Ignored {
                event_type: update.event_type.clone(),
            });
        }

        let mut current = self.locate(update).await?;

        for _ in 0..MAX_DECISION_ROUNDS {
            let (from, to) = match decide(&update.signal, current.status) {
                Decision::Transition { from, to } => (from, to),
                Decision::Duplicate => {
                    debug!(reference = %current.reference, status = %current.status, "Terminal signal already applied");
                    return Ok(ReconcileOutcome::Duplicate(current));
                }
                Decision::NoOp => return Ok(ReconcileOutcome::NoOp(current)),
                Decision::Conflict => return Err(conflict(&current, &update.signal)),
                Decision::Ignore => {
                    return Ok(ReconcileOutcome::Ignored {
                        event_type: update.event_type.clone(),
                    })
                }
            };

            let metadata = TransitionMetadata {
                source_event_id,
                raw_response: Some(update.raw.clone()),
                provider_reference: update.provider_reference.clone(),
                payment_method: update.payment_method.clone(),
                reported_amount: update.amount.clone(),
            };

            match self
                .transactions
                .transition(&current.reference, from, to, metadata)
                .await?
            {
                TransitionResult::Applied(transaction) => {
                    info!(reference = %transaction.reference, from = %current.status, to = %to, "Transaction status updated");
                    if transaction.amount_mismatch && !current.amount_mismatch {
                        warn!(
                            reference = %transaction.reference,
                            stored = %transaction.amount,
                            reported = ?update.amount.as_ref().map(ToString::to_string),
                            "Provider reported a different amount"
                        );
                    }

                    let dispatch = if to == TransactionStatus::Completed {
                        Some(self.dispatcher.on_completed(&transaction).await)
                    } else {
                        None
                    };

                    return Ok(ReconcileOutcome::Applied {
                        transaction,
                        from: current.status,
                        dispatch,
                    });
                }
                TransitionResult::AlreadyInTargetTerminalState(transaction) => {
                    debug!(reference = %transaction.reference, "Concurrent delivery already applied this transition");
                    return Ok(ReconcileOutcome::Duplicate(transaction));
                }
                TransitionResult::Rejected(RejectionReason::NotFound) => {
                    return Err(AppError::NotFound(format!(
                        "Transaction {} not found",
                        current.reference
                    )));
                }
                TransitionResult::Rejected(reason) => {
                    debug!(reference = %current.reference, %reason, "Status moved since read, deciding again");
                    current = self
                        .transactions
                        .find_by_reference(&current.reference)
                        .await?
                        .ok_or_else(|| {
                            AppError::NotFound(format!("Transaction {} not found", current.reference))
                        })?;
                }
            }
        }

        Err(AppError::Internal(format!(
            "status of {} kept changing during reconciliation",
            current.reference
        )))
    }

    /// Provider reference first; the event's own reference when the store does
    /// not know the provider id yet.
    async fn locate(&self, update: &ProviderUpdate) -> Result<Transaction, AppError> {
        if let Some(provider_reference) = update.provider_reference.as_deref() {
            if let Some(tx) = self
                .transactions
                .find_by_provider_reference(provider_reference)
                .await?
            {
                if let Some(reference) = update.reference.as_deref() {
                    if reference != tx.reference {
                        return Err(AppError::StateConflict(format!(
                            "provider reference {} belongs to {}, event names {}",
                            provider_reference, tx.reference, reference
                        )));
                    }
                }
                return Ok(tx);
            }
        }

        let reference = update.reference.as_deref().ok_or_else(|| {
            AppError::Validation(format!("{} event carries no reference", update.event_type))
        })?;
        self.transactions
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", reference)))
    }

    /// Full webhook flow: authenticate, parse, ledger, reconcile, mark.
    ///
    /// Errors before the event is ledgered are returned as is. After that,
    /// errors end up on the ledger entry; only retryable ones are returned so
    /// the provider redelivers.
    pub async fn ingest(
        &self,
        channel_id: &str,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<IngestReceipt, AppError> {
        let channel = self.providers.channel(channel_id)?;
        let provider = channel.provider.clone();

        if !provider.verify_signature(raw_body, signature.unwrap_or_default()) {
            warn!(channel_id, "Rejected webhook with invalid signature");
            return Err(AppError::Signature("invalid webhook signature".to_string()));
        }

        let payload = std::str::from_utf8(raw_body)
            .map_err(|_| AppError::Validation("payload is not valid UTF-8".to_string()))?;
        let update = provider.parse_event(raw_body)?;

        let event = self
            .ledger
            .record(channel_id, &update.event_type, payload)
            .await?;
        info!(event_id = %event.id, channel_id, event_type = %event.event_type, "Webhook recorded");

        self.process(&event, update, false).await
    }

    /// Re-runs a ledgered event. Its signature was checked on receipt.
    pub async fn replay(&self, event_id: Uuid) -> Result<IngestReceipt, AppError> {
        self.replay_event(event_id, false).await
    }

    /// Operator replay of an event that exhausted its attempts. The attempt is
    /// still counted; a failure leaves the event stalled.
    pub async fn force_replay(&self, event_id: Uuid) -> Result<IngestReceipt, AppError> {
        self.replay_event(event_id, true).await
    }

    async fn replay_event(&self, event_id: Uuid, force: bool) -> Result<IngestReceipt, AppError> {
        let event = self
            .ledger
            .get(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {} not found", event_id)))?;

        let parsed = self
            .providers
            .channel(&event.channel_id)
            .and_then(|channel| Ok(channel.provider.parse_event(event.payload.as_bytes())?));

        match parsed {
            Ok(update) => self.process(&event, update, force).await,
            Err(e) => self.settle_attempt(&event, None, Err(e)).await,
        }
    }

    async fn process(
        &self,
        event: &InboundEvent,
        update: ProviderUpdate,
        force: bool,
    ) -> Result<IngestReceipt, AppError> {
        let reference = update.reference.clone();

        if event.processed {
            info!(event_id = %event.id, "Duplicate delivery of a processed event");
            return Ok(IngestReceipt {
                event_id: event.id,
                reference,
                disposition: Disposition::AlreadyProcessed,
            });
        }
        if event.is_stalled() && !force {
            warn!(event_id = %event.id, attempts = event.processing_attempts, "Event exhausted its attempts; held for manual reconciliation");
            return Ok(IngestReceipt {
                event_id: event.id,
                reference,
                disposition: Disposition::Held,
            });
        }

        let result = self.reconcile(&update, Some(event.id)).await;
        self.settle_attempt(event, reference, result).await
    }

    async fn settle_attempt(
        &self,
        event: &InboundEvent,
        reference: Option<String>,
        result: Result<ReconcileOutcome, AppError>,
    ) -> Result<IngestReceipt, AppError> {
        match result {
            Ok(outcome) => {
                // the transaction stays completed; failed side effects are
                // kept on the entry so it is listed for remediation
                let side_effect_error = match &outcome {
                    ReconcileOutcome::Applied {
                        dispatch: Some(report),
                        ..
                    } if !report.is_clean() => Some(report.errors.join("; ")),
                    _ => None,
                };
                if let Some(message) = side_effect_error.as_deref() {
                    warn!(event_id = %event.id, reference = ?reference, error = message, "Settlement side effects failed; manual remediation required");
                }
                self.ledger
                    .mark_processed(event.id, true, side_effect_error)
                    .await?;
                Ok(IngestReceipt {
                    event_id: event.id,
                    reference,
                    disposition: Disposition::Reconciled(outcome),
                })
            }
            Err(e) if e.is_retryable() => {
                error!(event_id = %event.id, error = %e, "Event processing failed; awaiting redelivery");
                if let Err(mark_err) = self
                    .ledger
                    .mark_processed(event.id, false, Some(e.to_string()))
                    .await
                {
                    error!(event_id = %event.id, error = %mark_err, "Failed to record processing error");
                }
                Err(e)
            }
            Err(e) => {
                warn!(event_id = %event.id, reference = ?reference, error = %e, "Event acknowledged with anomaly; manual review required");
                self.ledger
                    .mark_processed(event.id, true, Some(e.to_string()))
                    .await?;
                Ok(IngestReceipt {
                    event_id: event.id,
                    reference,
                    disposition: Disposition::Anomaly(e),
                })
            }
        }
    }
}

fn conflict(current: &Transaction, signal: &ProviderSignal) -> AppError {
    warn!(reference = %current.reference, status = %current.status, signal = ?signal, "Provider signal contradicts terminal status");
    AppError::StateConflict(format!(
        "transaction {} is already {}; provider reported {:?}",
        current.reference, current.status, signal
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEventLedger, InMemoryTransactionStore};
    use crate::config::{ChannelConfig, ProviderKind};
    use crate::domain::NewTransaction;
    use crate::ports::{DispatchError, InvoiceSettler, ServiceActivator};
    use crate::providers::{PaymentProvider, PaystackProvider};
    use crate::services::signature::{self, SignatureAlgorithm};
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const SECRET: &str = "sk_test_engine";

    #[derive(Default)]
    struct CountingBilling {
        settled: AtomicUsize,
        unreachable: bool,
    }

    #[async_trait]
    impl InvoiceSettler for CountingBilling {
        async fn settle_invoice(&self, _invoice_id: &str, _tx: &Transaction) -> Result<(), DispatchError> {
            self.settled.fetch_add(1, Ordering::SeqCst);
            if self.unreachable {
                return Err(DispatchError::Unreachable("billing timed out".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ServiceActivator for CountingBilling {
        async fn activate_service(&self, _service_id: &str, _tx: &Transaction) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    struct Harness {
        engine: Arc<ReconciliationEngine>,
        store: InMemoryTransactionStore,
        ledger: InMemoryEventLedger,
        billing: Arc<CountingBilling>,
    }

    async fn harness() -> Harness {
        harness_with(CountingBilling::default()).await
    }

    async fn harness_with(billing: CountingBilling) -> Harness {
        let channel = ChannelConfig {
            id: "paystack".to_string(),
            provider: ProviderKind::Paystack,
            enabled: true,
            secret_key: SECRET.to_string(),
            webhook_secret: None,
            base_url: None,
            signature_header: None,
            signature_algorithm: None,
            callback_url: None,
        };
        let mut registry = ProviderRegistry::new();
        let provider = PaystackProvider::new(&channel, Duration::from_secs(1)).unwrap();
        registry.register(channel, Arc::new(provider));

        let store = InMemoryTransactionStore::new();
        let ledger = InMemoryEventLedger::new();
        let billing = Arc::new(billing);
        let dispatcher = Arc::new(SideEffectDispatcher::new(billing.clone(), billing.clone()));

        store
            .insert(&Transaction::new(NewTransaction {
                reference: "R1".to_string(),
                channel_id: "paystack".to_string(),
                amount: BigDecimal::from(100),
                currency: "KSH".to_string(),
                email: "payer@example.com".to_string(),
                description: None,
                invoice_id: Some("INV-1".to_string()),
                service_id: None,
                metadata: None,
                provider_reference: None,
                authorization_url: None,
            }))
            .await
            .unwrap();

        let engine = Arc::new(ReconciliationEngine::new(
            Arc::new(store.clone()),
            Arc::new(ledger.clone()),
            Arc::new(registry),
            dispatcher,
        ));
        Harness {
            engine,
            store,
            ledger,
            billing,
        }
    }

    fn webhook(event: &str, reference: &str) -> (Vec<u8>, String) {
        let body = json!({
            "event": event,
            "data": {
                "id": 4099,
                "status": if event == "charge.success" { "success" } else { "failed" },
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

    #[test]
    fn test_transition_table() {
        use TransactionStatus::*;

        assert_eq!(
            decide(&ProviderSignal::Completed, Pending),
            Decision::Transition { from: OPEN, to: Completed }
        );
        assert_eq!(decide(&ProviderSignal::Completed, Completed), Decision::Duplicate);
        assert_eq!(decide(&ProviderSignal::Completed, Failed), Decision::Conflict);
        assert_eq!(
            decide(&ProviderSignal::Failed, Initialized),
            Decision::Transition { from: OPEN, to: Failed }
        );
        assert_eq!(decide(&ProviderSignal::Failed, Failed), Decision::Duplicate);
        assert_eq!(decide(&ProviderSignal::Failed, Completed), Decision::Conflict);
        assert_eq!(
            decide(&ProviderSignal::Pending, Initialized),
            Decision::Transition { from: UNSTARTED, to: Pending }
        );
        assert_eq!(decide(&ProviderSignal::Pending, Pending), Decision::NoOp);
        assert_eq!(decide(&ProviderSignal::Pending, Completed), Decision::NoOp);
        assert_eq!(
            decide(&ProviderSignal::Unrecognized("transfer.success".into()), Pending),
            Decision::Ignore
        );
    }

    #[tokio::test]
    async fn test_redelivered_success_settles_once() {
        let h = harness().await;
        let (body, sig) = webhook("charge.success", "R1");

        for _ in 0..3 {
            h.engine.ingest("paystack", &body, Some(&sig)).await.unwrap();
        }

        let tx = h.store.find_by_reference("R1").await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.status_history.len(), 2);
        assert_eq!(tx.provider_reference.as_deref(), Some("4099"));
        assert_eq!(h.billing.settled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_after_completed_is_acknowledged_anomaly() {
        let h = harness().await;
        let (body, sig) = webhook("charge.success", "R1");
        h.engine.ingest("paystack", &body, Some(&sig)).await.unwrap();

        let (body, sig) = webhook("charge.failed", "R1");
        let receipt = h.engine.ingest("paystack", &body, Some(&sig)).await.unwrap();
        assert!(matches!(
            receipt.disposition,
            Disposition::Anomaly(AppError::StateConflict(_))
        ));

        let tx = h.store.find_by_reference("R1").await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);

        let anomalies = h.ledger.list_anomalies(10).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].id, receipt.event_id);
    }

    #[tokio::test]
    async fn test_bad_signature_leaves_no_ledger_entry() {
        let h = harness().await;
        let (body, _) = webhook("charge.success", "R1");

        let err = h
            .engine
            .ingest("paystack", &body, Some("deadbeef"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Signature(_)));

        let err = h.engine.ingest("paystack", &body, None).await.unwrap_err();
        assert!(matches!(err, AppError::Signature(_)));

        assert!(h.ledger.list_unprocessed(10).await.unwrap().is_empty());
        assert!(h.ledger.list_anomalies(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_reference_is_acknowledged() {
        let h = harness().await;
        let (body, sig) = webhook("charge.success", "R404");

        let receipt = h.engine.ingest("paystack", &body, Some(&sig)).await.unwrap();
        assert!(matches!(receipt.disposition, Disposition::Anomaly(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unrecognized_event_is_ignored() {
        let h = harness().await;
        let body = json!({"event": "transfer.success", "data": {}}).to_string().into_bytes();
        let sig = signature::sign(&body, SECRET, SignatureAlgorithm::HmacSha512);

        let receipt = h.engine.ingest("paystack", &body, Some(&sig)).await.unwrap();
        assert!(matches!(
            receipt.disposition,
            Disposition::Reconciled(ReconcileOutcome::Ignored { .. })
        ));
        let tx = h.store.find_by_reference("R1").await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Initialized);
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_transition_once() {
        let h = harness().await;
        let (body, sig) = webhook("charge.success", "R1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = h.engine.clone();
                let body = body.clone();
                let sig = sig.clone();
                tokio::spawn(async move { engine.ingest("paystack", &body, Some(&sig)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let tx = h.store.find_by_reference("R1").await.unwrap().unwrap();
        assert_eq!(tx.status_history.len(), 2);
        assert_eq!(h.billing.settled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconcile_pending_then_completed() {
        let h = harness().await;
        let mut update = PaystackProvider::new(
            &ChannelConfig {
                id: "paystack".to_string(),
                provider: ProviderKind::Paystack,
                enabled: true,
                secret_key: SECRET.to_string(),
                webhook_secret: None,
                base_url: None,
                signature_header: None,
                signature_algorithm: None,
                callback_url: None,
            },
            Duration::from_secs(1),
        )
        .unwrap()
        .parse_event(&webhook("charge.success", "R1").0)
        .unwrap();
        update.signal = ProviderSignal::Pending;

        let outcome = h.engine.reconcile(&update, None).await.unwrap();
        assert!(matches!(
            outcome,
            ReconcileOutcome::Applied { from: TransactionStatus::Initialized, dispatch: None, .. }
        ));

        let again = h.engine.reconcile(&update, None).await.unwrap();
        assert!(matches!(again, ReconcileOutcome::NoOp(_)));

        update.signal = ProviderSignal::Completed;
        let outcome = h.engine.reconcile(&update, None).await.unwrap();
        let ReconcileOutcome::Applied { transaction, from, dispatch } = outcome else {
            panic!("expected Applied");
        };
        assert_eq!(from, TransactionStatus::Pending);
        assert_eq!(transaction.status, TransactionStatus::Completed);
        assert!(dispatch.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_provider_reference_bound_elsewhere_is_conflict() {
        let h = harness().await;
        let (body, sig) = webhook("charge.success", "R1");
        h.engine.ingest("paystack", &body, Some(&sig)).await.unwrap();

        h.store
            .insert(&Transaction::new(NewTransaction {
                reference: "R2".to_string(),
                channel_id: "paystack".to_string(),
                amount: BigDecimal::from(100),
                currency: "KSH".to_string(),
                email: "payer@example.com".to_string(),
                description: None,
                invoice_id: None,
                service_id: None,
                metadata: None,
                provider_reference: None,
                authorization_url: None,
            }))
            .await
            .unwrap();

        // same provider id 4099, different reference
        let (body, sig) = webhook("charge.success", "R2");
        let receipt = h.engine.ingest("paystack", &body, Some(&sig)).await.unwrap();
        assert!(matches!(
            receipt.disposition,
            Disposition::Anomaly(AppError::StateConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_replay_processes_ledgered_event() {
        let h = harness().await;
        let (body, _) = webhook("charge.success", "R1");
        let event = h
            .ledger
            .record("paystack", "charge.success", std::str::from_utf8(&body).unwrap())
            .await
            .unwrap();

        let receipt = h.engine.replay(event.id).await.unwrap();
        assert!(matches!(
            receipt.disposition,
            Disposition::Reconciled(ReconcileOutcome::Applied { .. })
        ));
        assert!(h.ledger.get(event.id).await.unwrap().unwrap().processed);

        let receipt = h.engine.replay(event.id).await.unwrap();
        assert!(matches!(receipt.disposition, Disposition::AlreadyProcessed));
    }

    #[tokio::test]
    async fn test_stalled_event_is_held() {
        let h = harness().await;
        let (body, sig) = webhook("charge.success", "R1");
        let event = h
            .ledger
            .record("paystack", "charge.success", std::str::from_utf8(&body).unwrap())
            .await
            .unwrap();
        for _ in 0..3 {
            h.ledger
                .mark_processed(event.id, false, Some("store down".to_string()))
                .await
                .unwrap();
        }

        let receipt = h.engine.ingest("paystack", &body, Some(&sig)).await.unwrap();
        assert!(matches!(receipt.disposition, Disposition::Held));
        assert!(h.ledger.list_unprocessed(10).await.unwrap().is_empty());
        assert_eq!(h.ledger.list_stalled(10).await.unwrap().len(), 1);

        let tx = h.store.find_by_reference("R1").await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Initialized);
    }

    #[tokio::test]
    async fn test_failed_settlement_is_kept_on_ledger_entry() {
        let h = harness_with(CountingBilling {
            unreachable: true,
            ..Default::default()
        })
        .await;
        let (body, sig) = webhook("charge.success", "R1");

        let receipt = h.engine.ingest("paystack", &body, Some(&sig)).await.unwrap();
        let Disposition::Reconciled(ReconcileOutcome::Applied { dispatch: Some(report), .. }) =
            &receipt.disposition
        else {
            panic!("expected Applied, got {:?}", receipt.disposition);
        };
        assert_eq!(report.invoice_settled, Some(false));

        let tx = h.store.find_by_reference("R1").await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);

        let event = h.ledger.get(receipt.event_id).await.unwrap().unwrap();
        assert!(event.processed);
        let error = event.processing_error.unwrap();
        assert!(error.contains("settle invoice INV-1"), "{}", error);

        let anomalies = h.ledger.list_anomalies(10).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].id, receipt.event_id);
        assert!(h.ledger.list_unprocessed(10).await.unwrap().is_empty());

        // a redelivery does not settle again
        h.engine.ingest("paystack", &body, Some(&sig)).await.unwrap();
        assert_eq!(h.billing.settled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clean_settlement_leaves_no_anomaly() {
        let h = harness().await;
        let (body, sig) = webhook("charge.success", "R1");

        let receipt = h.engine.ingest("paystack", &body, Some(&sig)).await.unwrap();
        let event = h.ledger.get(receipt.event_id).await.unwrap().unwrap();
        assert!(event.processed);
        assert_eq!(event.processing_error, None);
        assert!(h.ledger.list_anomalies(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_force_replay_reconciles_stalled_event() {
        let h = harness().await;
        let (body, _) = webhook("charge.success", "R1");
        let event = h
            .ledger
            .record("paystack", "charge.success", std::str::from_utf8(&body).unwrap())
            .await
            .unwrap();
        for _ in 0..3 {
            h.ledger
                .mark_processed(event.id, false, Some("store down".to_string()))
                .await
                .unwrap();
        }

        let receipt = h.engine.replay(event.id).await.unwrap();
        assert!(matches!(receipt.disposition, Disposition::Held));

        let receipt = h.engine.force_replay(event.id).await.unwrap();
        assert!(matches!(
            receipt.disposition,
            Disposition::Reconciled(ReconcileOutcome::Applied { .. })
        ));

        let stored = h.ledger.get(event.id).await.unwrap().unwrap();
        assert!(stored.processed);
        assert_eq!(stored.processing_error, None);
        assert!(h.ledger.list_stalled(10).await.unwrap().is_empty());

        let tx = h.store.find_by_reference("R1").await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(h.billing.settled.load(Ordering::SeqCst), 1);
    }
}
