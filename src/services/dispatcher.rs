use std::sync::Arc;

use crate::domain::{Transaction, TransactionStatus};
use crate::ports::{InvoiceSettler, ServiceActivator};

/// What the dispatcher managed to do for one completed transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invoice_settled: Option<bool>,
    pub service_activated: Option<bool>,
    pub errors: Vec<String>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs settlement side effects for a transaction that just reached `completed`.
///
/// Effects are best effort: a failing collaborator is logged and reported but
/// never touches the transaction, whose completion is already durable.
pub struct SideEffectDispatcher {
    settler: Arc<dyn InvoiceSettler>,
    activator: Arc<dyn ServiceActivator>,
}

impl SideEffectDispatcher {
    pub fn new(settler: Arc<dyn InvoiceSettler>, activator: Arc<dyn ServiceActivator>) -> Self {
        Self { settler, activator }
    }

    pub async fn on_completed(&self, tx: &Transaction) -> DispatchReport {
        let mut report = DispatchReport::default();

        if tx.status != TransactionStatus::Completed {
            tracing::error!(reference = %tx.reference, status = %tx.status, "Side effects requested for a transaction that is not completed");
            report.errors.push(format!("transaction {} is {}", tx.reference, tx.status));
            return report;
        }

        if let Some(invoice_id) = tx.invoice_id.as_deref() {
            match self.settler.settle_invoice(invoice_id, tx).await {
                Ok(()) => {
                    tracing::info!(reference = %tx.reference, invoice_id, "Invoice settled");
                    report.invoice_settled = Some(true);
                }
                Err(e) => {
                    // an unpaid invoice must not unlock its service
                    tracing::error!(reference = %tx.reference, invoice_id, error = %e, "Invoice settlement failed; manual remediation required");
                    report.invoice_settled = Some(false);
                    report.errors.push(format!("settle invoice {}: {}", invoice_id, e));
                    return report;
                }
            }
        }

        if let Some(service_id) = tx.service_id.as_deref() {
            match self.activator.activate_service(service_id, tx).await {
                Ok(()) => {
                    tracing::info!(reference = %tx.reference, service_id, "Service activated");
                    report.service_activated = Some(true);
                }
                Err(e) => {
                    tracing::error!(reference = %tx.reference, service_id, error = %e, "Service activation failed; manual remediation required");
                    report.service_activated = Some(false);
                    report.errors.push(format!("activate service {}: {}", service_id, e));
                }
            }
        }

        report
    }
}
