pub mod dispatcher;
pub mod payments;
pub mod reconciliation;
pub mod signature;
pub mod sweeper;

pub use dispatcher::{DispatchReport, SideEffectDispatcher};
pub use payments::{InitializePayment, InitializedPayment, PaymentService};
pub use reconciliation::{
    decide, Decision, Disposition, IngestReceipt, ReconcileOutcome, ReconciliationEngine,
};
pub use sweeper::{run_sweeper, sweep_once, SweepSummary};
