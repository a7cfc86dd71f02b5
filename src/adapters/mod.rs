pub mod billing;
pub mod in_memory;
pub mod postgres_event_ledger;
pub mod postgres_transaction_store;

pub use billing::{BillingClient, LoggingBilling};
pub use in_memory::{InMemoryEventLedger, InMemoryTransactionStore};
pub use postgres_event_ledger::PostgresEventLedger;
pub use postgres_transaction_store::PostgresTransactionStore;
