pub mod event;
pub mod transaction;

pub use event::{InboundEvent, MAX_PROCESSING_ATTEMPTS};
pub use transaction::{NewTransaction, StatusChange, Transaction, TransactionStatus};
